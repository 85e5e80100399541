mod netcase;

use crate::network::{Cable, CableType, ConnectionType, Coord, Network, Node, PowerEntry};

const EARTH_RADIUS_M: f64 = 6_371_008.8;

pub(crate) fn cable_type(r12: f64, x12: f64) -> CableType {
    CableType {
        id: "t".to_string(),
        label: "test".to_string(),
        r12,
        x12,
        r0: 2.0 * r12,
        x0: x12,
        ..Default::default()
    }
}

/// Point `length_m` north of `from`.
pub(crate) fn north_of(from: Coord, length_m: f64) -> Coord {
    Coord::new(from.lat + (length_m / EARTH_RADIUS_M).to_degrees(), from.lon)
}

/// Straight cable of the given length between two nodes.
pub(crate) fn cable(id: &str, a: &Node, b: &Node) -> Cable {
    Cable::new(id, &a.id, &b.id, "t").route(vec![a.position, b.position])
}

/// Source `s` feeding node `b` with a load of `load_kva` through one cable
/// of `length_m`.
pub(crate) fn feeder(
    length_m: f64,
    r12: f64,
    x12: f64,
    load_kva: f64,
    connection: ConnectionType,
) -> Network {
    let origin = Coord::new(45.0, 5.0);
    let s = Node::source("s", connection).at(origin);
    let b = Node::new("b", connection)
        .at(north_of(origin, length_m))
        .with_load(PowerEntry::new("l1", load_kva));
    Network {
        cables: vec![cable("c1", &s, &b)],
        nodes: vec![s, b],
        cable_types: vec![cable_type(r12, x12)],
        ..Default::default()
    }
}
