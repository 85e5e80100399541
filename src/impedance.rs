use crate::math::J;
use crate::network::{Cable, CableType, ConnectionType, Coord, Network, TransformerConfig};
use crate::topology::Topology;
use num_complex::Complex64;

/// Mean Earth radius (m).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Resistive share of the transformer impedance when no X/R ratio is given.
const DEFAULT_R_FRACTION: f64 = 0.05;

/// Great-circle distance between two points (m), haversine formula.
pub fn haversine_m(a: &Coord, b: &Coord) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Length of a cable route (m).
pub fn cable_length_m(cable: &Cable) -> f64 {
    cable
        .coordinates
        .windows(2)
        .map(|w| haversine_m(&w[0], &w[1]))
        .sum()
}

/// Series impedance of a cable (ohm).
///
/// The phase pair (R12, X12) is used unless `homopolar` is set, in which
/// case the legacy homopolar pair (R0, X0) is used for cables feeding a
/// phase-neutral node.
pub fn cable_impedance(
    cable_type: &CableType,
    length_m: f64,
    distal: ConnectionType,
    homopolar: bool,
) -> Complex64 {
    let km = length_m / 1000.0;
    if homopolar && distal == ConnectionType::MonoPhaseNeutral {
        (cable_type.r0 + J * cable_type.x0) * km
    } else {
        (cable_type.r12 + J * cable_type.x12) * km
    }
}

/// Neutral conductor impedance of a cable (ohm).
pub fn neutral_impedance(cable_type: &CableType, length_m: f64) -> Complex64 {
    (cable_type.r0 + J * cable_type.x0) * (length_m / 1000.0)
}

/// Series impedance of the transformer seen from the secondary (ohm).
///
///   |Z| = ucc/100 * U^2 / S
pub fn transformer_impedance(tr: &TransformerConfig) -> Complex64 {
    let s_va = tr.rated_power_kva * 1000.0;
    if s_va <= 0.0 {
        return Complex64::default();
    }
    let z = tr.short_circuit_percent / 100.0 * tr.rated_voltage.powi(2) / s_va;

    match tr.xr_ratio {
        Some(xr) if xr > 0.0 => {
            let r = z / (1.0 + xr * xr).sqrt();
            r + J * (r * xr)
        }
        _ => {
            let r = DEFAULT_R_FRACTION * z;
            r + J * (z * z - r * r).sqrt()
        }
    }
}

/// BranchImpedance holds per-node impedances of the cable feeding each node.
/// The source and unreachable nodes have zero impedance.
#[derive(Debug, Clone)]
pub struct BranchImpedance {
    /// Cable length (m).
    pub length_m: Vec<f64>,

    /// Phase impedance used by the sweep (ohm).
    pub z_phase: Vec<Complex64>,

    /// Neutral conductor impedance (ohm).
    pub z_neutral: Vec<Complex64>,

    /// Transformer impedance (ohm), zero for an ideal source.
    pub z_source: Complex64,
}

/// Builds the impedance of every branch of the tree.
///
/// Cable types are expected to have been validated.
pub fn make_zbranch(network: &Network, topo: &Topology, homopolar: bool) -> BranchImpedance {
    let nb = topo.node_count();
    let mut length_m = vec![0.0; nb];
    let mut z_phase = vec![Complex64::default(); nb];
    let mut z_neutral = vec![Complex64::default(); nb];

    for &u in &topo.order {
        let Some(c) = topo.parent_cable[u] else {
            continue;
        };
        let cable = &network.cables[c];
        let Some(cable_type) = network.cable_type(&cable.cable_type) else {
            log::warn!("cable '{}' has no cable type, taken as ideal", cable.id);
            continue;
        };
        let len = cable_length_m(cable);
        length_m[u] = len;
        z_phase[u] = cable_impedance(cable_type, len, network.nodes[u].connection, homopolar);
        z_neutral[u] = neutral_impedance(cable_type, len);
    }

    let z_source = network
        .transformer
        .as_ref()
        .map(transformer_impedance)
        .unwrap_or_default();

    BranchImpedance {
        length_m,
        z_phase,
        z_neutral,
        z_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_haversine() {
        // one degree of latitude
        let d = haversine_m(&Coord::new(45.0, 5.0), &Coord::new(46.0, 5.0));
        assert_relative_eq!(d, 111_195.0, max_relative = 1e-4);
        assert_eq!(haversine_m(&Coord::new(1.0, 2.0), &Coord::new(1.0, 2.0)), 0.0);
    }

    #[test]
    fn test_cable_length_is_polyline_sum() {
        let cable = Cable::new("c", "a", "b", "t").route(vec![
            Coord::new(45.0, 5.0),
            Coord::new(45.001, 5.0),
            Coord::new(45.002, 5.0),
        ]);
        let direct = haversine_m(&Coord::new(45.0, 5.0), &Coord::new(45.002, 5.0));
        assert_relative_eq!(cable_length_m(&cable), direct, max_relative = 1e-9);

        let cable = Cable::new("c", "a", "b", "t");
        assert_eq!(cable_length_m(&cable), 0.0);
    }

    #[test]
    fn test_cable_impedance() {
        let ct = CableType {
            id: "t".to_string(),
            r12: 0.2,
            x12: 0.1,
            r0: 0.8,
            x0: 0.3,
            ..Default::default()
        };
        let z = cable_impedance(&ct, 500.0, ConnectionType::Tetra400, false);
        assert_relative_eq!(z.re, 0.1);
        assert_relative_eq!(z.im, 0.05);

        let z = cable_impedance(&ct, 500.0, ConnectionType::MonoPhaseNeutral, false);
        assert_relative_eq!(z.re, 0.1);

        let z = cable_impedance(&ct, 500.0, ConnectionType::MonoPhaseNeutral, true);
        assert_relative_eq!(z.re, 0.4);
        assert_relative_eq!(z.im, 0.15);

        let zn = neutral_impedance(&ct, 2000.0);
        assert_relative_eq!(zn.re, 1.6);
    }

    #[test]
    fn test_transformer_impedance() {
        let mut tr = TransformerConfig {
            rated_power_kva: 400.0,
            rated_voltage: 400.0,
            short_circuit_percent: 4.0,
            power_factor: 0.95,
            xr_ratio: Some(3.0),
            connection: None,
        };
        // |Z| = 0.04 * 400^2 / 400e3 = 0.016
        let z = transformer_impedance(&tr);
        assert_relative_eq!(z.norm(), 0.016, max_relative = 1e-12);
        assert_relative_eq!(z.im / z.re, 3.0, max_relative = 1e-12);

        tr.xr_ratio = None;
        let z = transformer_impedance(&tr);
        assert_relative_eq!(z.norm(), 0.016, max_relative = 1e-12);
        assert_relative_eq!(z.re, 0.05 * 0.016, max_relative = 1e-12);
    }
}
