use crate::math::SQRT_3;
use crate::network::Network;
use crate::sbus::NodePower;
use crate::topology::Topology;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum FlowDirection {
    /// Net consumption: the feeder draws power from the busbar.
    Draw,
    /// Net production: the feeder injects power into the busbar.
    Injection,
}

/// Electrical state at the transformer's low-voltage terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualBusbar {
    /// Busbar voltage, nominal scale of the source (V).
    pub voltage_v: f64,

    /// Approximate total current (A).
    pub current_a: f64,

    /// Net apparent power, negative when the network injects (kVA).
    pub net_power_kva: f64,

    pub net_reactive_kvar: f64,

    /// Drop across the transformer impedance (V).
    pub transformer_drop_v: f64,

    /// Neutral current leaving the source bus, 400 V systems in
    /// phase-distributed mode only (A).
    pub neutral_current_a: Option<f64>,

    /// One entry per feeder leaving the source.
    pub circuits: Vec<BusbarCircuit>,
}

/// Summary of one feeder (departure) leaving the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusbarCircuit {
    /// One-based feeder number.
    pub number: usize,

    pub cable_id: String,

    /// First node of the feeder.
    pub head_node: String,

    /// Subtree apparent power, signed like the active power (kVA).
    pub apparent_power_kva: f64,

    pub reactive_power_kvar: f64,

    pub direction: FlowDirection,

    /// Approximate feeder current (A).
    pub current_a: f64,

    /// Share of the transformer drop allocated to this feeder (V).
    pub voltage_drop_share_v: f64,

    /// Lowest node voltage of the feeder, nominal scale of each node (V).
    pub min_voltage_v: f64,

    /// Highest node voltage of the feeder (V).
    pub max_voltage_v: f64,
}

fn signed_kva(s: Complex64) -> f64 {
    let kva = s.norm() / 1000.0;
    if s.re < 0.0 {
        -kva
    } else {
        kva
    }
}

/// Builds the virtual busbar summary.
///
/// `v_slack` and `v_bus` are the voltages on both sides of the transformer
/// and `node_voltage` the node voltages, all in nominal scale.
pub fn make_busbar(
    network: &Network,
    topo: &Topology,
    snode: &[NodePower],
    v_slack: f64,
    v_bus: f64,
    node_voltage: &[f64],
) -> VirtualBusbar {
    let own: Vec<Complex64> = snode.iter().map(|s| s.total).collect();
    let subtree = topo.subtree_sum(&own);

    let source = &network.nodes[topo.source];
    let current = |s: Complex64| {
        let u = if source.connection.is_three_phase() {
            SQRT_3 * v_bus
        } else {
            v_bus
        };
        if u > 0.0 {
            s.norm() / u
        } else {
            0.0
        }
    };

    let total = subtree[topo.source];
    let transformer_drop_v = v_slack - v_bus;

    let circuits = topo
        .feeders()
        .iter()
        .enumerate()
        .map(|(k, &head)| {
            let s = subtree[head];
            let share = if total.re.abs() > f64::EPSILON {
                s.re / total.re
            } else {
                0.0
            };
            let (min_v, max_v) = topo
                .subtree(head)
                .iter()
                .map(|&u| node_voltage[u])
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            let cable = topo.parent_cable[head]
                .map(|c| network.cables[c].id.clone())
                .unwrap_or_default();

            BusbarCircuit {
                number: k + 1,
                cable_id: cable,
                head_node: network.nodes[head].id.clone(),
                apparent_power_kva: signed_kva(s),
                reactive_power_kvar: s.im / 1000.0,
                direction: if s.re < 0.0 {
                    FlowDirection::Injection
                } else {
                    FlowDirection::Draw
                },
                current_a: current(s),
                voltage_drop_share_v: transformer_drop_v * share,
                min_voltage_v: min_v,
                max_voltage_v: max_v,
            }
        })
        .collect();

    VirtualBusbar {
        voltage_v: v_bus,
        current_a: current(total),
        net_power_kva: signed_kva(total),
        net_reactive_kvar: total.im / 1000.0,
        transformer_drop_v,
        neutral_current_a: None,
        circuits,
    }
}
