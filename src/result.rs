use crate::busbar::VirtualBusbar;
use crate::compliance::Compliance;
use crate::equi8::CompensationReport;
use crate::network::Cable;
use crate::opt::{LoadModel, Scenario};
use crate::regulator::RegulationReport;
use serde::{Deserialize, Serialize};

/// CalcResult is the immutable snapshot of one scenario calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcResult {
    pub scenario: Scenario,

    pub load_model: LoadModel,

    /// Input cables with their calculated fields, in input order. Cables
    /// outside the tree are omitted.
    pub cables: Vec<CalculatedCable>,

    /// Diversified load taking part in the scenario (kVA).
    pub total_load_kva: f64,

    /// Diversified production taking part in the scenario (kVA).
    pub total_production_kva: f64,

    /// Sum of cable losses (kW).
    pub total_losses_kw: f64,

    /// Worst deviation from the nominal voltage, signed (%).
    pub max_deviation_percent: f64,

    /// Feeder (circuit) number holding the worst node, if not the source.
    pub max_deviation_circuit: Option<usize>,

    /// Node holding the worst deviation.
    pub max_deviation_node: Option<String>,

    pub compliance: Compliance,

    pub node_voltage_drops: Vec<NodeVoltageDrop>,

    /// One entry per reachable node.
    pub node_metrics: Vec<NodeMetrics>,

    /// Per-phase entries, phase-distributed mode only.
    pub node_phase_metrics: Option<Vec<NodePhaseMetrics>>,

    pub virtual_busbar: VirtualBusbar,

    pub regulation: Option<RegulationReport>,

    pub compensation: Vec<CompensationReport>,

    /// Whether every sweep converged.
    pub converged: bool,

    /// Largest iteration count of the sweeps.
    pub iterations: usize,

    pub warnings: Vec<CalcWarning>,
}

impl CalcResult {
    pub fn node(&self, id: &str) -> Option<&NodeMetrics> {
        self.node_metrics.iter().find(|m| m.node_id == id)
    }

    pub fn node_phases(&self, id: &str) -> Option<&NodePhaseMetrics> {
        self.node_phase_metrics
            .as_ref()
            .and_then(|pm| pm.iter().find(|m| m.node_id == id))
    }

    pub fn cable(&self, id: &str) -> Option<&CalculatedCable> {
        self.cables.iter().find(|c| c.cable.id == id)
    }

    /// Whether the result should be flagged as approximate.
    pub fn is_approximate(&self) -> bool {
        self.warnings.iter().any(|w| w.is_approximation())
    }
}

/// A copy of an input cable with its calculated fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedCable {
    pub cable: Cable,

    /// Node on the source side.
    pub from_node: String,

    /// Node on the load side.
    pub to_node: String,

    /// Route length (m).
    pub length_m: f64,

    /// Phase current, worst phase in phase-distributed mode (A).
    pub current_a: f64,

    /// Phase currents (A), phase-distributed mode only.
    pub phase_currents_a: Option<[f64; 3]>,

    /// Neutral current (A), phase-distributed mode on 400 V systems only.
    pub neutral_current_a: Option<f64>,

    /// Voltage drop along the cable, scale of the load side node (V).
    pub voltage_drop_v: f64,

    pub voltage_drop_percent: f64,

    /// Ohmic losses (kW).
    pub losses_kw: f64,

    /// Power flowing at the sending end.
    pub apparent_power_kva: f64,
    pub active_power_kw: f64,
    pub reactive_power_kvar: f64,
}

/// Voltage of a node relative to its nominal voltage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node_id: String,

    /// Voltage in the nominal scale of the node (V). Mean of the phases in
    /// phase-distributed mode.
    pub voltage_v: f64,

    pub nominal_v: f64,

    /// Deviation from nominal (%). Worst phase in phase-distributed mode.
    pub deviation_percent: f64,

    pub compliance: Compliance,

    /// Feeder number, `None` for the source.
    pub circuit: Option<usize>,
}

/// Per-phase voltages of a node on the 230 V reporting scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePhaseMetrics {
    pub node_id: String,

    pub voltages_v: [f64; 3],

    pub angles_deg: [f64; 3],

    pub deviations_percent: [f64; 3],
}

/// Voltage drop accumulated between the source bus and a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeVoltageDrop {
    pub node_id: String,

    /// Drop from the source bus (V), scale of the node.
    pub drop_v: f64,

    /// Drop relative to the node's nominal voltage (%).
    pub drop_percent: f64,
}

/// Recoverable conditions met during a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalcWarning {
    /// A sweep reached its iteration cap.
    NotConverged {
        phase: Option<usize>,
        iterations: usize,
        max_dv: f64,
    },
    /// Node not reachable from the source, excluded from the calculation.
    Disconnected { node_id: String },
    /// Cable installed in a mode its type does not allow.
    InstallationMode { cable_id: String },
    RegulatorSkipped { node_id: String, reason: String },
    /// EQUI8 impedances outside the characterized domain.
    Equi8OutOfDomain {
        node_id: String,
        phase_impedance: f64,
        neutral_impedance: f64,
    },
    CompensatorOverloaded {
        node_id: String,
        load_kva: f64,
        rated_kva: f64,
    },
}

impl CalcWarning {
    pub fn is_approximation(&self) -> bool {
        matches!(
            self,
            CalcWarning::NotConverged { .. } | CalcWarning::Equi8OutOfDomain { .. }
        )
    }
}
