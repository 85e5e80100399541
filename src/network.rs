use crate::math::SQRT_3;
use serde::{Deserialize, Serialize};

/// Network models a low-voltage radial distribution network fed by a single
/// source (the transformer's low-voltage terminal).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    /// Connection points, exactly one of which is the source.
    pub nodes: Vec<Node>,

    /// Cables joining the nodes. Orientation is derived from the source.
    pub cables: Vec<Cable>,

    /// Cable catalogue referenced by `Cable::cable_type`.
    pub cable_types: Vec<CableType>,

    /// Source transformer. Without it the source is ideal.
    #[serde(default)]
    pub transformer: Option<TransformerConfig>,

    #[serde(default)]
    pub voltage_system: VoltageSystem,

    /// SRG2 voltage regulators installed on nodes.
    #[serde(default)]
    pub regulators: Vec<RegulatorConfig>,

    /// EQUI8 neutral compensators installed on nodes.
    #[serde(default)]
    pub compensators: Vec<CompensatorConfig>,
}

impl Network {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn cable_type(&self, id: &str) -> Option<&CableType> {
        self.cable_types.iter().find(|ct| ct.id == id)
    }
}

/// Voltage system of the whole project.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum VoltageSystem {
    /// 230 V between phases, no neutral.
    #[serde(rename = "TRI_230")]
    Tri230,
    /// 400 V between phases with a distributed neutral.
    #[default]
    #[serde(rename = "TETRA_400")]
    Tetra400,
}

impl VoltageSystem {
    pub fn has_neutral(&self) -> bool {
        *self == VoltageSystem::Tetra400
    }
}

/// How a node is connected to the network.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Single-phase between a phase and the neutral, 230 V.
    #[serde(rename = "MONO_230V_PN")]
    MonoPhaseNeutral,
    /// Single-phase between two phases, 230 V.
    #[serde(rename = "MONO_230V_PP")]
    MonoPhasePhase,
    /// Three-phase without neutral, 230 V between phases.
    #[serde(rename = "TRI_230V_3F")]
    Tri230,
    /// Three-phase with neutral, 400 V between phases.
    #[default]
    #[serde(rename = "TETRA_3P+N_230_400V")]
    Tetra400,
}

impl ConnectionType {
    pub fn is_three_phase(&self) -> bool {
        matches!(self, ConnectionType::Tri230 | ConnectionType::Tetra400)
    }

    /// Nominal voltage (V) in which node results are expressed.
    pub fn nominal_voltage(&self) -> f64 {
        match self {
            ConnectionType::Tetra400 => 400.0,
            _ => 230.0,
        }
    }

    /// Factor from a phase-to-neutral equivalent magnitude to the nominal
    /// scale of this connection.
    pub fn line_factor(&self) -> f64 {
        match self {
            ConnectionType::MonoPhaseNeutral => 1.0,
            _ => SQRT_3,
        }
    }

    /// Factor from a phase-to-neutral equivalent magnitude to the per-phase
    /// reporting scale (230 V reference).
    pub fn phase_display_factor(&self) -> f64 {
        match self {
            ConnectionType::MonoPhaseNeutral | ConnectionType::Tetra400 => 1.0,
            _ => SQRT_3,
        }
    }

    /// Number of conductors sharing the current in a balanced solve.
    pub(crate) fn phase_multiplier(&self) -> f64 {
        if self.is_three_phase() {
            3.0
        } else {
            1.0
        }
    }
}

/// Reference of per-phase results and regulator thresholds (V).
pub const PHASE_REFERENCE_V: f64 = 230.0;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum Phase {
    A = 0,
    B = 1,
    C = 2,
}

impl Phase {
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Default, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// PowerEntry is one load or production attached to a node.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerEntry {
    pub id: String,

    /// Apparent power (kVA).
    pub power_kva: f64,

    /// Active power (kW). Together with `reactive_kvar` it replaces the
    /// apparent power and bypasses diversity and power factor.
    #[serde(default)]
    pub active_kw: Option<f64>,

    /// Reactive power (kVAr).
    #[serde(default)]
    pub reactive_kvar: Option<f64>,

    /// Phase carrying the whole entry in phase-distributed mode.
    #[serde(default)]
    pub phase: Option<Phase>,
}

impl PowerEntry {
    pub fn new(id: &str, power_kva: f64) -> Self {
        Self {
            id: id.to_string(),
            power_kva,
            ..Default::default()
        }
    }

    pub fn on_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub(crate) fn has_override(&self) -> bool {
        self.active_kw.is_some() || self.reactive_kvar.is_some()
    }
}

/// Node is a connection point of the network.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Geographic position. Not used electrically.
    #[serde(default)]
    pub position: Coord,

    /// Source (transformer low-voltage terminal).
    #[serde(default)]
    pub is_source: bool,

    #[serde(default)]
    pub connection: ConnectionType,

    #[serde(default)]
    pub loads: Vec<PowerEntry>,

    #[serde(default)]
    pub productions: Vec<PowerEntry>,

    /// Target voltage (V, nominal scale of the node). On the source it sets
    /// the slack voltage, elsewhere it is pinned in the forced scenario.
    #[serde(default)]
    pub target_voltage: Option<f64>,
}

impl Node {
    pub fn new(id: &str, connection: ConnectionType) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            connection,
            ..Default::default()
        }
    }

    pub fn source(id: &str, connection: ConnectionType) -> Self {
        Self {
            is_source: true,
            ..Self::new(id, connection)
        }
    }

    pub fn at(mut self, position: Coord) -> Self {
        self.position = position;
        self
    }

    pub fn with_load(mut self, entry: PowerEntry) -> Self {
        self.loads.push(entry);
        self
    }

    pub fn with_production(mut self, entry: PowerEntry) -> Self {
        self.productions.push(entry);
        self
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum InstallationMode {
    #[serde(rename = "AERIEN")]
    Aerial,
    #[serde(rename = "SOUTERRAIN")]
    Underground,
}

/// CableType is a catalogue entry of per-kilometer impedances.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CableType {
    pub id: String,

    #[serde(default)]
    pub label: String,

    /// Phase resistance (ohm/km).
    pub r12: f64,

    /// Phase reactance (ohm/km).
    pub x12: f64,

    /// Homopolar (neutral) resistance (ohm/km).
    pub r0: f64,

    /// Homopolar (neutral) reactance (ohm/km).
    pub x0: f64,

    /// Allowed installation modes. Empty means unrestricted.
    #[serde(default)]
    pub installation_modes: Vec<InstallationMode>,
}

/// Cable joins two nodes along a polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cable {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub node_a: String,

    pub node_b: String,

    pub cable_type: String,

    pub installation: InstallationMode,

    /// Route of the cable. Its length is the sum of the great-circle
    /// distances between consecutive points.
    pub coordinates: Vec<Coord>,
}

impl Cable {
    pub fn new(id: &str, node_a: &str, node_b: &str, cable_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            node_a: node_a.to_string(),
            node_b: node_b.to_string(),
            cable_type: cable_type.to_string(),
            installation: InstallationMode::Underground,
            coordinates: Vec::new(),
        }
    }

    pub fn route(mut self, coordinates: Vec<Coord>) -> Self {
        self.coordinates = coordinates;
        self
    }
}

/// Nameplate data of the source transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Rated power (kVA).
    pub rated_power_kva: f64,

    /// Rated secondary voltage between phases (V).
    pub rated_voltage: f64,

    /// Short-circuit voltage (%).
    pub short_circuit_percent: f64,

    pub power_factor: f64,

    /// Reactance to resistance ratio.
    #[serde(default)]
    pub xr_ratio: Option<f64>,

    #[serde(default)]
    pub connection: Option<ConnectionType>,
}

/// An SRG2 switched voltage regulator installed on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatorConfig {
    pub node_id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Switching steps (%) for the first and second positions. Defaults
    /// depend on the voltage system.
    #[serde(default)]
    pub steps_percent: Option<[f64; 2]>,

    /// Largest downstream load accepted (kVA).
    #[serde(default = "default_max_load")]
    pub max_load_kva: f64,

    /// Largest downstream production accepted (kVA).
    #[serde(default = "default_max_production")]
    pub max_production_kva: f64,

    /// Largest input phase voltage accepted (V).
    #[serde(default = "default_max_input")]
    pub max_input_voltage: f64,
}

impl RegulatorConfig {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            enabled: true,
            steps_percent: None,
            max_load_kva: default_max_load(),
            max_production_kva: default_max_production(),
            max_input_voltage: default_max_input(),
        }
    }
}

/// An EQUI8 neutral compensator installed on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensatorConfig {
    pub node_id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Largest downstream load the compensator can carry (kVA).
    #[serde(default = "default_compensator_rating")]
    pub rated_power_kva: f64,

    /// Phase path impedance (ohm). Computed from the network if absent.
    #[serde(default)]
    pub phase_impedance: Option<f64>,

    /// Neutral path impedance (ohm). Computed from the network if absent.
    #[serde(default)]
    pub neutral_impedance: Option<f64>,
}

impl CompensatorConfig {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            enabled: true,
            rated_power_kva: default_compensator_rating(),
            phase_impedance: None,
            neutral_impedance: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_load() -> f64 {
    100.0
}

fn default_max_production() -> f64 {
    85.0
}

fn default_max_input() -> f64 {
    246.0
}

fn default_compensator_rating() -> f64 {
    50.0
}
