use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A voltage imposed on a node for the duration of one calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VoltageOverride {
    /// Node target voltage (V, nominal scale of the node), all phases.
    Forced { voltage: f64 },

    /// Regulator output (V, per-phase reporting scale).
    Regulated { targets: [f64; 3] },
}

/// Side table of voltage overrides keyed by node id.
///
/// Overrides never live on the input nodes: each calculation builds its own
/// table, so concurrent calculations share nothing mutable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoltageOverrides(BTreeMap<String, VoltageOverride>);

impl VoltageOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_id: &str, value: VoltageOverride) {
        self.0.insert(node_id.to_string(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VoltageOverride)> {
        self.0.iter()
    }
}
