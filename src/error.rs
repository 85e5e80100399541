//! Fatal errors raised before any computation takes place.
//!
//! Recoverable numerical conditions are not errors: they are reported as
//! [`CalcWarning`](crate::CalcWarning) values attached to the result.

use thiserror::Error;

/// Result type alias using [`CalcError`].
pub type Result<T> = std::result::Result<T, CalcError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalcError {
    /// The network must have exactly one source node.
    #[error("network must have exactly one source node, found {found}")]
    SourceCount { found: usize },

    #[error("duplicate node id '{node}'")]
    DuplicateNode { node: String },

    #[error("cable '{cable}' references unknown node '{node}'")]
    UnknownNode { cable: String, node: String },

    #[error("cable '{cable}' references unknown cable type '{cable_type}'")]
    UnknownCableType { cable: String, cable_type: String },

    /// A cable closes a loop: the network is not radial.
    #[error("cable '{cable}' closes a loop, network is not radial")]
    NotRadial { cable: String },

    #[error("{param} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        param: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{kind} phase split must sum to 100%, got {sum}%")]
    InvalidPhaseSplit { kind: &'static str, sum: f64 },

    #[error("{entry} on node '{node}' has a negative or non-finite power")]
    NegativePower { node: String, entry: String },

    #[error("{device} references unknown node '{node}'")]
    UnknownDeviceNode { device: &'static str, node: String },

    #[error("{device} cannot be installed on the source node '{node}'")]
    DeviceOnSource { device: &'static str, node: String },

    #[error("{name} impedance must be positive and finite, got {value}")]
    InvalidImpedance { name: &'static str, value: f64 },
}

impl CalcError {
    pub(crate) fn out_of_range(param: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self::OutOfRange {
            param,
            value,
            min,
            max,
        }
    }

    /// Checks `min <= value <= max`, rejecting NaN.
    pub(crate) fn check_range(param: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
        if value.is_finite() && value >= min && value <= max {
            Ok(())
        } else {
            Err(Self::out_of_range(param, value, min, max))
        }
    }
}
