use crate::result::{CalcResult, NodeMetrics};
use serde::{Deserialize, Serialize};

/// Tolerance band of normal operation (%).
pub const NORMAL_LIMIT_PERCENT: f64 = 8.0;

/// Tolerance band beyond which a node is critical (%).
pub const WARNING_LIMIT_PERCENT: f64 = 10.0;

// absorbs rounding of deviations computed from voltages
const EPS: f64 = 1e-9;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize)]
pub enum Compliance {
    Normal,
    Warning,
    Critical,
}

/// Classifies a deviation from the nominal voltage (%).
pub fn classify(deviation_percent: f64) -> Compliance {
    let d = deviation_percent.abs();
    if d <= NORMAL_LIMIT_PERCENT + EPS {
        Compliance::Normal
    } else if d <= WARNING_LIMIT_PERCENT + EPS {
        Compliance::Warning
    } else {
        Compliance::Critical
    }
}

/// Recomputes the worst node, its circuit and the network compliance from
/// the node metrics of a result.
pub fn summarize(result: &mut CalcResult) {
    let worst = result
        .node_metrics
        .iter()
        .fold(None, |worst: Option<&NodeMetrics>, m| match worst {
            Some(w) if w.deviation_percent.abs() >= m.deviation_percent.abs() => Some(w),
            _ => Some(m),
        });

    match worst {
        Some(w) => {
            result.max_deviation_percent = w.deviation_percent;
            result.max_deviation_circuit = w.circuit;
            result.max_deviation_node = Some(w.node_id.clone());
            result.compliance = classify(w.deviation_percent);
        }
        None => {
            result.max_deviation_percent = 0.0;
            result.max_deviation_circuit = None;
            result.max_deviation_node = None;
            result.compliance = Compliance::Normal;
        }
    }
}
