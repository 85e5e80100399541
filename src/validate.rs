//! Input validation run before every calculation.

use crate::error::{CalcError, Result};
use crate::network::{Network, PowerEntry};
use std::collections::HashSet;

/// Validates a network.
///
/// Checks:
/// - Exactly one source node, unique node ids
/// - Cables reference existing nodes and cable types
/// - Powers, impedances and nameplate values are in range
/// - Devices sit on existing, non-source nodes
pub fn validate_network(network: &Network) -> Result<()> {
    let sources = network.nodes.iter().filter(|n| n.is_source).count();
    if sources != 1 {
        return Err(CalcError::SourceCount { found: sources });
    }

    let mut ids = HashSet::with_capacity(network.nodes.len());
    for node in &network.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(CalcError::DuplicateNode {
                node: node.id.clone(),
            });
        }
        for (family, entries) in [("load", &node.loads), ("production", &node.productions)] {
            for e in entries {
                check_entry(&node.id, family, e)?;
            }
        }
        if let Some(u) = node.target_voltage {
            CalcError::check_range("target_voltage", u, f64::MIN_POSITIVE, 1000.0)?;
        }
    }

    for ct in &network.cable_types {
        for (param, value) in [("r12", ct.r12), ("x12", ct.x12), ("r0", ct.r0), ("x0", ct.x0)] {
            CalcError::check_range(param, value, 0.0, f64::MAX)?;
        }
    }

    for cable in &network.cables {
        for node in [&cable.node_a, &cable.node_b] {
            if !ids.contains(node.as_str()) {
                return Err(CalcError::UnknownNode {
                    cable: cable.id.clone(),
                    node: node.clone(),
                });
            }
        }
        if network.cable_type(&cable.cable_type).is_none() {
            return Err(CalcError::UnknownCableType {
                cable: cable.id.clone(),
                cable_type: cable.cable_type.clone(),
            });
        }
    }

    if let Some(tr) = &network.transformer {
        CalcError::check_range("rated_power_kva", tr.rated_power_kva, f64::MIN_POSITIVE, f64::MAX)?;
        CalcError::check_range("rated_voltage", tr.rated_voltage, f64::MIN_POSITIVE, f64::MAX)?;
        CalcError::check_range("short_circuit_percent", tr.short_circuit_percent, 0.0, 100.0)?;
        CalcError::check_range("transformer power_factor", tr.power_factor, 0.0, 1.0)?;
    }

    for reg in &network.regulators {
        check_device(network, "voltage regulator", &reg.node_id)?;
        if let Some(steps) = reg.steps_percent {
            for step in steps {
                CalcError::check_range("regulator step", step, 0.0, 50.0)?;
            }
        }
    }
    for comp in &network.compensators {
        check_device(network, "neutral compensator", &comp.node_id)?;
        CalcError::check_range("rated_power_kva", comp.rated_power_kva, 0.0, f64::MAX)?;
        for (name, z) in [
            ("phase", comp.phase_impedance),
            ("neutral", comp.neutral_impedance),
        ] {
            if let Some(value) = z {
                if !(value.is_finite() && value > 0.0) {
                    return Err(CalcError::InvalidImpedance { name, value });
                }
            }
        }
    }

    Ok(())
}

fn check_entry(node: &str, family: &str, e: &PowerEntry) -> Result<()> {
    let valid = e.power_kva.is_finite()
        && e.power_kva >= 0.0
        && e.active_kw.map_or(true, f64::is_finite)
        && e.reactive_kvar.map_or(true, f64::is_finite);
    if valid {
        Ok(())
    } else {
        Err(CalcError::NegativePower {
            node: node.to_string(),
            entry: format!("{} '{}'", family, e.id),
        })
    }
}

fn check_device(network: &Network, device: &'static str, node_id: &str) -> Result<()> {
    match network.node(node_id) {
        None => Err(CalcError::UnknownDeviceNode {
            device,
            node: node_id.to_string(),
        }),
        Some(node) if node.is_source => Err(CalcError::DeviceOnSource {
            device,
            node: node_id.to_string(),
        }),
        Some(_) => Ok(()),
    }
}
