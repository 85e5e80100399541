use crate::compliance::{classify, summarize};
use crate::error::{CalcError, Result};
use crate::impedance::{make_zbranch, BranchImpedance};
use crate::network::{CompensatorConfig, Network, PHASE_REFERENCE_V};
use crate::opt::{CalcOpt, Equi8Mode, LoadModel};
use crate::pf::{deviation, worst};
use crate::result::{CalcResult, CalcWarning};
use crate::sbus::make_snode;
use crate::topology::Topology;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Impedances at or below this value (ohm) are outside the domain the
/// EQUI8 curves were fitted on.
pub const EQUI8_MIN_IMPEDANCE: f64 = 0.15;

// correction factor 1 / (A ln Zph + B)
const FACTOR_A: f64 = 0.9119;
const FACTOR_B: f64 = 3.8654;

// neutral current C Zph^D (U_max - U_min) ratio
const NEUTRAL_C: f64 = 0.392;
const NEUTRAL_D: f64 = -0.8065;

/// Result of an EQUI8 correction at one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equi8Correction {
    pub initial_voltages: [f64; 3],

    /// Mean of the initial phase voltages (V).
    pub mean_v: f64,

    /// Phase with the highest initial voltage (0 = A).
    pub max_phase: usize,

    /// Phase with the lowest initial voltage.
    pub min_phase: usize,

    /// Initial spread between the highest and lowest phase (V).
    pub initial_spread_v: f64,

    /// Spread after compensation (V).
    pub corrected_spread_v: f64,

    pub correction_factor: f64,

    /// 2 Zph / (Zph + Zn).
    pub impedance_ratio: f64,

    pub corrected_voltages: [f64; 3],

    /// Current drawn through the compensator neutral (A).
    pub neutral_current_a: f64,

    /// An impedance lies outside the fitted domain.
    pub out_of_domain: bool,
}

/// Computes the EQUI8 correction of three phase voltages.
///
/// Every phase keeps its relative position between the extreme phases
/// while the spread shrinks to the corrected spread. Phase and neutral path
/// impedances (ohm) must be positive.
pub fn equi8_correction(initial: [f64; 3], zph: f64, zn: f64) -> Result<Equi8Correction> {
    for (name, value) in [("phase", zph), ("neutral", zn)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(CalcError::InvalidImpedance { name, value });
        }
    }

    let mean_v = initial.iter().sum::<f64>() / 3.0;
    let mut max_phase = 0;
    let mut min_phase = 0;
    for p in 1..3 {
        if initial[p] > initial[max_phase] {
            max_phase = p;
        }
        if initial[p] < initial[min_phase] {
            min_phase = p;
        }
    }
    let initial_spread_v = initial[max_phase] - initial[min_phase];

    let denominator = FACTOR_A * zph.ln() + FACTOR_B;
    let correction_factor = if denominator > 0.0 {
        1.0 / denominator
    } else {
        0.0
    };
    let impedance_ratio = 2.0 * zph / (zph + zn);
    let corrected_spread_v = initial_spread_v * correction_factor * impedance_ratio;

    let corrected_voltages = if initial_spread_v > 0.0 {
        initial.map(|u| mean_v + (u - mean_v) / initial_spread_v * corrected_spread_v)
    } else {
        initial
    };
    let neutral_current_a = NEUTRAL_C * zph.powf(NEUTRAL_D) * initial_spread_v * impedance_ratio;

    Ok(Equi8Correction {
        initial_voltages: initial,
        mean_v,
        max_phase,
        min_phase,
        initial_spread_v,
        corrected_spread_v,
        correction_factor,
        impedance_ratio,
        corrected_voltages,
        neutral_current_a,
        out_of_domain: zph <= EQUI8_MIN_IMPEDANCE || zn <= EQUI8_MIN_IMPEDANCE,
    })
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum CompensationStatus {
    Applied,
    /// Downstream load above the rated capacity, not compensated.
    Overloaded,
    /// Node not connected to the source.
    Disconnected,
    /// Path impedance not positive, not compensated.
    InvalidImpedance,
}

/// Outcome of one neutral compensator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationReport {
    pub node_id: String,

    pub status: CompensationStatus,

    pub mode: Equi8Mode,

    /// Load downstream of the compensator (kVA).
    pub downstream_load_kva: f64,

    /// Phase and neutral path impedances used (ohm).
    pub phase_impedance: f64,
    pub neutral_impedance: f64,

    pub correction: Option<Equi8Correction>,
}

/// Summed phase and neutral impedances from the source to `node`. The
/// phase path includes the transformer.
fn path_impedance(topo: &Topology, zbr: &BranchImpedance, node: usize) -> (Complex64, Complex64) {
    let path = topo.path(node);
    let zph = zbr.z_source + path.iter().map(|&u| zbr.z_phase[u]).sum::<Complex64>();
    let zn = path.iter().map(|&u| zbr.z_neutral[u]).sum::<Complex64>();
    (zph, zn)
}

/// Phase voltages of a node on the 230 V scale, as reported by `result`.
fn node_phase_voltages(network: &Network, result: &CalcResult, node: usize) -> Option<[f64; 3]> {
    let id = &network.nodes[node].id;
    if let Some(pm) = result.node_phases(id) {
        return Some(pm.voltages_v);
    }
    let conn = network.nodes[node].connection;
    result
        .node(id)
        .map(|m| [m.voltage_v / conn.line_factor() * conn.phase_display_factor(); 3])
}

/// Recomputes the node drops, cable drops and feeder voltage extremes from
/// the node voltages of `result`.
fn refresh_drops(network: &Network, topo: &Topology, result: &mut CalcResult) {
    let Some(phase_metrics) = result.node_phase_metrics.as_ref() else {
        return;
    };
    let nb = topo.node_count();
    let mut voltage = vec![None; nb];
    let mut phases = vec![None; nb];
    for m in &result.node_metrics {
        if let Some(&u) = topo.index.get(&m.node_id) {
            voltage[u] = Some(m.voltage_v);
        }
    }
    for m in phase_metrics {
        if let Some(&u) = topo.index.get(&m.node_id) {
            phases[u] = Some(m.voltages_v);
        }
    }

    let source_factor = network.nodes[topo.source].connection.line_factor();
    let v_bus = result.virtual_busbar.voltage_v;
    for d in result.node_voltage_drops.iter_mut() {
        let Some(&u) = topo.index.get(&d.node_id) else {
            continue;
        };
        let Some(v) = voltage[u] else {
            continue;
        };
        let conn = network.nodes[u].connection;
        d.drop_v = v_bus / source_factor * conn.line_factor() - v;
        d.drop_percent = d.drop_v / conn.nominal_voltage() * 100.0;
    }

    for c in result.cables.iter_mut() {
        let (Some(&p), Some(&u)) = (topo.index.get(&c.from_node), topo.index.get(&c.to_node))
        else {
            continue;
        };
        let (Some(vp), Some(vu)) = (phases[p], phases[u]) else {
            continue;
        };
        let fp = network.nodes[p].connection.phase_display_factor();
        let fu = network.nodes[u].connection.phase_display_factor();
        let drops = [0, 1, 2].map(|k| vp[k] / fp * fu - vu[k]);
        c.voltage_drop_v = worst(&drops);
        c.voltage_drop_percent = c.voltage_drop_v / PHASE_REFERENCE_V * 100.0;
    }

    for circuit in result.virtual_busbar.circuits.iter_mut() {
        let Some(&head) = topo.index.get(&circuit.head_node) else {
            continue;
        };
        let (lo, hi) = topo
            .subtree(head)
            .iter()
            .filter_map(|&u| voltage[u])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        circuit.min_voltage_v = lo;
        circuit.max_voltage_v = hi;
    }
}

fn push_out_of_domain(comp: &CompensatorConfig, zph: f64, zn: f64, result: &mut CalcResult) {
    log::warn!(
        "EQUI8 at '{}' outside its domain: Zph = {:.3} ohm, Zn = {:.3} ohm",
        comp.node_id,
        zph,
        zn
    );
    result.warnings.push(CalcWarning::Equi8OutOfDomain {
        node_id: comp.node_id.clone(),
        phase_impedance: zph,
        neutral_impedance: zn,
    });
}

/// Shifts the phase voltages of every node in the subtree of `node`.
fn shift_subtree(
    network: &Network,
    topo: &Topology,
    result: &mut CalcResult,
    node: usize,
    delta: [f64; 3],
) {
    for w in topo.subtree(node) {
        let n = &network.nodes[w];
        let Some(phases) = result
            .node_phase_metrics
            .as_mut()
            .and_then(|pm| pm.iter_mut().find(|m| m.node_id == n.id))
        else {
            continue;
        };
        for p in 0..3 {
            phases.voltages_v[p] += delta[p];
            phases.deviations_percent[p] = deviation(phases.voltages_v[p], PHASE_REFERENCE_V);
        }
        let mean = phases.voltages_v.iter().sum::<f64>() / 3.0;
        let dev = worst(&phases.deviations_percent);

        if let Some(m) = result.node_metrics.iter_mut().find(|m| m.node_id == n.id) {
            m.voltage_v =
                mean / n.connection.phase_display_factor() * n.connection.line_factor();
            m.deviation_percent = dev;
            m.compliance = classify(dev);
        }
    }
}

fn compensate(
    network: &Network,
    opt: &CalcOpt,
    topo: &Topology,
    zbr: &BranchImpedance,
    load: &[f64],
    comp: &CompensatorConfig,
    result: &mut CalcResult,
) -> Result<CompensationReport> {
    let mut report = CompensationReport {
        node_id: comp.node_id.clone(),
        status: CompensationStatus::Disconnected,
        mode: opt.equi8_mode,
        downstream_load_kva: 0.0,
        phase_impedance: 0.0,
        neutral_impedance: 0.0,
        correction: None,
    };
    let node = match topo.index.get(&comp.node_id) {
        Some(&u) if topo.reachable[u] => u,
        _ => return Ok(report),
    };

    report.downstream_load_kva = load[node];
    if load[node] > comp.rated_power_kva {
        log::warn!(
            "neutral compensator '{}' overloaded: {:.1} kVA downstream, rated {:.1} kVA",
            comp.node_id,
            load[node],
            comp.rated_power_kva
        );
        result.warnings.push(CalcWarning::CompensatorOverloaded {
            node_id: comp.node_id.clone(),
            load_kva: load[node],
            rated_kva: comp.rated_power_kva,
        });
        report.status = CompensationStatus::Overloaded;
        return Ok(report);
    }

    let (zph_path, zn_path) = path_impedance(topo, zbr, node);
    let zph = comp.phase_impedance.unwrap_or_else(|| zph_path.norm());
    let zn = comp.neutral_impedance.unwrap_or_else(|| zn_path.norm());
    report.phase_impedance = zph;
    report.neutral_impedance = zn;
    if [zph, zn].iter().any(|z| !(z.is_finite() && *z > 0.0)) {
        push_out_of_domain(comp, zph, zn, result);
        report.status = CompensationStatus::InvalidImpedance;
        return Ok(report);
    }

    let Some(initial) = node_phase_voltages(network, result, node) else {
        return Ok(report);
    };
    let correction = equi8_correction(initial, zph, zn)?;
    if correction.out_of_domain {
        push_out_of_domain(comp, zph, zn, result);
    }

    if opt.equi8_mode == Equi8Mode::Integrated && opt.load_model == LoadModel::PhaseDistributed {
        let delta = [0, 1, 2].map(|p| correction.corrected_voltages[p] - initial[p]);
        shift_subtree(network, topo, result, node, delta);
    }

    log::debug!(
        "EQUI8 at '{}': spread {:.2} V -> {:.2} V, I_N = {:.1} A",
        comp.node_id,
        correction.initial_spread_v,
        correction.corrected_spread_v,
        correction.neutral_current_a
    );
    report.status = CompensationStatus::Applied;
    report.correction = Some(correction);
    Ok(report)
}

/// Applies the enabled EQUI8 compensators to a solved scenario.
///
/// Returns a new result carrying one report per compensator. In advisory
/// mode the solved voltages are left untouched; in integrated mode the
/// voltages of the compensated node and of every node below it are shifted
/// by the per-phase correction, and the voltage drops derived from them are
/// recomputed. Coupling between neighbouring circuits is not modelled, so
/// integrated voltages downstream are approximate.
///
/// A compensator whose path impedance is zero is left uncompensated and
/// reported with an out-of-domain warning.
pub fn apply_neutral_compensation(
    network: &Network,
    opt: &CalcOpt,
    result: &CalcResult,
) -> Result<CalcResult> {
    let mut out = result.clone();
    let enabled: Vec<&CompensatorConfig> =
        network.compensators.iter().filter(|c| c.enabled).collect();
    if enabled.is_empty() {
        return Ok(out);
    }

    let topo = Topology::build(&network.nodes, &network.cables)?;
    let zbr = make_zbranch(network, &topo, opt.homopolar_single_phase);
    let snode = make_snode(&network.nodes, opt);
    let own_load: Vec<f64> = snode.iter().map(|s| s.load_kva).collect();
    let load = topo.subtree_sum(&own_load);

    let mut reports = Vec::with_capacity(enabled.len());
    for comp in enabled {
        reports.push(compensate(network, opt, &topo, &zbr, &load, comp, &mut out)?);
    }
    if opt.equi8_mode == Equi8Mode::Integrated && opt.load_model == LoadModel::PhaseDistributed {
        refresh_drops(network, &topo, &mut out);
    }
    out.compensation = reports;
    summarize(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ConnectionType;
    use crate::opt::CalcOptBuilder;
    use crate::pf::{run_calc, solve};
    use crate::tests::feeder;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_balanced_is_noop() {
        let c = equi8_correction([230.0; 3], 0.5, 0.6).unwrap();
        assert_eq!(c.corrected_voltages, [230.0; 3]);
        assert_eq!(c.initial_spread_v, 0.0);
        assert_eq!(c.corrected_spread_v, 0.0);
        assert_eq!(c.neutral_current_a, 0.0);
        assert!(!c.out_of_domain);
    }

    #[test]
    fn test_unit_impedances() {
        let c = equi8_correction([240.0, 230.0, 220.0], 1.0, 1.0).unwrap();
        assert_eq!(c.max_phase, 0);
        assert_eq!(c.min_phase, 2);
        assert_abs_diff_eq!(c.mean_v, 230.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.correction_factor, 1.0 / 3.8654, epsilon = 1e-12);
        assert_abs_diff_eq!(c.impedance_ratio, 1.0, epsilon = 1e-12);

        let spread = 20.0 / 3.8654;
        assert_abs_diff_eq!(c.corrected_spread_v, spread, epsilon = 1e-9);
        assert_abs_diff_eq!(c.corrected_voltages[0], 230.0 + spread / 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.corrected_voltages[1], 230.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.corrected_voltages[2], 230.0 - spread / 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.neutral_current_a, 0.392 * 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_domain_and_invalid_impedance() {
        let c = equi8_correction([235.0, 228.0, 226.0], 0.1, 0.4).unwrap();
        assert!(c.out_of_domain);

        assert_eq!(
            equi8_correction([230.0; 3], 0.0, 0.4),
            Err(CalcError::InvalidImpedance {
                name: "phase",
                value: 0.0
            })
        );
        assert!(equi8_correction([230.0; 3], 0.5, f64::NAN).is_err());
    }

    fn unbalanced(mode: Equi8Mode) -> CalcOpt {
        CalcOptBuilder::default()
            .load_model(LoadModel::PhaseDistributed)
            .imbalance_percent(50.0)
            .power_factor(1.0)
            .equi8_mode(mode)
            .build()
            .unwrap()
    }

    #[test]
    fn test_advisory_keeps_voltages() {
        let mut net = feeder(1000.0, 0.30, 0.08, 30.0, ConnectionType::Tetra400);
        net.compensators.push(CompensatorConfig::new("b"));
        let opt = unbalanced(Equi8Mode::Advisory);

        let solved = solve(&net, &opt).unwrap();
        let out = apply_neutral_compensation(&net, &opt, &solved).unwrap();
        assert_eq!(out.node_phase_metrics, solved.node_phase_metrics);

        let report = &out.compensation[0];
        assert_eq!(report.status, CompensationStatus::Applied);
        let c = report.correction.as_ref().unwrap();
        assert!(c.corrected_spread_v < c.initial_spread_v);
        assert!(c.neutral_current_a > 0.0);
        let zph = (0.30f64.powi(2) + 0.08f64.powi(2)).sqrt();
        assert_abs_diff_eq!(report.phase_impedance, zph, epsilon = 1e-6);
    }

    #[test]
    fn test_integrated_shifts_voltages() {
        let mut net = feeder(1000.0, 0.30, 0.08, 30.0, ConnectionType::Tetra400);
        net.compensators.push(CompensatorConfig::new("b"));
        let opt = unbalanced(Equi8Mode::Integrated);

        let solved = solve(&net, &opt).unwrap();
        let out = apply_neutral_compensation(&net, &opt, &solved).unwrap();
        let c = out.compensation[0].correction.as_ref().unwrap();

        let v = out.node_phases("b").unwrap().voltages_v;
        for p in 0..3 {
            assert_abs_diff_eq!(v[p], c.corrected_voltages[p], epsilon = 1e-9);
        }
        let spread = v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            - v.iter().copied().fold(f64::INFINITY, f64::min);
        assert_abs_diff_eq!(spread, c.corrected_spread_v, epsilon = 1e-9);

        // worst deviation follows the corrected voltages
        assert!(out.node("b").unwrap().deviation_percent.abs()
            < solved.node("b").unwrap().deviation_percent.abs());

        // drops derived from the shifted voltages
        let vb = out.node("b").unwrap().voltage_v;
        let drop = out
            .node_voltage_drops
            .iter()
            .find(|d| d.node_id == "b")
            .unwrap();
        assert_abs_diff_eq!(drop.drop_v, out.virtual_busbar.voltage_v - vb, epsilon = 1e-9);

        let vs = out.node_phases("s").unwrap().voltages_v;
        let cable_drop = worst(&[0, 1, 2].map(|p| vs[p] - v[p]));
        let cable = out.cable("c1").unwrap();
        assert_abs_diff_eq!(cable.voltage_drop_v, cable_drop, epsilon = 1e-9);
        assert!(cable.voltage_drop_v.abs() < solved.cable("c1").unwrap().voltage_drop_v.abs());

        let circuit = &out.virtual_busbar.circuits[0];
        assert_abs_diff_eq!(circuit.min_voltage_v, vb, epsilon = 1e-9);
        assert_abs_diff_eq!(circuit.max_voltage_v, vb, epsilon = 1e-9);
    }

    #[test]
    fn test_short_path_is_out_of_domain() {
        let mut net = feeder(100.0, 0.30, 0.08, 20.0, ConnectionType::Tetra400);
        net.compensators.push(CompensatorConfig::new("b"));
        let opt = unbalanced(Equi8Mode::Advisory);

        let out = run_calc(&net, &opt).unwrap();
        let report = &out.compensation[0];
        assert_eq!(report.status, CompensationStatus::Applied);
        assert!(report.correction.as_ref().unwrap().out_of_domain);
        assert!(out.warnings.iter().any(|w| matches!(
            w,
            CalcWarning::Equi8OutOfDomain { node_id, .. } if node_id == "b"
        )));
        assert!(out.is_approximate());
    }

    #[test]
    fn test_zero_neutral_impedance_is_a_warning() {
        let mut net = feeder(500.0, 0.30, 0.08, 20.0, ConnectionType::Tetra400);
        net.cable_types[0].r0 = 0.0;
        net.cable_types[0].x0 = 0.0;
        net.compensators.push(CompensatorConfig::new("b"));
        let opt = unbalanced(Equi8Mode::Advisory);

        let out = run_calc(&net, &opt).unwrap();
        let report = &out.compensation[0];
        assert_eq!(report.status, CompensationStatus::InvalidImpedance);
        assert!(report.correction.is_none());
        assert_eq!(report.neutral_impedance, 0.0);
        assert!(out.warnings.iter().any(|w| matches!(
            w,
            CalcWarning::Equi8OutOfDomain {
                neutral_impedance, ..
            } if *neutral_impedance == 0.0
        )));
        assert!(out.node_phase_metrics.is_some());
    }

    #[test]
    fn test_overloaded_compensator() {
        let mut net = feeder(1000.0, 0.30, 0.08, 30.0, ConnectionType::Tetra400);
        let mut comp = CompensatorConfig::new("b");
        comp.rated_power_kva = 10.0;
        net.compensators.push(comp);
        let opt = unbalanced(Equi8Mode::Integrated);

        let solved = solve(&net, &opt).unwrap();
        let out = apply_neutral_compensation(&net, &opt, &solved).unwrap();
        assert_eq!(out.compensation[0].status, CompensationStatus::Overloaded);
        assert!(out.compensation[0].correction.is_none());
        assert_eq!(out.node_phase_metrics, solved.node_phase_metrics);
        assert!(out
            .warnings
            .iter()
            .any(|w| matches!(w, CalcWarning::CompensatorOverloaded { .. })));
    }
}
