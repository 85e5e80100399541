use crate::busbar::make_busbar;
use crate::compliance::{classify, summarize, Compliance};
use crate::debug::{format_f64_vec, format_rect_vec};
use crate::equi8::apply_neutral_compensation;
use crate::error::Result;
use crate::impedance::{make_zbranch, BranchImpedance};
use crate::math::neutral_sum;
use crate::network::{Network, PHASE_REFERENCE_V};
use crate::opt::{CalcOpt, LoadModel, Scenario};
use crate::overrides::{VoltageOverride, VoltageOverrides};
use crate::radial::{radial_pf, LogProgress, SweepCase, SweepSolution};
use crate::regulator::apply_voltage_regulators;
use crate::result::{
    CalcResult, CalcWarning, CalculatedCable, NodeMetrics, NodePhaseMetrics, NodeVoltageDrop,
};
use crate::sbus::{make_snode, NodePower};
use crate::topology::Topology;
use crate::validate::validate_network;

use num_complex::Complex64;
use rayon::prelude::*;

/// Everything computed by one solve, kept for the stages that follow it
/// (regulation, compensation). Lives only as long as the calling stage.
pub(crate) struct SolveState {
    pub topo: Topology,
    pub zbr: BranchImpedance,
    pub snode: Vec<NodePower>,

    /// One sweep in balanced mode, one per phase otherwise.
    pub sweeps: Vec<SweepSolution>,

    /// Slack phase voltage magnitude (V).
    pub v_slack: f64,
}

impl SolveState {
    pub fn sweep(&self, p: usize) -> &SweepSolution {
        if self.sweeps.len() == 1 {
            &self.sweeps[0]
        } else {
            &self.sweeps[p]
        }
    }

    /// Per-phase voltages of node `u` on the 230 V reporting scale.
    pub fn phase_voltages(&self, network: &Network, u: usize) -> [f64; 3] {
        let f = network.nodes[u].connection.phase_display_factor();
        [0, 1, 2].map(|p| self.sweep(p).v[u].norm() * f)
    }

    /// Per-phase voltages of node `u` before any pinning.
    pub fn upstream_phase_voltages(&self, network: &Network, u: usize) -> [f64; 3] {
        let f = network.nodes[u].connection.phase_display_factor();
        [0, 1, 2].map(|p| self.sweep(p).v_upstream[u].norm() * f)
    }
}

/// Runs a load flow for the scenario of `opt`.
///
/// The network and options are validated first; any violation is returned
/// as an error and nothing is computed. Numerical problems (no convergence)
/// are reported as warnings on the result.
pub fn solve(network: &Network, opt: &CalcOpt) -> Result<CalcResult> {
    let overrides = forced_overrides(network, opt);
    let (result, _) = solve_with_overrides(network, opt, &overrides)?;
    Ok(result)
}

/// Runs the complete calculation of one scenario: load flow, voltage
/// regulators, then neutral compensators.
pub fn run_calc(network: &Network, opt: &CalcOpt) -> Result<CalcResult> {
    let result = apply_voltage_regulators(network, opt)?;
    apply_neutral_compensation(network, opt, &result)
}

/// Runs [`run_calc`] for every scenario in parallel.
pub fn run_all_scenarios(network: &Network, opt: &CalcOpt) -> Result<Vec<CalcResult>> {
    Scenario::ALL
        .par_iter()
        .map(|&scenario| run_calc(network, &opt.for_scenario(scenario)))
        .collect()
}

/// Target voltages pinned by the forced scenario.
pub(crate) fn forced_overrides(network: &Network, opt: &CalcOpt) -> VoltageOverrides {
    let mut overrides = VoltageOverrides::new();
    if opt.scenario == Scenario::Forced {
        for node in network.nodes.iter().filter(|n| !n.is_source) {
            if let Some(voltage) = node.target_voltage {
                overrides.insert(&node.id, VoltageOverride::Forced { voltage });
            }
        }
    }
    overrides
}

pub(crate) fn solve_with_overrides(
    network: &Network,
    opt: &CalcOpt,
    overrides: &VoltageOverrides,
) -> Result<(CalcResult, SolveState)> {
    opt.validate()?;
    validate_network(network)?;

    let topo = Topology::build(&network.nodes, &network.cables)?;
    let zbr = make_zbranch(network, &topo, opt.homopolar_single_phase);
    let snode = make_snode(&network.nodes, opt);
    let v_slack = slack_voltage(network, &topo);
    let pinned = pinned_voltages(network, &topo, overrides);

    let n_sweeps = match opt.load_model {
        LoadModel::Balanced => 1,
        LoadModel::PhaseDistributed => 3,
    };
    let progress = LogProgress {};
    let sweeps: Vec<SweepSolution> = (0..n_sweeps)
        .map(|p| {
            let s_node: Vec<Complex64> = snode.iter().map(|s| s.phases[p]).collect();
            let case = SweepCase {
                topo: &topo,
                z_branch: &zbr.z_phase,
                s_node: &s_node,
                v_slack: Complex64::new(v_slack, 0.0),
                z_source: zbr.z_source,
                pinned: &pinned[p],
            };
            radial_pf(&case, opt.tolerance, opt.max_iterations, Some(&progress))
        })
        .collect();

    let state = SolveState {
        topo,
        zbr,
        snode,
        sweeps,
        v_slack,
    };
    let result = make_result(network, opt, &state);
    Ok((result, state))
}

/// Slack phase voltage: source target, else transformer rating, else the
/// nominal voltage of the source connection.
fn slack_voltage(network: &Network, topo: &Topology) -> f64 {
    let source = &network.nodes[topo.source];
    let u = source
        .target_voltage
        .or_else(|| network.transformer.as_ref().map(|tr| tr.rated_voltage))
        .unwrap_or_else(|| source.connection.nominal_voltage());
    u / source.connection.line_factor()
}

/// Pinned phase magnitudes of each sweep, from the override side table.
fn pinned_voltages(
    network: &Network,
    topo: &Topology,
    overrides: &VoltageOverrides,
) -> [Vec<Option<f64>>; 3] {
    let nb = topo.node_count();
    let mut pinned = [vec![None; nb], vec![None; nb], vec![None; nb]];
    for (id, ov) in overrides.iter() {
        let Some(&u) = topo.index.get(id) else {
            continue;
        };
        if u == topo.source || !topo.reachable[u] {
            continue;
        }
        let conn = network.nodes[u].connection;
        for (p, pin) in pinned.iter_mut().enumerate() {
            pin[u] = Some(match ov {
                VoltageOverride::Forced { voltage } => voltage / conn.line_factor(),
                VoltageOverride::Regulated { targets } => {
                    targets[p] / conn.phase_display_factor()
                }
            });
        }
    }
    pinned
}

pub(crate) fn deviation(v: f64, nominal: f64) -> f64 {
    (v - nominal) / nominal * 100.0
}

/// Largest magnitude, keeping its sign.
pub(crate) fn worst(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .fold(0.0, |w: f64, d| if d.abs() > w.abs() { d } else { w })
}

fn make_result(network: &Network, opt: &CalcOpt, state: &SolveState) -> CalcResult {
    let topo = &state.topo;
    let distributed = opt.load_model == LoadModel::PhaseDistributed;
    let mut warnings = Vec::new();

    for (k, sweep) in state.sweeps.iter().enumerate() {
        if !sweep.converged {
            let w = CalcWarning::NotConverged {
                phase: if distributed { Some(k) } else { None },
                iterations: sweep.iterations,
                max_dv: sweep.max_dv,
            };
            warnings.push(w);
        }
    }
    for (u, node) in network.nodes.iter().enumerate() {
        if !topo.reachable[u] {
            log::warn!("node '{}' is not connected to the source", node.id);
            warnings.push(CalcWarning::Disconnected {
                node_id: node.id.clone(),
            });
        }
    }
    for cable in &network.cables {
        if let Some(ct) = network.cable_type(&cable.cable_type) {
            if !ct.installation_modes.is_empty()
                && !ct.installation_modes.contains(&cable.installation)
            {
                log::warn!(
                    "cable '{}' installed {:?}, not allowed for type '{}'",
                    cable.id,
                    cable.installation,
                    ct.id
                );
                warnings.push(CalcWarning::InstallationMode {
                    cable_id: cable.id.clone(),
                });
            }
        }
    }

    // node voltages in nominal scale, source bus voltage
    let nb = topo.node_count();
    let n_sweeps = state.sweeps.len() as f64;
    let mut node_voltage = vec![0.0; nb];
    for &u in &topo.order {
        let mean = state.sweeps.iter().map(|s| s.v[u].norm()).sum::<f64>() / n_sweeps;
        node_voltage[u] = mean * network.nodes[u].connection.line_factor();
    }
    let source_factor = network.nodes[topo.source].connection.line_factor();
    let v_bus = state.sweeps.iter().map(|s| s.v_bus.norm()).sum::<f64>() / n_sweeps * source_factor;
    let v_slack = state.v_slack * source_factor;

    let feeder = topo.feeder_numbers();
    let mut node_metrics = Vec::with_capacity(topo.order.len());
    let mut node_phase_metrics = Vec::new();
    let mut node_voltage_drops = Vec::with_capacity(topo.order.len());
    for (u, node) in network.nodes.iter().enumerate() {
        if !topo.reachable[u] {
            continue;
        }
        let nominal = node.connection.nominal_voltage();
        let dev = if distributed {
            let voltages = state.phase_voltages(network, u);
            let deviations = voltages.map(|v| deviation(v, PHASE_REFERENCE_V));
            node_phase_metrics.push(NodePhaseMetrics {
                node_id: node.id.clone(),
                voltages_v: voltages,
                angles_deg: [0, 1, 2].map(|p| state.sweep(p).v[u].arg().to_degrees()),
                deviations_percent: deviations,
            });
            worst(&deviations)
        } else {
            deviation(node_voltage[u], nominal)
        };
        node_metrics.push(NodeMetrics {
            node_id: node.id.clone(),
            voltage_v: node_voltage[u],
            nominal_v: nominal,
            deviation_percent: dev,
            compliance: classify(dev),
            circuit: feeder[u],
        });

        let bus_scaled = v_bus / source_factor * node.connection.line_factor();
        let drop_v = bus_scaled - node_voltage[u];
        node_voltage_drops.push(NodeVoltageDrop {
            node_id: node.id.clone(),
            drop_v,
            drop_percent: drop_v / nominal * 100.0,
        });
    }

    let cables = make_cables(network, state, distributed);
    let total_losses_kw = cables.iter().map(|c| c.losses_kw).sum();

    let reachable = |u: &usize| topo.reachable[*u];
    let total_load_kva = if opt.scenario.with_loads() {
        (0..nb).filter(reachable).map(|u| state.snode[u].load_kva).sum()
    } else {
        0.0
    };
    let total_production_kva = if opt.scenario.with_productions() {
        (0..nb)
            .filter(reachable)
            .map(|u| state.snode[u].production_kva)
            .sum()
    } else {
        0.0
    };

    let mut virtual_busbar =
        make_busbar(network, topo, &state.snode, v_slack, v_bus, &node_voltage);
    if distributed && network.voltage_system.has_neutral() {
        let i: [Complex64; 3] = [0, 1, 2].map(|k| state.sweep(k).i_branch[topo.source]);
        log::trace!("source bus currents: {}", format_rect_vec(&i));
        virtual_busbar.neutral_current_a = Some(neutral_sum(&i).norm());
    }
    log::debug!(
        "busbar {:.2} V, feeder powers (kVA): {}",
        virtual_busbar.voltage_v,
        format_f64_vec(
            &virtual_busbar
                .circuits
                .iter()
                .map(|c| c.apparent_power_kva)
                .collect::<Vec<f64>>()
        )
    );

    let mut result = CalcResult {
        scenario: opt.scenario,
        load_model: opt.load_model,
        cables,
        total_load_kva,
        total_production_kva,
        total_losses_kw,
        max_deviation_percent: 0.0,
        max_deviation_circuit: None,
        max_deviation_node: None,
        compliance: Compliance::Normal,
        node_voltage_drops,
        node_metrics,
        node_phase_metrics: if distributed {
            Some(node_phase_metrics)
        } else {
            None
        },
        virtual_busbar,
        regulation: None,
        compensation: Vec::new(),
        converged: state.sweeps.iter().all(|s| s.converged),
        iterations: state.sweeps.iter().map(|s| s.iterations).max().unwrap_or(0),
        warnings,
    };
    summarize(&mut result);
    log::info!(
        "{:?} {:?}: worst deviation {:.2}% ({:?}), losses {:.3} kW",
        result.scenario,
        result.load_model,
        result.max_deviation_percent,
        result.compliance,
        result.total_losses_kw
    );
    result
}

/// Derives the calculated fields of every cable of the tree from the final
/// branch currents.
fn make_cables(network: &Network, state: &SolveState, distributed: bool) -> Vec<CalculatedCable> {
    let topo = &state.topo;
    let mut child_of = vec![None; network.cables.len()];
    for &u in &topo.order {
        if let Some(c) = topo.parent_cable[u] {
            child_of[c] = Some(u);
        }
    }

    network
        .cables
        .iter()
        .enumerate()
        .filter_map(|(c, cable)| {
            let u = child_of[c]?;
            let p = topo.parent[u]?;
            let conn = network.nodes[u].connection;
            let r = state.zbr.z_phase[u].re;

            let mut calc = CalculatedCable {
                cable: cable.clone(),
                from_node: network.nodes[p].id.clone(),
                to_node: network.nodes[u].id.clone(),
                length_m: state.zbr.length_m[u],
                current_a: 0.0,
                phase_currents_a: None,
                neutral_current_a: None,
                voltage_drop_v: 0.0,
                voltage_drop_percent: 0.0,
                losses_kw: 0.0,
                apparent_power_kva: 0.0,
                active_power_kw: 0.0,
                reactive_power_kvar: 0.0,
            };

            let s_send = if distributed {
                let i: [Complex64; 3] = [0, 1, 2].map(|k| state.sweep(k).i_branch[u]);
                let currents = i.map(|i| i.norm());
                let f = conn.phase_display_factor();
                let drops = [0, 1, 2].map(|k| {
                    let sw = state.sweep(k);
                    (sw.v[p].norm() - sw.v[u].norm()) * f
                });
                let drop = worst(&drops);

                calc.current_a = currents.iter().copied().fold(0.0, f64::max);
                calc.phase_currents_a = Some(currents);
                calc.voltage_drop_v = drop;
                calc.voltage_drop_percent = drop / PHASE_REFERENCE_V * 100.0;

                let mut losses: f64 = currents.iter().map(|i| i * i * r).sum();
                if network.voltage_system.has_neutral() {
                    let i_n = neutral_sum(&i).norm();
                    losses += i_n * i_n * state.zbr.z_neutral[u].re;
                    calc.neutral_current_a = Some(i_n);
                }
                calc.losses_kw = losses / 1000.0;

                (0..3)
                    .map(|k| state.sweep(k).v[p] * i[k].conj())
                    .sum::<Complex64>()
            } else {
                let sw = state.sweep(0);
                let i = sw.i_branch[u];
                let mult = conn.phase_multiplier();
                let drop = (sw.v[p].norm() - sw.v[u].norm()) * conn.line_factor();

                calc.current_a = i.norm();
                calc.voltage_drop_v = drop;
                calc.voltage_drop_percent = drop / conn.nominal_voltage() * 100.0;
                calc.losses_kw = mult * i.norm_sqr() * r / 1000.0;

                sw.v[p] * i.conj() * mult
            };
            calc.apparent_power_kva = s_send.norm() / 1000.0;
            calc.active_power_kw = s_send.re / 1000.0;
            calc.reactive_power_kvar = s_send.im / 1000.0;

            Some(calc)
        })
        .collect()
}
