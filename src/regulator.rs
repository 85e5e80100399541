use crate::error::Result;
use crate::network::{Network, RegulatorConfig, VoltageSystem};
use crate::opt::CalcOpt;
use crate::overrides::VoltageOverride;
use crate::pf::{forced_overrides, solve_with_overrides, SolveState};
use crate::result::{CalcResult, CalcWarning};
use serde::{Deserialize, Serialize};

/// Switching position of one phase of an SRG2 regulator, from the largest
/// boost to the largest buck.
#[derive(
    Debug, Default, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize,
)]
pub enum Srg2State {
    Bo2,
    Bo1,
    #[default]
    Byp,
    Lo1,
    Lo2,
}

/// Switching thresholds on the 230 V phase scale (V).
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct Srg2Thresholds {
    pub lo2: f64,
    pub lo1: f64,
    pub bo1: f64,
    pub bo2: f64,

    /// Margin a voltage must move back past a threshold before the
    /// regulator returns towards bypass.
    pub hysteresis: f64,
}

impl Default for Srg2Thresholds {
    fn default() -> Self {
        Self {
            lo2: 254.0,
            lo1: 244.0,
            bo1: 222.0,
            bo2: 214.0,
            hysteresis: 2.0,
        }
    }
}

impl Srg2Thresholds {
    fn classify(&self, v: f64) -> Srg2State {
        if v > self.lo2 {
            Srg2State::Lo2
        } else if v > self.lo1 {
            Srg2State::Lo1
        } else if v < self.bo2 {
            Srg2State::Bo2
        } else if v < self.bo1 {
            Srg2State::Bo1
        } else {
            Srg2State::Byp
        }
    }
}

/// Switching steps (%) of the first and second positions.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct Srg2Steps {
    pub first: f64,
    pub second: f64,
}

impl Srg2Steps {
    pub fn for_system(system: VoltageSystem) -> Self {
        match system {
            VoltageSystem::Tetra400 => Self {
                first: 3.5,
                second: 7.0,
            },
            VoltageSystem::Tri230 => Self {
                first: 3.0,
                second: 6.0,
            },
        }
    }

    pub fn for_regulator(reg: &RegulatorConfig, system: VoltageSystem) -> Self {
        match reg.steps_percent {
            Some([first, second]) => Self { first, second },
            None => Self::for_system(system),
        }
    }
}

/// Next switching position of a phase at input voltage `v`.
///
/// Moving away from bypass is immediate. Moving back towards bypass needs
/// the voltage to clear the threshold of the current position by the
/// hysteresis margin, so a voltage sitting on a threshold keeps its state.
pub fn srg2_state(v: f64, prev: Srg2State, th: &Srg2Thresholds) -> Srg2State {
    let raw = th.classify(v);
    if prev > Srg2State::Byp && raw < prev {
        th.classify(v + th.hysteresis).min(prev).max(raw)
    } else if prev < Srg2State::Byp && raw > prev {
        th.classify(v - th.hysteresis).max(prev).min(raw)
    } else {
        raw
    }
}

impl Srg2State {
    /// Output to input voltage ratio of the position.
    pub fn ratio(&self, steps: &Srg2Steps) -> f64 {
        match self {
            Srg2State::Bo2 => 1.0 + steps.second / 100.0,
            Srg2State::Bo1 => 1.0 + steps.first / 100.0,
            Srg2State::Byp => 1.0,
            Srg2State::Lo1 => 1.0 - steps.first / 100.0,
            Srg2State::Lo2 => 1.0 - steps.second / 100.0,
        }
    }
}

/// Outcome of voltage regulation for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulationReport {
    /// Number of regulated re-solves.
    pub iterations: usize,

    /// Whether the regulated voltages settled within the tolerance.
    pub converged: bool,

    pub regulators: Vec<RegulatorOutcome>,
}

impl RegulationReport {
    pub fn regulator(&self, node_id: &str) -> Option<&RegulatorOutcome> {
        self.regulators.iter().find(|r| r.node_id == node_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatorOutcome {
    pub node_id: String,

    pub applied: bool,

    pub states: [Srg2State; 3],

    pub ratios: [f64; 3],

    /// Phase voltages entering the regulator (V, 230 V scale).
    pub input_voltages: [f64; 3],

    /// Phase voltages leaving the regulator (V, 230 V scale).
    pub output_voltages: [f64; 3],

    pub skipped_reason: Option<String>,
}

impl RegulatorOutcome {
    fn skipped(node_id: &str, reason: String) -> Self {
        Self {
            node_id: node_id.to_string(),
            applied: false,
            states: [Srg2State::Byp; 3],
            ratios: [1.0; 3],
            input_voltages: [0.0; 3],
            output_voltages: [0.0; 3],
            skipped_reason: Some(reason),
        }
    }
}

/// A regulator that passed its activation checks.
struct ActiveRegulator<'a> {
    config: &'a RegulatorConfig,
    node: usize,
    steps: Srg2Steps,
}

/// Bookkeeping of one regulation run. Owned by the call, never shared.
struct RegulationContext {
    iteration: usize,

    /// Switching position of every active regulator.
    states: Vec<[Srg2State; 3]>,

    /// Mean regulated voltage of every active regulator at the previous
    /// iteration (V).
    previous: Vec<f64>,
}

fn mean3(v: &[f64; 3]) -> f64 {
    (v[0] + v[1] + v[2]) / 3.0
}

/// Reason for not activating a regulator, if any.
fn gate(
    network: &Network,
    opt: &CalcOpt,
    state: &SolveState,
    reg: &RegulatorConfig,
    node: usize,
    load: &[f64],
    production: &[f64],
) -> Option<String> {
    if !state.topo.reachable[node] {
        return Some("node not connected to the source".to_string());
    }
    if opt.scenario.with_loads() && load[node] > reg.max_load_kva {
        return Some(format!(
            "downstream load {:.1} kVA exceeds {:.1} kVA",
            load[node], reg.max_load_kva
        ));
    }
    if opt.scenario.with_productions() && production[node] > reg.max_production_kva {
        return Some(format!(
            "downstream production {:.1} kVA exceeds {:.1} kVA",
            production[node], reg.max_production_kva
        ));
    }
    let input = state.upstream_phase_voltages(network, node);
    let highest = input.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if highest > reg.max_input_voltage {
        return Some(format!(
            "input voltage {:.1} V exceeds {:.1} V",
            highest, reg.max_input_voltage
        ));
    }
    None
}

/// Runs a load flow with the enabled SRG2 regulators in service.
///
/// The network is solved once without regulation. Each regulator passing
/// its load, production and input voltage checks then picks a switching
/// position per phase from its input voltage and pins its node to the
/// regulated voltage. The network is re-solved with the pinned voltages,
/// at most `regulation_max_iterations` times, until no regulated voltage
/// moves by more than `regulation_tolerance_v`.
pub fn apply_voltage_regulators(network: &Network, opt: &CalcOpt) -> Result<CalcResult> {
    let base_overrides = forced_overrides(network, opt);
    let (base, base_state) = solve_with_overrides(network, opt, &base_overrides)?;

    let enabled: Vec<&RegulatorConfig> = network.regulators.iter().filter(|r| r.enabled).collect();
    if enabled.is_empty() {
        return Ok(base);
    }

    let topo = &base_state.topo;
    let own_load: Vec<f64> = base_state.snode.iter().map(|s| s.load_kva).collect();
    let own_production: Vec<f64> = base_state.snode.iter().map(|s| s.production_kva).collect();
    let load = topo.subtree_sum(&own_load);
    let production = topo.subtree_sum(&own_production);

    let mut warnings = Vec::new();
    let mut skipped = Vec::new();
    let mut active = Vec::new();
    for reg in enabled {
        // validated: the node exists
        let Some(&node) = topo.index.get(&reg.node_id) else {
            continue;
        };
        match gate(network, opt, &base_state, reg, node, &load, &production) {
            Some(reason) => {
                log::warn!("voltage regulator '{}' skipped: {}", reg.node_id, reason);
                warnings.push(CalcWarning::RegulatorSkipped {
                    node_id: reg.node_id.clone(),
                    reason: reason.clone(),
                });
                skipped.push(RegulatorOutcome::skipped(&reg.node_id, reason));
            }
            None => active.push(ActiveRegulator {
                config: reg,
                node,
                steps: Srg2Steps::for_regulator(reg, network.voltage_system),
            }),
        }
    }

    let th = Srg2Thresholds::default();
    let mut ctx = RegulationContext {
        iteration: 0,
        states: vec![[Srg2State::Byp; 3]; active.len()],
        previous: active
            .iter()
            .map(|a| mean3(&base_state.phase_voltages(network, a.node)))
            .collect(),
    };

    let mut current = (base, base_state);
    let mut converged = active.is_empty();
    let mut outcomes: Vec<RegulatorOutcome> = Vec::new();

    while !active.is_empty() && ctx.iteration < opt.regulation_max_iterations {
        ctx.iteration += 1;

        let mut overrides = base_overrides.clone();
        outcomes.clear();
        for (k, a) in active.iter().enumerate() {
            let input = current.1.upstream_phase_voltages(network, a.node);
            let states = [0, 1, 2].map(|p| srg2_state(input[p], ctx.states[k][p], &th));
            let ratios = states.map(|s| s.ratio(&a.steps));
            let targets = [0, 1, 2].map(|p| input[p] * ratios[p]);
            ctx.states[k] = states;

            overrides.insert(&a.config.node_id, VoltageOverride::Regulated { targets });
            outcomes.push(RegulatorOutcome {
                node_id: a.config.node_id.clone(),
                applied: true,
                states,
                ratios,
                input_voltages: input,
                output_voltages: targets,
                skipped_reason: None,
            });
        }

        current = solve_with_overrides(network, opt, &overrides)?;

        let averages: Vec<f64> = active
            .iter()
            .map(|a| mean3(&current.1.phase_voltages(network, a.node)))
            .collect();
        let change = averages
            .iter()
            .zip(&ctx.previous)
            .map(|(v, prev)| (v - prev).abs())
            .fold(0.0, f64::max);
        ctx.previous = averages;
        log::debug!(
            "regulation iteration {}: largest change {:.3} V",
            ctx.iteration,
            change
        );

        if change < opt.regulation_tolerance_v {
            converged = true;
            break;
        }
    }
    if !converged {
        log::warn!(
            "voltage regulation did not settle in {} iterations",
            ctx.iteration
        );
    }

    let (mut result, _) = current;
    outcomes.extend(skipped);
    result.warnings.extend(warnings);
    result.regulation = Some(RegulationReport {
        iterations: ctx.iteration,
        converged,
        regulators: outcomes,
    });
    Ok(result)
}
