use crate::network::{Node, PowerEntry};
use crate::opt::{CalcOpt, LoadModel};
use num_complex::Complex64;

/// NodePower is the complex power drawn by one node for a scenario.
///
/// Power is in VA, positive for consumption and negative for production.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NodePower {
    /// Total net power of the node.
    pub total: Complex64,

    /// Net power drawn on each phase by the single-phase equivalent
    /// networks that are solved.
    pub phases: [Complex64; 3],

    /// Diversified load (kVA), independent of the scenario.
    pub load_kva: f64,

    /// Diversified production (kVA), independent of the scenario.
    pub production_kva: f64,
}

/// Accumulates one family of entries (loads or productions).
#[derive(Default)]
struct EntrySum {
    /// Diversified power of entries without a phase (VA).
    unphased: Complex64,
    /// Diversified power of entries bound to a phase (VA).
    phased: [Complex64; 3],
    /// Explicit active/reactive overrides spread evenly (VA).
    override_even: Complex64,
    /// Explicit overrides bound to a phase (VA).
    override_phased: [Complex64; 3],
    /// Diversified apparent power (kVA).
    kva: f64,
}

impl EntrySum {
    fn new(entries: &[PowerEntry], diversity: f64, unit: Complex64) -> Self {
        let mut sum = EntrySum::default();
        for e in entries {
            if e.has_override() {
                let s = Complex64::new(
                    e.active_kw.unwrap_or(0.0),
                    e.reactive_kvar.unwrap_or(0.0),
                ) * 1000.0;
                sum.kva += s.norm() / 1000.0;
                match e.phase {
                    Some(p) => sum.override_phased[p.index()] += s,
                    None => sum.override_even += s,
                }
            } else {
                let kva = e.power_kva * diversity;
                sum.kva += kva;
                let s = unit * kva * 1000.0;
                match e.phase {
                    Some(p) => sum.phased[p.index()] += s,
                    None => sum.unphased += s,
                }
            }
        }
        sum
    }

    fn total(&self) -> Complex64 {
        self.unphased
            + self.override_even
            + self.phased.iter().sum::<Complex64>()
            + self.override_phased.iter().sum::<Complex64>()
    }

    /// Power of each phase for a given split of the unphased part.
    fn distributed(&self, split: &[f64; 3]) -> [Complex64; 3] {
        let mut phases = [Complex64::default(); 3];
        for p in 0..3 {
            phases[p] = self.unphased * split[p]
                + self.phased[p]
                + self.override_even / 3.0
                + self.override_phased[p];
        }
        phases
    }
}

/// Builds the complex power of every node for the options' scenario.
///
/// Loads and productions are scaled by their diversity factors and turned
/// into complex power with the network power factor. In balanced mode each
/// phase carries a third of the node power (all of it for single-phase
/// connections); in phase-distributed mode the split of the options applies.
pub fn make_snode(nodes: &[Node], opt: &CalcOpt) -> Vec<NodePower> {
    let pf = opt.power_factor;
    let unit = Complex64::new(pf, (1.0 - pf * pf).max(0.0).sqrt());
    let load_div = opt.load_diversity_percent / 100.0;
    let prod_div = opt.production_diversity_percent / 100.0;
    let (load_split, prod_split) = opt.phase_split().fractions();

    nodes
        .iter()
        .map(|node| {
            let loads = EntrySum::new(&node.loads, load_div, unit);
            let prods = EntrySum::new(&node.productions, prod_div, unit);

            let mut total = Complex64::default();
            let mut phases = [Complex64::default(); 3];

            match opt.load_model {
                LoadModel::Balanced => {
                    let share = if node.connection.is_three_phase() {
                        1.0 / 3.0
                    } else {
                        1.0
                    };
                    if opt.scenario.with_loads() {
                        total += loads.total();
                    }
                    if opt.scenario.with_productions() {
                        total -= prods.total();
                    }
                    phases = [total * share; 3];
                }
                LoadModel::PhaseDistributed => {
                    if opt.scenario.with_loads() {
                        total += loads.total();
                        let d = loads.distributed(&load_split);
                        (0..3).for_each(|p| phases[p] += d[p]);
                    }
                    if opt.scenario.with_productions() {
                        total -= prods.total();
                        let d = prods.distributed(&prod_split);
                        (0..3).for_each(|p| phases[p] -= d[p]);
                    }
                }
            }

            NodePower {
                total,
                phases,
                load_kva: loads.kva,
                production_kva: prods.kva,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ConnectionType, Phase};
    use crate::opt::{PhaseSplit, Scenario};
    use approx::assert_abs_diff_eq;

    fn node() -> Node {
        Node::new("n", ConnectionType::Tetra400)
            .with_load(PowerEntry::new("l1", 10.0))
            .with_production(PowerEntry::new("p1", 4.0))
    }

    fn opt(scenario: Scenario, load_model: LoadModel) -> CalcOpt {
        CalcOpt {
            scenario,
            load_model,
            power_factor: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_scenarios() {
        let nodes = vec![node()];

        let s = make_snode(&nodes, &opt(Scenario::Consumption, LoadModel::Balanced));
        assert_abs_diff_eq!(s[0].total.re, 10_000.0, epsilon = 1e-9);

        let s = make_snode(&nodes, &opt(Scenario::Production, LoadModel::Balanced));
        assert_abs_diff_eq!(s[0].total.re, -4_000.0, epsilon = 1e-9);

        let s = make_snode(&nodes, &opt(Scenario::Mixed, LoadModel::Balanced));
        assert_abs_diff_eq!(s[0].total.re, 6_000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].phases[1].re, 2_000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].load_kva, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s[0].production_kva, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_diversity_and_power_factor() {
        let nodes = vec![node()];
        let opt = CalcOpt {
            scenario: Scenario::Consumption,
            load_diversity_percent: 50.0,
            power_factor: 0.8,
            ..Default::default()
        };
        let s = make_snode(&nodes, &opt);
        assert_abs_diff_eq!(s[0].total.re, 4_000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].total.im, 3_000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].load_kva, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_phase_balanced_takes_full_power() {
        let nodes = vec![Node::new("m", ConnectionType::MonoPhaseNeutral)
            .with_load(PowerEntry::new("l", 3.0))];
        let s = make_snode(&nodes, &opt(Scenario::Mixed, LoadModel::Balanced));
        assert_abs_diff_eq!(s[0].phases[0].re, 3_000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_phase_distribution() {
        let mut n = node();
        n.loads.push(PowerEntry::new("l2", 3.0).on_phase(Phase::C));
        n.loads.push(PowerEntry {
            id: "l3".to_string(),
            active_kw: Some(1.5),
            reactive_kvar: Some(0.3),
            ..Default::default()
        });
        let nodes = vec![n];
        let mut o = opt(Scenario::Consumption, LoadModel::PhaseDistributed);
        o.manual_phase_split = Some(PhaseSplit {
            loads: [50.0, 30.0, 20.0],
            productions: [100.0 / 3.0; 3],
        });

        let s = make_snode(&nodes, &o);
        // 10 kVA split 50/30/20, 3 kVA on C, override 1.5 kW spread evenly
        assert_abs_diff_eq!(s[0].phases[0].re, 5_500.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].phases[1].re, 3_500.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].phases[2].re, 5_500.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].phases[2].im, 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].total.re, 14_500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_override_bypasses_diversity() {
        let nodes = vec![Node::new("n", ConnectionType::Tetra400).with_load(PowerEntry {
            id: "l".to_string(),
            power_kva: 99.0,
            active_kw: Some(2.0),
            ..Default::default()
        })];
        let o = CalcOpt {
            load_diversity_percent: 10.0,
            ..opt(Scenario::Consumption, LoadModel::Balanced)
        };
        let s = make_snode(&nodes, &o);
        assert_abs_diff_eq!(s[0].total.re, 2_000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s[0].total.im, 0.0, epsilon = 1e-9);
    }
}
