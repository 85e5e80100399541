use crate::error::{CalcError, Result};
use clap::ValueEnum;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Which powers take part in a calculation.
#[derive(Debug, PartialEq, Eq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum Scenario {
    /// Loads only.
    Consumption,
    /// Productions only.
    Production,
    /// Loads minus productions.
    Mixed,
    /// Loads minus productions with node target voltages pinned.
    Forced,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Consumption,
        Scenario::Production,
        Scenario::Mixed,
        Scenario::Forced,
    ];

    pub(crate) fn with_loads(&self) -> bool {
        *self != Scenario::Production
    }

    pub(crate) fn with_productions(&self) -> bool {
        *self != Scenario::Consumption
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum LoadModel {
    /// A single solve of the lumped three-phase network.
    Balanced,
    /// Three single-phase solves with loads split across phases.
    PhaseDistributed,
}

/// Percent shares of node power on phases A, B and C.
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct PhaseSplit {
    pub loads: [f64; 3],
    pub productions: [f64; 3],
}

impl Default for PhaseSplit {
    fn default() -> Self {
        let third = 100.0 / 3.0;
        Self {
            loads: [third; 3],
            productions: [third; 3],
        }
    }
}

impl PhaseSplit {
    /// Load split derived from an imbalance percentage: the excess is
    /// carried by phase A. Productions stay equally split.
    pub fn from_imbalance(imbalance_percent: f64) -> Self {
        let p = imbalance_percent / 100.0;
        let a = 100.0 * (1.0 + 2.0 * p) / 3.0;
        let bc = 100.0 * (1.0 - p) / 3.0;
        Self {
            loads: [a, bc, bc],
            ..Default::default()
        }
    }

    /// Shares as fractions of one.
    pub(crate) fn fractions(&self) -> ([f64; 3], [f64; 3]) {
        (
            self.loads.map(|v| v / 100.0),
            self.productions.map(|v| v / 100.0),
        )
    }

    fn validate(&self) -> Result<()> {
        for (kind, split) in [("load", &self.loads), ("production", &self.productions)] {
            let sum: f64 = split.iter().sum();
            if split.iter().any(|v| !v.is_finite() || *v < 0.0) || (sum - 100.0).abs() > 0.1 {
                return Err(CalcError::InvalidPhaseSplit { kind, sum });
            }
        }
        Ok(())
    }
}

/// How EQUI8 corrections are used.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
pub enum Equi8Mode {
    /// Report the correction without touching the solved voltages.
    #[default]
    Advisory,
    /// Overwrite the node voltages with the corrected ones.
    Integrated,
}

/// Options of a load flow calculation.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct CalcOpt {
    pub scenario: Scenario,

    // Diversity (foisonnement) applied to loads, 0-200 %. Default value is 100.
    pub load_diversity_percent: f64,
    // Diversity applied to productions, 0-200 %. Default value is 100.
    pub production_diversity_percent: f64,

    // Network-wide power factor, 0-1. Default value is 0.95.
    pub power_factor: f64,

    pub load_model: LoadModel,

    // Share of load moved onto phase A, 0-100 %. Default value is 0.
    pub imbalance_percent: f64,

    // Explicit per-phase split. Overrides `imbalance_percent`.
    #[builder(setter(strip_option))]
    pub manual_phase_split: Option<PhaseSplit>,

    // Termination tolerance on the voltage change relative to the slack
    // magnitude. Default value is 1e-4.
    pub tolerance: f64,
    // Maximum number of sweep iterations. Default value is 100.
    pub max_iterations: usize,

    // Maximum number of regulation re-solves. Default value is 3.
    pub regulation_max_iterations: usize,
    // Regulation stops once regulated voltages move less than this (V).
    // Default value is 2.
    pub regulation_tolerance_v: f64,

    pub equi8_mode: Equi8Mode,

    // Use the homopolar impedance of cables feeding phase-neutral nodes
    // (legacy behaviour).
    pub homopolar_single_phase: bool,
}

impl Default for CalcOpt {
    fn default() -> Self {
        Self {
            scenario: Scenario::Mixed,
            load_diversity_percent: 100.0,
            production_diversity_percent: 100.0,
            power_factor: 0.95,
            load_model: LoadModel::Balanced,
            imbalance_percent: 0.0,
            manual_phase_split: None,
            tolerance: 1e-4,
            max_iterations: 100,
            regulation_max_iterations: 3,
            regulation_tolerance_v: 2.0,
            equi8_mode: Equi8Mode::Advisory,
            homopolar_single_phase: false,
        }
    }
}

impl CalcOpt {
    /// Checks every numeric option against its valid range.
    pub fn validate(&self) -> Result<()> {
        CalcError::check_range("load_diversity_percent", self.load_diversity_percent, 0.0, 200.0)?;
        CalcError::check_range(
            "production_diversity_percent",
            self.production_diversity_percent,
            0.0,
            200.0,
        )?;
        CalcError::check_range("power_factor", self.power_factor, 0.0, 1.0)?;
        CalcError::check_range("imbalance_percent", self.imbalance_percent, 0.0, 100.0)?;
        CalcError::check_range("tolerance", self.tolerance, f64::MIN_POSITIVE, 1.0)?;
        if self.max_iterations == 0 {
            return Err(CalcError::out_of_range(
                "max_iterations",
                0.0,
                1.0,
                f64::INFINITY,
            ));
        }
        if let Some(split) = &self.manual_phase_split {
            split.validate()?;
        }
        Ok(())
    }

    /// Phase split used in phase-distributed mode.
    pub fn phase_split(&self) -> PhaseSplit {
        self.manual_phase_split
            .unwrap_or_else(|| PhaseSplit::from_imbalance(self.imbalance_percent))
    }

    pub fn for_scenario(&self, scenario: Scenario) -> Self {
        Self {
            scenario,
            ..self.clone()
        }
    }
}

impl CalcOptBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let defaults = CalcOpt::default();
        let opt = CalcOpt {
            load_diversity_percent: self
                .load_diversity_percent
                .unwrap_or(defaults.load_diversity_percent),
            production_diversity_percent: self
                .production_diversity_percent
                .unwrap_or(defaults.production_diversity_percent),
            power_factor: self.power_factor.unwrap_or(defaults.power_factor),
            imbalance_percent: self.imbalance_percent.unwrap_or(defaults.imbalance_percent),
            manual_phase_split: self.manual_phase_split.unwrap_or(defaults.manual_phase_split),
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            ..defaults
        };
        opt.validate().map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_builder_defaults() {
        let opt = CalcOptBuilder::default().build().unwrap();
        assert_eq!(opt.scenario, Scenario::Mixed);
        assert_eq!(opt.max_iterations, 100);
        assert_abs_diff_eq!(opt.power_factor, 0.95);
        assert_abs_diff_eq!(opt.tolerance, 1e-4);
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        assert!(CalcOptBuilder::default()
            .load_diversity_percent(201.0)
            .build()
            .is_err());
        assert!(CalcOptBuilder::default().power_factor(1.2).build().is_err());
        assert!(CalcOptBuilder::default()
            .imbalance_percent(-1.0)
            .build()
            .is_err());
        assert!(CalcOptBuilder::default()
            .production_diversity_percent(200.0)
            .build()
            .is_ok());
    }

    #[test]
    fn test_validate_reports_parameter() {
        let opt = CalcOpt {
            power_factor: f64::NAN,
            ..Default::default()
        };
        match opt.validate() {
            Err(CalcError::OutOfRange { param, .. }) => assert_eq!(param, "power_factor"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_phase_split_from_imbalance() {
        let split = PhaseSplit::from_imbalance(0.0);
        for v in split.loads {
            assert_abs_diff_eq!(v, 100.0 / 3.0, epsilon = 1e-12);
        }
        let split = PhaseSplit::from_imbalance(100.0);
        assert_abs_diff_eq!(split.loads[0], 100.0, epsilon = 1e-12);
        assert_abs_diff_eq!(split.loads[1], 0.0, epsilon = 1e-12);
        let split = PhaseSplit::from_imbalance(30.0);
        assert_abs_diff_eq!(split.loads.iter().sum::<f64>(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_manual_split_must_sum_to_100() {
        let opt = CalcOpt {
            manual_phase_split: Some(PhaseSplit {
                loads: [50.0, 50.0, 10.0],
                productions: [100.0 / 3.0; 3],
            }),
            ..Default::default()
        };
        assert!(matches!(
            opt.validate(),
            Err(CalcError::InvalidPhaseSplit { kind: "load", .. })
        ));
    }
}
