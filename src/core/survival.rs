use crate::domain::model::TimeHorizon;
use crate::domain::ports::SurvivalModel;
use crate::utils::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 階梯函數：基準累積風險 H0(t)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFunction {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl StepFunction {
    /// Value at the largest knot `<= t`; zero before the first knot, flat after the last.
    pub fn evaluate(&self, t: f64) -> f64 {
        let idx = self.times.partition_point(|&knot| knot <= t);
        if idx == 0 {
            0.0
        } else {
            self.values[idx - 1]
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.times.is_empty() {
            return Err("baseline hazard has no knots".to_string());
        }
        if self.times.len() != self.values.len() {
            return Err(format!(
                "baseline hazard has {} times but {} values",
                self.times.len(),
                self.values.len()
            ));
        }
        if self.times.iter().chain(self.values.iter()).any(|v| !v.is_finite()) {
            return Err("baseline hazard contains non-finite numbers".to_string());
        }
        if self.times[0] < 0.0 {
            return Err("baseline hazard starts before t = 0".to_string());
        }
        if self.times.windows(2).any(|w| w[1] <= w[0]) {
            return Err("baseline hazard times must be strictly increasing".to_string());
        }
        if self.values[0] < 0.0 || self.values.windows(2).any(|w| w[1] < w[0]) {
            return Err("baseline hazard values must be non-negative and non-decreasing".to_string());
        }
        if self.times[0] == 0.0 && self.values[0] != 0.0 {
            return Err("baseline hazard must be zero at t = 0".to_string());
        }
        Ok(())
    }
}

/// 以風險分數為唯一共變數的 Cox 比例風險模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoxSurvivalModel {
    pub coefficient: f64,
    #[serde(default)]
    pub offset: f64,
    pub baseline_cumulative_hazard: StepFunction,
}

impl CoxSurvivalModel {
    pub fn new(coefficient: f64, offset: f64, baseline_cumulative_hazard: StepFunction) -> Result<Self> {
        let model = Self {
            coefficient,
            offset,
            baseline_cumulative_hazard,
        };
        model.validate().map_err(|reason| RiskError::ModelLoad {
            path: "<inline>".to_string(),
            reason,
        })?;
        Ok(model)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let load_error = |reason: String| RiskError::ModelLoad {
            path: path_str.clone(),
            reason,
        };
        let content = std::fs::read_to_string(&path).map_err(|e| load_error(e.to_string()))?;
        let model: CoxSurvivalModel =
            serde_json::from_str(&content).map_err(|e| load_error(e.to_string()))?;
        model.validate().map_err(load_error)?;
        Ok(model)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.coefficient.is_finite() || !self.offset.is_finite() {
            return Err("coefficient and offset must be finite".to_string());
        }
        self.baseline_cumulative_hazard.validate()
    }

    pub fn relative_hazard(&self, score: f64) -> f64 {
        (self.coefficient * (score - self.offset)).exp()
    }
}

impl SurvivalModel for CoxSurvivalModel {
    fn cumulative_hazard(&self, score: f64, t_months: f64) -> f64 {
        let baseline = self.baseline_cumulative_hazard.evaluate(t_months);
        if baseline == 0.0 {
            return 0.0;
        }
        baseline * self.relative_hazard(score)
    }
}

/// 存活模型映射：回傳 t 個月內發生骨折的機率 1 - S(t)
pub fn probability_of_event<M: SurvivalModel + ?Sized>(
    model: &M,
    score: f64,
    t_months: f64,
) -> Result<f64> {
    let horizon = TimeHorizon::months(t_months)?;
    if !score.is_finite() {
        return Err(RiskError::Scoring {
            message: format!("risk score {} is not finite", score),
        });
    }
    let probability = model.probability_of_event(score, horizon.as_months());
    tracing::debug!(
        "Survival mapping: score={:.6}, t={} months -> p={:.6}",
        score,
        horizon.as_months(),
        probability
    );
    Ok(probability)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CoxSurvivalModel {
        CoxSurvivalModel::new(
            0.9,
            0.0,
            StepFunction {
                times: vec![6.0, 12.0, 24.0, 48.0],
                values: vec![0.005, 0.01, 0.025, 0.06],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_step_function_evaluation() {
        let f = model().baseline_cumulative_hazard;
        assert_eq!(f.evaluate(0.0), 0.0);
        assert_eq!(f.evaluate(5.9), 0.0);
        assert_eq!(f.evaluate(6.0), 0.005);
        assert_eq!(f.evaluate(23.9), 0.01);
        assert_eq!(f.evaluate(24.0), 0.025);
        assert_eq!(f.evaluate(500.0), 0.06);
    }

    #[test]
    fn test_probability_zero_at_time_zero() {
        assert_eq!(probability_of_event(&model(), 2.5, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_probability_monotone_in_time_and_score() {
        let m = model();
        let mut previous = 0.0;
        for t in [0.0, 3.0, 6.0, 12.0, 18.0, 24.0, 36.0, 60.0, 84.0] {
            let p = probability_of_event(&m, 1.2, t).unwrap();
            assert!(p >= previous, "p({}) = {} < {}", t, p, previous);
            assert!((0.0..=1.0).contains(&p));
            previous = p;
        }
        let low = probability_of_event(&m, 0.5, 24.0).unwrap();
        let high = probability_of_event(&m, 3.0, 24.0).unwrap();
        assert!(high > low);
    }

    #[test]
    fn test_survival_and_cumulative_hazard_forms_agree() {
        let m = model();
        let h = m.cumulative_hazard(1.7, 24.0);
        let p = m.probability_of_event(1.7, 24.0);
        assert!((p - (1.0 - (-h).exp())).abs() < 1e-15);
        assert!((m.survival(1.7, 24.0) - (-h).exp()).abs() < 1e-15);
    }

    #[test]
    fn test_negative_horizon_rejected() {
        assert!(matches!(
            probability_of_event(&model(), 1.0, -12.0),
            Err(RiskError::InvalidHorizon { .. })
        ));
    }

    #[test]
    fn test_invalid_baselines_rejected() {
        let decreasing = StepFunction {
            times: vec![12.0, 24.0],
            values: vec![0.02, 0.01],
        };
        assert!(CoxSurvivalModel::new(1.0, 0.0, decreasing).is_err());

        let nonzero_origin = StepFunction {
            times: vec![0.0, 24.0],
            values: vec![0.01, 0.02],
        };
        assert!(CoxSurvivalModel::new(1.0, 0.0, nonzero_origin).is_err());

        let unsorted = StepFunction {
            times: vec![24.0, 12.0],
            values: vec![0.01, 0.02],
        };
        assert!(CoxSurvivalModel::new(1.0, 0.0, unsorted).is_err());
    }

    #[test]
    fn test_from_file_reads_json_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hip_cox.json");
        std::fs::write(
            &path,
            r#"{"coefficient": 0.8, "baseline_cumulative_hazard": {"times": [12.0, 24.0], "values": [0.01, 0.03]}}"#,
        )
        .unwrap();
        let m = CoxSurvivalModel::from_file(&path).unwrap();
        assert_eq!(m.offset, 0.0);
        assert!(matches!(
            CoxSurvivalModel::from_file(dir.path().join("missing.json")),
            Err(RiskError::ModelLoad { .. })
        ));
    }
}
