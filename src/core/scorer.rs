use crate::domain::model::FeatureVector;
use crate::domain::ports::ScoreModel;
use crate::utils::error::{Result, RiskError};

/// Score plus the raw margin it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScore {
    pub margin: f64,
    pub value: f64,
}

/// 以梯度提升模型計算單筆風險分數，失敗時不做任何補救
pub fn score<M: ScoreModel + ?Sized>(model: &M, features: &FeatureVector) -> Result<RiskScore> {
    if features.names() != model.feature_names() {
        return Err(RiskError::Scoring {
            message: format!(
                "feature vector does not match model columns ({} given, {} expected)",
                features.len(),
                model.feature_names().len()
            ),
        });
    }

    let margin = model.predict_margin(features)?;
    let value = model.margin_to_score(margin);
    if !margin.is_finite() || !value.is_finite() {
        return Err(RiskError::Scoring {
            message: format!("model produced non-finite output (margin {})", margin),
        });
    }

    tracing::debug!("Risk score: margin={:.6}, score={:.6}", margin, value);
    Ok(RiskScore { margin, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedModel {
        names: Vec<String>,
        margin: f64,
    }

    impl ScoreModel for FixedModel {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_margin(&self, _features: &FeatureVector) -> Result<f64> {
            Ok(self.margin)
        }

        fn margin_to_score(&self, margin: f64) -> f64 {
            margin.exp()
        }
    }

    fn fixed(margin: f64) -> FixedModel {
        FixedModel {
            names: vec!["age".to_string()],
            margin,
        }
    }

    #[test]
    fn test_score_applies_link() {
        let fv = FeatureVector::new(vec!["age".to_string()], vec![70.0]).unwrap();
        let result = score(&fixed(0.5), &fv).unwrap();
        assert_eq!(result.margin, 0.5);
        assert!((result.value - 0.5f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_column_mismatch_fails_loudly() {
        let fv = FeatureVector::new(vec!["bmi".to_string()], vec![22.0]).unwrap();
        assert!(matches!(score(&fixed(0.5), &fv), Err(RiskError::Scoring { .. })));
    }

    #[test]
    fn test_non_finite_output_is_scoring_error() {
        let fv = FeatureVector::new(vec!["age".to_string()], vec![70.0]).unwrap();
        assert!(matches!(score(&fixed(f64::NAN), &fv), Err(RiskError::Scoring { .. })));
        assert!(matches!(score(&fixed(1e6), &fv), Err(RiskError::Scoring { .. })));
    }
}
