use crate::domain::model::FeatureVector;
use crate::utils::error::Result;

/// 梯度提升風險分數模型
pub trait ScoreModel: Send + Sync {
    fn feature_names(&self) -> &[String];

    /// Raw additive output (sum of tree leaves plus base margin).
    fn predict_margin(&self, features: &FeatureVector) -> Result<f64>;

    /// Maps the raw margin through the objective's link to the risk score.
    fn margin_to_score(&self, margin: f64) -> f64;

    fn score(&self, features: &FeatureVector) -> Result<f64> {
        let margin = self.predict_margin(features)?;
        Ok(self.margin_to_score(margin))
    }
}

/// 以風險分數為唯一共變數的比例風險存活模型
pub trait SurvivalModel: Send + Sync {
    /// H(t | score); callers guarantee `t_months >= 0`.
    fn cumulative_hazard(&self, score: f64, t_months: f64) -> f64;

    fn survival(&self, score: f64, t_months: f64) -> f64 {
        (-self.cumulative_hazard(score, t_months)).exp()
    }

    fn probability_of_event(&self, score: f64, t_months: f64) -> f64 {
        (1.0 - self.survival(score, t_months)).clamp(0.0, 1.0)
    }
}
