use crate::core::bundle::ModelBundle;
use crate::core::{explainer, features, scorer, survival};
use crate::domain::model::{
    AttributionResult, CurvePoint, FeatureVector, FractureAssessment, FractureType,
    RawPatientRecord, TimeHorizon,
};
use crate::domain::ports::ScoreModel;
use crate::utils::error::Result;
use std::sync::Arc;

/// 推論管線：raw -> features -> score -> probability [-> attribution]
///
/// 本身不持有任何可變狀態，可在多個執行緒間共用。
#[derive(Debug, Clone)]
pub struct RiskPipeline {
    bundle: Arc<ModelBundle>,
}

impl RiskPipeline {
    pub fn new(bundle: Arc<ModelBundle>) -> Self {
        Self { bundle }
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn features(&self, raw: &RawPatientRecord, fracture_type: FractureType) -> Result<FeatureVector> {
        let models = self.bundle.get(fracture_type)?;
        features::transform(raw, models.score.feature_names())
    }

    pub fn assess(
        &self,
        raw: &RawPatientRecord,
        fracture_type: FractureType,
        horizon: TimeHorizon,
        explain: bool,
    ) -> Result<FractureAssessment> {
        let models = self.bundle.get(fracture_type)?;
        let features = features::transform(raw, models.score.feature_names())?;
        let risk = scorer::score(&models.score, &features)?;
        let probability = survival::probability_of_event(&models.survival, risk.value, horizon.as_months())?;

        // SHAP 計算量較大，只在需要時才做
        let attribution = if explain {
            Some(explainer::explain(&models.score, &features)?)
        } else {
            None
        };

        tracing::debug!(
            "{} risk at {} months: {:.4}",
            fracture_type,
            horizon.as_months(),
            probability
        );
        Ok(FractureAssessment::new(
            fracture_type,
            horizon,
            risk.value,
            probability,
            attribution,
        ))
    }

    /// 給外部 API 層使用：骨折類型與時間範圍以原始值傳入
    pub fn assess_request(
        &self,
        raw: &RawPatientRecord,
        fracture_type: &str,
        t_months: f64,
        explain: bool,
    ) -> Result<FractureAssessment> {
        let fracture_type: FractureType = fracture_type.parse()?;
        let horizon = TimeHorizon::months(t_months)?;
        self.assess(raw, fracture_type, horizon, explain)
    }

    pub fn probability(
        &self,
        raw: &RawPatientRecord,
        fracture_type: FractureType,
        t_months: f64,
    ) -> Result<f64> {
        let horizon = TimeHorizon::months(t_months)?;
        Ok(self.assess(raw, fracture_type, horizon, false)?.probability)
    }

    pub fn explain(&self, raw: &RawPatientRecord, fracture_type: FractureType) -> Result<AttributionResult> {
        let models = self.bundle.get(fracture_type)?;
        let features = features::transform(raw, models.score.feature_names())?;
        explainer::explain(&models.score, &features)
    }

    /// Raw margin the attribution reconciles with.
    pub fn raw_score(&self, raw: &RawPatientRecord, fracture_type: FractureType) -> Result<f64> {
        let models = self.bundle.get(fracture_type)?;
        let features = features::transform(raw, models.score.feature_names())?;
        Ok(scorer::score(&models.score, &features)?.margin)
    }

    /// 只計算一次風險分數，再對多個時間點做存活映射
    pub fn risk_curve(
        &self,
        raw: &RawPatientRecord,
        fracture_type: FractureType,
        horizons: &[TimeHorizon],
    ) -> Result<Vec<CurvePoint>> {
        let models = self.bundle.get(fracture_type)?;
        let features = features::transform(raw, models.score.feature_names())?;
        let risk = scorer::score(&models.score, &features)?;

        horizons
            .iter()
            .map(|horizon| {
                survival::probability_of_event(&models.survival, risk.value, horizon.as_months()).map(
                    |probability| CurvePoint {
                        horizon_months: horizon.as_months(),
                        probability,
                    },
                )
            })
            .collect()
    }
}
