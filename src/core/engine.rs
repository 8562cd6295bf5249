use crate::core::pipeline::RiskPipeline;
use crate::domain::model::{FractureAssessment, FractureType, RawPatientRecord, TimeHorizon};
use crate::utils::error::{Result, RiskError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RiskRequest {
    pub fracture_types: Vec<FractureType>,
    pub horizon: TimeHorizon,
    pub explain: bool,
}

impl RiskRequest {
    pub fn all(horizon: TimeHorizon) -> Self {
        Self {
            fracture_types: FractureType::ALL.to_vec(),
            horizon,
            explain: false,
        }
    }

    pub fn with_explanation(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

/// 所有骨折類型都完成後才回傳；每個類型各自帶著成功結果或錯誤
#[derive(Debug)]
pub struct RiskReport {
    pub horizon: TimeHorizon,
    pub assessed_at: DateTime<Utc>,
    pub outcomes: BTreeMap<FractureType, Result<FractureAssessment>>,
}

impl RiskReport {
    pub fn assessment(&self, fracture_type: FractureType) -> Option<&FractureAssessment> {
        self.outcomes.get(&fracture_type).and_then(|r| r.as_ref().ok())
    }

    pub fn probabilities(&self) -> BTreeMap<FractureType, f64> {
        self.outcomes
            .iter()
            .filter_map(|(ft, outcome)| outcome.as_ref().ok().map(|a| (*ft, a.probability)))
            .collect()
    }

    pub fn failures(&self) -> Vec<(FractureType, &RiskError)> {
        self.outcomes
            .iter()
            .filter_map(|(ft, outcome)| outcome.as_ref().err().map(|e| (*ft, e)))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.values().all(|o| o.is_ok())
    }

    /// 任一類型失敗即回傳該錯誤，不提供部分結果
    pub fn into_result(self) -> Result<Vec<FractureAssessment>> {
        self.outcomes.into_values().collect()
    }

    pub fn summary(&self) -> ReportSummary<'_> {
        let mut risks = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (ft, outcome) in &self.outcomes {
            match outcome {
                Ok(assessment) => {
                    risks.insert(*ft, assessment);
                }
                Err(e) => {
                    errors.insert(*ft, e.to_string());
                }
            }
        }
        ReportSummary {
            horizon_months: self.horizon.as_months(),
            assessed_at: self.assessed_at,
            risks,
            errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReportSummary<'a> {
    pub horizon_months: f64,
    pub assessed_at: DateTime<Utc>,
    pub risks: BTreeMap<FractureType, &'a FractureAssessment>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<FractureType, String>,
}

pub struct RiskEngine {
    pipeline: RiskPipeline,
}

impl RiskEngine {
    pub fn new(pipeline: RiskPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &RiskPipeline {
        &self.pipeline
    }

    /// 各骨折類型平行計算（fan-out），全部完成後合併（fan-in）
    pub async fn run(&self, raw: RawPatientRecord, request: &RiskRequest) -> RiskReport {
        let raw = Arc::new(raw);
        let mut fracture_types = request.fracture_types.clone();
        fracture_types.sort();
        fracture_types.dedup();

        tracing::info!(
            "🚀 Assessing {} fracture type(s) at {} months (explain: {})",
            fracture_types.len(),
            request.horizon.as_months(),
            request.explain
        );

        let handles: Vec<_> = fracture_types
            .into_iter()
            .map(|fracture_type| {
                let pipeline = self.pipeline.clone();
                let raw = Arc::clone(&raw);
                let horizon = request.horizon;
                let explain = request.explain;
                let handle = tokio::task::spawn_blocking(move || {
                    pipeline.assess(&raw, fracture_type, horizon, explain)
                });
                (fracture_type, handle)
            })
            .collect();

        let mut outcomes = BTreeMap::new();
        for (fracture_type, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(RiskError::TaskJoinError {
                    message: format!("{} assessment aborted: {}", fracture_type, e),
                }),
            };
            match &outcome {
                Ok(assessment) => {
                    tracing::info!("✅ {} risk: {}%", fracture_type, assessment.percent)
                }
                Err(e) => tracing::warn!("❌ {} assessment failed: {}", fracture_type, e),
            }
            outcomes.insert(fracture_type, outcome);
        }

        RiskReport {
            horizon: request.horizon,
            assessed_at: Utc::now(),
            outcomes,
        }
    }
}
