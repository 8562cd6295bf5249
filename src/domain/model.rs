use crate::utils::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// 骨折類型：脊椎、髖部、任何主要骨質疏鬆性骨折
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FractureType {
    Vertebral,
    Hip,
    Any,
}

impl FractureType {
    pub const ALL: [FractureType; 3] = [FractureType::Vertebral, FractureType::Hip, FractureType::Any];

    pub fn as_str(&self) -> &'static str {
        match self {
            FractureType::Vertebral => "vertebral",
            FractureType::Hip => "hip",
            FractureType::Any => "any",
        }
    }
}

impl fmt::Display for FractureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FractureType {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vertebral" => Ok(FractureType::Vertebral),
            "hip" => Ok(FractureType::Hip),
            "any" => Ok(FractureType::Any),
            _ => Err(RiskError::UnknownFractureType {
                name: s.to_string(),
            }),
        }
    }
}

/// 預測時間範圍（月）
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct TimeHorizon(f64);

impl TimeHorizon {
    pub fn months(months: f64) -> Result<Self> {
        if !months.is_finite() || months < 0.0 {
            return Err(RiskError::InvalidHorizon { months });
        }
        Ok(Self(months))
    }

    pub fn from_years(years: f64) -> Result<Self> {
        Self::months(years * 12.0)
    }

    /// 預設時間格點：12, 24, ..., 84 個月
    pub fn yearly_grid(max_years: u32) -> Vec<TimeHorizon> {
        (1..=max_years).map(|y| TimeHorizon(f64::from(y) * 12.0)).collect()
    }

    pub fn as_months(&self) -> f64 {
        self.0
    }

    pub fn as_years(&self) -> f64 {
        self.0 / 12.0
    }
}

/// 經外部驗證層檢查過的原始病患資料
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawPatientRecord {
    pub data: HashMap<String, serde_json::Value>,
}

impl RawPatientRecord {
    pub fn new(data: HashMap<String, serde_json::Value>) -> Self {
        Self { data }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn get(&self, attribute: &str) -> Option<&serde_json::Value> {
        self.data.get(attribute)
    }

    /// 回傳移除指定欄位後的副本，原紀錄保持不變
    pub fn without(&self, attributes: &[&str]) -> Self {
        let data = self
            .data
            .iter()
            .filter(|(key, _)| !attributes.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Self { data }
    }

    pub fn with(mut self, attribute: &str, value: serde_json::Value) -> Self {
        self.data.insert(attribute.to_string(), value);
        self
    }
}

/// Ordered feature values, positioned exactly as the score model expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if names.len() != values.len() {
            return Err(RiskError::Scoring {
                message: format!(
                    "feature vector has {} names but {} values",
                    names.len(),
                    values.len()
                ),
            });
        }
        Ok(Self { names, values })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub feature_value: f64,
    pub contribution: f64,
}

/// SHAP 解釋結果：baseline + Σ contribution = 模型原始輸出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionResult {
    pub baseline: f64,
    /// 依貢獻絕對值由大到小排序
    pub contributions: Vec<FeatureContribution>,
}

impl AttributionResult {
    pub fn new(baseline: f64, mut contributions: Vec<FeatureContribution>) -> Self {
        contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        Self {
            baseline,
            contributions,
        }
    }

    pub fn contribution(&self, feature: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.feature == feature)
            .map(|c| c.contribution)
    }

    pub fn by_feature(&self) -> BTreeMap<String, f64> {
        self.contributions
            .iter()
            .map(|c| (c.feature.clone(), c.contribution))
            .collect()
    }

    pub fn reconstructed_score(&self) -> f64 {
        self.baseline + self.contributions.iter().map(|c| c.contribution).sum::<f64>()
    }

    pub fn top(&self, n: usize) -> &[FeatureContribution] {
        &self.contributions[..n.min(self.contributions.len())]
    }
}

/// 單一骨折類型的評估結果
#[derive(Debug, Clone, Serialize)]
pub struct FractureAssessment {
    pub fracture_type: FractureType,
    pub horizon_months: f64,
    pub risk_score: f64,
    pub probability: f64,
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<AttributionResult>,
}

impl FractureAssessment {
    pub fn new(
        fracture_type: FractureType,
        horizon: TimeHorizon,
        risk_score: f64,
        probability: f64,
        attribution: Option<AttributionResult>,
    ) -> Self {
        Self {
            fracture_type,
            horizon_months: horizon.as_months(),
            risk_score,
            probability,
            percent: to_percent(probability),
            attribution,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub horizon_months: f64,
    pub probability: f64,
}

/// 百分比四捨五入到小數點後兩位
pub fn to_percent(probability: f64) -> f64 {
    (probability * 100.0 * 100.0).round() / 100.0
}
