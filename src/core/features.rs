use crate::domain::model::{FeatureVector, RawPatientRecord};
use crate::utils::error::{Result, RiskError};
use serde_json::Value;

/// 模型不使用的欄位，在轉換前一律移除
pub const DISCARDED_ATTRIBUTES: &[&str] = &["sex"];

pub const NUMERIC_ATTRIBUTES: &[&str] = &[
    "age",
    "height",
    "weight",
    "bmi",
    "steroid_daily_dosage",
    "number_of_falls",
    "previous_fracture",
    "recent_fracture",
    "tscore_neck",
    "tscore_total_hip",
    "tscore_ls",
    "tbs",
];

pub const BOOLEAN_ATTRIBUTES: &[&str] = &[
    "hip_fracture_parents",
    "osteoporotic_fracture_parents",
    "corticosteroids",
    "aromatase_inhibitors",
    "antiepileptics",
    "rheumatoid_arthritis",
    "ankylosing_spondylitis",
    "immobility",
    "type_1_diabetes",
    "copd",
    "gastrointestinal_disease",
    "early_menopause",
    "hyperpara",
    "falling_test_abnormal",
    "malfunction_of_kidney",
    "alcohol",
    "nicotin",
    "decrease_in_height",
    "low_back_pain",
    "hyperkyphosis",
];

pub const TREATMENT_FLAGS: &[&str] = &[
    "bisphosphonate_prior",
    "bisphosphonate_current",
    "bisphosphonate_new",
    "denosumab_prior",
    "denosumab_current",
    "denosumab_new",
    "serm_prior",
    "serm_current",
    "serm_new",
    "teriparatide_prior",
    "teriparatide_current",
    "teriparatide_new",
    "hrt_prior",
    "hrt_current",
    "hrt_new",
];

/// 原始欄位名稱 -> 模型內部名稱
pub const RENAMES: &[(&str, &str)] = &[
    ("antiepileptics", "antiepileptic_drugs"),
    ("tscore_total_hip", "tscore_totalHip"),
    ("tbs", "tbs_ls"),
    ("bisphosphonate_prior", "Bisphosphonat_prior"),
    ("bisphosphonate_current", "Bisphosphonat_current"),
    ("bisphosphonate_new", "Bisphosphonat_new"),
    ("denosumab_prior", "Denosumab_prior"),
    ("denosumab_current", "Denosumab_current"),
    ("denosumab_new", "Denosumab_new"),
    ("serm_prior", "SERM_prior"),
    ("serm_current", "SERM_current"),
    ("serm_new", "SERM_new"),
    ("hrt_prior", "HRT_prior"),
    ("hrt_current", "HRT_current"),
    ("hrt_new", "HRT_new"),
    ("teriparatide_prior", "Teriparatide_prior"),
    ("teriparatide_current", "Teriparatide_current"),
    ("teriparatide_new", "Teriparatide_new"),
];

pub const BMI: &str = "bmi";
pub const HRT: &str = "hrt";
pub const MIN_TSCORE: &str = "min_tscore";
pub const NO_TREATMENT: &str = "No_treatment";

const TSCORE_ATTRIBUTES: [&str; 3] = ["tscore_neck", "tscore_total_hip", "tscore_ls"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeKind {
    Numeric,
    Boolean,
    Unspecified,
}

fn attribute_kind(raw_name: &str) -> AttributeKind {
    if NUMERIC_ATTRIBUTES.contains(&raw_name) {
        AttributeKind::Numeric
    } else if BOOLEAN_ATTRIBUTES.contains(&raw_name) || TREATMENT_FLAGS.contains(&raw_name) {
        AttributeKind::Boolean
    } else {
        AttributeKind::Unspecified
    }
}

fn is_derived(canonical: &str) -> bool {
    matches!(canonical, BMI | HRT | MIN_TSCORE | NO_TREATMENT)
}

/// Raw attribute a canonical (non-derived) feature is read from. `None` when the
/// name was renamed away or discarded.
fn source_attribute(canonical: &str) -> Option<&str> {
    if let Some((raw, _)) = RENAMES.iter().find(|(_, to)| *to == canonical) {
        return Some(*raw);
    }
    if RENAMES.iter().any(|(from, _)| *from == canonical) || DISCARDED_ATTRIBUTES.contains(&canonical)
    {
        return None;
    }
    Some(canonical)
}

/// 模型載入時檢查：此特徵能否由靜態對照表產生
pub fn is_known_feature(canonical: &str) -> bool {
    if is_derived(canonical) {
        return true;
    }
    source_attribute(canonical)
        .map(|raw| attribute_kind(raw) != AttributeKind::Unspecified)
        .unwrap_or(false)
}

/// Every canonical feature the transformer can produce.
pub fn canonical_features() -> Vec<String> {
    NUMERIC_ATTRIBUTES
        .iter()
        .chain(BOOLEAN_ATTRIBUTES.iter())
        .chain(TREATMENT_FLAGS.iter())
        .filter(|raw| !matches!(**raw, "height" | "weight"))
        .map(|raw| {
            RENAMES
                .iter()
                .find(|(from, _)| from == raw)
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| raw.to_string())
        })
        .chain([HRT, MIN_TSCORE, NO_TREATMENT].iter().map(|s| s.to_string()))
        .collect()
}

/// 將原始病患資料轉換為模型需要的有序特徵向量
pub fn transform(raw: &RawPatientRecord, target_feature_order: &[String]) -> Result<FeatureVector> {
    let record = raw.without(DISCARDED_ATTRIBUTES);
    let resolver = FeatureResolver { record: &record };

    let values = target_feature_order
        .iter()
        .map(|name| resolver.resolve(name))
        .collect::<Result<Vec<f64>>>()?;

    tracing::debug!("Transformed patient record into {} features", values.len());
    FeatureVector::new(target_feature_order.to_vec(), values)
}

struct FeatureResolver<'a> {
    record: &'a RawPatientRecord,
}

impl FeatureResolver<'_> {
    fn resolve(&self, canonical: &str) -> Result<f64> {
        match canonical {
            BMI => self.bmi(),
            HRT => self.hrt(),
            MIN_TSCORE => self.min_tscore(),
            NO_TREATMENT => self.no_treatment(),
            _ => {
                let raw = source_attribute(canonical).ok_or_else(|| RiskError::MissingFeature {
                    feature: canonical.to_string(),
                })?;
                self.attribute(raw)
            }
        }
    }

    fn attribute(&self, raw_name: &str) -> Result<f64> {
        let value = self
            .record
            .get(raw_name)
            .ok_or_else(|| RiskError::MissingFeature {
                feature: raw_name.to_string(),
            })?;

        match attribute_kind(raw_name) {
            AttributeKind::Boolean => coerce_bool(raw_name, value),
            AttributeKind::Numeric => coerce_number(raw_name, value),
            AttributeKind::Unspecified => match value {
                Value::Bool(_) => coerce_bool(raw_name, value),
                _ => coerce_number(raw_name, value),
            },
        }
    }

    /// BMI 一律由身高體重重新計算，四捨五入至小數點後兩位
    fn bmi(&self) -> Result<f64> {
        let weight = self.attribute("weight")?;
        let height = self.attribute("height")?;
        if height <= 0.0 {
            return Err(RiskError::TypeMismatch {
                attribute: "height".to_string(),
                expected: "positive number".to_string(),
                found: height.to_string(),
            });
        }
        let height_m = height / 100.0;
        Ok(round2(weight / (height_m * height_m)))
    }

    fn hrt(&self) -> Result<f64> {
        let prior = self.attribute("hrt_prior")?;
        let current = self.attribute("hrt_current")?;
        Ok(if prior + current > 0.0 { 1.0 } else { 0.0 })
    }

    fn min_tscore(&self) -> Result<f64> {
        TSCORE_ATTRIBUTES
            .iter()
            .map(|name| self.attribute(name))
            .try_fold(f64::INFINITY, |acc, value| value.map(|v| acc.min(v)))
    }

    fn no_treatment(&self) -> Result<f64> {
        let mut total = 0.0;
        for flag in TREATMENT_FLAGS {
            total += self.attribute(flag)?;
        }
        Ok(if total == 0.0 { 1.0 } else { 0.0 })
    }
}

fn coerce_bool(attribute: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 || v == 1.0 => Ok(v),
            _ => Err(type_mismatch(attribute, "boolean", value)),
        },
        _ => Err(type_mismatch(attribute, "boolean", value)),
    }
}

fn coerce_number(attribute: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| type_mismatch(attribute, "number", value))
}

fn type_mismatch(attribute: &str, expected: &str, found: &Value) -> RiskError {
    let found = match found {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string \"{}\"", s),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    };
    RiskError::TypeMismatch {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        found,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient() -> RawPatientRecord {
        let mut data = serde_json::Map::new();
        data.insert("sex".to_string(), json!("female"));
        data.insert("age".to_string(), json!(65));
        data.insert("height".to_string(), json!(165));
        data.insert("weight".to_string(), json!(60));
        for attr in ["steroid_daily_dosage", "number_of_falls", "previous_fracture", "recent_fracture"] {
            data.insert(attr.to_string(), json!(0));
        }
        data.insert("tscore_neck".to_string(), json!(-2.0));
        data.insert("tscore_total_hip".to_string(), json!(-1.5));
        data.insert("tscore_ls".to_string(), json!(-2.7));
        data.insert("tbs".to_string(), json!(1.3));
        for attr in BOOLEAN_ATTRIBUTES.iter().chain(TREATMENT_FLAGS.iter()) {
            data.insert(attr.to_string(), json!(false));
        }
        RawPatientRecord::from_json(serde_json::Value::Object(data)).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_output_matches_target_order_exactly() {
        let target = names(&["min_tscore", "age", "tscore_totalHip", "bmi"]);
        let features = transform(&patient(), &target).unwrap();

        assert_eq!(features.names(), target.as_slice());
        assert_eq!(features.values(), &[-2.7, 65.0, -1.5, 22.04]);
    }

    #[test]
    fn test_all_canonical_features_resolve() {
        let target = canonical_features();
        let features = transform(&patient(), &target).unwrap();
        assert_eq!(features.len(), target.len());
        assert!(target.iter().all(|name| is_known_feature(name)));
    }

    #[test]
    fn test_bmi_rounded_to_two_decimals() {
        let record = patient().with("height", json!(170)).with("weight", json!(73));
        let features = transform(&record, &names(&["bmi"])).unwrap();
        assert_eq!(features.get("bmi"), Some(25.26));
    }

    #[test]
    fn test_hrt_derived_from_prior_or_current() {
        let target = names(&["hrt", "HRT_prior"]);
        let none = transform(&patient(), &target).unwrap();
        assert_eq!(none.get("hrt"), Some(0.0));

        let prior = transform(&patient().with("hrt_prior", json!(true)), &target).unwrap();
        assert_eq!(prior.get("hrt"), Some(1.0));
        assert_eq!(prior.get("HRT_prior"), Some(1.0));

        let current = transform(&patient().with("hrt_current", json!(true)), &target).unwrap();
        assert_eq!(current.get("hrt"), Some(1.0));
    }

    #[test]
    fn test_no_treatment_requires_every_flag_false() {
        let target = names(&[NO_TREATMENT]);
        assert_eq!(transform(&patient(), &target).unwrap().get(NO_TREATMENT), Some(1.0));

        for flag in TREATMENT_FLAGS {
            let treated = patient().with(flag, json!(true));
            assert_eq!(
                transform(&treated, &target).unwrap().get(NO_TREATMENT),
                Some(0.0),
                "flag {} should clear No_treatment",
                flag
            );
        }
    }

    #[test]
    fn test_renamed_attribute_not_addressable_by_raw_name() {
        let err = transform(&patient(), &names(&["antiepileptics"])).unwrap_err();
        assert!(matches!(err, RiskError::MissingFeature { feature } if feature == "antiepileptics"));
    }

    #[test]
    fn test_sex_is_never_a_feature() {
        let err = transform(&patient(), &names(&["sex"])).unwrap_err();
        assert!(matches!(err, RiskError::MissingFeature { .. }));
        assert!(!is_known_feature("sex"));
    }

    #[test]
    fn test_missing_attribute_named_by_raw_name() {
        let record = patient().without(&["tscore_ls"]);
        let err = transform(&record, &names(&["min_tscore"])).unwrap_err();
        assert!(matches!(err, RiskError::MissingFeature { feature } if feature == "tscore_ls"));

        let record = patient().without(&["tbs"]);
        let err = transform(&record, &names(&["tbs_ls"])).unwrap_err();
        assert!(matches!(err, RiskError::MissingFeature { feature } if feature == "tbs"));
    }

    #[test]
    fn test_boolean_coercion() {
        let target = names(&["copd"]);
        let as_int = transform(&patient().with("copd", json!(1)), &target).unwrap();
        assert_eq!(as_int.get("copd"), Some(1.0));

        let err = transform(&patient().with("copd", json!("yes")), &target).unwrap_err();
        assert!(matches!(err, RiskError::TypeMismatch { attribute, .. } if attribute == "copd"));

        let err = transform(&patient().with("copd", json!(2)), &target).unwrap_err();
        assert!(matches!(err, RiskError::TypeMismatch { .. }));
    }

    #[test]
    fn test_numeric_rejects_non_numbers() {
        let err = transform(&patient().with("age", json!("65")), &names(&["age"])).unwrap_err();
        assert!(matches!(err, RiskError::TypeMismatch { expected, .. } if expected == "number"));
    }

    #[test]
    fn test_unknown_feature_is_not_known() {
        assert!(!is_known_feature("shoe_size"));
        assert!(is_known_feature("Teriparatide_new"));
        assert!(is_known_feature(NO_TREATMENT));
    }
}
