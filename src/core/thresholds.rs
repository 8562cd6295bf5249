//! Age-banded intervention thresholds for major osteoporotic fracture risk.
//!
//! Optional collaborator: the inference pipeline never calls this. Callers pass
//! a probability produced by the pipeline together with the patient's age.

use crate::utils::error::{Result, RiskError};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ThresholdRow {
    age: f64,
    lower: f64,
    upper: f64,
    very_high: f64,
}

/// 10 年 MOF 風險百分比門檻（LAT / UAT / VHRT）
const MOF_THRESHOLDS: [ThresholdRow; 7] = [
    ThresholdRow { age: 40.0, lower: 2.9, upper: 7.8, very_high: 10.3 },
    ThresholdRow { age: 45.0, lower: 3.0, upper: 8.0, very_high: 10.6 },
    ThresholdRow { age: 50.0, lower: 4.2, upper: 10.9, very_high: 14.6 },
    ThresholdRow { age: 55.0, lower: 5.3, upper: 13.3, very_high: 17.7 },
    ThresholdRow { age: 60.0, lower: 6.1, upper: 15.0, very_high: 20.0 },
    ThresholdRow { age: 65.0, lower: 8.5, upper: 19.9, very_high: 26.5 },
    ThresholdRow { age: 70.0, lower: 11.6, upper: 25.6, very_high: 34.1 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskCategory::Low => "Low risk",
            RiskCategory::Moderate => "Moderate risk",
            RiskCategory::High => "High risk",
            RiskCategory::VeryHigh => "Very high risk",
        };
        f.write_str(label)
    }
}

fn thresholds_at(age: f64) -> ThresholdRow {
    let first = MOF_THRESHOLDS[0];
    let last = MOF_THRESHOLDS[MOF_THRESHOLDS.len() - 1];
    if age <= first.age {
        return first;
    }
    if age >= last.age {
        return last;
    }

    let (lo, hi) = MOF_THRESHOLDS
        .windows(2)
        .map(|w| (w[0], w[1]))
        .find(|(lo, hi)| age >= lo.age && age <= hi.age)
        .unwrap_or((last, last));
    let ratio = (age - lo.age) / (hi.age - lo.age);
    let lerp = |a: f64, b: f64| a + (b - a) * ratio;

    ThresholdRow {
        age,
        lower: lerp(lo.lower, hi.lower),
        upper: lerp(lo.upper, hi.upper),
        very_high: lerp(lo.very_high, hi.very_high),
    }
}

/// 將 horizon 年內的骨折機率換算為 10 年等效百分比後分級
pub fn categorize(age: f64, probability: f64, horizon_years: f64) -> Result<RiskCategory> {
    if !horizon_years.is_finite() || horizon_years <= 0.0 {
        return Err(RiskError::InvalidHorizon {
            months: horizon_years * 12.0,
        });
    }
    let ten_year_percent = probability * 100.0 * (10.0 / horizon_years);
    let row = thresholds_at(age);

    let category = if ten_year_percent < row.lower {
        RiskCategory::Low
    } else if ten_year_percent < row.upper {
        RiskCategory::Moderate
    } else if ten_year_percent < row.very_high {
        RiskCategory::High
    } else {
        RiskCategory::VeryHigh
    };
    Ok(category)
}
