pub mod booster;
pub mod bundle;
pub mod engine;
pub mod explainer;
pub mod features;
pub mod pipeline;
pub mod scorer;
pub mod survival;
pub mod thresholds;

pub use crate::domain::model::{
    AttributionResult, FeatureVector, FractureAssessment, FractureType, RawPatientRecord,
    TimeHorizon,
};
pub use crate::domain::ports::{ScoreModel, SurvivalModel};
pub use crate::utils::error::Result;
