pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{toml_config::TomlConfig, Settings};

pub use core::{
    bundle::ModelBundle,
    engine::{RiskEngine, RiskReport, RiskRequest},
    pipeline::RiskPipeline,
};
pub use domain::model::{
    AttributionResult, FeatureVector, FractureAssessment, FractureType, RawPatientRecord,
    TimeHorizon,
};
pub use utils::error::{Result, RiskError};
