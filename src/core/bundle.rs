use crate::core::booster::GradientBoostedModel;
use crate::core::features;
use crate::core::survival::CoxSurvivalModel;
use crate::domain::model::FractureType;
use crate::domain::ports::ScoreModel;
use crate::utils::error::{Result, RiskError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// 單一骨折類型的模型組合
#[derive(Debug, Clone)]
pub struct FractureModels {
    pub score: GradientBoostedModel,
    pub survival: CoxSurvivalModel,
}

/// Immutable set of models for every fracture type, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    models: HashMap<FractureType, FractureModels>,
    source: PathBuf,
}

impl ModelBundle {
    pub fn score_artifact(dir: &Path, fracture_type: FractureType) -> PathBuf {
        dir.join(format!("{}_xgb.json", fracture_type))
    }

    pub fn survival_artifact(dir: &Path, fracture_type: FractureType) -> PathBuf {
        dir.join(format!("{}_cox.json", fracture_type))
    }

    /// 載入全部三種骨折類型的模型；任何一個失敗即視為啟動失敗
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!("📦 Loading model bundle from {}", dir.display());

        let mut models = HashMap::new();
        for fracture_type in FractureType::ALL {
            let score_path = Self::score_artifact(dir, fracture_type);
            let score = GradientBoostedModel::from_file(&score_path)?;
            check_vocabulary(&score, &score_path)?;

            let survival = CoxSurvivalModel::from_file(Self::survival_artifact(dir, fracture_type))?;

            tracing::info!(
                "✅ {} models loaded: {} trees, {} features, objective {:?}",
                fracture_type,
                score.trees().len(),
                score.feature_names().len(),
                score.objective()
            );
            models.insert(fracture_type, FractureModels { score, survival });
        }

        Ok(Self {
            models,
            source: dir.to_path_buf(),
        })
    }

    pub fn from_models(models: HashMap<FractureType, FractureModels>) -> Result<Self> {
        if let Some(missing) = FractureType::ALL.iter().copied().find(|ft| !models.contains_key(ft)) {
            return Err(RiskError::ModelLoad {
                path: "<in-memory>".to_string(),
                reason: format!("no models for fracture type '{}'", missing),
            });
        }
        Ok(Self {
            models,
            source: PathBuf::from("<in-memory>"),
        })
    }

    pub fn get(&self, fracture_type: FractureType) -> Result<&FractureModels> {
        self.models
            .get(&fracture_type)
            .ok_or_else(|| RiskError::UnknownFractureType {
                name: fracture_type.to_string(),
            })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

fn check_vocabulary(model: &GradientBoostedModel, path: &Path) -> Result<()> {
    let unknown: Vec<&str> = model
        .feature_names()
        .iter()
        .map(String::as_str)
        .filter(|name| !features::is_known_feature(name))
        .collect();
    if !unknown.is_empty() {
        return Err(RiskError::ModelLoad {
            path: path.display().to_string(),
            reason: format!("model declares features with no mapping: {}", unknown.join(", ")),
        });
    }
    Ok(())
}
