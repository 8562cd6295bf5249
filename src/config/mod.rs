pub mod toml_config;

use crate::domain::model::{FractureType, TimeHorizon};
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use toml_config::TomlConfig;

#[cfg(feature = "cli")]
use clap::{Parser, ValueEnum};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "fracture-risk")]
#[command(about = "Estimate postmenopausal fracture risk from clinical attributes")]
pub struct CliConfig {
    /// Patient record as JSON ("-" reads stdin)
    #[arg(long, default_value = "-")]
    pub patient: String,

    /// Prediction horizon in years
    #[arg(long)]
    pub years: Option<u32>,

    #[arg(long, value_delimiter = ',', default_value = "vertebral,hip,any")]
    pub fracture_types: Vec<String>,

    #[arg(long, help = "Compute SHAP feature attributions")]
    pub explain: bool,

    #[arg(long)]
    pub top_features: Option<usize>,

    #[arg(long, help = "Print yearly risk curve up to the maximum horizon")]
    pub curve: bool,

    #[arg(long, help = "Print the age-banded risk category for each probability")]
    pub categorize: bool,

    /// Directory holding <type>_xgb.json and <type>_cox.json
    #[arg(long)]
    pub models: Option<String>,

    /// Optional TOML configuration file
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[arg(long, help = "Emit JSON log lines")]
    pub json_logs: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

/// CLI 與 TOML 合併後的最終設定
#[derive(Debug, Clone)]
pub struct Settings {
    pub models_dir: String,
    pub years: u32,
    pub min_years: u32,
    pub max_years: u32,
    pub fracture_types: Vec<String>,
    pub explain: bool,
    pub top_features: usize,
    pub curve: bool,
    pub categorize: bool,
}

impl Settings {
    pub fn from_toml(file: &TomlConfig) -> Self {
        Self {
            models_dir: file.models.directory.clone(),
            years: file.horizon.default_years,
            min_years: file.horizon.min_years,
            max_years: file.horizon.max_years,
            fracture_types: FractureType::ALL.iter().map(|ft| ft.to_string()).collect(),
            explain: file.explain.enabled,
            top_features: file.explain.top_features,
            curve: false,
            categorize: false,
        }
    }

    pub fn parsed_fracture_types(&self) -> Result<Vec<FractureType>> {
        self.fracture_types.iter().map(|s| s.parse()).collect()
    }

    pub fn horizon(&self) -> Result<TimeHorizon> {
        TimeHorizon::from_years(f64::from(self.years))
    }

    pub fn curve_horizons(&self) -> Vec<TimeHorizon> {
        TimeHorizon::yearly_grid(self.max_years)
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validation::validate_existing_dir("models", &self.models_dir)?;
        validation::validate_range("years", self.years, self.min_years, self.max_years)?;
        validation::validate_positive_number("top_features", self.top_features, 1)?;
        validation::validate_positive_number("fracture_types", self.fracture_types.len(), 1)?;
        self.parsed_fracture_types()?;
        Ok(())
    }
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 讀取 TOML（如有），再以命令列參數覆蓋
    pub fn resolve(&self) -> Result<(Settings, TomlConfig)> {
        let file = match &self.config {
            Some(path) => {
                let file = TomlConfig::from_file(path)?;
                file.validate()?;
                file
            }
            None => TomlConfig::default(),
        };

        let mut settings = Settings::from_toml(&file);
        if let Some(models) = &self.models {
            settings.models_dir = models.clone();
        }
        if let Some(years) = self.years {
            settings.years = years;
        }
        settings.fracture_types = self.fracture_types.clone();
        settings.explain = settings.explain || self.explain;
        if let Some(top) = self.top_features {
            settings.top_features = top;
        }
        settings.curve = self.curve;
        settings.categorize = self.categorize;

        Ok((settings, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::RiskError;

    fn settings(dir: &str) -> Settings {
        let mut s = Settings::from_toml(&TomlConfig::default());
        s.models_dir = dir.to_string();
        s
    }

    #[test]
    fn test_defaults_cover_all_types_at_two_years() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path().to_str().unwrap());
        assert!(s.validate().is_ok());
        assert_eq!(s.parsed_fracture_types().unwrap(), FractureType::ALL.to_vec());
        assert_eq!(s.horizon().unwrap().as_months(), 24.0);
        assert_eq!(s.curve_horizons().len(), 7);
    }

    #[test]
    fn test_years_outside_admissible_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path().to_str().unwrap());
        s.years = 8;
        assert!(matches!(s.validate(), Err(RiskError::InvalidConfigValueError { .. })));
    }

    #[test]
    fn test_unknown_fracture_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path().to_str().unwrap());
        s.fracture_types = vec!["hip".to_string(), "wrist".to_string()];
        assert!(matches!(s.validate(), Err(RiskError::UnknownFractureType { .. })));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_cli_overrides_defaults() {
        use clap::Parser;
        let cli = CliConfig::parse_from([
            "fracture-risk",
            "--years",
            "5",
            "--fracture-types",
            "hip",
            "--explain",
            "--models",
            "/tmp/models",
        ]);
        let (s, _) = cli.resolve().unwrap();
        assert_eq!(s.years, 5);
        assert_eq!(s.fracture_types, vec!["hip".to_string()]);
        assert!(s.explain);
        assert_eq!(s.models_dir, "/tmp/models");
    }
}
