use crate::utils::error::{Result, RiskError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub horizon: HorizonConfig,
    #[serde(default)]
    pub explain: ExplainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub directory: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            directory: "./models".to_string(),
        }
    }
}

/// 服務端允許的預測年限範圍（1-7 年）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    pub default_years: u32,
    pub min_years: u32,
    pub max_years: u32,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            default_years: 2,
            min_years: 1,
            max_years: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub enabled: bool,
    pub top_features: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_features: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| RiskError::ConfigParseError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${MODEL_DIR})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| RiskError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_path("models.directory", &self.models.directory)?;
        validation::validate_positive_number("horizon.min_years", self.horizon.min_years as usize, 1)?;
        if self.horizon.max_years < self.horizon.min_years {
            return Err(RiskError::InvalidConfigValueError {
                field: "horizon.max_years".to_string(),
                value: self.horizon.max_years.to_string(),
                reason: format!("must not be below horizon.min_years ({})", self.horizon.min_years),
            });
        }
        validation::validate_range(
            "horizon.default_years",
            self.horizon.default_years,
            self.horizon.min_years,
            self.horizon.max_years,
        )?;
        validation::validate_positive_number("explain.top_features", self.explain.top_features, 1)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(RiskError::InvalidConfigValueError {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
                reason: format!("Valid levels: {}", valid_levels.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_toml_config() {
        let toml_content = r#"
[models]
directory = "/opt/fracture-risk/models"

[horizon]
default_years = 5
min_years = 1
max_years = 7

[explain]
enabled = true
top_features = 8

[logging]
level = "debug"
json = true
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.models.directory, "/opt/fracture-risk/models");
        assert_eq!(config.horizon.default_years, 5);
        assert!(config.explain.enabled);
        assert_eq!(config.explain.top_features, 8);
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_tables_use_defaults() {
        let config = TomlConfig::from_toml_str("[models]\ndirectory = \"./artifacts\"\n").unwrap();
        assert_eq!(config.models.directory, "./artifacts");
        assert_eq!(config.horizon.max_years, 7);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("FRACTURE_RISK_TEST_MODEL_DIR", "/srv/models");

        let toml_content = r#"
[models]
directory = "${FRACTURE_RISK_TEST_MODEL_DIR}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.models.directory, "/srv/models");

        std::env::remove_var("FRACTURE_RISK_TEST_MODEL_DIR");
    }

    #[test]
    fn test_config_validation() {
        let toml_content = r#"
[horizon]
default_years = 9
min_years = 1
max_years = 7
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        let bad_level = TomlConfig::from_toml_str("[logging]\nlevel = \"loud\"\njson = false\n").unwrap();
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[explain]\nenabled = true\ntop_features = 3\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.explain.top_features, 3);
    }

    #[test]
    fn test_invalid_toml_reports_parse_error() {
        let err = TomlConfig::from_toml_str("[models\n").unwrap_err();
        assert!(matches!(err, RiskError::ConfigParseError { .. }));
    }
}
