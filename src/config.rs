//! Configuration file parsing.
//!
//! Reads pg-migration-run.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::validate::ValidateOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub apply: ApplyConfig,

    #[serde(default)]
    pub tenancy: TenancyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Name of the ledger table.
    #[serde(default = "default_ledger_table")]
    pub table: String,

    /// Schema the engine operates in (ledger table included).
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Take an advisory lock for the duration of a run, so two concurrent
    /// runners cannot apply the same migration twice.
    #[serde(default = "default_true")]
    pub advisory_lock: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            table: default_ledger_table(),
            schema: default_schema(),
            advisory_lock: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplyConfig {
    /// Run each migration inside a single transaction. When true (the
    /// default), migrations containing operations that cannot run in a
    /// transaction (concurrent index builds) are refused. When false, such
    /// migrations run sequenced and individually guarded, with the ledger
    /// entry written after the last step.
    #[serde(default = "default_true")]
    pub transactional: bool,

    /// Allow applying a migration whose id sorts before an already-applied
    /// one (interleaved branch merges).
    #[serde(default)]
    pub allow_out_of_order: bool,

    /// Refuse to apply migrations with error-level validation issues.
    #[serde(default = "default_true")]
    pub strict_validation: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            transactional: true,
            allow_out_of_order: false,
            strict_validation: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TenancyConfig {
    /// When set, every table created by a migration must carry this column
    /// with a default value.
    pub column: Option<String>,

    /// Tables exempt from the tenant-column requirement.
    #[serde(default)]
    pub exempt: Vec<String>,
}

fn default_ledger_table() -> String {
    "_migration_ledger".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_true() -> bool {
    true
}

impl RunnerConfig {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: RunnerConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("ledger.table", &self.ledger.table),
            ("ledger.schema", &self.ledger.schema),
        ] {
            if !is_identifier(value) {
                return Err(ConfigError::Validation(format!(
                    "{field} '{value}' is not a plain identifier \
                     (letters, digits, underscores; must not start with a digit)"
                )));
            }
        }
        Ok(())
    }

    /// The validator options this configuration implies.
    pub fn validate_options(&self) -> ValidateOptions {
        ValidateOptions {
            tenant_column: self.tenancy.column.clone(),
            tenant_exempt: self.tenancy.exempt.clone(),
        }
    }
}

/// Plain identifier check used for names interpolated into ledger SQL.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Helper: parse TOML into RunnerConfig and run validation.
    fn parse_and_validate(toml_str: &str) -> Result<RunnerConfig, ConfigError> {
        let config: RunnerConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_and_validate("").unwrap();
        assert_eq!(config.ledger.table, "_migration_ledger");
        assert_eq!(config.ledger.schema, "public");
        assert!(config.ledger.advisory_lock);
        assert!(config.apply.transactional);
        assert!(!config.apply.allow_out_of_order);
        assert!(config.apply.strict_validation);
        assert!(config.tenancy.column.is_none());
    }

    #[test]
    fn test_invalid_ledger_table_rejected() {
        let toml = "[ledger]\ntable = \"bad name; drop\"";
        let err = parse_and_validate(toml).unwrap_err();
        assert!(
            err.to_string().contains("not a plain identifier"),
            "Expected validation error, got: {}",
            err
        );
    }

    #[test]
    fn test_leading_digit_rejected() {
        let toml = "[ledger]\ntable = \"1ledger\"";
        assert!(parse_and_validate(toml).is_err());
    }

    #[test]
    fn test_tenancy_section_parsed() {
        let toml = r#"
[tenancy]
column = "tenant_id"
exempt = ["subscription_credits"]
"#;
        let config = parse_and_validate(toml).unwrap();
        let options = config.validate_options();
        assert_eq!(options.tenant_column.as_deref(), Some("tenant_id"));
        assert_eq!(options.tenant_exempt, vec!["subscription_credits"]);
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[apply]\ntransactional = false\nallow_out_of_order = true"
        )
        .unwrap();
        let config = RunnerConfig::from_file(&file.path().to_path_buf()).unwrap();
        assert!(!config.apply.transactional);
        assert!(config.apply.allow_out_of_order);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
    }
}
