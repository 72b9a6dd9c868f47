use std::path::Path;

use anyhow::{Context, Result};
use fatura_import::{CategoryRule, CategoryRuleEngine, StatementProfile};
use fatura_reconcile::ReconcileConfig;
use serde::Deserialize;

/// Contents of `fatura.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub statement: StatementProfile,
    pub matching: ReconcileConfig,
    pub rules: Vec<CategoryRule>,
}

impl FileConfig {
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.matching.validate()?;
        Ok(config)
    }

    pub fn rule_engine(&self) -> Option<CategoryRuleEngine> {
        let engine = CategoryRuleEngine::new(self.rules.clone());
        (!engine.is_empty()).then_some(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fatura_core::Money;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.matching, ReconcileConfig::default());
        assert!(config.rule_engine().is_none());
        assert_eq!(config.statement.delimiter, ",");
    }

    #[test]
    fn parses_all_sections() {
        let config = FileConfig::parse(
            r#"
            [statement]
            name = "nubank"
            delimiter = ";"

            [statement.columns]
            date_column = 0
            description_column = 2
            amount_column = 3

            [matching]
            mismatch_threshold = "2.50"

            [[rules]]
            name = "delivery"
            pattern = "ifood"
            category_id = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.statement.name, "nubank");
        assert_eq!(config.statement.columns.description_column, 2);
        assert_eq!(config.statement.columns.date_format, "%d/%m/%Y");
        assert_eq!(config.matching.mismatch_threshold, Money::from_cents(250));
        assert_eq!(config.matching.reconciliation.window_days, 15);
        assert!(config.rule_engine().is_some());
    }

    #[test]
    fn invalid_marker_is_reported() {
        let err = FileConfig::parse("[matching]\npayment_marker = \"(\"").unwrap_err();
        assert!(err.to_string().contains("payment marker"));
    }
}
