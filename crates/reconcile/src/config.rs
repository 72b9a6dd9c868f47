use fatura_core::Money;
use fatura_import::{PaymentMarker, ScoringConfig, DEFAULT_PAYMENT_MARKER};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid payment marker pattern: {0}")]
    InvalidMarker(#[from] regex::Error),
    #[error("Invalid scoring config '{name}': {reason}")]
    InvalidScoring { name: &'static str, reason: &'static str },
}

/// Matching settings. The preview and reconciliation scorers stay separate:
/// they were tuned independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub preview: ScoringConfig,
    pub reconciliation: ScoringConfig,
    /// Regex identifying "payment received" statement lines.
    pub payment_marker: String,
    /// A linked cycle whose bill differs from its total by more than this is
    /// reported as mismatched.
    pub mismatch_threshold: Money,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            preview: ScoringConfig::import_preview(),
            reconciliation: ScoringConfig::reconciliation(),
            payment_marker: DEFAULT_PAYMENT_MARKER.to_string(),
            mismatch_threshold: Money::from_cents(100),
        }
    }
}

impl ReconcileConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, scoring) in [("preview", &self.preview), ("reconciliation", &self.reconciliation)] {
            if scoring.window_days <= 0 {
                return Err(ConfigError::InvalidScoring {
                    name,
                    reason: "window_days must be positive",
                });
            }
            if scoring.tolerance.percent.is_sign_negative() || scoring.tolerance.absolute.is_negative() {
                return Err(ConfigError::InvalidScoring {
                    name,
                    reason: "tolerances must not be negative",
                });
            }
        }
        self.marker()?;
        Ok(())
    }

    pub fn marker(&self) -> Result<PaymentMarker, ConfigError> {
        Ok(PaymentMarker::new(&self.payment_marker)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn defaults_keep_both_scorers_distinct() {
        let config = ReconcileConfig::default();
        assert_eq!(config.preview.tolerance.percent, Decimal::ONE);
        assert_eq!(config.preview.tolerance.absolute, Money::from_cents(1000));
        assert_eq!(config.preview.window_days, 10);
        assert_eq!(config.reconciliation.tolerance.percent, Decimal::TWO);
        assert_eq!(config.reconciliation.tolerance.absolute, Money::from_cents(2000));
        assert_eq!(config.reconciliation.window_days, 15);
        assert_eq!(config.mismatch_threshold, Money::from_cents(100));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ReconcileConfig::from_toml(
            r#"
            payment_marker = "(?i)payment\\s+received"
            mismatch_threshold = "5.00"
            "#,
        )
        .unwrap();
        assert_eq!(config.mismatch_threshold, Money::from_cents(500));
        assert_eq!(config.preview, ScoringConfig::import_preview());
        let line = fatura_core::StatementLine::new(
            chrono::NaiveDate::from_ymd_opt(2024, 11, 5).unwrap(),
            "PAYMENT RECEIVED - THANK YOU",
            Money::from_cents(-100),
        );
        assert!(config.marker().unwrap().is_payment(&line));
    }

    #[test]
    fn rejects_bad_marker_and_window() {
        assert!(matches!(
            ReconcileConfig::from_toml("payment_marker = \"(unclosed\""),
            Err(ConfigError::InvalidMarker(_))
        ));

        let mut config = ReconcileConfig::default();
        config.reconciliation.window_days = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScoring { name: "reconciliation", .. })
        ));
    }
}
