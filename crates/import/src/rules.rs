use fatura_core::{CategoryId, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule '{rule}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error("Failed to parse rules: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    pub pattern: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub category_id: CategoryId,
    pub amount_min: Option<Money>,
    pub amount_max: Option<Money>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    Regex,
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(MatchType::Contains),
            "exact" => Ok(MatchType::Exact),
            "regex" => Ok(MatchType::Regex),
            other => Err(format!("Unknown match type: '{other}'")),
        }
    }
}

/// Assigns a category to an imported line. Failures are per-line: callers
/// log them and import the line uncategorized.
pub trait CategoryMatcher: Send + Sync {
    fn match_category(&self, description: &str, amount: Money) -> Result<Option<CategoryId>, RuleError>;
}

struct CompiledRule {
    rule: CategoryRule,
    compiled_regex: Option<Result<regex::Regex, regex::Error>>,
}

pub struct CategoryRuleEngine {
    rules: Vec<CompiledRule>,
}

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<CategoryRule>,
}

impl CategoryRuleEngine {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .map(|rule| {
                let compiled_regex = match rule.match_type {
                    MatchType::Regex => Some(
                        regex::RegexBuilder::new(&rule.pattern)
                            .case_insensitive(true)
                            .build(),
                    ),
                    _ => None,
                };
                CompiledRule { rule, compiled_regex }
            })
            .collect();
        // Highest priority first; stable so equal priorities keep file order.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Self { rules: compiled }
    }

    /// Parses a TOML document made of `[[rules]]` tables.
    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(toml_content)?;
        Ok(Self::new(file.rules))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find_matching_rule(&self, description: &str, amount: Money) -> Result<Option<&CategoryRule>, RuleError> {
        for cr in &self.rules {
            if rule_matches(cr, description, amount)? {
                return Ok(Some(&cr.rule));
            }
        }
        Ok(None)
    }
}

impl CategoryMatcher for CategoryRuleEngine {
    fn match_category(&self, description: &str, amount: Money) -> Result<Option<CategoryId>, RuleError> {
        Ok(self
            .find_matching_rule(description, amount)?
            .map(|rule| rule.category_id))
    }
}

fn rule_matches(cr: &CompiledRule, description: &str, amount: Money) -> Result<bool, RuleError> {
    let rule = &cr.rule;

    if rule.amount_min.is_some_and(|min| amount < min) {
        return Ok(false);
    }
    if rule.amount_max.is_some_and(|max| amount > max) {
        return Ok(false);
    }

    let text = description.to_lowercase();
    let pattern = rule.pattern.to_lowercase();

    Ok(match rule.match_type {
        MatchType::Contains => text.contains(&pattern),
        MatchType::Exact => text.trim() == pattern.trim(),
        MatchType::Regex => match &cr.compiled_regex {
            Some(Ok(re)) => re.is_match(description),
            Some(Err(e)) => {
                return Err(RuleError::InvalidPattern {
                    rule: rule.name.clone(),
                    source: e.clone(),
                })
            }
            None => false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reais(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    fn make_rule(pattern: &str, match_type: MatchType, category: i64, priority: i32) -> CategoryRule {
        CategoryRule {
            name: format!("rule-{category}"),
            priority,
            pattern: pattern.to_string(),
            match_type,
            category_id: CategoryId(category),
            amount_min: None,
            amount_max: None,
        }
    }

    fn matched(engine: &CategoryRuleEngine, desc: &str, cents: i64) -> Option<CategoryId> {
        engine.match_category(desc, reais(cents)).unwrap()
    }

    #[test]
    fn contains_match_case_insensitive() {
        let engine = CategoryRuleEngine::new(vec![make_rule("ifood", MatchType::Contains, 3, 1)]);
        assert_eq!(matched(&engine, "IFOOD *RESTAURANTE", 4500), Some(CategoryId(3)));
        assert_eq!(matched(&engine, "UBER TRIP", 2000), None);
    }

    #[test]
    fn exact_match() {
        let engine = CategoryRuleEngine::new(vec![make_rule("netflix.com", MatchType::Exact, 8, 1)]);
        assert!(matched(&engine, "NETFLIX.COM", 3990).is_some());
        assert!(matched(&engine, "NETFLIX.COM 02/12", 3990).is_none());
    }

    #[test]
    fn regex_match() {
        let engine = CategoryRuleEngine::new(vec![make_rule(r"^(uber|99)\b", MatchType::Regex, 4, 1)]);
        assert!(matched(&engine, "UBER *TRIP", 1999).is_some());
        assert!(matched(&engine, "99 POP", 1500).is_some());
        assert!(matched(&engine, "SUPERMERCADO 99", 1000).is_none());
    }

    #[test]
    fn priority_ordering_highest_wins() {
        let engine = CategoryRuleEngine::new(vec![
            make_rule("amazon", MatchType::Contains, 1, 1),
            make_rule("amazon", MatchType::Contains, 2, 10),
        ]);
        assert_eq!(matched(&engine, "AMAZON MARKETPLACE", 999), Some(CategoryId(2)));
    }

    #[test]
    fn amount_range_filters() {
        let rule = CategoryRule {
            amount_min: Some(reais(10_000)),
            amount_max: Some(reais(50_000)),
            ..make_rule("magazine", MatchType::Contains, 5, 1)
        };
        let engine = CategoryRuleEngine::new(vec![rule]);
        assert!(matched(&engine, "MAGAZINE LUIZA", 9_999).is_none());
        assert!(matched(&engine, "MAGAZINE LUIZA", 10_000).is_some());
        assert!(matched(&engine, "MAGAZINE LUIZA", 50_001).is_none());
    }

    #[test]
    fn invalid_regex_fails_only_when_reached() {
        let engine = CategoryRuleEngine::new(vec![
            make_rule("posto", MatchType::Contains, 6, 10),
            make_rule("(broken", MatchType::Regex, 7, 1),
        ]);
        // The higher-priority rule answers before the broken one is consulted.
        assert_eq!(matched(&engine, "POSTO SHELL", 20000), Some(CategoryId(6)));
        let err = engine.match_category("PADARIA", reais(1000)).unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
    }

    #[test]
    fn from_toml_parses_rule_tables() {
        let engine = CategoryRuleEngine::from_toml(
            r#"
            [[rules]]
            name = "delivery"
            priority = 5
            pattern = "ifood"
            category_id = 3

            [[rules]]
            name = "transport"
            pattern = "^uber"
            match_type = "regex"
            category_id = 4
            amount_max = "200.00"
            "#,
        )
        .unwrap();
        assert_eq!(matched(&engine, "IFOOD", 100), Some(CategoryId(3)));
        assert_eq!(matched(&engine, "UBER", 100), Some(CategoryId(4)));
        assert_eq!(matched(&engine, "UBER", 30000), None);
    }

    #[test]
    fn from_toml_rejects_bad_documents() {
        assert!(matches!(
            CategoryRuleEngine::from_toml("[[rules]]\nname = 1"),
            Err(RuleError::Parse(_))
        ));
    }

    #[test]
    fn match_type_from_str() {
        assert_eq!("REGEX".parse::<MatchType>().unwrap(), MatchType::Regex);
        assert!("fuzzy".parse::<MatchType>().is_err());
    }
}
