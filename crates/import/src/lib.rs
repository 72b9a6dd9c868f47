pub mod csv;
pub mod match_engine;
pub mod rules;
pub mod statement;

pub use csv::{parse_statement, CsvError, StatementColumns, StatementProfile};
pub use match_engine::{
    score, ConfidenceTier, MatchCandidate, MatchScore, MatchScorer, MatchableTransaction,
    ScoringConfig, Tolerance,
};
pub use rules::{CategoryMatcher, CategoryRule, CategoryRuleEngine, MatchType as RuleMatchType, RuleError};
pub use statement::{partition, PartitionedStatement, PaymentMarker, PaymentReceived, DEFAULT_PAYMENT_MARKER};
