use chrono::NaiveDate;
use fatura_core::{Money, TransactionId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An amount is within tolerance when the percentage difference is at most
/// `percent` OR the absolute difference is at most `absolute`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub percent: Decimal,
    pub absolute: Money,
}

impl Tolerance {
    pub fn new(percent: Decimal, absolute: Money) -> Self {
        Self { percent, absolute }
    }

    fn accepts(&self, abs_diff: Money, percent_diff: Option<Decimal>) -> bool {
        abs_diff <= self.absolute || percent_diff.is_some_and(|p| p <= self.percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub tolerance: Tolerance,
    pub window_days: i64,
    pub high: Tolerance,
    pub medium: Tolerance,
}

impl ScoringConfig {
    /// Used while previewing a statement import: 1% / R$10.00, 10 days.
    pub fn import_preview() -> Self {
        Self {
            tolerance: Tolerance::new(Decimal::ONE, Money::from_cents(1000)),
            window_days: 10,
            high: Tolerance::new(Decimal::new(5, 1), Money::from_cents(500)),
            medium: Tolerance::new(Decimal::TWO, Money::from_cents(2000)),
        }
    }

    /// Used by cross-cycle reconciliation: 2% / R$20.00, 15 days.
    pub fn reconciliation() -> Self {
        Self {
            tolerance: Tolerance::new(Decimal::TWO, Money::from_cents(2000)),
            window_days: 15,
            high: Tolerance::new(Decimal::new(5, 1), Money::from_cents(500)),
            medium: Tolerance::new(Decimal::TWO, Money::from_cents(2000)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    None,
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn is_auto_linkable(self) -> bool {
        self >= ConfidenceTier::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub is_match: bool,
    pub is_amount_match: bool,
    pub is_date_match: bool,
    /// Ranking only; acceptance is decided by the two checks above.
    pub score: f64,
    pub confidence: ConfidenceTier,
    /// `candidate - reference`.
    pub amount_difference: Money,
    pub amount_difference_percent: f64,
    pub date_difference_days: i64,
}

/// Compares a candidate amount and date against a reference.
///
/// The percentage difference is taken over the smaller of the two magnitudes
/// so that swapping candidate and reference never changes `is_match`.
pub fn score(
    candidate_amount: Money,
    reference_amount: Money,
    candidate_date: NaiveDate,
    reference_date: NaiveDate,
    config: &ScoringConfig,
) -> MatchScore {
    let amount_difference = candidate_amount - reference_amount;
    let abs_diff = amount_difference.abs();
    let percent_diff = percent_difference(candidate_amount, reference_amount);

    let date_difference_days = (candidate_date - reference_date).num_days().abs();

    let is_amount_match = config.tolerance.accepts(abs_diff, percent_diff);
    let is_date_match = date_difference_days <= config.window_days;
    let is_match = is_amount_match && is_date_match;

    let confidence = if !is_match {
        ConfidenceTier::None
    } else if config.high.accepts(abs_diff, percent_diff) {
        ConfidenceTier::High
    } else if config.medium.accepts(abs_diff, percent_diff) {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    };

    let amount_score = amount_score(percent_diff, config.tolerance.percent);
    let date_score = if config.window_days > 0 {
        (1.0 - date_difference_days as f64 / config.window_days as f64).clamp(0.0, 1.0)
    } else if date_difference_days == 0 {
        1.0
    } else {
        0.0
    };

    MatchScore {
        is_match,
        is_amount_match,
        is_date_match,
        score: 0.7 * amount_score + 0.3 * date_score,
        confidence,
        amount_difference,
        amount_difference_percent: percent_diff
            .and_then(|p| p.to_f64())
            .unwrap_or(f64::INFINITY),
        date_difference_days,
    }
}

/// `None` when one side is zero and the other is not.
fn percent_difference(a: Money, b: Money) -> Option<Decimal> {
    let diff = (a - b).abs().as_decimal();
    let base = a.abs().min(b.abs()).as_decimal();
    if diff.is_zero() {
        Some(Decimal::ZERO)
    } else if base.is_zero() {
        None
    } else {
        diff.checked_div(base)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
    }
}

fn amount_score(percent_diff: Option<Decimal>, tolerance_percent: Decimal) -> f64 {
    let Some(pct) = percent_diff else {
        return 0.0;
    };
    if tolerance_percent.is_zero() {
        return if pct.is_zero() { 1.0 } else { 0.0 };
    }
    let ratio = (pct / tolerance_percent).min(Decimal::ONE);
    (1.0 - ratio.to_f64().unwrap_or(1.0)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchableTransaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    #[serde(flatten)]
    pub transaction: MatchableTransaction,
    #[serde(flatten)]
    pub score: MatchScore,
}

/// Ranks bill-payment candidates against a reference total. Candidates and
/// the reference are compared by magnitude, since bank outflows are negative.
#[derive(Debug, Clone)]
pub struct MatchScorer {
    config: ScoringConfig,
}

impl MatchScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, candidate: &MatchableTransaction, reference_amount: Money, reference_date: NaiveDate) -> MatchScore {
        score(
            candidate.amount.abs(),
            reference_amount.abs(),
            candidate.date,
            reference_date,
            &self.config,
        )
    }

    /// Scores every candidate, best first. Non-matches are kept so callers
    /// can report why a candidate was rejected.
    pub fn score_all(
        &self,
        reference_amount: Money,
        reference_date: NaiveDate,
        candidates: &[MatchableTransaction],
    ) -> Vec<MatchCandidate> {
        let mut scored: Vec<MatchCandidate> = candidates
            .iter()
            .map(|c| MatchCandidate {
                transaction: c.clone(),
                score: self.score(c, reference_amount, reference_date),
            })
            .collect();
        scored.sort_by(compare_candidates);
        scored
    }

    /// Only the candidates that pass both the amount and the date check, best first.
    pub fn rank(
        &self,
        reference_amount: Money,
        reference_date: NaiveDate,
        candidates: &[MatchableTransaction],
    ) -> Vec<MatchCandidate> {
        self.score_all(reference_amount, reference_date, candidates)
            .into_iter()
            .filter(|c| c.score.is_match)
            .collect()
    }
}

/// Matches before non-matches, then higher score, smaller absolute amount
/// difference, nearer date, lower id.
fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .is_match
        .cmp(&a.score.is_match)
        .then_with(|| {
            b.score
                .score
                .partial_cmp(&a.score.score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| {
            a.score
                .amount_difference
                .abs()
                .cmp(&b.score.amount_difference.abs())
        })
        .then_with(|| a.score.date_difference_days.cmp(&b.score.date_difference_days))
        .then_with(|| a.transaction.id.cmp(&b.transaction.id))
}
