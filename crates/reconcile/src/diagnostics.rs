use fatura_core::{BillingCycle, TransactionId};
use fatura_import::ConfidenceTier;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Structured events describing matching decisions. Sent to an injected
/// sink rather than logged from inside the scorer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MatchDiagnostic {
    CandidateScored {
        billing_cycle: BillingCycle,
        bill_id: TransactionId,
        is_match: bool,
        score: f64,
        confidence: ConfidenceTier,
        date_difference_days: i64,
    },
    CycleClassified {
        billing_cycle: BillingCycle,
        outcome: CycleOutcome,
        plausible_candidates: usize,
    },
    /// Another writer claimed the bill or cycle between scoring and linking.
    LinkConflict {
        billing_cycle: BillingCycle,
        bill_id: TransactionId,
        reason: String,
    },
    CategoryRuleFailed {
        description: String,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    AutoLinked,
    RequiresSelection,
    NoMatch,
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: MatchDiagnostic);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _diagnostic: MatchDiagnostic) {}
}

/// A closed receiver just drops events.
impl DiagnosticSink for UnboundedSender<MatchDiagnostic> {
    fn emit(&self, diagnostic: MatchDiagnostic) {
        let _ = self.send(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cycle: BillingCycle = "2024-11".parse().unwrap();
        let sink: &dyn DiagnosticSink = &tx;
        sink.emit(MatchDiagnostic::CycleClassified {
            billing_cycle: cycle,
            outcome: CycleOutcome::NoMatch,
            plausible_candidates: 0,
        });
        sink.emit(MatchDiagnostic::CategoryRuleFailed {
            description: "LOJA".into(),
            error: "bad".into(),
        });

        assert!(matches!(rx.try_recv(), Ok(MatchDiagnostic::CycleClassified { .. })));
        assert!(matches!(rx.try_recv(), Ok(MatchDiagnostic::CategoryRuleFailed { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_after_receiver_dropped_is_ignored() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<MatchDiagnostic>();
        drop(rx);
        tx.emit(MatchDiagnostic::CategoryRuleFailed {
            description: String::new(),
            error: String::new(),
        });
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(MatchDiagnostic::CycleClassified {
            billing_cycle: "2024-11".parse().unwrap(),
            outcome: CycleOutcome::AutoLinked,
            plausible_candidates: 1,
        })
        .unwrap();
        assert_eq!(json["event"], "cycle_classified");
        assert_eq!(json["outcome"], "auto_linked");
        assert_eq!(json["billing_cycle"], "2024-11");
    }
}
