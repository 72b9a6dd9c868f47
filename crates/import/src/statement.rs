use chrono::NaiveDate;
use fatura_core::{Money, StatementLine};
use regex::Regex;
use serde::Serialize;

pub const DEFAULT_PAYMENT_MARKER: &str = r"(?i)pagamento\s+recebido";

/// Recognises the statement line(s) recording the bill payment the card
/// network received. The pattern is configuration, not a constant, because
/// issuers word it differently.
#[derive(Debug, Clone)]
pub struct PaymentMarker {
    pattern: Regex,
}

impl PaymentMarker {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn is_payment(&self, line: &StatementLine) -> bool {
        self.pattern.is_match(&line.description)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentReceived {
    /// Sum of the magnitudes of every payment line.
    pub amount: Money,
    /// Date of the earliest payment line.
    pub date: NaiveDate,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionedStatement {
    pub payment_received: Option<PaymentReceived>,
    pub items: Vec<StatementLine>,
    /// Signed sum of `items`: refunds reduce it.
    pub total_amount: Money,
}

pub fn partition(lines: &[StatementLine], marker: &PaymentMarker) -> PartitionedStatement {
    let (payments, items): (Vec<&StatementLine>, Vec<&StatementLine>) =
        lines.iter().partition(|l| marker.is_payment(l));

    let payment_received = payments
        .iter()
        .map(|l| l.date)
        .min()
        .map(|date| PaymentReceived {
            amount: payments.iter().map(|l| l.amount.abs()).sum(),
            date,
            line_count: payments.len(),
        });

    let items: Vec<StatementLine> = items.into_iter().cloned().collect();
    let total_amount = items.iter().map(|l| l.amount).sum();

    PartitionedStatement {
        payment_received,
        items,
        total_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> PaymentMarker {
        PaymentMarker::new(DEFAULT_PAYMENT_MARKER).unwrap()
    }

    fn line(day: u32, desc: &str, cents: i64) -> StatementLine {
        StatementLine::new(
            NaiveDate::from_ymd_opt(2024, 11, day).unwrap(),
            desc,
            Money::from_cents(cents),
        )
    }

    #[test]
    fn payment_line_is_excluded_from_items_and_total() {
        let lines = vec![
            line(5, "Pagamento recebido", -52345),
            line(6, "MERCADO", 20000),
            line(7, "POSTO", 15000),
        ];
        let p = partition(&lines, &marker());
        let payment = p.payment_received.unwrap();
        assert_eq!(payment.amount, Money::from_cents(52345));
        assert_eq!(payment.date, NaiveDate::from_ymd_opt(2024, 11, 5).unwrap());
        assert_eq!(p.items.len(), 2);
        assert_eq!(p.total_amount, Money::from_cents(35000));
    }

    #[test]
    fn marker_is_case_insensitive() {
        let lines = vec![line(5, "PAGAMENTO   RECEBIDO - OBRIGADO", -100), line(6, "X", 100)];
        let p = partition(&lines, &marker());
        assert!(p.payment_received.is_some());
        assert_eq!(p.items.len(), 1);
    }

    #[test]
    fn refunds_reduce_the_total() {
        let lines = vec![line(6, "LOJA", 10000), line(8, "ESTORNO LOJA", -2500)];
        let p = partition(&lines, &marker());
        assert_eq!(p.total_amount, Money::from_cents(7500));
        assert!(p.payment_received.is_none());
    }

    #[test]
    fn multiple_payment_lines_are_summed() {
        let lines = vec![
            line(9, "Pagamento recebido", -30000),
            line(3, "Pagamento recebido", -20000),
            line(6, "LOJA", 10000),
        ];
        let payment = partition(&lines, &marker()).payment_received.unwrap();
        assert_eq!(payment.amount, Money::from_cents(50000));
        assert_eq!(payment.date, NaiveDate::from_ymd_opt(2024, 11, 3).unwrap());
        assert_eq!(payment.line_count, 2);
    }

    #[test]
    fn custom_marker() {
        let marker = PaymentMarker::new(r"(?i)payment\s+received").unwrap();
        let lines = vec![line(5, "Payment Received", -100), line(5, "Pagamento recebido", -100)];
        let p = partition(&lines, &marker);
        assert_eq!(p.payment_received.unwrap().line_count, 1);
        assert_eq!(p.items.len(), 1);
    }

    #[test]
    fn invalid_marker_is_rejected() {
        assert!(PaymentMarker::new("(unclosed").is_err());
    }
}
