use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{CategoryId, TransactionId, UserId};
use super::money::Money;
use super::period::BillingCycle;

/// Where a persisted transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    /// Entered by hand or imported from a bank account.
    Bank,
    /// An itemized line imported from a credit-card statement.
    Statement,
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionSource::Bank => write!(f, "bank"),
            TransactionSource::Statement => write!(f, "statement"),
        }
    }
}

impl FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank" => Ok(TransactionSource::Bank),
            "statement" => Ok(TransactionSource::Statement),
            other => Err(format!("Unknown transaction source: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionState {
    Collapsed,
    Expanded,
}

/// Installment metadata printed on a statement line, e.g. `PARC 03/10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub current: u16,
    pub total: u16,
}

impl Installment {
    pub fn new(current: u16, total: u16) -> Option<Self> {
        if total >= 2 && current >= 1 && current <= total {
            Some(Installment { current, total })
        } else {
            None
        }
    }

    /// Reads a trailing `NN/MM` token from a statement description.
    pub fn detect(description: &str) -> Option<Self> {
        let token = description.split_whitespace().last()?;
        let (current, total) = token.split_once('/')?;
        if current.is_empty() || total.is_empty() || current.len() > 3 || total.len() > 3 {
            return None;
        }
        Installment::new(current.parse().ok()?, total.parse().ok()?)
    }
}

impl fmt::Display for Installment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}", self.current, self.total)
    }
}

/// One row of a parsed credit-card statement. Amounts follow the statement's
/// convention: purchases positive, refunds and payments negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
    pub installment: Option<Installment>,
}

impl StatementLine {
    pub fn new(date: NaiveDate, description: &str, amount: Money) -> Self {
        StatementLine {
            date,
            description: description.to_string(),
            amount,
            installment: Installment::detect(description),
        }
    }

    /// The signed amount this line contributes to the user's ledger, where
    /// spending is negative.
    pub fn ledger_amount(&self) -> Money {
        -self.amount
    }
}

/// A transaction ready to be inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
    pub source: TransactionSource,
    pub category_id: Option<CategoryId>,
    pub billing_cycle: Option<BillingCycle>,
    pub bill_payment_id: Option<TransactionId>,
    pub installment: Option<Installment>,
}

impl NewTransaction {
    pub fn bank(user_id: UserId, date: NaiveDate, description: &str, amount: Money) -> Self {
        NewTransaction {
            user_id,
            date,
            description: description.to_string(),
            amount,
            source: TransactionSource::Bank,
            category_id: None,
            billing_cycle: None,
            bill_payment_id: None,
            installment: None,
        }
    }

    pub fn itemized(user_id: UserId, cycle: BillingCycle, line: &StatementLine) -> Self {
        NewTransaction {
            user_id,
            date: line.date,
            description: line.description.clone(),
            amount: line.ledger_amount(),
            source: TransactionSource::Statement,
            category_id: None,
            billing_cycle: Some(cycle),
            bill_payment_id: None,
            installment: line.installment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
    pub source: TransactionSource,
    pub category_id: Option<CategoryId>,
    pub billing_cycle: Option<BillingCycle>,
    /// Set on itemized rows: the bill payment they were imported under.
    pub bill_payment_id: Option<TransactionId>,
    /// Set on an expanded bill payment: its amount before expansion.
    pub original_amount: Option<Money>,
    pub expanded_at: Option<DateTime<Utc>>,
    pub installment: Option<Installment>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn expansion_state(&self) -> ExpansionState {
        if self.expanded_at.is_some() {
            ExpansionState::Expanded
        } else {
            ExpansionState::Collapsed
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.expansion_state() == ExpansionState::Expanded
    }

    /// The aggregate amount this bill payment settles, whether or not it is
    /// currently expanded.
    pub fn settled_amount(&self) -> Money {
        self.original_amount.unwrap_or(self.amount)
    }
}
