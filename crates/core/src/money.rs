use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// A monetary amount in reais, always rounded to two decimal places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// Saturates at the `i64` bounds; real statement amounts never get close.
    pub fn to_cents(self) -> i64 {
        let cents = (self.0 * Decimal::ONE_HUNDRED).round();
        cents.to_i64().unwrap_or(if cents.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp(2))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-R${:.2}", self.0.abs())
        } else {
            write!(f, "R${:.2}", self.0)
        }
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    /// Accepts `1234.56`, `1,234.56`, `1.234,56`, `R$ 1.234,56` and
    /// accounting parentheses `(12.00)`. A lone separator followed by exactly
    /// three digits (`1.234`) groups thousands. Amounts with more than two
    /// decimal places, or beyond the `i64` cents range, are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MoneyError::InvalidAmount(s.to_string());
        let raw = s.trim();
        let (negative, body) = match raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
            Some(inner) => (true, inner),
            None => (false, raw),
        };
        let body: String = body
            .chars()
            .filter(|c| !matches!(c, 'R' | '$' | ' ' | '\u{a0}'))
            .collect();

        let normalized = match (body.rfind(','), body.rfind('.')) {
            // Whichever separator comes last is the decimal separator.
            (Some(comma), Some(dot)) if comma > dot => body.replace('.', "").replace(',', "."),
            (Some(_), Some(_)) => body.replace(',', ""),
            (Some(_), None) if groups_thousands(&body, ',') => body.replace(',', ""),
            (Some(_), None) => body.replace(',', "."),
            (None, Some(_)) if groups_thousands(&body, '.') => body.replace('.', ""),
            _ => body,
        };

        let mut dec = Decimal::from_str(&normalized).map_err(|_| invalid())?;
        if dec.normalize().scale() > 2 {
            return Err(invalid());
        }
        if negative {
            dec = -dec;
        }
        // Bounded here so sums of parsed amounts stay far from Decimal's limits.
        dec.checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.to_i64())
            .ok_or_else(invalid)?;
        Ok(Money::from_decimal(dec))
    }
}

/// True when `sep` can only be a thousands separator: it appears more than
/// once, or once between a 1-3 digit head and a 3 digit tail.
fn groups_thousands(body: &str, sep: char) -> bool {
    if body.matches(sep).count() > 1 {
        return true;
    }
    let Some((head, tail)) = body.split_once(sep) else {
        return false;
    };
    let head = head.strip_prefix('-').unwrap_or(head);
    (1..=3).contains(&head.len())
        && !head.starts_with('0')
        && head.bytes().all(|b| b.is_ascii_digit())
        && tail.len() == 3
        && tail.bytes().all(|b| b.is_ascii_digit())
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
