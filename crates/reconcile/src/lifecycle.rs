use chrono::Utc;
use fatura_core::{BillingCycle, ExpansionState, Money, NewTransaction, Transaction, TransactionId, UserId};
use fatura_storage::{
    collapse_bill, expand_bill, find_bill_payment_by_id, get_linked_transactions, link_pending, BillLookup,
    DbPool, ExpandOutcome, ExpandRequest, LinkOutcome, NewStatementImport, StoreError,
};
use serde::Serialize;
use tracing::info;

use crate::error::{ReconcileError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollapseResult {
    pub bill_payment_id: TransactionId,
    pub deleted_count: u64,
    pub restored_amount: Money,
    pub billing_cycle: Option<BillingCycle>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillState {
    pub bill: Transaction,
    pub state: ExpansionState,
    pub items: Vec<Transaction>,
}

/// Moves a bill payment between its aggregate and itemized forms. All
/// writes to a bill's expansion go through here.
#[derive(Debug, Clone)]
pub struct ExpansionLifecycle {
    pool: DbPool,
}

impl ExpansionLifecycle {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The bill if it exists, is a bank transaction and belongs to `user_id`.
    pub async fn find_owned_bill(&self, user_id: UserId, bill_id: TransactionId) -> Result<Transaction> {
        match find_bill_payment_by_id(&self.pool, bill_id, user_id).await? {
            BillLookup::Found(bill) => Ok(bill),
            BillLookup::NotFound => Err(ReconcileError::BillPaymentNotFound(bill_id)),
            BillLookup::NotOwned => Err(ReconcileError::BillPaymentNotOwned(bill_id)),
        }
    }

    /// Replaces the bill's amount with `items`, recording `statement` as the
    /// cycle's import. Atomic: on any failure the bill stays collapsed and no
    /// item is written.
    pub async fn expand(
        &self,
        user_id: UserId,
        bill_id: TransactionId,
        items: &[NewTransaction],
        statement: NewStatementImport,
    ) -> Result<ExpandOutcome> {
        let bill = self.find_owned_bill(user_id, bill_id).await?;
        if bill.is_expanded() {
            return Err(ReconcileError::BillAlreadyExpanded(bill_id));
        }
        if items.is_empty() {
            return Err(ReconcileError::EmptyTransactions);
        }

        let billing_cycle = statement.billing_cycle;
        let outcome = expand_bill(
            &self.pool,
            ExpandRequest {
                user_id,
                bill_id,
                billing_cycle,
                items,
                statement,
            },
            Utc::now(),
        )
        .await?;

        info!(
            user_id = %user_id,
            bill_id = %bill_id,
            cycle = %billing_cycle,
            items = outcome.item_ids.len(),
            original_amount = %outcome.original_amount,
            "Expanded bill payment"
        );
        Ok(outcome)
    }

    /// Expands the bill over the cycle's already-imported pending rows.
    pub async fn link_pending(
        &self,
        user_id: UserId,
        bill_id: TransactionId,
        cycle: BillingCycle,
        amount_difference: Money,
    ) -> Result<LinkOutcome> {
        let bill = self.find_owned_bill(user_id, bill_id).await?;
        if bill.is_expanded() {
            return Err(ReconcileError::BillAlreadyExpanded(bill_id));
        }

        let outcome = link_pending(&self.pool, user_id, bill_id, cycle, amount_difference, Utc::now()).await?;

        info!(
            user_id = %user_id,
            bill_id = %bill_id,
            cycle = %cycle,
            linked = outcome.linked_count,
            difference = %amount_difference,
            "Linked pending cycle"
        );
        Ok(outcome)
    }

    /// Deletes the itemized rows and restores the bill's original amount.
    /// Edits made to the rows while expanded are discarded.
    pub async fn collapse(&self, user_id: UserId, bill_id: TransactionId) -> Result<CollapseResult> {
        let bill = self.find_owned_bill(user_id, bill_id).await?;
        if !bill.is_expanded() {
            return Err(ReconcileError::BillNotExpanded(bill_id));
        }

        let outcome = collapse_bill(&self.pool, user_id, bill_id)
            .await
            .map_err(|err| match err {
                StoreError::StaleBill(id) => ReconcileError::BillNotExpanded(id),
                other => other.into(),
            })?;

        info!(
            user_id = %user_id,
            bill_id = %bill_id,
            deleted = outcome.deleted_count,
            restored_amount = %outcome.restored_amount,
            "Collapsed bill payment"
        );
        Ok(CollapseResult {
            bill_payment_id: bill_id,
            deleted_count: outcome.deleted_count,
            restored_amount: outcome.restored_amount,
            billing_cycle: outcome.billing_cycle,
        })
    }

    pub async fn state(&self, user_id: UserId, bill_id: TransactionId) -> Result<BillState> {
        let bill = self.find_owned_bill(user_id, bill_id).await?;
        let items = get_linked_transactions(&self.pool, bill_id).await?;
        Ok(BillState {
            state: bill.expansion_state(),
            bill,
            items,
        })
    }
}
