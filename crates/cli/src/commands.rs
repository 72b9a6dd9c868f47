//! Command implementations. Each prints its result as JSON on stdout.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use fatura_core::{Money, NewTransaction, StatementLine, TransactionId, UserId};
use fatura_import::parse_statement;
use fatura_reconcile::{CommitRequest, Reconciler};
use fatura_storage::{insert_transaction, DbPool};
use serde::Serialize;

use crate::config::FileConfig;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_statement(file: &Path, config: &FileConfig) -> Result<Vec<StatementLine>> {
    let csv = File::open(file).with_context(|| format!("Failed to open statement: {}", file.display()))?;
    let lines = parse_statement(csv, &config.statement)
        .with_context(|| format!("Failed to parse statement: {}", file.display()))?;
    tracing::info!("Read {} statement lines from {}", lines.len(), file.display());
    Ok(lines)
}

pub async fn cmd_add_payment(
    db: &DbPool,
    user: UserId,
    date: NaiveDate,
    amount: &str,
    description: &str,
) -> Result<()> {
    let amount: Money = amount.parse()?;
    // Bill payments leave the account.
    let payment = NewTransaction::bank(user, date, description, -amount.abs());
    let tx = insert_transaction(db, &payment).await?;
    print_json(&tx)
}

pub async fn cmd_preview(fatura: &Reconciler, config: &FileConfig, user: UserId, file: &Path, cycle: &str) -> Result<()> {
    let lines = read_statement(file, config)?;
    let preview = fatura.previewer.preview(user, cycle, &lines).await?;
    if preview.has_existing_import {
        tracing::warn!("Billing cycle {} was already imported", preview.billing_cycle);
    }
    print_json(&preview)
}

pub async fn cmd_import(
    fatura: &Reconciler,
    config: &FileConfig,
    user: UserId,
    file: &Path,
    cycle: &str,
    bill: Option<i64>,
    no_category: bool,
) -> Result<()> {
    let lines = read_statement(file, config)?;
    let result = fatura
        .committer
        .commit(CommitRequest {
            user_id: user,
            billing_cycle: cycle.to_string(),
            bill_payment_id: bill.map(TransactionId),
            lines,
            apply_auto_category: !no_category,
        })
        .await?;
    print_json(&result)
}

pub async fn cmd_reconcile(fatura: &Reconciler, user: UserId, cycle: Option<&str>) -> Result<()> {
    let summary = fatura.orchestrator.trigger(user, cycle).await?;
    print_json(&summary)
}

pub async fn cmd_link(fatura: &Reconciler, user: UserId, cycle: &str, bill: i64, force: bool) -> Result<()> {
    let result = fatura
        .orchestrator
        .manual_link(user, cycle, TransactionId(bill), force)
        .await?;
    print_json(&result)
}

pub async fn cmd_unlink(fatura: &Reconciler, user: UserId, bill: i64) -> Result<()> {
    let result = fatura.orchestrator.unlink(user, TransactionId(bill)).await?;
    print_json(&result)
}

pub async fn cmd_show_bill(fatura: &Reconciler, user: UserId, bill: i64) -> Result<()> {
    let state = fatura.lifecycle.state(user, TransactionId(bill)).await?;
    print_json(&state)
}

pub async fn cmd_status(fatura: &Reconciler, user: UserId) -> Result<()> {
    let status = fatura.orchestrator.status(user).await?;
    print_json(&status)
}
