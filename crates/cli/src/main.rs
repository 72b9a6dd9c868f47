//! Fatura CLI - credit-card statement reconciliation
//!
//! Usage:
//!   fatura add-payment --date 2024-11-08 --amount 1523.77
//!   fatura preview --file nov.csv --cycle 2024-11
//!   fatura import --file nov.csv --cycle 2024-11 --bill 12
//!   fatura reconcile
//!   fatura status

mod cli;
mod commands;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fatura_core::UserId;
use fatura_import::CategoryMatcher;
use fatura_reconcile::{DiagnosticSink, MatchDiagnostic, Reconciler};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use config::FileConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .init();

    let config = FileConfig::load(&cli.config)?;
    let db = fatura_storage::create_db(&cli.db)
        .await
        .with_context(|| format!("Failed to open database: {}", cli.db.display()))?;

    // Matching diagnostics become debug logs.
    let (diag_tx, mut diag_rx) = mpsc::unbounded_channel::<MatchDiagnostic>();
    let diagnostics = tokio::spawn(async move {
        while let Some(event) = diag_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                tracing::debug!(target: "fatura::diagnostics", "{json}");
            }
        }
    });

    let categories = config
        .rule_engine()
        .map(|engine| Arc::new(engine) as Arc<dyn CategoryMatcher>);
    let sink: Arc<dyn DiagnosticSink> = Arc::new(diag_tx);
    let fatura = Reconciler::new(db.clone(), &config.matching, categories, sink)?;
    let user = UserId(cli.user);

    let result = match cli.command {
        Commands::AddPayment {
            date,
            amount,
            description,
        } => commands::cmd_add_payment(&db, user, date, &amount, &description).await,
        Commands::Preview { file, cycle } => commands::cmd_preview(&fatura, &config, user, &file, &cycle).await,
        Commands::Import {
            file,
            cycle,
            bill,
            no_category,
        } => commands::cmd_import(&fatura, &config, user, &file, &cycle, bill, no_category).await,
        Commands::Reconcile { cycle } => commands::cmd_reconcile(&fatura, user, cycle.as_deref()).await,
        Commands::Link { cycle, bill, force } => commands::cmd_link(&fatura, user, &cycle, bill, force).await,
        Commands::Unlink { bill } => commands::cmd_unlink(&fatura, user, bill).await,
        Commands::ShowBill { bill } => commands::cmd_show_bill(&fatura, user, bill).await,
        Commands::Status => commands::cmd_status(&fatura, user).await,
    };

    // Dropping the services closes the channel so the logger task ends.
    drop(fatura);
    let _ = diagnostics.await;
    db.close().await;

    result
}
