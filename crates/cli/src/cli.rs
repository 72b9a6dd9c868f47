//! CLI argument definitions using clap

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Fatura - reconcile credit-card statements with bank bill payments
#[derive(Parser, Debug)]
#[command(name = "fatura")]
#[command(about = "Credit-card statement reconciliation", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "fatura.db", global = true)]
    pub db: PathBuf,

    /// Configuration file (statement profile, category rules, matching)
    #[arg(long, default_value = "fatura.toml", global = true)]
    pub config: PathBuf,

    /// User whose data is read and written
    #[arg(long, default_value_t = 1, global = true)]
    pub user: i64,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a bank-side credit-card bill payment
    AddPayment {
        /// Payment date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Amount paid, e.g. 1523.77 or "1.523,77"
        #[arg(long)]
        amount: String,

        #[arg(long, default_value = "PAGTO FATURA CARTAO")]
        description: String,
    },

    /// Show what importing a statement would do, without writing
    Preview {
        /// Statement CSV
        #[arg(short, long)]
        file: PathBuf,

        /// Billing cycle (YYYY-MM)
        #[arg(short, long)]
        cycle: String,
    },

    /// Import a statement, optionally expanding a bill payment
    Import {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        cycle: String,

        /// Bill payment to expand; omit to import without one
        #[arg(long)]
        bill: Option<i64>,

        /// Skip category rules
        #[arg(long)]
        no_category: bool,
    },

    /// Match pending cycles to bill payments, linking unambiguous ones
    Reconcile {
        /// Only this billing cycle
        #[arg(short, long)]
        cycle: Option<String>,
    },

    /// Link a pending cycle to a chosen bill payment
    Link {
        #[arg(short, long)]
        cycle: String,

        #[arg(long)]
        bill: i64,

        /// Link even when the amounts differ beyond tolerance
        #[arg(long)]
        force: bool,
    },

    /// Collapse an expanded bill payment, deleting its itemized rows
    Unlink {
        #[arg(long)]
        bill: i64,
    },

    /// Show a bill payment and its itemized transactions
    ShowBill {
        #[arg(long)]
        bill: i64,
    },

    /// Reconciliation state of every known cycle
    Status,
}
