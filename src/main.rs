use clap::{Args, Parser, Subcommand};
use coinflow::application::dispenser::{ChangeDispenser, DispenserConfig, StatusCallback};
use coinflow::application::feasibility::FeasibilityEngine;
use coinflow::domain::change::CoinCounts;
use coinflow::domain::ports::{InventoryStoreBox, SettingsStoreBox};
use coinflow::infrastructure::in_memory::{InMemoryInventoryStore, InMemorySettingsStore};
use coinflow::infrastructure::pigpio::PigpioBackend;
use coinflow::infrastructure::simulated::SimulatedBackend;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Feasibility inputs shared by the read-only subcommands.
#[derive(Args)]
struct EngineArgs {
    /// 1-unit coins currently in the hopper
    #[arg(long, default_value_t = 0)]
    ones: u64,

    /// 5-unit coins currently in the hopper
    #[arg(long, default_value_t = 0)]
    fives: u64,

    /// Reserve threshold for 1-unit coins
    #[arg(long)]
    min_ones: Option<u64>,

    /// Reserve threshold for 5-unit coins
    #[arg(long)]
    min_fives: Option<u64>,

    /// Per-transaction change limit
    #[arg(long)]
    max_change: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Suggest payment amounts for a purchase
    Suggest {
        /// Total cost of the purchase
        #[arg(long)]
        cost: Decimal,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Check whether a change amount is dispensable
    Check {
        /// Change amount to test
        #[arg(long)]
        change: Decimal,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Dispense a change amount through the hoppers
    Dispense {
        /// Change amount to dispense
        #[arg(long)]
        amount: Decimal,

        /// pigpio daemon address; omitted means simulation only
        #[arg(long)]
        daemon: Option<String>,

        /// Per-coin delay for simulated dispensing, in milliseconds
        #[arg(long, default_value_t = 1500)]
        coin_delay_ms: u64,
    },
}

async fn build_engine(args: &EngineArgs) -> FeasibilityEngine {
    let inventory: InventoryStoreBox = Box::new(InMemoryInventoryStore::with_counts(
        CoinCounts::new(args.ones, args.fives),
    ));
    let settings = InMemorySettingsStore::new();
    if let Some(min_ones) = args.min_ones {
        settings.set("min_coin_threshold_1", &min_ones.to_string()).await;
    }
    if let Some(min_fives) = args.min_fives {
        settings.set("min_coin_threshold_5", &min_fives.to_string()).await;
    }
    if let Some(max_change) = args.max_change {
        settings.set("max_change_limit", &max_change.to_string()).await;
    }
    let settings: SettingsStoreBox = Box::new(settings);
    FeasibilityEngine::new(inventory, settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Suggest { cost, engine } => {
            let engine = build_engine(&engine).await;
            let best = engine.find_best_payment_amount(cost).await.into_diagnostic()?;
            let ranked = engine
                .find_optimal_payment_amounts(cost)
                .await
                .into_diagnostic()?;
            let output = serde_json::json!({
                "best": best,
                "suggestions": ranked,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).into_diagnostic()?
            );
        }
        Command::Check { change, engine } => {
            let engine = build_engine(&engine).await;
            let verdict = engine.can_dispense_change(change).await.into_diagnostic()?;
            eprintln!("{}", verdict.reason);
            println!(
                "{}",
                serde_json::to_string_pretty(&verdict).into_diagnostic()?
            );
        }
        Command::Dispense {
            amount,
            daemon,
            coin_delay_ms,
        } => {
            let coin_delay = Duration::from_millis(coin_delay_ms);
            let dispenser = match daemon {
                Some(addr) => ChangeDispenser::new(
                    Box::new(PigpioBackend::new(addr)),
                    DispenserConfig::default(),
                )
                .with_fallback(Box::new(SimulatedBackend::new(coin_delay))),
                None => ChangeDispenser::new(
                    Box::new(SimulatedBackend::new(coin_delay)),
                    DispenserConfig::default(),
                ),
            };
            let dispenser = Arc::new(dispenser);
            let status: StatusCallback = Arc::new(|line: &str| eprintln!("{line}"));
            let result = dispenser
                .spawn_dispense(amount, Some(status))
                .await
                .into_diagnostic()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).into_diagnostic()?
            );
        }
    }

    Ok(())
}
