use anyhow::Result;
use coinduel_core::{
    EngineConfig, LedgerProvider, LedgerRegistry, MemoryLedger, StatsStore, Storage, TracingSink,
};
use coinduel_engine::WagerEngine;
use comfy_table::{presets::UTF8_FULL, Table};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

async fn open_engine(
    data_dir: &Path,
    config: EngineConfig,
) -> Result<(WagerEngine, Arc<MemoryLedger>)> {
    let db_path = data_dir.join("coinduel.db");
    tracing::info!("Using database at {}", db_path.display());
    let storage = Arc::new(Storage::new(&db_path).await?);

    let ledger = Arc::new(MemoryLedger::new("Gold"));
    let ledgers = Arc::new(LedgerRegistry::new());
    ledgers.register("GOLD", ledger.clone());

    let engine = WagerEngine::new(config, ledgers, storage, Arc::new(TracingSink))?;
    Ok((engine, ledger))
}

pub async fn run_demo(data_dir: &Path, rounds: u32, amount: u64, tax: bool) -> Result<()> {
    let config = EngineConfig {
        minimum_bet: 1,
        tax_enabled: tax,
        auto_settle: false,
        ..Default::default()
    };
    let (engine, ledger) = open_engine(data_dir, config).await?;

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let bankroll = amount
        .saturating_mul(u64::from(rounds))
        .saturating_mul(2);
    ledger.credit(alice, bankroll);
    ledger.credit(bob, bankroll);

    println!("Alice: {}", alice);
    println!("Bob:   {}", bob);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Round", "Winner", "Payout", "Tax"]);

    for round in 1..=rounds {
        let wager = engine.create_listing(alice, "GOLD", amount).await?;
        engine.accept_listing(alice, bob).await?;

        let outcome = engine
            .run_settlement(wager)
            .await?
            .ok_or_else(|| anyhow::anyhow!("settlement was superseded"))?;

        let winner = if outcome.winner == alice { "Alice" } else { "Bob" };
        table.add_row(vec![
            round.to_string(),
            winner.to_string(),
            outcome.payout.to_string(),
            outcome.tax.to_string(),
        ]);
    }

    engine.on_shutdown().await;

    println!("{table}");
    println!(
        "Final balances: Alice {} / Bob {}",
        ledger.balance(alice).await?,
        ledger.balance(bob).await?
    );

    print_stats(&engine, &[("Alice", alice), ("Bob", bob)]).await?;
    Ok(())
}

pub async fn show_stats(data_dir: &Path, account: Uuid) -> Result<()> {
    let storage = Storage::new(&data_dir.join("coinduel.db")).await?;
    let stats = StatsStore::new(&storage).load_stats(account).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Account", "Wins", "Losses", "Profit", "Gambled"]);
    table.add_row(vec![
        stats.account_id.to_string(),
        stats.wins.to_string(),
        stats.losses.to_string(),
        stats.profit.to_string(),
        stats.total_gambled.to_string(),
    ]);

    println!("{table}");
    Ok(())
}

async fn print_stats(engine: &WagerEngine, accounts: &[(&str, Uuid)]) -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Player", "Wins", "Losses", "Profit", "Gambled"]);

    for (name, account) in accounts {
        let stats = engine.stats(*account).await?;
        table.add_row(vec![
            name.to_string(),
            stats.wins.to_string(),
            stats.losses.to_string(),
            stats.profit.to_string(),
            stats.total_gambled.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}
