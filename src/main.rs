//! Stakeplay operator CLI

use clap::{Parser, Subcommand, ValueEnum};
use rand::seq::SliceRandom;
use rand::Rng;
use stakeplay::{
    config::{ConfigLoader, StakeplayConfig, StorageBackend},
    factory::StakeplayFactory,
    games::{
        types::{CoinSide, CrackerSlot, SessionContext},
        ChestGame, CoinGame, CrackerGame, Resolution, SessionId, ThreadRandom,
    },
    logging, InMemoryLedger, SessionError, SessionStore,
};
use std::{
    error::Error,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

/// Stakeplay session settlement CLI
#[derive(Parser)]
#[command(name = "stakeplay")]
#[command(about = "Inspect and exercise chance-game settlement")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Session database directory (overrides config)
    #[arg(short, long)]
    data_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one session as JSON
    Inspect {
        /// Session id
        id: u64,
    },

    /// List an owner's sessions, newest first
    History {
        owner: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Play many games against in-memory ports and report the totals
    Simulate {
        /// Total sessions to play
        #[arg(short, long, default_value = "10000")]
        rounds: usize,

        /// Concurrent players
        #[arg(short, long, default_value = "8")]
        concurrency: usize,

        #[arg(long, value_enum, default_value = "mixed")]
        variant: SimVariant,

        /// Stake per session
        #[arg(short, long, default_value = "100")]
        bet: u64,

        /// Concurrent resolve calls per session
        #[arg(long, default_value = "2")]
        racers: usize,
    },

    /// Write the default configuration as TOML
    InitConfig { path: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SimVariant {
    Coin,
    Chest,
    Cracker,
    Mixed,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::new().with_path(path).load()?,
        None => ConfigLoader::new().load()?,
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_directory = dir;
    }
    if cli.verbose {
        config.monitoring.log_level = "debug".to_string();
    } else if matches!(cli.command, Commands::Simulate { .. }) {
        config.monitoring.log_level = "warn".to_string();
    }
    logging::init_tracing(&config.monitoring)?;

    match cli.command {
        Commands::Inspect { id } => inspect(config, SessionId(id)).await,
        Commands::History { owner, limit } => history(config, &owner, limit).await,
        Commands::Simulate {
            rounds,
            concurrency,
            variant,
            bet,
            racers,
        } => simulate(config, rounds, concurrency, variant, bet, racers).await,
        Commands::InitConfig { path } => {
            ConfigLoader::new().save(&StakeplayConfig::default(), &path.to_string_lossy())?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn inspect(mut config: StakeplayConfig, id: SessionId) -> Result<(), Box<dyn Error>> {
    config.storage.backend = StorageBackend::RocksDb;
    let store = StakeplayFactory::create_store(&config.storage)?;

    match store.get(id).await? {
        Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
        None => println!("Session {} not found in {}", id, config.storage.data_directory),
    }
    Ok(())
}

async fn history(mut config: StakeplayConfig, owner: &str, limit: usize) -> Result<(), Box<dyn Error>> {
    config.storage.backend = StorageBackend::RocksDb;
    let store = StakeplayFactory::create_store(&config.storage)?;

    let sessions = store.list_by_owner(owner, limit).await?;
    if sessions.is_empty() {
        println!("No sessions for {}", owner);
        return Ok(());
    }

    println!("{:>10}  {:<8} {:>10}  {:<10} {:>10}  created", "id", "variant", "bet", "status", "payout");
    for session in sessions {
        let payout = session.outcome.as_ref().map(|o| o.payout).unwrap_or(0);
        println!(
            "{:>10}  {:<8} {:>10}  {:<10} {:>10}  {}",
            session.id,
            session.variant.to_string(),
            session.bet_amount,
            session.status.to_string(),
            payout,
            session.created_at.to_rfc3339()
        );
    }
    Ok(())
}

#[derive(Clone)]
struct Tables {
    coin: CoinGame,
    chest: ChestGame,
    cracker: CrackerGame,
}

#[derive(Default)]
struct PlayerTally {
    settled: usize,
    lost_races: usize,
    errors: usize,
}

async fn simulate(
    mut config: StakeplayConfig,
    rounds: usize,
    concurrency: usize,
    variant: SimVariant,
    bet: u64,
    racers: usize,
) -> Result<(), Box<dyn Error>> {
    let concurrency = concurrency.max(1);
    let racers = racers.max(1);
    config.storage.backend = StorageBackend::Memory;

    let players: Vec<String> = (0..concurrency).map(|i| format!("player-{:03}", i)).collect();
    let per_player = rounds.div_ceil(concurrency);
    let bankroll = bet.saturating_mul(per_player as u64).saturating_mul(100);
    let ledger = Arc::new(InMemoryLedger::with_balances(
        players.iter().map(|p| (p.clone(), bankroll)),
    ));
    let initial_total = ledger.total();

    let runtime = StakeplayFactory::build_with(config, ledger.clone(), Arc::new(ThreadRandom)).await?;
    let tables = Tables {
        coin: runtime.coin.clone(),
        chest: runtime.chest.clone(),
        cracker: runtime.cracker.clone(),
    };

    println!("Simulating {} rounds with {} players, {} racer(s) per resolve", rounds, concurrency, racers);
    let started = Instant::now();

    let mut handles = Vec::with_capacity(concurrency);
    for (index, owner) in players.into_iter().enumerate() {
        let tables = tables.clone();
        let my_rounds = per_player.min(rounds.saturating_sub(index * per_player));
        handles.push(tokio::spawn(async move {
            let mut tally = PlayerTally::default();
            for _ in 0..my_rounds {
                match play_round(&tables, &owner, bet, variant, racers).await {
                    Ok((settled, lost)) => {
                        tally.settled += settled;
                        tally.lost_races += lost;
                    }
                    Err(e) => {
                        tally.errors += 1;
                        tracing::warn!(owner = %owner, error = %e, "Simulated round failed");
                    }
                }
            }
            tally
        }));
    }

    let mut total = PlayerTally::default();
    for handle in futures::future::join_all(handles).await {
        let tally = handle?;
        total.settled += tally.settled;
        total.lost_races += tally.lost_races;
        total.errors += tally.errors;
    }
    let elapsed = started.elapsed();

    let snapshot = runtime.metrics.snapshot();
    let final_total = ledger.total();
    let expected_drop =
        snapshot.total_staked as i128 - snapshot.total_paid_out as i128 - snapshot.total_refunded as i128;
    let actual_drop = initial_total as i128 - final_total as i128;

    println!();
    println!("Sessions created:    {}", snapshot.sessions_created);
    println!("Settled:             {}", total.settled);
    println!("Lost resolve races:  {}", total.lost_races);
    println!("Failed rounds:       {}", total.errors);
    println!("Win rate:            {:.2}%", snapshot.win_rate() * 100.0);
    println!("Total staked:        {}", snapshot.total_staked);
    println!("Total paid out:      {}", snapshot.total_paid_out);
    println!("Payout ratio:        {:.4}", 1.0 - snapshot.observed_house_edge());
    println!("Observed house edge: {:.2}%", snapshot.observed_house_edge() * 100.0);
    println!("Dropped events:      {}", snapshot.notifications_dropped);
    println!(
        "Ledger conservation: {}",
        if expected_drop == actual_drop { "ok" } else { "MISMATCH" }
    );
    println!(
        "Elapsed:             {:.2?} ({:.0} sessions/s)",
        elapsed,
        snapshot.sessions_created as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    drop(tables);
    runtime.shutdown(Duration::from_secs(5)).await;

    if expected_drop != actual_drop {
        return Err(format!("ledger moved by {} but settlements account for {}", actual_drop, expected_drop).into());
    }
    Ok(())
}

/// One session: start, select, then `racers` concurrent resolves.
/// Returns (settled, lost races).
async fn play_round(
    tables: &Tables,
    owner: &str,
    bet: u64,
    variant: SimVariant,
    racers: usize,
) -> Result<(usize, usize), SessionError> {
    let variant = match variant {
        SimVariant::Mixed => *[SimVariant::Coin, SimVariant::Chest, SimVariant::Cracker]
            .choose(&mut rand::thread_rng())
            .unwrap_or(&SimVariant::Coin),
        other => other,
    };

    let mut resolvers = Vec::with_capacity(racers);
    match variant {
        SimVariant::Chest => {
            let picks: Vec<String> = {
                let mut rng = rand::thread_rng();
                let count = rng.gen_range(1..=3);
                tables
                    .chest
                    .catalog()
                    .choose_multiple(&mut rng, count)
                    .map(|item| item.id.clone())
                    .collect()
            };
            let id = tables.chest.start(owner, bet, SessionContext::default()).await?;
            tables.chest.pick_items(id, &picks).await?;
            for _ in 0..racers {
                let chest = tables.chest.clone();
                resolvers.push(tokio::spawn(async move { chest.open(id).await }));
            }
        }
        SimVariant::Cracker => {
            let slots: Vec<CrackerSlot> = {
                let mut rng = rand::thread_rng();
                let count = rng.gen_range(1..=5);
                CrackerSlot::ALL.choose_multiple(&mut rng, count).copied().collect()
            };
            let id = tables.cracker.start(owner, bet, SessionContext::default()).await?;
            tables.cracker.pick_slots(id, &slots).await?;
            for _ in 0..racers {
                let cracker = tables.cracker.clone();
                resolvers.push(tokio::spawn(async move { cracker.pull(id).await }));
            }
        }
        SimVariant::Coin | SimVariant::Mixed => {
            let side = CoinSide::from_bool(rand::thread_rng().gen_bool(0.5));
            let id = tables.coin.start(owner, bet, SessionContext::default()).await?;
            tables.coin.choose(id, side).await?;
            for _ in 0..racers {
                let coin = tables.coin.clone();
                resolvers.push(tokio::spawn(async move { coin.flip(id).await }));
            }
        }
    }

    let (mut settled, mut lost) = (0, 0);
    for result in futures::future::join_all(resolvers).await {
        match result {
            Ok(Ok(Resolution::Settled(_))) => settled += 1,
            Ok(Ok(Resolution::AlreadySettled(_))) => lost += 1,
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(SessionError::invalid(format!("resolver task failed: {}", e))),
        }
    }
    Ok((settled, lost))
}
