//! Coinflip local session
//!
//! Deploys the game against the in-process randomizer, plays a few rounds
//! with an overpaid oracle fee and logs every emitted event, including the
//! refunds paid against each following game.

use clap::Parser;
use coinflip::{
    games::{types::ETHER, Address, Amount, CoinChoice, GameEvent},
    ledger_store, Bank, CoinFlip, CoinflipConfig, ConfigLoader, MockRandomizer,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "coinflip")]
#[command(about = "Play an oracle-settled coin flip session locally", long_about = None)]
struct Args {
    /// Configuration file (TOML); defaults to the local devnet preset
    #[arg(long)]
    config: Option<String>,

    /// Number of flips to play
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Wager per flip in wei
    #[arg(long, default_value_t = 1_000_000_000_000_000)]
    wager: u128,

    /// Prepaid fee as a multiple of the oracle minimum
    #[arg(long, default_value_t = 2)]
    fee_multiplier: u32,

    /// Share of the minimum fee the oracle actually bills, in percent
    #[arg(long, default_value_t = 30)]
    charge_percent: u32,

    /// Side to bet on
    #[arg(long, default_value = "heads")]
    prediction: CoinChoice,

    /// Seed the randomizer derives its values from
    #[arg(long, default_value = "coinflip")]
    seed: String,
}

const GAME: Address = Address([0xc0; 20]);
const OWNER: Address = Address([0x0a; 20]);
const RANDOMIZER: Address = Address([0x5e; 20]);
const PLAYER: Address = Address([0x11; 20]);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_base(CoinflipConfig::local_devnet());
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.as_str().into()),
        )
        .init();

    info!("🚀 Starting coin flip session");
    info!("   Rounds: {}", args.rounds);
    info!("   Wager: {} wei", args.wager);

    let ledger = match &config.storage.ledger_path {
        Some(path) => Some(ledger_store::load_snapshot(path)?),
        None => None,
    };

    let bank = Bank::new();
    bank.mint(OWNER, 1_000 * ETHER);
    bank.mint(PLAYER, 10 * ETHER);

    let minimum_fee: Amount = config.oracle.minimum_fee();
    let charge = minimum_fee * args.charge_percent as Amount / 100;
    let mut randomizer = MockRandomizer::new(
        RANDOMIZER,
        bank.clone(),
        config.oracle.gas_price_wei,
        u64::try_from(charge).unwrap_or(u64::MAX),
    );
    if let Some(last_id) = ledger.as_ref().and_then(|l| l.last_id()) {
        randomizer = randomizer.resume_after(last_id);
    }
    let randomizer = Arc::new(randomizer);

    let mut game = CoinFlip::deploy(GAME, OWNER, randomizer.clone(), bank.clone(), &config);
    if let Some(ledger) = ledger {
        game = game.with_ledger(ledger);
    }
    game.fund_house(OWNER, 100 * ETHER)?;

    let fee = game.minimum_fee() * args.fee_multiplier as Amount;
    for round in 1..=args.rounds {
        let id = game.flip(PLAYER, args.prediction, args.wager, fee)?;
        let value = MockRandomizer::derive_value(args.seed.as_bytes(), id);

        match randomizer.submit_random(&mut game, id, value) {
            Ok(settlement) => info!(
                round,
                id,
                outcome = ?settlement.outcome.outcome,
                refund = ?settlement.refund.map(|r| r.amount),
                "Round complete"
            ),
            Err(e) => warn!(round, id, error = %e, "Randomizer submission failed"),
        }
    }

    for event in game.events() {
        match event {
            GameEvent::Refund { .. } => info!("💸 {}", serde_json::to_string(event)?),
            _ => info!("📣 {}", serde_json::to_string(event)?),
        }
    }

    info!("📊 Session summary");
    info!("   Player balance: {} wei", bank.balance(&PLAYER));
    info!("   House liquidity: {} wei", game.house_liquidity());
    info!("   Oracle deposit reserved: {} wei", game.reserved_deposit());
    for credit in game.ledger().outstanding_credits(&PLAYER) {
        info!("   Outstanding credit: game {} (prepaid {} wei)", credit.game, credit.prepaid_fee);
    }

    if let Some(path) = &config.storage.ledger_path {
        ledger_store::save_snapshot(path, game.ledger())?;
    }

    Ok(())
}
