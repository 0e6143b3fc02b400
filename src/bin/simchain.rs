#![forbid(unsafe_code)]
use clap::{Parser, Subcommand};
use colored::*;
use simchain::abi::Token;
use simchain::config::load_config;
use simchain::events::{DecodedEvent, EventListener, ListenerError};
use simchain::execution::token::IOU_TOKEN;
use simchain::Simulation;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, default_value = "simchain.toml")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploys an IOU token, moves it between users and mines the result
    Demo {
        /// Number of blocks to mine after the transfers
        #[arg(long, default_value_t = 2)]
        blocks: u64,
        /// Names of the users receiving tokens
        #[arg(long, value_delimiter = ',', default_value = "alice,bob,carol")]
        users: Vec<String>,
    },
    /// Prints the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt().with_max_level(config.tracing_level()?).init();

    match cli.command {
        Commands::Demo { blocks, users } => demo(Simulation::native(config)?, blocks, &users)?,
        Commands::Config => println!("{:#?}", config),
    }
    Ok(())
}

fn demo(mut sim: Simulation, blocks: u64, users: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "SimChain demo".bright_cyan().bold());

    let printer: Arc<dyn EventListener> = Arc::new(|event: &DecodedEvent| -> Result<(), ListenerError> {
        println!("  {} {}", "event".bright_magenta(), serde_json::to_string(&event.to_json())?);
        Ok(())
    });
    let token = sim.deploy_contract(IOU_TOKEN, vec![Token::Uint(1_000_000)], Some("iou"), vec![printer])?;
    println!(
        "Deployed {} at {}",
        token.name.bright_yellow(),
        token.address_hex().bright_green()
    );

    for (i, user) in users.iter().enumerate() {
        let identity = sim.resolve_user(user)?;
        let amount = 100 * (i as u128 + 1);
        println!("Sending {} IOU to {} ({})", amount, user.bright_yellow(), identity.address_hex());
        sim.transact(
            "account0",
            "iou",
            "transfer",
            vec![Token::Address(identity.address), Token::Uint(amount)],
            0,
        )?;
    }

    let hashes = sim.advance(blocks.max(1))?;
    for hash in &hashes {
        println!("Mined block {}", hex::encode(hash).bright_green());
    }
    println!("Head is now block {}", sim.head_number().to_string().bold());

    for user in users {
        let identity = sim.resolve_user(user)?;
        let balance = sim.call_contract(user, "iou", "balanceOf", vec![Token::Address(identity.address)])?;
        let balance = balance.first().and_then(Token::as_uint).unwrap_or_default();
        println!("  {:<12} {:>10} IOU", user, balance);
    }
    Ok(())
}
