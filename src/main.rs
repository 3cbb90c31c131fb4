//! tablecast - LAN Blackjack tables
//!
//! Run a table that announces itself on the local network, or find one and play.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tablecast::config::{self, Config};
use tablecast::discovery::{self, Broadcaster};
use tablecast::game::Hand;
use tablecast::network::{self, GameClient, Server, ServerEvent, Strategy, Threshold};
use tablecast::protocol::{Card, PlayerAction, RoundResult};

/// tablecast - LAN Blackjack tables
#[derive(Parser)]
#[command(name = "tablecast")]
#[command(author = "Tablecast Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Host or join Blackjack tables on the local network", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a table and announce it
    Server {
        /// TCP port for game sessions (0 = any free port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Table name shown to players
        #[arg(short, long)]
        name: Option<String>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Join a table
    Client {
        /// Table address (host:port); discovered when omitted
        #[arg(short, long)]
        server: Option<String>,

        /// Player name
        #[arg(short, long)]
        name: Option<String>,

        /// Rounds to play before leaving
        #[arg(short, long)]
        rounds: Option<u32>,

        /// Play automatically, hitting below this total
        #[arg(long, value_name = "TOTAL")]
        auto: Option<u8>,
    },

    /// Wait for a table announcement and print it
    Discover {
        /// How long to listen (seconds)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable config: {}", e);
            Config::default()
        })
    };

    match cli.command {
        Commands::Server { port, name, json } => {
            run_server(config, port, name, json).await?;
        }
        Commands::Client {
            server,
            name,
            rounds,
            auto,
        } => {
            run_client(config, server, name, rounds, auto).await?;
        }
        Commands::Discover { timeout } => {
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.discovery_timeout());
            run_discovery(&config, timeout).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Host a table until Ctrl+C
async fn run_server(
    config: Config,
    port: Option<u16>,
    name: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let mut server_config = config.server_config();
    if let Some(port) = port {
        server_config.port = port;
    }
    if let Some(name) = name {
        server_config.name = name;
    }

    let mut server = Server::new(server_config);
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;

    let addr = server.start().await?;

    let mut broadcaster = Broadcaster::new(config.broadcast_config()?, addr.port());
    broadcaster.start().await?;

    if !json {
        println!("\n========================================");
        println!("  tablecast Server Running");
        println!("========================================");
        println!("  Table: {}", server.config().name);
        println!("  Port: {}", addr.port());
        println!("  Announcing on UDP {}", config.discovery.port);
        println!("========================================");
        println!("\nWaiting for players...");
        println!("Press Ctrl+C to stop.\n");
    }

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    print_event(&event);
                }
                if matches!(event, ServerEvent::Stopped) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if !json {
                    println!("\nShutting down...");
                }
                break;
            }
        }
    }

    broadcaster.stop().await?;
    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

fn print_event(event: &ServerEvent) {
    match event {
        ServerEvent::SessionJoined { name, addr, .. } => {
            println!("+ {} joined from {}", name, addr);
        }
        ServerEvent::SessionLeft { name, reason, .. } => {
            println!(
                "- {} left ({})",
                name.as_deref().unwrap_or("unnamed player"),
                reason
            );
        }
        ServerEvent::RoundSettled {
            round,
            dealer,
            results,
        } => {
            println!("Round {} - dealer {}", round, show_cards(dealer));
            for line in results {
                match line.result {
                    Some(result) => println!(
                        "  {:<16} {:<20} {:>2}  {:?}",
                        line.name,
                        show_cards(&line.hand),
                        line.total,
                        result
                    ),
                    None => println!("  {:<16} forfeited", line.name),
                }
            }
        }
        other => tracing::debug!("{:?}", other),
    }
}

fn show_cards(cards: &[Card]) -> String {
    cards
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Join a table and play
async fn run_client(
    config: Config,
    server: Option<String>,
    name: Option<String>,
    rounds: Option<u32>,
    auto: Option<u8>,
) -> anyhow::Result<()> {
    let mut client_config = config.client_config();
    if let Some(name) = name {
        client_config.player_name = name;
    }
    let rounds = rounds.unwrap_or(config.client.rounds);

    let server_addr: SocketAddr = match server {
        Some(addr) => match addr.parse() {
            Ok(addr) => addr,
            Err(_) => {
                let (host, port) = addr
                    .rsplit_once(':')
                    .ok_or_else(|| anyhow::anyhow!("expected host:port, got {:?}", addr))?;
                network::resolve_host(host, port.parse()?).await?
            }
        },
        None => {
            println!("Looking for a table...");
            discovery::discover(config.discovery.port, config.discovery_timeout())
                .await?
                .addr
        }
    };

    let client = GameClient::connect(server_addr, &client_config).await?;
    println!(
        "Seated at {:?} ({}) as {}",
        client.server_name(),
        server_addr,
        client.player_name()
    );

    let summary = match auto {
        Some(stand_on) => client.play(rounds, &mut Threshold::new(stand_on)).await?,
        None => client.play(rounds, &mut Prompt::new()).await?,
    };

    println!(
        "\nPlayed {} rounds: {} won, {} lost, {} pushed ({:.0}% wins)",
        summary.rounds(),
        summary.wins,
        summary.losses,
        summary.pushes,
        summary.win_rate() * 100.0
    );

    Ok(())
}

/// Asks the person at the terminal
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl Strategy for Prompt {
    async fn decide(&mut self, hand: &Hand, dealer: &[Card]) -> PlayerAction {
        println!(
            "\nYour hand: {} ({})   Dealer shows: {}",
            show_cards(hand.cards()),
            hand.total(),
            show_cards(dealer)
        );

        loop {
            println!("[h]it or [s]tand?");
            match self.lines.next_line().await {
                Ok(Some(line)) => match line.trim().to_ascii_lowercase().as_str() {
                    "h" | "hit" => return PlayerAction::Hit,
                    "s" | "stand" => return PlayerAction::Stand,
                    _ => continue,
                },
                // No more input: stand on whatever we hold
                Ok(None) => return PlayerAction::Stand,
                Err(e) => {
                    tracing::warn!("stdin: {}", e);
                    return PlayerAction::Stand;
                }
            }
        }
    }

    async fn settled(&mut self, result: RoundResult, hand: &Hand, dealer: &[Card]) {
        println!(
            "{:?}: {} ({}) against dealer {}",
            result,
            show_cards(hand.cards()),
            hand.total(),
            show_cards(dealer)
        );
    }
}

/// Wait for one announcement
async fn run_discovery(config: &Config, timeout: Duration) -> anyhow::Result<()> {
    println!(
        "Listening for tables on UDP {} ({} seconds)...\n",
        config.discovery.port,
        timeout.as_secs()
    );

    match discovery::discover(config.discovery.port, timeout).await {
        Ok(found) => {
            println!("Found table at {} (announced by {})", found.addr, found.announced_by);
            Ok(())
        }
        Err(discovery::DiscoveryError::Timeout(_)) => {
            println!("No table found.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["tablecast", "client", "--auto", "16", "--rounds", "2"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["tablecast", "server", "--json", "--port", "5555"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Server {
                port: Some(5555),
                json: true,
                ..
            }
        ));
    }

    #[test]
    fn test_show_cards() {
        let cards = [
            Card::new(1, tablecast::protocol::Suit::Spades).unwrap(),
            Card::new(10, tablecast::protocol::Suit::Hearts).unwrap(),
        ];
        assert_eq!(show_cards(&cards), "A♠ 10♥");
    }
}
