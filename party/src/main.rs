use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use party::{PartyConfig, PartyEvent, PartyHandle, PartyNode};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; flags below override it
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// UDP address to bind
    #[arg(short = 'b', long)]
    bind: Option<SocketAddr>,

    /// Display name
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Party name when hosting
    #[arg(short = 'p', long)]
    party_name: Option<String>,

    /// Party size including the host
    #[arg(short = 's', long)]
    max_size: Option<u8>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Host a party and wait for clients
    Host,
    /// Join the party hosted at ADDR
    Join { addr: SocketAddr },
}

/// One line typed at the console
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Kick { id: u8, ban_secs: u64 },
    Vote(u8),
    Name(String),
    Public(bool),
    Size(u8),
    Roster,
    Quit,
    Chat(String),
    Invalid(&'static str),
}

fn parse_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return ConsoleCommand::Chat(line.to_string());
    };
    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or_default();

    match command {
        "kick" => {
            let Some(id) = words.next().and_then(|w| w.parse().ok()) else {
                return ConsoleCommand::Invalid("usage: /kick <id> [ban_secs]");
            };
            let ban_secs = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
            ConsoleCommand::Kick { id, ban_secs }
        }
        "vote" => match words.next().and_then(|w| w.parse().ok()) {
            Some(id) => ConsoleCommand::Vote(id),
            None => ConsoleCommand::Invalid("usage: /vote <id>"),
        },
        "name" => {
            let name = words.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                ConsoleCommand::Invalid("usage: /name <party name>")
            } else {
                ConsoleCommand::Name(name)
            }
        }
        "public" => match words.next() {
            Some("on") => ConsoleCommand::Public(true),
            Some("off") => ConsoleCommand::Public(false),
            _ => ConsoleCommand::Invalid("usage: /public on|off"),
        },
        "size" => match words.next().and_then(|w| w.parse().ok()) {
            Some(size) => ConsoleCommand::Size(size),
            None => ConsoleCommand::Invalid("usage: /size <n>"),
        },
        "roster" => ConsoleCommand::Roster,
        "quit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Invalid("unknown command"),
    }
}

fn print_event(event: &PartyEvent) {
    match event {
        PartyEvent::Notice(text) => println!("* {}", text),
        PartyEvent::Chat { sender, message } => match sender {
            Some(name) => println!("<{}> {}", name, message),
            None => println!("{}", message),
        },
        PartyEvent::JoinedParty {
            connection_id,
            party_name,
        } => println!("* Joined \"{}\" as client {}", party_name, connection_id),
        PartyEvent::LeftParty => println!("* Not in a party"),
        PartyEvent::RosterUpdated(roster) => {
            println!("* Roster: {} of {}", roster.len(), roster.max_size)
        }
        PartyEvent::ClientJoined { .. }
        | PartyEvent::ClientLeft { .. }
        | PartyEvent::GamePayload { .. } => {}
    }
}

/// Runs one console command; false once the user asked to quit
async fn run_command(handle: &PartyHandle, command: ConsoleCommand) -> party::Result<bool> {
    match command {
        ConsoleCommand::Kick { id, ban_secs } => {
            let ban = (ban_secs > 0).then(|| Duration::from_secs(ban_secs));
            handle.disconnect_client(id, ban).await?;
        }
        ConsoleCommand::Vote(id) => handle.request_kick_vote(id).await?,
        ConsoleCommand::Name(name) => handle.set_party_name(&name)?,
        ConsoleCommand::Public(enabled) => handle.set_public_party_enabled(enabled)?,
        ConsoleCommand::Size(size) => handle.set_max_party_size(size)?,
        ConsoleCommand::Roster => {
            let roster = handle.roster().await?;
            println!("{} ({}/{})", roster.party_name, roster.len(), roster.max_size);
            for entry in &roster.entries {
                match entry.client_id {
                    Some(id) => println!("  [{}] {}", id, entry.spec.display_name()),
                    None => println!("  [host] {}", entry.spec.display_name()),
                }
            }
        }
        ConsoleCommand::Quit => return Ok(false),
        ConsoleCommand::Chat(line) => {
            if !line.is_empty() {
                handle.send_chat(&line, None, None).await?;
            }
        }
        ConsoleCommand::Invalid(usage) => println!("{}", usage),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PartyConfig::load(path)?,
        None => PartyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(name) = args.name {
        config.player_name = name;
    }
    if let Some(party_name) = args.party_name {
        config.party_name = party_name;
    }
    if let Some(max_size) = args.max_size {
        config.max_party_size = max_size;
    }

    let (node, handle, mut events) = PartyNode::bind(&config).await?;
    let local_addr = node.local_addr()?;
    let node_task = tokio::spawn(node.run());

    match args.mode {
        Mode::Host => info!("Hosting \"{}\" on {}", config.party_name, local_addr),
        Mode::Join { addr } => {
            info!("Joining party at {}", addr);
            handle.connect(addr)?;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match run_command(&handle, parse_line(&line)).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("! {}", e),
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => print_event(&event),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    // The loop may already be gone if it failed
    let _ = handle.shutdown();
    node_task.await??;
    Ok(())
}
