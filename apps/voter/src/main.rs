use std::time::Duration;

mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{load_settings, ClientEvent, VotingController};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ui::Command;

#[derive(Parser, Debug)]
#[command(about = "Interactive terminal client for the on-chain election contract")]
struct Args {
    /// Overrides CONTRACT_ADDRESS.
    #[arg(long)]
    contract_address: Option<String>,
    #[arg(long)]
    rpc_url: Option<String>,
    /// Endpoint of the signing agent; defaults to the RPC URL.
    #[arg(long)]
    signer_url: Option<String>,
    #[arg(long)]
    confirmation_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings().context("failed to load settings")?;
    if let Some(v) = args.contract_address {
        settings.contract_address = Some(v);
    }
    if let Some(v) = args.rpc_url {
        settings.rpc_url = v;
    }
    if let Some(v) = args.signer_url {
        settings.signer_url = Some(v);
    }
    if let Some(v) = args.confirmation_timeout_secs {
        settings.confirmation_timeout = Duration::from_secs(v);
    }
    let config = settings.validate().context("invalid configuration")?;
    info!(
        contract = %config.contract_address,
        rpc_url = %config.rpc_url,
        signer_url = %config.signer_url,
        "voter: starting"
    );

    let controller = VotingController::from_config(&config)?;
    spawn_progress_printer(controller.subscribe_events());

    let identity = match controller.initialize().await {
        Ok(identity) => identity,
        Err(err) => {
            println!("{}", ui::render_error(&err));
            return Err(err).context("could not connect to the election");
        }
    };
    println!("connected as {identity}");
    print_candidates(&controller).await;
    println!("{}", ui::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let command = match ui::parse_command(&line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        match command {
            Command::List => print_candidates(&controller).await,
            Command::Vote(candidate_id) => {
                if !controller.can_vote().await {
                    if controller.has_voted().await {
                        println!("Thank you, your vote is already recorded.");
                    } else {
                        println!("please wait for the current transaction to finish");
                    }
                    continue;
                }
                match controller.vote(candidate_id).await {
                    Ok(()) => {
                        println!("Thank you for voting!");
                        print_candidates(&controller).await;
                    }
                    Err(err) => println!("{}", ui::render_error(&err)),
                }
            }
            Command::Add(name) => match controller.add_candidate(&name).await {
                Ok(Some(candidate)) => {
                    println!("added candidate {}: {}", candidate.id, candidate.name);
                    print_candidates(&controller).await;
                }
                Ok(None) => {
                    println!("candidate added; the list was reloaded");
                    print_candidates(&controller).await;
                }
                Err(err) => println!("{}", ui::render_error(&err)),
            },
            Command::Refresh => match controller.refresh().await {
                Ok(_) => print_candidates(&controller).await,
                Err(err) => println!("{}", ui::render_error(&err)),
            },
            Command::Status => println!(
                "{}",
                ui::render_status(
                    controller.identity().await.as_ref(),
                    controller.transaction_state().await,
                    controller.can_vote().await,
                )
            ),
            Command::Help => println!("{}", ui::HELP),
            Command::Quit => break,
        }
    }

    controller.disconnect().await;
    Ok(())
}

async fn print_candidates(controller: &VotingController) {
    match controller.list_candidates().await {
        Ok(candidates) => println!(
            "{}",
            ui::render_candidates(&candidates, controller.voted_for().await)
        ),
        Err(err) => println!("{}", ui::render_error(&err)),
    }
}

fn spawn_progress_printer(mut events: tokio::sync::broadcast::Receiver<ClientEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::TransactionStateChanged(state)) => {
                    if let Some(line) = ui::render_state_change(state) {
                        println!("{line}");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "voter: progress printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
