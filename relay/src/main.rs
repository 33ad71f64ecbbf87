// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Beam Relay
//!
//! Entry point for the `beam-relay` binary. Parses CLI arguments,
//! initializes logging, builds the receiving stack (session engine,
//! trust store, offline queue), and serves the HTTP administration API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the relay daemon
//! - `demo`    — run a two-device payment exchange in-process
//! - `version` — print build version information
//!
//! The relay carries no radio backend of its own: peer links are handed
//! to it by the host platform. The `demo` subcommand substitutes an
//! in-memory link so the whole protocol stack can be exercised from the
//! command line.

mod api;
mod cli;
mod logging;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use beam_protocol::chain::InMemoryChain;
use beam_protocol::config;
use beam_protocol::identity::{DeviceKeypair, KeyStore, MemoryKeyStore};
use beam_protocol::orchestrator::PaymentOrchestrator;
use beam_protocol::queue::{MemoryQueueStore, OfflineQueue, SledQueueStore};
use beam_protocol::receiver::PaymentReceiver;
use beam_protocol::session::SessionEngine;
use beam_protocol::transport::{memory_pair, ChunkTransport, TransportConfig};
use beam_protocol::trust::TrustStore;
use beam_protocol::wire::payment::{payment_now, TokenInfo};

use cli::{BeamRelayCli, Commands};
use logging::LogFormat;

/// Demo-chain balance in base units (2-decimal test token: 10000.00).
const DEMO_BALANCE: u128 = 1_000_000;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BeamRelayCli::parse();

    match cli.command {
        Commands::Run(args) => run_relay(args).await,
        Commands::Demo(args) => run_demo(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Starts the relay daemon: durable queue, receiving stack, periodic
/// maintenance, and the administration API.
async fn run_relay(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "beam_relay=info,beam_protocol=info",
        LogFormat::from_str_lossy(&args.log_format),
    );

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data directory {}", args.data_dir.display()))?;

    let keypair = load_or_generate_identity(&args.data_dir)?;
    let our_id = keypair.peer_id();
    tracing::info!(peer_id = %our_id, "relay identity loaded");

    let store = SledQueueStore::open(args.data_dir.join("queue"))
        .context("opening offline queue store")?;
    // The relay ships with a scriptable chain; a production deployment
    // wires its own ChainBroadcaster here.
    let chain = Arc::new(InMemoryChain::new(DEMO_BALANCE));
    chain.set_confirmed_nonce(1);

    let engine = Arc::new(SessionEngine::new(our_id.clone()));
    let trust = Arc::new(TrustStore::default());
    let queue = Arc::new(OfflineQueue::new(Arc::new(store), chain.clone()));
    let receiver = Arc::new(PaymentReceiver::new(
        engine.clone(),
        trust.clone(),
        queue.clone(),
        chain.clone(),
    ));

    // Periodic maintenance: expire idle sessions, reclaim idle trust
    // records, and drain the queue whenever connectivity is back.
    {
        let engine = engine.clone();
        let trust = trust.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config::SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let expired = engine.expire_idle();
                let reclaimed = trust.sweep_idle();
                match queue.sweep().await {
                    Ok(report) if report.submitted + report.failed > 0 => {
                        tracing::info!(
                            submitted = report.submitted,
                            failed = report.failed,
                            held_back = report.held_back,
                            "queue sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "queue sweep failed"),
                }
                if expired + reclaimed > 0 {
                    tracing::debug!(expired, reclaimed, "maintenance sweep");
                }
            }
        });
    }

    let state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        peer_id: our_id,
        started_at: Instant::now(),
        engine,
        trust,
        queue,
        receiver,
    };
    let router = api::create_router(state);

    let addr = format!("0.0.0.0:{}", args.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding API listener on {addr}"))?;
    tracing::info!(%addr, "administration API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving administration API")?;
    tracing::info!("relay shut down");
    Ok(())
}

/// Loads the device identity from `identity.key`, generating and
/// persisting a fresh one on first run.
fn load_or_generate_identity(data_dir: &std::path::Path) -> Result<DeviceKeypair> {
    let path = data_dir.join("identity.key");
    if path.exists() {
        let encoded = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let bytes = hex::decode(encoded.trim()).context("identity key is not valid hex")?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("identity key must be 32 bytes"))?;
        return Ok(DeviceKeypair::from_bytes(&bytes));
    }

    let keypair = DeviceKeypair::generate();
    std::fs::write(&path, hex::encode(keypair.secret_bytes()))
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "generated new device identity");
    Ok(keypair)
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}

// ---------------------------------------------------------------------------
// demo
// ---------------------------------------------------------------------------

/// Runs a complete payment exchange between two in-process devices over
/// an in-memory link and prints the sender's result as JSON.
async fn run_demo(args: cli::DemoArgs) -> Result<()> {
    logging::init_logging("beam_relay=info,beam_protocol=debug", LogFormat::Pretty);

    let sender_keys = Arc::new(MemoryKeyStore::ephemeral());
    let receiver_keys = Arc::new(MemoryKeyStore::ephemeral());
    let sender_id = sender_keys.identity_keypair().peer_id();
    let receiver_id = receiver_keys.identity_keypair().peer_id();
    tracing::info!(sender = %sender_id, receiver = %receiver_id, "demo devices created");

    let sender_chain = Arc::new(InMemoryChain::new(DEMO_BALANCE));
    sender_chain.set_confirmed_nonce(1);
    let receiver_chain = Arc::new(InMemoryChain::new(DEMO_BALANCE));
    receiver_chain.set_confirmed_nonce(1);

    let sender_engine = Arc::new(SessionEngine::new(sender_id.clone()));
    let receiver_engine = Arc::new(SessionEngine::new(receiver_id.clone()));

    let sender_queue = Arc::new(OfflineQueue::new(
        Arc::new(MemoryQueueStore::new()),
        sender_chain.clone(),
    ));
    let receiver_queue = Arc::new(OfflineQueue::new(
        Arc::new(MemoryQueueStore::new()),
        receiver_chain.clone(),
    ));

    let receiver = Arc::new(PaymentReceiver::new(
        receiver_engine,
        Arc::new(TrustStore::default()),
        receiver_queue,
        receiver_chain.clone(),
    ));

    let (sender_link, receiver_link) = memory_pair(sender_id, receiver_id);
    let transport_config = TransportConfig {
        frame_ceiling: args.frame_ceiling,
        ..TransportConfig::default()
    };
    let sender_transport = ChunkTransport::with_config(sender_link, transport_config.clone());
    let receiver_transport = ChunkTransport::with_config(receiver_link, transport_config);

    let serving = receiver.clone();
    tokio::spawn(async move {
        if let Err(err) = serving.serve(&receiver_transport).await {
            tracing::warn!(error = %err, "receiver loop ended with an error");
        }
    });

    let orchestrator = PaymentOrchestrator::new(
        sender_engine,
        sender_keys,
        sender_queue,
        sender_chain,
    );
    let payment = payment_now(
        "0xdemo-merchant",
        args.amount.clone(),
        1,
        TokenInfo::native("ETH", 2),
    );
    let result = orchestrator
        .submit_payment(&sender_transport, &payment)
        .await
        .context("demo payment failed")?;

    tracing::info!(status = ?result.status, "demo payment resolved");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn print_version() {
    println!("beam-relay {}", env!("CARGO_PKG_VERSION"));
    println!("protocol version {}", config::PROTOCOL_VERSION);
}
