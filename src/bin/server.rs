//! pulsenet Server Binary
//!
//! Runs a chat server: every `ChatMessage` received is broadcast to all
//! connected clients, and the `Echo` procedure returns its argument.

use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam::channel;
use pulsenet::network::{ClientConnected, ClientDisconnected};
use pulsenet::{Config, Server};
use tracing_subscriber::{fmt, EnvFilter};

#[path = "shared/chat.rs"]
mod chat;

use chat::{ChatMessage, Echo};

/// pulsenet Server
#[derive(Parser, Debug)]
#[command(name = "pulsenet-server")]
#[command(about = "Poll-driven TCP chat server")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// Name reported to server detection requests
    #[arg(short, long, default_value = "pulsenet")]
    name: String,

    /// Milliseconds between update passes
    #[arg(short, long, default_value = "16")]
    tick_ms: u64,

    /// Idle connection timeout in milliseconds (0 disables)
    #[arg(long, default_value = "10000")]
    timeout_ms: u32,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pulsenet=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("pulsenet Server v{}", pulsenet::VERSION);

    let config = match Config::builder()
        .server_name(&args.name)
        .connection_timeout_ms(args.timeout_ms)
        .build()
    {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = match Server::with_config(args.port, config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    // Handlers cannot reach the server, so chat goes through a channel
    let (chat_tx, chat_rx) = channel::unbounded::<ChatMessage>();

    server.register_event::<ChatMessage>();
    if let Err(e) = server.subscribe::<ChatMessage, _>(move |connection, message| {
        tracing::info!("[{}] {}: {}", connection.lock().id(), message.author, message.text);
        let _ = chat_tx.send(message.clone());
    }) {
        tracing::error!("Failed to subscribe to chat messages: {}", e);
        std::process::exit(1);
    }

    server.register_remote_procedure::<Echo, _>(|_, text| Ok(text));

    server.on::<ClientConnected, _>(|event| {
        let connection = event.connection.lock();
        tracing::info!("Client {} joined from {}", connection.id(), connection.address());
    });
    server.on::<ClientDisconnected, _>(|event| {
        let connection = event.connection.lock();
        tracing::info!(
            "Client {} left ({} bytes sent, {} bytes received)",
            connection.id(),
            connection.total_bytes_sent(),
            connection.total_bytes_received()
        );
    });

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let mut last = Instant::now();

    loop {
        let now = Instant::now();
        let dt = now.duration_since(last).as_millis().min(u32::MAX as u128) as u32;
        last = now;

        server.update(dt);

        for message in chat_rx.try_iter() {
            let reached = server.emit(&message);
            tracing::debug!("Chat message broadcast to {} clients", reached);
        }

        thread::sleep(tick);
    }
}
