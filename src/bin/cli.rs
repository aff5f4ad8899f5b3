//! pulsenet CLI Client
//!
//! Line-based chat client. Each stdin line is sent as a `ChatMessage`;
//! lines starting with `/echo ` invoke the server's `Echo` procedure.
//! With `--fallback-server` the process hosts the chat itself when no
//! server answers.

use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam::channel::{self, Receiver};
use pulsenet::network::{ClientConnected, Connected, Disconnected, ServerDetected};
use pulsenet::{Client, Config, NetworkAddress, Server};
use tracing_subscriber::{fmt, EnvFilter};

#[path = "shared/chat.rs"]
mod chat;

use chat::{ChatMessage, Echo};

/// pulsenet CLI
#[derive(Parser, Debug)]
#[command(name = "pulsenet-cli")]
#[command(about = "Chat client for pulsenet servers")]
struct Args {
    /// Server host
    #[arg(short, long, default_value = "localhost")]
    server: String,

    /// Server port
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// Name shown next to messages
    #[arg(short, long, default_value = "anonymous")]
    name: String,

    /// Host the chat on the port when connecting fails
    #[arg(long)]
    fallback_server: bool,

    /// Milliseconds between update passes
    #[arg(short, long, default_value = "16")]
    tick_ms: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let Some(address) = NetworkAddress::resolve(&args.server) else {
        eprintln!("Unknown host: {}", args.server);
        std::process::exit(1);
    };

    let lines = spawn_stdin_reader();
    let tick = Duration::from_millis(args.tick_ms.max(1));

    match Client::create(&address, args.port) {
        Ok(client) => run_client(client, &args.name, &lines, tick),
        Err(e) if args.fallback_server => {
            tracing::info!("No server reachable ({}), hosting on port {}", e, args.port);
            match Server::with_config(args.port, Config::default()) {
                Ok(server) => run_server(server, &args.name, &lines, tick),
                Err(e) => {
                    eprintln!("Failed to host: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    }
}

/// Read stdin on a helper thread; the update loop must never block
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel::unbounded();

    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    rx
}

fn elapsed_ms(last: &mut Instant) -> u32 {
    let now = Instant::now();
    let dt = now.duration_since(*last).as_millis().min(u32::MAX as u128) as u32;
    *last = now;
    dt
}

fn run_client(mut client: Client, name: &str, lines: &Receiver<String>, tick: Duration) {
    client.register_event::<ChatMessage>();
    if let Err(e) = client.subscribe::<ChatMessage, _>(|_, message| {
        println!("{}: {}", message.author, message.text);
    }) {
        eprintln!("Failed to subscribe: {}", e);
        return;
    }

    client.on::<Connected, _>(|_| println!("* connected"));
    client.on::<Disconnected, _>(|_| println!("* disconnected"));
    client.on::<ServerDetected, _>(|server| {
        println!("* server '{}' at {}:{}", server.name, server.address, server.port);
    });

    if let Err(e) = client.detect_servers() {
        tracing::warn!("Server detection failed: {}", e);
    }

    let mut last = Instant::now();
    while client.connection().is_some() {
        client.update(elapsed_ms(&mut last));

        for line in lines.try_iter() {
            let result = match line.strip_prefix("/echo ") {
                Some(text) => client.invoke::<Echo, _>(&text.to_string(), |result| match result {
                    Ok(text) => println!("* echo: {}", text),
                    Err(e) => println!("* echo failed: {}", e),
                }),
                None => client
                    .emit(&ChatMessage {
                        author: name.to_string(),
                        text: line.clone(),
                    })
                    .map(|_| ()),
            };

            if let Err(e) = result {
                eprintln!("Send failed: {}", e);
            }
        }

        thread::sleep(tick);
    }
}

fn run_server(mut server: Server, name: &str, lines: &Receiver<String>, tick: Duration) {
    let (chat_tx, chat_rx) = channel::unbounded::<ChatMessage>();

    server.register_event::<ChatMessage>();
    if let Err(e) = server.subscribe::<ChatMessage, _>(move |_, message| {
        println!("{}: {}", message.author, message.text);
        let _ = chat_tx.send(message.clone());
    }) {
        eprintln!("Failed to subscribe: {}", e);
        return;
    }

    server.register_remote_procedure::<Echo, _>(|_, text| Ok(text));
    server.on::<ClientConnected, _>(|event| {
        println!("* {} joined", event.connection.lock().address());
    });

    println!("* hosting on port {}", server.port());

    let mut last = Instant::now();
    loop {
        server.update(elapsed_ms(&mut last));

        for message in chat_rx.try_iter() {
            server.emit(&message);
        }

        for line in lines.try_iter() {
            let message = ChatMessage {
                author: name.to_string(),
                text: line,
            };
            println!("{}: {}", message.author, message.text);
            server.emit(&message);
        }

        thread::sleep(tick);
    }
}
