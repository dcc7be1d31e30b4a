//! netframe Echo Binary
//!
//! Runs an echo server or drives one with a client.

use std::io::BufRead;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use netframe::{
    CallbackResult, Client, Config, Context, Message, OwnedMessage, Server, ServerApp,
};
use tracing_subscriber::{fmt, EnvFilter};

/// netframe echo demo
#[derive(Parser, Debug)]
#[command(name = "netframe-echo")]
#[command(about = "Echo server and client built on netframe")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve until a line is read from stdin
    Server {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1")]
        addr: String,

        /// Listen port
        #[arg(short, long, default_value = "54314")]
        port: u16,

        /// Number of worker processes (defaults to CPUs - 1)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Send messages and check every echo
    Client {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1")]
        addr: String,

        /// Server port
        #[arg(short, long, default_value = "54314")]
        port: u16,

        /// Number of messages to send
        #[arg(short, long, default_value = "1000")]
        count: u32,
    },
}

/// Sends every message straight back on the connection it came from
#[derive(Debug, Clone, Default)]
struct Echo;

impl ServerApp for Echo {
    fn on_client_connect(
        &mut self,
        conn: &mut netframe::Connection,
        _ctx: &Context,
    ) -> CallbackResult<bool> {
        tracing::info!("Client {} connected", conn.addr());
        Ok(true)
    }

    fn on_client_disconnect(
        &mut self,
        conn: &netframe::Connection,
        _ctx: &Context,
    ) -> CallbackResult<()> {
        tracing::info!("Client {} disconnected", conn.addr());
        Ok(())
    }

    fn on_message(&mut self, msg: OwnedMessage<'_>, _ctx: &Context) -> CallbackResult<()> {
        msg.owner.send(&msg.msg);
        Ok(())
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netframe=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("netframe echo v{}", netframe::VERSION);

    let result = match args.command {
        Commands::Server {
            addr,
            port,
            workers,
        } => run_server(addr, port, workers).map(|()| true),
        Commands::Client { addr, port, count } => run_client(&addr, port, count),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_server(addr: String, port: u16, workers: Option<usize>) -> netframe::Result<()> {
    let mut builder = Config::builder().listen_addr(addr).port(port);
    if let Some(workers) = workers {
        builder = builder.worker_num(workers);
    }

    let mut server = Server::with_app(builder.build(), Echo);
    let local_addr = server.start()?;
    tracing::info!("Echo server on {}, press enter to stop", local_addr);

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;

    server.stop(Some(Duration::from_secs(10)))?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Returns false if an echo came back different from what was sent
fn run_client(addr: &str, port: u16, count: u32) -> netframe::Result<bool> {
    let mut client = Client::new();
    client.connect(addr, port)?;

    let started = Instant::now();
    for i in 0..count {
        let mut msg = Message::new((i % u16::MAX as u32) as u16);
        msg.append(&i.to_le_bytes())?;
        client.send(&msg)?;

        let reply = client.recv(Some(Duration::from_secs(5)))?;
        if reply != msg {
            tracing::error!(
                "Echo mismatch for message {}: sent {:?}, got {:?}",
                i,
                msg,
                reply
            );
            client.shutdown(Some(Duration::from_secs(5)))?;
            return Ok(false);
        }
    }
    let elapsed = started.elapsed();

    client.shutdown(Some(Duration::from_secs(5)))?;

    tracing::info!(
        "{} round trips in {:?} ({:.0} msg/s)",
        count,
        elapsed,
        count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(true)
}
