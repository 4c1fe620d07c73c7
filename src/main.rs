use std::fmt::Debug;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::info;

use rsourcequery::{ClientConfig, QueryResult, SourceQuery, TransportProtocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Info,
    Players,
    Rules,
    All,
}

/// Query a Source engine game server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Host name or IP address of the server
    host: String,
    /// Query port
    #[arg(default_value_t = 27015)]
    port: u16,
    /// What to ask for
    #[arg(value_enum, default_value_t = Kind::Info)]
    kind: Kind,
    /// Use TCP instead of UDP
    #[arg(long)]
    tcp: bool,
    /// Timeout for connect, each send and each receive
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

fn report<T: Debug>(label: &str, result: &QueryResult<T>) -> bool {
    match result {
        QueryResult::Success { data, latency } => {
            println!("{label} ({} ms):\n{data:#?}", latency.as_millis());
        }
        QueryResult::Partial {
            data,
            latency,
            message,
        } => {
            println!("{label} ({} ms, partial: {message}):\n{data:#?}", latency.as_millis());
        }
        QueryResult::Failure { message } => {
            eprintln!("{label} failed: {message}");
        }
    }
    result.succeeded()
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let timeout = Duration::from_millis(args.timeout_ms);
    let config = ClientConfig::default()
        .with_send_timeout(timeout)
        .with_recv_timeout(timeout);
    let protocol = if args.tcp {
        TransportProtocol::Tcp
    } else {
        TransportProtocol::Udp
    };

    let mut client = match SourceQuery::connect(&args.host, args.port, protocol, config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("could not connect to {}:{}: {e}", args.host, args.port);
            return ExitCode::FAILURE;
        }
    };
    info!("connected to {:?}", client.transport().remote_addr());

    let mut ok = true;
    if matches!(args.kind, Kind::Info | Kind::All) {
        ok &= report("info", &client.info().await);
    }
    if matches!(args.kind, Kind::Players | Kind::All) {
        ok &= report("players", &client.players().await);
    }
    if matches!(args.kind, Kind::Rules | Kind::All) {
        ok &= report("rules", &client.rules().await);
    }
    client.close();

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
