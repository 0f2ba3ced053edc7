use toralize::{relay, Config, Socks4Client};

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(about = "Fetch a page through a SOCKS4 proxy", long_about = None)]
struct Args {
    /// Destination host (IPv4 address or name with an A record)
    host: String,
    /// Destination port
    port: u16,
    /// Proxy address, e.g. 127.0.0.1:9050
    #[clap(long)]
    proxy: Option<String>,
    /// USERID sent to the proxy
    #[clap(long)]
    ident: Option<String>,
    /// TOML configuration file
    #[clap(long)]
    config: Option<PathBuf>,
    /// Deadline for the proxy reply, e.g. 10s
    #[clap(long, parse(try_from_str = humantime::parse_duration))]
    read_timeout: Option<Duration>,
    /// Idle limit while reading the relayed response, e.g. 30s
    #[clap(long, parse(try_from_str = humantime::parse_duration))]
    relay_timeout: Option<Duration>,
    /// Refuse replies whose first byte is not zero
    #[clap(long)]
    strict: bool,
    #[clap(long, default_value = "info")]
    log_level: String,
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    config.merge_with_cli_args(
        args.proxy.as_deref(),
        args.ident.as_deref(),
        args.read_timeout,
        args.relay_timeout,
        args.strict,
    );
    config.validate().context("Invalid configuration")?;

    let relay_timeout = config.relay_timeout;
    let client = Socks4Client::new(config)?;
    let mut tunnel = client
        .establish(&args.host, args.port)
        .await
        .with_context(|| format!("Could not tunnel to {}:{}", args.host, args.port))?;

    let request = relay::http_get_request(&args.host);
    let response = relay::exchange(&mut tunnel, &request, relay_timeout).await?;
    info!("received {} bytes from {}:{}", response.len(), args.host, args.port);

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response)?;
    stdout.flush()?;
    Ok(())
}

fn init_tracing(args: &Args) {
    let log_level = if args.verbose { "debug" } else { &args.log_level };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
