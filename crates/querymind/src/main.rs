// querymind/crates/querymind/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use dotenvy::dotenv;
#[cfg(feature = "cli")]
use querymind::{config::Config, run_server};

/// Natural-language questions over MySQL, answered with generated SQL.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "querymind", version, about)]
struct Cli {
    /// Address to bind, overriding API_HOST
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding API_PORT
    #[arg(long, short)]
    port: Option<u16>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let mut cfg = Config::from_env()?;
    if let Some(host) = cli.host {
        cfg.api_host = host;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
