use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "8")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(short, long, default_value = "10")]
    timeout: u64,

    /// Outbound queue length per client
    #[arg(long, default_value = "256")]
    outbox_capacity: usize,

    /// Consecutive malformed messages tolerated before disconnecting
    #[arg(long, default_value = "10")]
    max_malformed: u32,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            max_clients: self.max_clients,
            client_timeout: Duration::from_secs(self.timeout),
            outbox_capacity: self.outbox_capacity,
            max_malformed: self.max_malformed,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    info!("Starting server on {}", config.bind_addr);

    let server = Server::bind(config).await?;
    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
            }
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
