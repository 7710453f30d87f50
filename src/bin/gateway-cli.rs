use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the transit gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status
    Status,
    /// Rolling health of every service, or one service
    Health { service: Option<String> },
    /// Circuit breaker record for a service
    Circuit { service: String },
    /// Verify audit chain integrity (RFC 3339 bounds)
    Verify {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// List audit events (RFC 3339 bounds)
    Events {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Write the integrity checkpoint for a completed day (YYYY-MM-DD)
    Checkpoint { date: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Health { service: None } => client.get(format!("{base}/admin/health")),
        Commands::Health {
            service: Some(service),
        } => client.get(format!("{base}/admin/health/{service}")),
        Commands::Circuit { service } => client.get(format!("{base}/admin/circuits/{service}")),
        Commands::Verify { from, to } => client
            .get(format!("{base}/admin/audit/verify"))
            .query(&range(from, to)),
        Commands::Events { from, to } => client
            .get(format!("{base}/admin/audit/events"))
            .query(&range(from, to)),
        Commands::Checkpoint { date } => {
            client.post(format!("{base}/admin/audit/checkpoints/{date}"))
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

fn range(from: Option<String>, to: Option<String>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(from) = from {
        query.push(("from", from));
    }
    if let Some(to) = to {
        query.push(("to", to));
    }
    query
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or(text);

    if !status.is_success() {
        eprintln!("Error: Admin API returned status {status}");
        eprintln!("{body}");
        std::process::exit(1);
    }

    println!("{body}");
    Ok(())
}
