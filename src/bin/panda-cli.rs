use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};
use tunnel_panda::security::auth::{basic_header_value, APP_TOKEN_HEADER};

#[derive(Parser)]
#[command(name = "panda-cli")]
#[command(about = "Management CLI for tunnel-panda", long_about = None)]
struct Cli {
    #[arg(long, default_value = "http://localhost:16014")]
    url: String,

    #[arg(short, long, default_value = "")]
    user: String,

    #[arg(short, long, default_value = "")]
    pass: String,

    #[arg(short, long, default_value = "")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Probe the upstream inference server
    Health,
    /// Database status and collection counts
    DbStatus,
    /// List models available upstream
    Models,
    /// Per-IP request counters
    RateStatus,
    /// Open WebSocket connections per endpoint
    Connections,
    /// Stream collection updates from the status WebSocket
    Watch,
}

fn auth_headers(cli: &Cli) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&basic_header_value(&cli.user, &cli.pass))?);
    headers.insert(APP_TOKEN_HEADER, HeaderValue::from_str(&cli.token)?);
    Ok(headers)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let headers = auth_headers(&cli)?;

    let path = match cli.command {
        Commands::Status => "/status",
        Commands::Health => "/health",
        Commands::DbStatus => "/db/status",
        Commands::Models => "/api/tags",
        Commands::RateStatus => "/_internal/rate-status",
        Commands::Connections => "/_internal/connections",
        Commands::Watch => return watch(&cli, headers).await,
    };

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn watch(cli: &Cli, headers: HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
    let ws_url = format!("{}/db/status", cli.url.trim_end_matches('/')).replacen("http", "ws", 1);
    let mut request = ws_url.as_str().into_client_request()?;
    request.headers_mut().extend(headers);

    let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;
    eprintln!("Connected to {}", ws_url);

    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", text.as_str()),
            },
            Message::Close(frame) => {
                eprintln!("Closed: {:?}", frame);
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
