use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "waypoint-ctl")]
#[command(about = "Operator CLI for the waypoint admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:9998")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version and readiness
    Status,
    /// List the current routing table
    Routes,
    /// Print the manual overrides
    Manual,
    /// Replace the manual overrides with the contents of a file
    SetManual { file: PathBuf },
    /// Show the route directive reference
    Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{base}/api/version")).send().await?;
            print_json(res).await?;
        }
        Commands::Routes => {
            let res = client.get(format!("{base}/api/routes")).send().await?;
            print_json(res).await?;
        }
        Commands::Manual => {
            let res = client.get(format!("{base}/api/manual")).send().await?;
            print_text(res).await?;
        }
        Commands::SetManual { file } => {
            let text = std::fs::read_to_string(&file)?;
            let res = client.put(format!("{base}/api/manual")).body(text).send().await?;
            print_text(res).await?;
        }
        Commands::Commands => {
            let res = client.get(format!("{base}/api/commands")).send().await?;
            print_text(res).await?;
        }
    }

    Ok(())
}

async fn check(res: reqwest::Response) -> Result<Option<reqwest::Response>, Box<dyn std::error::Error>> {
    let status = res.status();
    if status.is_success() {
        return Ok(Some(res));
    }
    eprintln!("Error: admin API returned status {status}");
    if let Ok(text) = res.text().await {
        eprintln!("Response: {text}");
    }
    Ok(None)
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(res) = check(res).await? {
        let json: Value = res.json().await?;
        println!("{}", serde_json::to_string_pretty(&json)?);
    }
    Ok(())
}

async fn print_text(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(res) = check(res).await? {
        print!("{}", res.text().await?);
    }
    Ok(())
}
