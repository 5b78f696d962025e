mod client;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::client::ApiClient;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld HTTP API
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    server: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark attendance for an identity from a face image
    Mark {
        /// Caller-supplied identity key
        #[arg(long)]
        id: String,
        /// Name recorded with the attendance row
        #[arg(long)]
        name: String,
        /// Path to a PNG/JPEG/BMP/WebP image
        #[arg(long)]
        image: PathBuf,
        /// Client-side confidence, stored verbatim (e.g. "0.97")
        #[arg(long)]
        confidence: Option<String>,
    },
    /// Show the most recent attendance records
    List,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server, Duration::from_secs(cli.timeout))?;

    match cli.command {
        Commands::Mark {
            id,
            name,
            image,
            confidence,
        } => {
            let reply = client
                .mark(&id, &name, &image, confidence.as_deref())
                .await?;
            tracing::debug!(status = %reply.status, body = %reply.body, "mark reply");
            match reply.kind() {
                "success" => {
                    let data = &reply.body["data"];
                    println!(
                        "Recorded {} ({}) at {} {}",
                        text(&data["display_name"]),
                        text(&data["identity_id"]),
                        text(&data["date"]),
                        text(&data["time"]),
                    );
                }
                "exists" => println!("{id} is already marked for today"),
                "face_mismatch" => {
                    eprintln!("Rejected: {}", reply.message().unwrap_or("face mismatch"));
                    return Ok(ExitCode::from(2));
                }
                _ => {
                    eprintln!(
                        "Error ({}): {}",
                        reply.status,
                        reply.message().unwrap_or("unknown error")
                    );
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::List => {
            let reply = client.list().await?;
            let records = reply.body["data"].as_array().cloned().unwrap_or_default();
            if records.is_empty() {
                println!("No attendance recorded");
            }
            for record in &records {
                println!(
                    "{}  {}  {:<16} {:<24} {}",
                    text(&record["date"]),
                    text(&record["time"]),
                    text(&record["identity_id"]),
                    text(&record["display_name"]),
                    text(&record["confidence"]),
                );
            }
        }
        Commands::Status => {
            let reply = client.status().await?;
            let body = &reply.body;
            println!("rollcalld {}", text(&body["version"]));
            println!("  enrolled:  {}", body["enrolled"]);
            println!("  metric:    {}", text(&body["metric"]));
            println!("  threshold: {}", body["threshold"]);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or("-")
}
