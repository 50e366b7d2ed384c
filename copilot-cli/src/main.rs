//! copilot-cli: terminal frontend for the copilot HTTP API
//!
//! # Subcommands
//! - `chat`                               : interactive session on one thread
//! - `send <message> [--thread] [--json]` : one turn, then exit
//! - `status`                             : show server health
//! - `stats`                              : record counts per table

use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
const EXIT_COMMANDS: [&str; 3] = ["quit", "exit", "bye"];

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "copilot-cli", version, about = "Chat with the copilot about projects, tasks, and clients")]
struct Cli {
    /// Copilot HTTP server URL (overrides COPILOT_URL env var)
    #[arg(long, env = "COPILOT_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat; type quit, exit, or bye to leave
    Chat {
        /// Continue an existing thread instead of starting a new one
        #[arg(long)]
        thread: Option<String>,
    },

    /// Send a single message
    Send {
        message: String,

        /// Thread to continue (a new one is started otherwise)
        #[arg(long)]
        thread: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Show copilot server status
    Status,

    /// Show record counts
    Stats,
}

// ============================================================================
// API Response Types
// ============================================================================

/// Body of a successful POST /api/chat
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub thread_id: String,
    #[serde(default)]
    pub awaiting_confirmation: bool,
}

pub fn is_exit_command(line: &str) -> bool {
    EXIT_COMMANDS.contains(&line.trim().to_lowercase().as_str())
}

/// Lines for the stats command, one per table.
pub fn format_stats(body: &serde_json::Value) -> Vec<String> {
    let mut lines: Vec<String> = body["counts"]
        .as_object()
        .map(|counts| {
            counts
                .iter()
                .map(|(table, n)| format!("{:<10}{}", format!("{}:", table), n))
                .collect()
        })
        .unwrap_or_default();
    if let Some(n) = body["sessions"].as_u64() {
        lines.push(format!("{:<10}{}", "sessions:", n));
    }
    lines
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST one message and return the parsed reply plus the raw body.
fn post_chat(
    client: &reqwest::blocking::Client,
    server: &str,
    message: &str,
    thread_id: &str,
) -> anyhow::Result<(ChatResponse, serde_json::Value)> {
    let url = format!("{}/api/chat", server);
    let body = serde_json::json!({ "message": message, "thread_id": thread_id });
    let resp = client.post(&url).json(&body).send()?;

    let status = resp.status();
    let body: serde_json::Value = resp.json()?;
    if !status.is_success() {
        let error = body["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("server returned {}: {}", status, error);
    }
    Ok((serde_json::from_value(body.clone())?, body))
}

fn do_send(server: &str, message: &str, thread: Option<String>, json_output: bool) -> anyhow::Result<()> {
    let client = client(120)?;
    let thread_id = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (reply, raw) = match post_chat(&client, server, message, &thread_id) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("copilot-cli: {}", e);
            std::process::exit(1);
        }
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&raw)?);
    } else {
        println!("{}", reply.response);
        eprintln!("(thread {})", reply.thread_id);
    }
    Ok(())
}

fn do_chat(server: &str, thread: Option<String>) -> anyhow::Result<()> {
    let client = client(120)?;
    let mut thread_id = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    println!("Copilot ready (thread {}). Type quit, exit, or bye to leave; /reset starts over.", thread_id);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("> ");
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit_command(input) {
            println!("Goodbye!");
            break;
        }
        if input == "/reset" {
            let url = format!("{}/api/reset", server);
            match client.post(&url).json(&serde_json::json!({ "thread_id": thread_id })).send() {
                Ok(r) if r.status().is_success() => println!("Conversation cleared."),
                Ok(r) => eprintln!("copilot-cli: reset failed (HTTP {})", r.status()),
                Err(e) => eprintln!("copilot-cli: cannot reach {}: {}", url, e),
            }
            continue;
        }

        match post_chat(&client, server, input, &thread_id) {
            Ok((reply, _)) => {
                thread_id = reply.thread_id;
                println!("{}", reply.response);
                if reply.awaiting_confirmation {
                    println!("(reply yes or no)");
                }
            }
            Err(e) => eprintln!("copilot-cli: {}", e),
        }
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    match client(10)?.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Copilot server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:          {}", body["store"].as_str().unwrap_or("?"));
            println!("Backend:        {}", body["backend"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("copilot-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("copilot-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn do_stats(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/stats", server);
    let resp = match client(10)?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("copilot-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        eprintln!("copilot-cli: server returned {}", resp.status());
        std::process::exit(1);
    }
    let body: serde_json::Value = resp.json()?;
    for line in format_stats(&body) {
        println!("{}", line);
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat { thread } => do_chat(&server, thread),
        Commands::Send { message, thread, json } => do_send(&server, &message, thread, json),
        Commands::Status => do_status(&server),
        Commands::Stats => do_stats(&server),
    };

    if let Err(e) = result {
        eprintln!("copilot-cli: {}", e);
        std::process::exit(1);
    }
}
