//! twin-cli - terminal frontend for the Mirror Twin HTTP API
//!
//! # Subcommands
//! - `setup <name> <resolution> [--struggles <text>]` - create the profile
//! - `log <entry>`                                     - add a journal entry
//! - `chat <message>`                                  - talk to your mirror twin
//! - `progress`                                        - evaluate today's entries
//! - `motivation [--refresh]`                          - daily motivation + strategy
//! - `insights`                                        - stage, streaks, last 7 days
//! - `feedback <happy|neutral|sad>`                    - rate today's strategy
//! - `status`                                          - show server health
//!
//! Every subcommand takes `--json` to print the raw server response.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "twin-cli", version, about = "Mirror Twin: journal with your future self")]
struct Cli {
    /// Mirror Twin HTTP server URL (overrides TWIN_HTTP_URL env var)
    #[arg(long, env = "TWIN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create your profile
    Setup {
        name: String,
        resolution: String,
        #[arg(long, default_value = "")]
        struggles: String,
    },

    /// Add a journal entry for today
    Log { entry: String },

    /// Send a message to your mirror twin
    Chat { message: String },

    /// Evaluate today's journal entries (once per day)
    Progress,

    /// Show today's motivation and strategy suggestion
    Motivation {
        /// Regenerate even if today's motivation is cached
        #[arg(long)]
        refresh: bool,
    },

    /// Show evolution stage and streaks
    Insights,

    /// Rate today's strategy suggestion
    Feedback { rating: Rating },

    /// Show Mirror Twin server status
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Rating {
    Happy,
    Neutral,
    Sad,
}

impl Rating {
    fn as_str(&self) -> &'static str {
        match self {
            Rating::Happy => "happy",
            Rating::Neutral => "neutral",
            Rating::Sad => "sad",
        }
    }
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub progress_delta: u8,
    pub reason: String,
    pub progress_level: u8,
    pub evolution: Evolution,
}

#[derive(Debug, Deserialize)]
pub struct Evolution {
    pub stage: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Motivation {
    pub date: String,
    pub summary: String,
    pub strategy_suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MotivationResponse {
    pub motivation: Motivation,
    pub cached: bool,
}

// ============================================================================
// Rendering
// ============================================================================

pub fn render_progress(p: &ProgressResponse) -> String {
    format!(
        "+{} progress ({}%, {})\n{}",
        p.progress_delta, p.progress_level, p.evolution.stage, p.reason
    )
}

pub fn render_motivation(m: &MotivationResponse) -> String {
    let mut out = format!("{}\n", m.motivation.summary);
    if let Some(s) = &m.motivation.strategy_suggestion {
        out.push_str(&format!("\nToday's strategy: {}\n", s));
    }
    if m.cached {
        out.push_str(&format!("\n(cached for {})", m.motivation.date));
    }
    out.trim_end().to_string()
}

/// `series` is oldest first; a filled block marks a logged day.
pub fn render_series(series: &[u8]) -> String {
    series
        .iter()
        .map(|d| if *d > 0 { '■' } else { '□' })
        .collect()
}

pub fn render_insights(body: &Value) -> String {
    let series: Vec<u8> = body["series"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_u64()).map(|v| v as u8).collect())
        .unwrap_or_default();

    format!(
        "{}: {}\n\
         Stage:       {} ({}%)\n\
         Streak:      {} day(s), longest {}\n\
         Last 7 days: {} {} ({})",
        body["userName"].as_str().unwrap_or("?"),
        body["resolution"].as_str().unwrap_or("?"),
        body["evolution"]["stage"].as_str().unwrap_or("?"),
        body["progressLevel"].as_u64().unwrap_or(0),
        body["currentStreak"].as_u64().unwrap_or(0),
        body["longestStreak"].as_u64().unwrap_or(0),
        render_series(&series),
        body["last7Days"].as_u64().unwrap_or(0),
        body["consistency"].as_str().unwrap_or("?"),
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// Call the server; non-2xx responses exit with the server's error message.
fn call(server: &str, method: reqwest::Method, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
    let client = reqwest::blocking::Client::builder()
        // progress and chat wait on the model, including retries
        .timeout(std::time::Duration::from_secs(90))
        .build()?;

    let url = format!("{}{}", server, path);
    let mut req = client.request(method, &url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("twin-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let text = resp.text().unwrap_or_default();
    let value: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

    if !status.is_success() {
        let message = value["error"].as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
        eprintln!("twin-cli: server returned {}: {}", status, message);
        std::process::exit(1);
    }

    Ok(value)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    use reqwest::Method;

    let server = cli.server.trim_end_matches('/').to_string();

    let (value, rendered) = match cli.command {
        Commands::Setup { name, resolution, struggles } => {
            let v = call(
                &server,
                Method::POST,
                "/setup",
                Some(json!({ "userName": name, "resolution": resolution, "struggles": struggles })),
            )?;
            let welcome = v["history"][0]["content"].as_str().unwrap_or("").to_string();
            (v, welcome)
        }
        Commands::Log { entry } => {
            let v = call(&server, Method::POST, "/journal", Some(json!({ "entry": entry })))?;
            let line = format!(
                "Logged. {} entr{} today.",
                v["logCount"],
                if v["logCount"] == 1 { "y" } else { "ies" }
            );
            (v, line)
        }
        Commands::Chat { message } => {
            let v = call(&server, Method::POST, "/chat", Some(json!({ "message": message })))?;
            let reply = v["reply"].as_str().unwrap_or("").to_string();
            (v, reply)
        }
        Commands::Progress => {
            let v = call(&server, Method::POST, "/progress", None)?;
            let p: ProgressResponse = serde_json::from_value(v.clone())?;
            (v, render_progress(&p))
        }
        Commands::Motivation { refresh } => {
            let path = if refresh { "/motivation?refresh=true" } else { "/motivation" };
            let v = call(&server, Method::GET, path, None)?;
            let m: MotivationResponse = serde_json::from_value(v.clone())?;
            (v, render_motivation(&m))
        }
        Commands::Insights => {
            let v = call(&server, Method::GET, "/insights", None)?;
            let out = render_insights(&v);
            (v, out)
        }
        Commands::Feedback { rating } => {
            let v = call(&server, Method::POST, "/feedback", Some(json!({ "rating": rating.as_str() })))?;
            let out = if v["recorded"] == true {
                "Thanks, feedback recorded.".to_string()
            } else {
                "Thanks! (telemetry is disabled, feedback was not recorded)".to_string()
            };
            (v, out)
        }
        Commands::Status => {
            let v = call(&server, Method::GET, "/health", None)?;
            let out = format!(
                "Mirror Twin server: {}\nVersion:            {}\nLLM:                {}\nTelemetry:          {} ({} pending)",
                v["status"].as_str().unwrap_or("unknown"),
                v["version"].as_str().unwrap_or("?"),
                v["model"].as_str().unwrap_or("not configured"),
                if v["telemetry_enabled"] == true { "enabled" } else { "disabled" },
                v["pending_traces"].as_u64().unwrap_or(0),
            );
            (v, out)
        }
    };

    if cli.json {
        print_json(&value)
    } else {
        println!("{}", rendered);
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("twin-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
