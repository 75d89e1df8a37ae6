//! govmon — governance monitor CLI
//!
//! Thin wrapper over the governance runtime: `serve` speaks
//! line-delimited JSON tool calls over stdio; the remaining subcommands
//! are one-shot administrative entry points.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use govmon_runtime::{GovernanceRuntime, RuntimeConfig};

/// Exit codes, BSD-sysexits style
const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 64;
const EXIT_UNAVAILABLE: u8 = 69;
const EXIT_SOFTWARE: u8 = 70;
const EXIT_AUTH: u8 = 77;

#[derive(Parser)]
#[command(name = "govmon")]
#[command(about = "Multi-agent governance monitor")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory override (also via GOVMON_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool calls as line-delimited JSON over stdio
    Serve,
    /// Invoke a single tool and print the result
    Call {
        /// Tool name
        tool: String,
        /// JSON arguments object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
    /// List the registered tools
    Tools,
    /// Reap advisory locks with dead owners
    CleanupLocks,
    /// Print server information
    Info,
}

fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("GOVMON_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.compact {
        builder.compact().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig, u8> {
    let mut config = RuntimeConfig::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("configuration error: {e}");
        EXIT_USAGE
    })?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    Ok(config)
}

fn exit_for_code(code: Option<&str>) -> u8 {
    match code {
        Some("AUTH_FAILED") => EXIT_AUTH,
        Some("LOCK_TIMEOUT") | Some("TIMEOUT") | Some("RATE_LIMITED") | Some("LOOP_COOLDOWN") => {
            EXIT_UNAVAILABLE
        }
        Some("VALIDATION") | Some("NOT_FOUND") => EXIT_USAGE,
        Some(_) => EXIT_SOFTWARE,
        None => EXIT_OK,
    }
}

async fn serve(runtime: GovernanceRuntime) -> u8 {
    let flusher = runtime.spawn_flusher();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    tracing::info!("govmon serving on stdio");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(request) => {
                let tool = request
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args = request.get("args").cloned().unwrap_or_else(|| json!({}));
                let mut response = runtime.dispatch(&tool, args).await;
                if let (Some(object), Some(id)) = (response.as_object_mut(), request.get("id")) {
                    object.insert("id".to_string(), id.clone());
                }
                response
            }
            Err(e) => json!({
                "success": false,
                "error": format!("request is not valid JSON: {e}"),
                "error_code": "VALIDATION",
            }),
        };

        let mut out = response.to_string();
        out.push('\n');
        if stdout.write_all(out.as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }

    flusher.abort();
    if let Err(e) = runtime.shutdown() {
        tracing::error!(error = %e, "shutdown flush failed");
        return EXIT_SOFTWARE;
    }
    EXIT_OK
}

async fn run() -> u8 {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => return code,
    };
    init_tracing(&config);

    match cli.command {
        Commands::Tools => {
            for spec in govmon_runtime::tools::TOOLS {
                println!("{:32} {}", spec.name, spec.description);
            }
            EXIT_OK
        }
        command => {
            let runtime = match GovernanceRuntime::new(config) {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "runtime initialization failed");
                    return match e.error_code() {
                        "LOCK_TIMEOUT" => EXIT_UNAVAILABLE,
                        _ => EXIT_SOFTWARE,
                    };
                }
            };

            match command {
                Commands::Serve => serve(runtime).await,
                Commands::Call { tool, args } => {
                    let args: Value = match serde_json::from_str(&args) {
                        Ok(args) => args,
                        Err(e) => {
                            eprintln!("--args is not valid JSON: {e}");
                            return EXIT_USAGE;
                        }
                    };
                    let response = runtime.dispatch(&tool, args).await;
                    println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
                    let _ = runtime.shutdown();
                    if response.get("success").and_then(Value::as_bool) == Some(true) {
                        EXIT_OK
                    } else {
                        exit_for_code(response.get("error_code").and_then(Value::as_str))
                    }
                }
                Commands::CleanupLocks => {
                    let response = runtime.dispatch("cleanup_stale_locks", json!({})).await;
                    println!("{response}");
                    EXIT_OK
                }
                Commands::Info => {
                    let response = runtime.dispatch("get_server_info", json!({})).await;
                    println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
                    EXIT_OK
                }
                Commands::Tools => unreachable!("handled above"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    ExitCode::from(run().await)
}
