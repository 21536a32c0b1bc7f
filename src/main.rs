use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use logwarden::compress::{self, CompressionRequest, CompressionStats, Rate, DEFAULT_ANALYSIS_PROMPT};
use logwarden::detect::{AiStatus, DetectionResult, Detector, LogBatch, ThreatLevel};
use logwarden::Config;

#[derive(Parser)]
#[command(
    name = "logwarden",
    about = "Security log anomaly detection with optional AI augmentation",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $LOGWARDEN_CONFIG, then /etc/logwarden/logwarden.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Detect anomalies in a log file
    Detect {
        /// Log file, or "-" for stdin
        #[arg(long, short, default_value = "-")]
        file: String,

        /// Pre-compressed text to send to the AI backend instead of the raw logs
        #[arg(long)]
        compressed: Option<PathBuf>,

        /// Enable AI augmentation (needs ai.api_key or OPENAI_API_KEY)
        #[arg(long)]
        ai: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Exit with status 2 when the overall verdict is at or above this level
        #[arg(long, value_parser = parse_level)]
        fail_on: Option<ThreatLevel>,
    },

    /// Compress a log file and print token statistics
    Compress {
        /// Log file, or "-" for stdin
        #[arg(long, short, default_value = "-")]
        file: String,

        /// Analysis prompt passed to the compression backend
        #[arg(long, default_value = DEFAULT_ANALYSIS_PROMPT)]
        prompt: String,

        /// Target model (overrides compression.target_model)
        #[arg(long)]
        target_model: Option<String>,

        /// Compression rate: "auto" or 0.0-1.0 (overrides compression.rate)
        #[arg(long)]
        rate: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Compress, then detect, and print a combined report
    Analyze {
        /// Log file, or "-" for stdin
        #[arg(long, short, default_value = "-")]
        file: String,

        /// Skip the compression step
        #[arg(long)]
        no_compression: bool,

        /// Enable AI augmentation
        #[arg(long)]
        ai: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn parse_level(raw: &str) -> Result<ThreatLevel, String> {
    ThreatLevel::parse_loose(raw)
        .ok_or_else(|| format!("unknown threat level {raw:?} (CRITICAL, HIGH, MEDIUM, LOW, INFO)"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting logwarden daemon");
            logwarden::serve(config).await?;
        }
        Commands::Detect {
            file,
            compressed,
            ai,
            json,
            fail_on,
        } => {
            let batch = read_batch(&file)?;
            let compressed = match compressed {
                Some(path) => Some(read_batch(&path.to_string_lossy())?),
                None => None,
            };

            let detector = Detector::from_config(&config);
            let result = detector
                .detect(
                    batch.as_str(),
                    compressed.as_ref().map(LogBatch::as_str),
                    ai,
                )
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_report(&result);
            }

            if let Some(level) = fail_on {
                if result.overall_threat_level >= level {
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Commands::Compress {
            file,
            prompt,
            target_model,
            rate,
            json,
        } => {
            let batch = read_batch(&file)?;
            let target_model = target_model.unwrap_or_else(|| config.compression.target_model.clone());
            let rate = Rate::parse(rate.as_deref().unwrap_or(&config.compression.rate))?;
            let compressor = compress::from_config(&config.compression);

            let result = compressor
                .compress(&CompressionRequest {
                    logs: batch.as_str(),
                    prompt: &prompt,
                    target_model: &target_model,
                    rate,
                })
                .await?;
            let stats = CompressionStats::from_result(&result, &target_model);

            if json {
                let out = serde_json::json!({
                    "compressed_content": result.content,
                    "stats": stats,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", result.content);
                eprintln!();
                print_stats(&stats);
            }
        }
        Commands::Analyze {
            file,
            no_compression,
            ai,
            json,
        } => {
            let batch = read_batch(&file)?;
            let target_model = config.compression.target_model.clone();

            let mut compressed = None;
            let mut stats = None;
            if !no_compression && !batch.is_blank() {
                let compressor = compress::from_config(&config.compression);
                let result = compressor
                    .compress(&CompressionRequest {
                        logs: batch.as_str(),
                        prompt: "Analyze for security threats and anomalies",
                        target_model: &target_model,
                        rate: Rate::parse(&config.compression.rate)?,
                    })
                    .await?;
                stats = Some(CompressionStats::from_result(&result, &target_model));
                compressed = Some(result.content);
            }

            let detector = Detector::from_config(&config);
            let result = detector
                .detect(batch.as_str(), compressed.as_deref(), ai)
                .await?;

            if json {
                let out = serde_json::json!({
                    "compression": stats,
                    "detection": result,
                    "threat_summary": result.summary(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                if let Some(stats) = &stats {
                    print_stats(stats);
                }
                print_report(&result);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_batch(source: &str) -> Result<LogBatch> {
    let bytes = if source == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read logs from stdin")?;
        buf
    } else {
        let path = Path::new(source);
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    Ok(LogBatch::from_bytes(bytes)?)
}

fn print_report(result: &DetectionResult) {
    let summary = result.summary();
    println!("\n=== logwarden Detection Report ===");
    println!("Overall threat level: {}", result.overall_threat_level);
    println!(
        "Findings: {} (CRITICAL {}, HIGH {}, MEDIUM {}, LOW {}, INFO {})",
        result.findings.len(),
        summary.critical,
        summary.high,
        summary.medium,
        summary.low,
        summary.info
    );
    match &result.ai_augmentation {
        AiStatus::NotRequested => println!("AI augmentation: not requested"),
        AiStatus::Completed { accepted } => {
            println!("AI augmentation: completed ({} findings)", accepted)
        }
        AiStatus::Failed { reason } => {
            println!("AI augmentation: FAILED, rule-only results ({})", reason)
        }
    }

    for finding in &result.findings {
        println!(
            "\n[{}] {} ({:.0}%, {})",
            finding.severity,
            finding.kind,
            finding.confidence * 100.0,
            if finding.corroborated { "rule+ai" } else { source_label(finding) }
        );
        println!("    {}", finding.description);
        if !finding.affected_resources.is_empty() {
            println!("    Affected: {}", finding.affected_resources.join(", "));
        }
        println!("    -> Recommendation: {}", finding.recommendation);
    }
    println!("==================================\n");
}

fn source_label(finding: &logwarden::detect::Finding) -> &'static str {
    match finding.source {
        logwarden::detect::Provenance::Rule => "rule",
        logwarden::detect::Provenance::Ai => "ai",
    }
}

fn print_stats(stats: &CompressionStats) {
    eprintln!(
        "Compression: {} -> {} tokens ({:.1}% saved, ratio {:.2}, ~${:.6} saved on {}){}",
        stats.original_tokens,
        stats.compressed_tokens,
        stats.savings_percent,
        stats.compression_ratio,
        stats.estimated_cost_saved,
        stats.target_model,
        if stats.mock { " [mock]" } else { "" }
    );
}
