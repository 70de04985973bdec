#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daily_feedback::cache::MemoryArtifactCache;
use daily_feedback::config::PipelineConfig;
use daily_feedback::gateway::{ChatGateway, ProviderGateway, TracingUsageSink};
use daily_feedback::report::{
    stream_run, JsonlTransport, NoopPersister, Orchestrator, PipelineRun, ProgressEmitter,
    Record, RunError, StageId, Tier,
};
use daily_feedback::schema;

#[derive(Parser)]
#[command(name = "feedback", version, about = "Daily journal feedback reports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the reports for one day; progress frames go to stdout as JSONL
    Run {
        /// JSON array of records ({id, type, content, createdAt})
        #[arg(long)]
        records: PathBuf,
        /// Day to report on (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        premium: bool,
        /// Opaque id attached to usage records
        #[arg(long)]
        user_id: Option<String>,
        /// JSON pipeline config; FEEDBACK_* env vars still apply on top
        #[arg(long, env = "FEEDBACK_CONFIG")]
        config: Option<PathBuf>,
        /// Also write the final report here
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the JSON schema a stage is generated against
    Schema {
        #[arg(long)]
        stage: String,
        #[arg(long)]
        premium: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries frames; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daily_feedback=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            records,
            date,
            premium,
            user_id,
            config,
            out,
        } => {
            let config = match config {
                Some(path) => PipelineConfig::from_json_file(path)?.with_env()?,
                None => PipelineConfig::from_env()?,
            };
            let records: Vec<Record> = read_json(&records)?;

            let gateway: Arc<dyn ChatGateway> =
                Arc::new(ProviderGateway::from_env(Arc::new(TracingUsageSink))?);
            let cache = Arc::new(MemoryArtifactCache::with_capacity(config.cache_capacity));
            let orchestrator = Orchestrator::from_config(&config, gateway, cache);

            let mut run = PipelineRun::for_date(&records, date, Tier::from_premium(premium));
            if let Some(user_id) = user_id {
                run = run.with_user(user_id);
            }
            info!(
                date = %date,
                records = run.records.len(),
                model = %config.model,
                "generating report"
            );

            let transport = Arc::new(JsonlTransport::new(tokio::io::stdout()));
            let emitter = ProgressEmitter::new(transport, config.transport_timeout());

            match stream_run(&orchestrator, run, &emitter, &NoopPersister).await {
                Ok(done) => {
                    if let Some(out) = out {
                        write_json(&out, &done.report)?;
                        info!(path = %out.display(), "report written");
                    }
                }
                Err(RunError::Pipeline(err)) => {
                    if let Some(retry_after) = err.retry_after() {
                        warn!(retry_after_secs = retry_after.as_secs(), "generation quota exceeded");
                    }
                    return Err(format!("{err} (status {})", err.status_code()).into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Schema { stage, premium } => {
            let stage = StageId::parse(&stage).ok_or_else(|| {
                let known: Vec<&str> = StageId::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown stage '{stage}' (expected one of {})", known.join(", "))
            })?;
            let contract = schema::resolve(stage, Tier::from_premium(premium));
            let body = serde_json::json!({
                "name": &contract.name,
                "strict": true,
                "schema": contract.to_json_schema(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
