//! Risk evaluation CLI
//!
//! Reads `RiskEvaluationRequest` JSON lines from stdin and writes one
//! `RiskAssessment` JSON line per request to stdout. Logs go to stderr.
//! Lookups older than the longest extractor window are pruned from the
//! in-memory history as requests stream through.

use anyhow::Context;
use bin_risk_engine::store::{
    AuditStore, JsonlAuditStore, LookupEvent, MemoryAuditStore, MemoryEventStore,
    MemoryPatternRepository, MemorySessionController, PatternRepository, TomlPatternRepository,
};
use bin_risk_engine::{EngineConfig, RiskEngine, RiskEvaluationRequest};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "risk-eval")]
#[command(version, about = "Score BIN lookup requests read as JSON lines from stdin", long_about = None)]
struct Args {
    /// Engine configuration file (TOML); defaults plus environment overrides otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Append detection records and actions to this JSONL file
    #[arg(short, long)]
    audit: Option<PathBuf>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("RISK_ENGINE_LOG_JSON").map(|v| v == "1").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::from_env().context("failed to load config from environment")?,
    };

    let patterns: Arc<dyn PatternRepository> = match &config.patterns.pattern_file {
        Some(path) => {
            info!(path = %path.display(), "Loading patterns from file");
            Arc::new(TomlPatternRepository::new(path))
        }
        None => Arc::new(MemoryPatternRepository::with_defaults()),
    };

    let audit: Arc<dyn AuditStore> = match &args.audit {
        Some(path) => Arc::new(JsonlAuditStore::new(path)),
        None => Arc::new(MemoryAuditStore::new()),
    };

    let retention = config.extraction.retention();
    let events = Arc::new(MemoryEventStore::new());
    let engine = RiskEngine::new(
        config,
        events.clone(),
        patterns,
        Arc::new(MemorySessionController::new()),
        audit,
    )?;

    info!("Risk engine ready, reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut evaluated = 0usize;
    let mut newest: Option<DateTime<Utc>> = None;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: RiskEvaluationRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Skipping malformed request");
                continue;
            }
        };

        let event = LookupEvent {
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            ip: request.ip.clone(),
            country: request.country.trim().to_uppercase(),
            bin: request.bin.clone(),
            timestamp: request.timestamp,
        };

        let assessment = engine.evaluate(request).await;

        // Logged after evaluation so a lookup never counts against itself
        let at = event.timestamp;
        events.record(event);
        evaluated += 1;

        if newest.map_or(true, |newest| at > newest) {
            newest = Some(at);
            let pruned = events.prune_before(at - retention);
            if pruned > 0 {
                debug!(pruned, retained = events.len(), "Pruned expired lookups");
            }
        }

        let mut out = serde_json::to_vec(&assessment)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    info!(evaluated, "Input exhausted, shutting down");
    info!(metrics = %engine.metrics().gather_text()?, "Final metrics");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parses_config_and_audit_paths() {
        let args =
            Args::try_parse_from(["risk-eval", "--config", "engine.toml", "-a", "audit.jsonl"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("engine.toml")));
        assert_eq!(args.audit, Some(PathBuf::from("audit.jsonl")));

        let args = Args::try_parse_from(["risk-eval"]).unwrap();
        assert!(args.config.is_none() && args.audit.is_none());
    }

    #[test]
    fn test_rejects_unknown_flag() {
        assert!(Args::try_parse_from(["risk-eval", "--verbose"]).is_err());
    }
}
