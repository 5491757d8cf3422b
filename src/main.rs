//! `nextaction` command-line entry point.
//!
//! Opens the queue database (and the signal snapshots stored alongside it),
//! runs one command and prints the result as JSON on stdout. Logs go to
//! stderr, filtered by `RUST_LOG` (default `info`); set
//! `NEXTACTION_LOG_FORMAT=json` for structured log lines.
//!
//! Usage:
//!   nextaction evaluate <scope> <entityId> [scheduled]
//!   nextaction run <nextActionId> <actionKey> [actorId] [paramsJson]
//!   nextaction list <scope> <entityId> [queued|done|dismissed|all]
//!   nextaction summary <scope> <entityId>
//!   nextaction explain <nextActionId>
//!   nextaction suppress <scope> <entityId> <ruleKey> [days]
//!   nextaction actions

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use nextaction_lib::config::load_config;
use nextaction_lib::db::ActionDb;
use nextaction_lib::delivery::{default_registry, DeliveryRequest, DeliveryRunner, NoopServices};
use nextaction_lib::nba::{evaluate_and_upsert, explain_action, preferences, queue};
use nextaction_lib::signals::SnapshotSignalSource;
use nextaction_lib::types::{ActionStatus, RunMode, Scope, ScopeKind};

const USAGE: &str = "usage: nextaction <evaluate|run|list|summary|explain|suppress|actions> [args...]";

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_scope(kind: Option<&String>, entity_id: Option<&String>) -> anyhow::Result<Scope> {
    let kind = kind.ok_or_else(|| anyhow!("missing scope"))?;
    let kind = ScopeKind::parse(kind).ok_or_else(|| {
        anyhow!("unknown scope {kind}; expected command_center, review_stream or founder_growth")
    })?;
    let entity_id = entity_id.ok_or_else(|| anyhow!("missing entity id"))?;
    Ok(Scope::new(kind, entity_id.as_str()))
}

/// Human-readable logs on stderr, or one JSON object per line when
/// `NEXTACTION_LOG_FORMAT=json`.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match std::env::var("NEXTACTION_LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let config = load_config().map_err(|e| anyhow!("Failed to load config: {e}"))?;
    let db_path = match &config.db_path {
        Some(path) => path.clone(),
        None => ActionDb::default_path().map_err(|e| anyhow!("{e}"))?,
    };
    let db = ActionDb::open_at(db_path.clone())
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let source = SnapshotSignalSource::open(&db_path).map_err(|e| anyhow!("{e}"))?;
    let now = Utc::now();

    match command.as_str() {
        "evaluate" => {
            let scope = parse_scope(args.get(1), args.get(2))?;
            let mode = match args.get(3).map(String::as_str) {
                Some("scheduled") => RunMode::Scheduled,
                _ => RunMode::Manual,
            };
            let report = evaluate_and_upsert(&db, &source, &scope, mode, &config, now).await?;
            print_json(&report)
        }
        "run" => {
            let id = args.get(1).ok_or_else(|| anyhow!("missing next action id"))?;
            let key = args.get(2).ok_or_else(|| anyhow!("missing action key"))?;
            let mut request = DeliveryRequest::new(id.as_str(), key.as_str());
            if let Some(actor) = args.get(3) {
                request = request.with_actor(actor.as_str());
            }
            if let Some(raw) = args.get(4) {
                request = request.with_params(serde_json::from_str(raw).context("params must be JSON")?);
            }
            let registry = default_registry();
            let runner = DeliveryRunner {
                db: &db,
                source: &source,
                services: &NoopServices,
                registry: &registry,
                config: &config,
            };
            let result = runner.run(&request).await;
            print_json(&result)?;
            if !result.ok {
                std::process::exit(1);
            }
            Ok(())
        }
        "list" => {
            let scope = parse_scope(args.get(1), args.get(2))?;
            let rows = match args.get(3).map(String::as_str) {
                None => queue::list_active(&db, &scope, now)?,
                Some("all") => queue::list_by_status(&db, &scope, None)?,
                Some(raw) => {
                    let Some(status) = ActionStatus::parse(raw) else {
                        bail!("unknown status {raw}; expected queued, done, dismissed or all");
                    };
                    queue::list_by_status(&db, &scope, Some(status))?
                }
            };
            print_json(&rows)
        }
        "summary" => {
            let scope = parse_scope(args.get(1), args.get(2))?;
            print_json(&queue::summary(&db, &scope, now)?)
        }
        "explain" => {
            let id = args.get(1).ok_or_else(|| anyhow!("missing next action id"))?;
            print_json(&explain_action(&db, id, now)?)
        }
        "suppress" => {
            let scope = parse_scope(args.get(1), args.get(2))?;
            let rule = args.get(3).ok_or_else(|| anyhow!("missing rule key"))?;
            let days = match args.get(4) {
                Some(raw) => raw.parse().context("days must be a number")?,
                None => config.suppression_days,
            };
            let id = preferences::suppress_rule(&db, &scope, rule, days, "suppressed from cli", now)?;
            print_json(&serde_json::json!({ "preferenceId": id }))
        }
        "actions" => print_json(&default_registry().describe()),
        other => bail!("unknown command {other}\n{USAGE}"),
    }
}
