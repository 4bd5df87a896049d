//! Telemetry and logging infrastructure
//!
//! - Console logging (human-readable, verbose mode only)
//! - JSON file logging, rotated daily
//! - OpenTelemetry export when an OTLP endpoint is configured
//! - SQLite action journal: every run and every recorded action

use crate::agent::Action;
use crate::config::TelemetryConfig;
use chrono::Utc;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub const JOURNAL_FILE: &str = "journal.db";
const SERVICE_NAME: &str = "mesh-agent";

/// SQLite-backed run/action journal
struct JournalDb {
    conn: Connection,
}

impl JournalDb {
    fn open(path: &Path) -> anyhow::Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                agent TEXT NOT NULL,
                model TEXT,
                task TEXT NOT NULL,
                depth INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT,
                rounds INTEGER,
                answer TEXT
            );

            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                agent TEXT NOT NULL,
                round INTEGER NOT NULL,
                kind TEXT NOT NULL,
                tool_kind TEXT,
                tool_name TEXT NOT NULL,
                params TEXT,
                description TEXT,
                started_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                result TEXT,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            );

            CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);
            CREATE INDEX IF NOT EXISTS idx_actions_run ON actions(run_id);
            CREATE INDEX IF NOT EXISTS idx_actions_tool ON actions(tool_name);
        "#,
        )?;
        Ok(Self { conn })
    }
}

/// Main telemetry handler
pub struct Telemetry {
    session_id: Uuid,
    db: Mutex<JournalDb>,
    db_path: Option<PathBuf>,
    _file_guard: Option<WorkerGuard>,
    _otel_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Install the global subscriber and open the journal.
    ///
    /// If a subscriber is already installed (tests, embedding), the existing
    /// one is kept and only the journal is opened.
    pub fn init(config: &TelemetryConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.log_dir)?;
        let verbose = config.verbose;

        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "mesh_agent.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

        let make_env_filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if verbose {
                    EnvFilter::new("debug,hyper=info,reqwest=info,h2=info,rustls=info,notify=info")
                } else {
                    EnvFilter::new("info,hyper=warn,reqwest=warn,h2=warn,rustls=warn,notify=warn")
                }
            })
        };

        let otel_provider = match config.otel_endpoint.as_deref() {
            Some(endpoint) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_endpoint(endpoint)
                    .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                    .build()?;
                let provider = SdkTracerProvider::builder()
                    .with_batch_exporter(exporter)
                    .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
                    .build();
                Some(provider)
            }
            None => None,
        };

        let otel_layer = otel_provider
            .as_ref()
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));
        let console_layer = verbose.then(|| fmt::layer().with_target(false).compact());

        tracing_subscriber::registry()
            .with(make_env_filter())
            .with(console_layer)
            .with(fmt::layer().json().with_writer(non_blocking))
            .with(otel_layer)
            .try_init()
            .ok();

        let mut telemetry = if config.journal {
            Self::journal_only(&config.log_dir)?
        } else {
            Self::in_memory()?
        };
        telemetry._file_guard = Some(file_guard);
        telemetry._otel_provider = otel_provider;

        tracing::info!(
            session_id = %telemetry.session_id,
            log_dir = %config.log_dir.display(),
            journal = config.journal,
            otel_enabled = config.otel_endpoint.is_some(),
            "Telemetry initialized"
        );
        Ok(telemetry)
    }

    /// Journal in `log_dir` without touching the global subscriber
    pub fn journal_only(log_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let db_path = log_dir.join(JOURNAL_FILE);
        Ok(Self {
            session_id: Uuid::new_v4(),
            db: Mutex::new(JournalDb::open(&db_path)?),
            db_path: Some(db_path),
            _file_guard: None,
            _otel_provider: None,
        })
    }

    /// Throwaway journal (for testing)
    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            session_id: Uuid::new_v4(),
            db: Mutex::new(JournalDb::with_connection(Connection::open_in_memory()?)?),
            db_path: None,
            _file_guard: None,
            _otel_provider: None,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn record_run_start(&self, run_id: Uuid, agent: &str, model: &str, task: &str, depth: usize) {
        let db = self.db.lock();
        let result = db.conn.execute(
            "INSERT INTO runs (id, session_id, agent, model, task, depth, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id.to_string(),
                self.session_id.to_string(),
                agent,
                model,
                task,
                depth as i64,
                Utc::now().to_rfc3339()
            ],
        );
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to journal run start");
        }
    }

    pub fn record_action(&self, run_id: Uuid, agent: &str, action: &Action) {
        let params_json = serde_json::to_string(&action.params).unwrap_or_default();
        let kind = serde_json::to_value(action.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let tool_kind = action
            .tool_kind
            .and_then(|k| serde_json::to_value(k).ok())
            .and_then(|v| v.as_str().map(str::to_string));

        let db = self.db.lock();
        let result = db.conn.execute(
            r#"INSERT INTO actions
               (id, run_id, agent, round, kind, tool_kind, tool_name, params, description,
                started_at, duration_ms, success, error, result)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
            params![
                action.id.to_string(),
                run_id.to_string(),
                agent,
                action.round as i64,
                kind,
                tool_kind,
                action.tool,
                params_json,
                action.description,
                action.started_at.to_rfc3339(),
                action.duration_ms as i64,
                action.success,
                action.error,
                action.result
            ],
        );
        if let Err(e) = result {
            tracing::error!(error = %e, tool = %action.tool, "Failed to journal action");
        }
    }

    pub fn record_run_end(&self, run_id: Uuid, status: &str, rounds: usize, answer: Option<&str>) {
        let db = self.db.lock();
        let result = db.conn.execute(
            "UPDATE runs SET finished_at = ?2, status = ?3, rounds = ?4, answer = ?5 WHERE id = ?1",
            params![
                run_id.to_string(),
                Utc::now().to_rfc3339(),
                status,
                rounds as i64,
                answer
            ],
        );
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to journal run end");
        }
    }

    /// Per-tool call counts and timings across the whole journal
    pub fn action_stats(&self) -> anyhow::Result<Vec<ToolStats>> {
        let db = self.db.lock();
        let mut stmt = db.conn.prepare(
            r#"
            SELECT tool_name,
                   COUNT(*) as call_count,
                   AVG(duration_ms) as avg_duration_ms,
                   SUM(CASE WHEN success THEN 1 ELSE 0 END) as success_count,
                   SUM(CASE WHEN success THEN 0 ELSE 1 END) as error_count
            FROM actions
            GROUP BY tool_name
            ORDER BY call_count DESC, tool_name
        "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ToolStats {
                tool_name: row.get(0)?,
                call_count: row.get::<_, i64>(1)? as u64,
                avg_duration_ms: row.get(2)?,
                success_count: row.get::<_, i64>(3)? as u64,
                error_count: row.get::<_, i64>(4)? as u64,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn recent_runs(&self, limit: usize) -> anyhow::Result<Vec<RunSummary>> {
        let db = self.db.lock();
        let mut stmt = db.conn.prepare(
            r#"
            SELECT r.id, r.agent, r.task, r.started_at, r.status, r.rounds,
                   COUNT(a.id) as action_count
            FROM runs r
            LEFT JOIN actions a ON r.id = a.run_id
            GROUP BY r.id
            ORDER BY r.started_at DESC
            LIMIT ?1
        "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok(RunSummary {
                id: row.get(0)?,
                agent: row.get(1)?,
                task: row.get(2)?,
                started_at: row.get(3)?,
                status: row.get(4)?,
                rounds: row.get::<_, Option<i64>>(5)?.map(|r| r as u64),
                action_count: row.get::<_, i64>(6)? as u64,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub call_count: u64,
    pub avg_duration_ms: Option<f64>,
    pub success_count: u64,
    pub error_count: u64,
}

impl std::fmt::Display for ToolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<24} calls: {:>5}  ok: {:>5}  failed: {:>5}  avg: {:.0}ms",
            self.tool_name,
            self.call_count,
            self.success_count,
            self.error_count,
            self.avg_duration_ms.unwrap_or(0.0)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub agent: String,
    pub task: String,
    pub started_at: String,
    pub status: Option<String>,
    pub rounds: Option<u64>,
    pub action_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ActionKind;
    use crate::tool::ToolKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn action(tool: &str, success: bool) -> Action {
        let now = Utc::now();
        Action {
            id: Uuid::new_v4(),
            round: 1,
            kind: ActionKind::ToolCall,
            tool_kind: Some(ToolKind::Builtin),
            tool: tool.into(),
            params: json!({"a": 1}),
            description: tool.into(),
            started_at: now,
            finished_at: now,
            duration_ms: 4,
            success,
            error: (!success).then(|| "boom".to_string()),
            result: String::new(),
        }
    }

    #[test]
    fn test_journal_aggregates_per_tool() {
        let telemetry = Telemetry::in_memory().unwrap();
        let run = Uuid::new_v4();
        telemetry.record_run_start(run, "calc", "scripted", "add", 0);
        telemetry.record_action(run, "calc", &action("add", true));
        telemetry.record_action(run, "calc", &action("add", false));
        telemetry.record_action(run, "calc", &action("echo", true));
        telemetry.record_run_end(run, "completed", 3, Some("4"));

        let stats = telemetry.action_stats().unwrap();
        assert_eq!(stats[0].tool_name, "add");
        assert_eq!(stats[0].call_count, 2);
        assert_eq!(stats[0].error_count, 1);
        assert_eq!(stats[1].tool_name, "echo");

        let runs = telemetry.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status.as_deref(), Some("completed"));
        assert_eq!(runs[0].action_count, 3);
    }

    #[test]
    fn test_journal_persists_to_log_dir() {
        let temp = TempDir::new().unwrap();
        let run = Uuid::new_v4();
        {
            let telemetry = Telemetry::journal_only(temp.path()).unwrap();
            telemetry.record_run_start(run, "a", "m", "t", 0);
            telemetry.record_action(run, "a", &action("shell", true));
        }
        let reopened = Telemetry::journal_only(temp.path()).unwrap();
        assert!(temp.path().join(JOURNAL_FILE).exists());
        assert_eq!(reopened.action_stats().unwrap()[0].tool_name, "shell");
    }
}
