use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::rule::RuleKind;

/// Hard cap on the joined caller-packages field.
pub const LOG_PACKAGES_MAX_LENGTH: usize = 150;
/// Once the joined field reaches this length it is considered good enough
/// and packing stops at the next package that does not fit.
pub const LOG_PACKAGES_SUFFICIENT_LENGTH: usize = 125;

/// One logged intent match.
///
/// The component is the caller-supplied one when the intent carries it,
/// otherwise the resolved target; callers reading the audit trail care
/// about what was asked for, not what resolution produced.
#[derive(Debug, Clone, Serialize)]
pub struct IntentAuditRecord {
    pub kind: RuleKind,
    pub short_component: Option<String>,
    pub caller_uid: u32,
    pub caller_package_count: usize,
    pub caller_packages: Option<String>,
    pub action: Option<String>,
    pub resolved_type: Option<String>,
    pub data: Option<String>,
    pub flags: u32,
}

/// Write-only destination for audit events. Implementations must tolerate
/// being called from dispatch threads holding the host's lock: no blocking
/// beyond what the sink itself promises.
pub trait AuditSink: Send + Sync {
    fn intent_matched(&self, record: &IntentAuditRecord);

    fn package_query(&self, target_uid: u32, target_package: &str, caller_uid: u32, user_id: u32);
}

/// Default sink: structured tracing events, nothing persisted.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn intent_matched(&self, record: &IntentAuditRecord) {
        tracing::info!(
            kind = record.kind.tag(),
            component = record.short_component.as_deref().unwrap_or(""),
            caller_uid = record.caller_uid,
            caller_package_count = record.caller_package_count,
            caller_packages = record.caller_packages.as_deref().unwrap_or(""),
            action = record.action.as_deref().unwrap_or(""),
            resolved_type = record.resolved_type.as_deref().unwrap_or(""),
            data = record.data.as_deref().unwrap_or(""),
            flags = record.flags,
            "intent firewall match"
        );
    }

    fn package_query(&self, target_uid: u32, target_package: &str, caller_uid: u32, user_id: u32) {
        tracing::debug!(
            target_uid,
            target_package,
            caller_uid,
            user_id,
            "package query matched firewall rule"
        );
    }
}

/// Join caller package names with commas under the length cap.
///
/// Only whole package names are packed. A package that does not fit is
/// skipped, unless the buffer has already reached the sufficient length, in
/// which case packing stops. When not even the first package fits on its
/// own, the tail of the first package is emitted with a trailing `-` to
/// mark the truncation (the tail of a package name is the distinctive
/// part). Empty input yields `None`.
pub fn join_packages(packages: &[String]) -> Option<String> {
    let mut joined = String::new();
    let mut first = true;
    for package in packages {
        let separator = usize::from(!first);
        if joined.len() + package.len() + separator < LOG_PACKAGES_MAX_LENGTH {
            if !first {
                joined.push(',');
            }
            first = false;
            joined.push_str(package);
        } else if joined.len() >= LOG_PACKAGES_SUFFICIENT_LENGTH {
            return Some(joined);
        }
    }
    if joined.is_empty() {
        let package = packages.first()?;
        let mut start = package.len().saturating_sub(LOG_PACKAGES_MAX_LENGTH - 1);
        while !package.is_char_boundary(start) {
            start += 1;
        }
        let mut truncated = package[start..].to_string();
        truncated.push('-');
        return Some(truncated);
    }
    Some(joined)
}

// ---------------------------------------------------------------------------
// SQLite sink
// ---------------------------------------------------------------------------

/// A stored audit row, as read back by `recent`.
#[derive(Debug, Clone)]
pub struct StoredAuditEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub short_component: Option<String>,
    pub caller_uid: u32,
    pub caller_packages: Option<String>,
    pub action: Option<String>,
    pub data: Option<String>,
}

/// Optional persistent sink for hosts that want an on-device audit trail.
///
/// Failures to record are logged and swallowed: audit is best-effort and
/// must never affect a dispatch in flight.
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create audit db directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open audit db: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS intent_audit (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp        TEXT    NOT NULL,
                kind             TEXT    NOT NULL,
                short_component  TEXT,
                caller_uid       INTEGER NOT NULL,
                caller_packages  TEXT,
                action           TEXT,
                resolved_type    TEXT,
                data             TEXT,
                flags            INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_intent_audit_timestamp ON intent_audit(timestamp);",
        )
        .context("failed to create audit table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Recent rows, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<StoredAuditEvent>> {
        let conn = self.conn.lock().expect("audit db lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, kind, short_component, caller_uid, caller_packages, action, data
             FROM intent_audit ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let timestamp_str: String = row.get(1)?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            Ok(StoredAuditEvent {
                id: row.get(0)?,
                timestamp,
                kind: row.get(2)?,
                short_component: row.get(3)?,
                caller_uid: row.get::<_, i64>(4)? as u32,
                caller_packages: row.get(5)?,
                action: row.get(6)?,
                data: row.get(7)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row.context("failed to read audit row")?);
        }
        Ok(events)
    }
}

impl AuditSink for SqliteAuditSink {
    fn intent_matched(&self, record: &IntentAuditRecord) {
        let conn = self.conn.lock().expect("audit db lock poisoned");
        let result = conn.execute(
            "INSERT INTO intent_audit
                (timestamp, kind, short_component, caller_uid, caller_packages,
                 action, resolved_type, data, flags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Utc::now().to_rfc3339(),
                record.kind.tag(),
                record.short_component,
                record.caller_uid as i64,
                record.caller_packages,
                record.action,
                record.resolved_type,
                record.data,
                record.flags as i64,
            ],
        );
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to record intent audit event");
        }
    }

    fn package_query(&self, target_uid: u32, target_package: &str, caller_uid: u32, user_id: u32) {
        // Package queries stay in the operational log; they are far too
        // frequent for durable storage.
        tracing::debug!(
            target_uid,
            target_package,
            caller_uid,
            user_id,
            "package query matched firewall rule"
        );
    }
}
