use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// One durable audit entry: who did what, from where, and whether it
/// succeeded. Written exactly once per audited request, after the handler
/// finishes; never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub user_id: u64,
    pub username: String,
    pub nickname: String,
    pub path: String,
    pub route: String,
    pub method: String,
    pub ip: String,
    pub body: String,
    pub success: bool,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

/// Destination for audit records. The real implementation wraps the durable
/// append-only log writer this crate treats as external.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;
}

/// Sink that emits structured audit events to the operational log.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        info!(
            target: "audit",
            user_id = record.user_id,
            username = %record.username,
            route = %record.route,
            method = %record.method,
            path = %record.path,
            ip = %record.ip,
            success = record.success,
            description = %record.description,
            "operation"
        );
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        self.records.lock().expect("audit lock poisoned").push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool) -> AuditRecord {
        AuditRecord {
            user_id: 2,
            username: "alice".to_string(),
            nickname: "Alice".to_string(),
            path: "/admin/logout".to_string(),
            route: "auth:logout".to_string(),
            method: "POST".to_string(),
            ip: "10.0.0.1".to_string(),
            body: String::new(),
            success,
            description: "logout".to_string(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_collects_records() {
        let sink = MemoryAuditSink::new();
        sink.append(record(true)).await.unwrap();
        sink.append(record(false)).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert!(!records[1].success);
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        let sink = TracingAuditSink::new();
        assert!(sink.append(record(true)).await.is_ok());
    }
}
