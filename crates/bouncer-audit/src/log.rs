//! Audit sinks and the fan-out log.

use std::sync::RwLock;

use crate::entry::AuditEntry;

/// Destination for audit entries.
///
/// Sinks must not fail loudly: recording problems are their own to log.
pub trait AuditSink: Send + Sync {
    /// Record one entry.
    fn record(&self, entry: &AuditEntry);
}

/// Sink that emits structured tracing events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            target: "bouncer::audit",
            request_id = %entry.request_id,
            kind = %entry.kind,
            decision = %entry.decision_type,
            source = %entry.source,
            account = %entry.account_id,
            score = entry.score,
            latency_ms = entry.latency_ms,
            reasons = ?entry.reasons,
            "decision"
        );
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemorySink {
    fn record(&self, entry: &AuditEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push(entry.clone());
        } else {
            tracing::warn!("audit sink lock poisoned, dropping entry");
        }
    }
}

/// Fan-out over any number of sinks.
#[derive(Default)]
pub struct AuditLog {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl AuditLog {
    /// An audit log with no sinks (drops everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Record an entry on every sink.
    pub fn record(&self, entry: &AuditEntry) {
        for sink in &self.sinks {
            sink.record(entry);
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
