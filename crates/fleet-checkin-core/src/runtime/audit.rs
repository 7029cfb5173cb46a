// crates/fleet-checkin-core/src/runtime/audit.rs
// ============================================================================
// Module: Fleet Check-in Audit Sinks
// Description: JSON-lines sinks for store audit events.
// Purpose: Route store audit events to stderr, a file, or nowhere.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! Each event is serialized as one JSON object per line. Sink failures are
//! swallowed so audit output never fails a store write.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::core::StoreAuditEvent;
use crate::interfaces::StoreAuditSink;

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink that logs JSON lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrAuditSink;

impl StoreAuditSink for StderrAuditSink {
    fn record(&self, event: &StoreAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
#[derive(Debug)]
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl StoreAuditSink for FileAuditSink {
    fn record(&self, event: &StoreAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Audit sink that discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl StoreAuditSink for NoopAuditSink {
    fn record(&self, _event: &StoreAuditEvent) {}
}

/// Audit sink that keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<StoreAuditEvent>>,
}

impl MemoryAuditSink {
    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<StoreAuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl StoreAuditSink for MemoryAuditSink {
    fn record(&self, event: &StoreAuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
