//! Per-node log buffer.
//!
//! Executors log synchronously; the engine drains the buffer after the node
//! returns and fans the records out to its `on_node_logging` hooks.  Every
//! record is also emitted as a `tracing` event.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use db::models::LogLevel;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct NodeLogger {
    node_id: String,
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl NodeLogger {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            records: Arc::default(),
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into(), Value::Null);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into(), Value::Null);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into(), Value::Null);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into(), Value::Null);
    }

    /// Log with structured data attached.
    pub fn with_data(&self, level: LogLevel, message: impl Into<String>, data: Value) {
        self.log(level, message.into(), data);
    }

    fn log(&self, level: LogLevel, message: String, data: Value) {
        let node_id = self.node_id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(node_id, "{message}"),
            LogLevel::Info => tracing::info!(node_id, "{message}"),
            LogLevel::Warn => tracing::warn!(node_id, "{message}"),
            LogLevel::Error => tracing::error!(node_id, "{message}"),
        }

        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogRecord {
                timestamp: Utc::now(),
                level,
                message,
                data,
            });
    }

    /// Take every buffered record.
    pub fn drain(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
