use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

pub type RunId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunLevel {
    Info,
    Warn,
    Error,
}

/// One timestamped log entry in a run's backlog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Position in the backlog; assigned by the run registry on append.
    #[serde(default)]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: RunLevel,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl RunEvent {
    pub fn new(level: RunLevel, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(RunLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(RunLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(RunLevel::Error, message)
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.data.extend(fields);
        self
    }

    /// Attach `exception: {type, message}` describing `err`.
    pub fn with_exception<E: std::error::Error>(self, err: &E) -> Self {
        self.with_data(
            "exception",
            json!({ "type": short_type_name::<E>(), "message": err.to_string() }),
        )
    }
}

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Destination for run events; implemented by the run registry.
pub trait EventSink: Send + Sync {
    fn append(&self, run_id: RunId, event: RunEvent);
}

/// Handle a node uses to report progress into its run
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    node_id: Option<NodeId>,
    sink: Option<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, sink: Arc<dyn EventSink>) -> Self {
        Self {
            run_id,
            node_id: None,
            sink: Some(sink),
        }
    }

    /// An emitter that only traces; used outside of tracked runs.
    pub fn disabled() -> Self {
        Self {
            run_id: Uuid::nil(),
            node_id: None,
            sink: None,
        }
    }

    /// Same run, tagging every event with `node_id`.
    pub fn for_node(&self, node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            ..self.clone()
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn emit(&self, mut event: RunEvent) {
        if let Some(node_id) = self.node_id {
            event.data.entry("node_id").or_insert(json!(node_id));
        }
        tracing::debug!(run_id = %self.run_id, level = ?event.level, "{}", event.message);
        if let Some(sink) = &self.sink {
            sink.append(self.run_id, event);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(RunEvent::info(message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(RunEvent::warn(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(RunEvent::error(message));
    }
}
