use super::RunRegistry;
use dagcore::{EventEmitter, RunEvent, RunId};
use serde_json::Value;
use std::sync::Arc;

/// Writes events for one run into the registry.
#[derive(Clone)]
pub struct RunLogger {
    registry: Arc<RunRegistry>,
    run_id: RunId,
}

impl RunLogger {
    pub fn new(registry: Arc<RunRegistry>, run_id: RunId) -> Self {
        Self { registry, run_id }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn log(&self, event: RunEvent) {
        self.registry.append(self.run_id, event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(RunEvent::info(message));
    }

    pub fn info_with(&self, message: impl Into<String>, key: &str, value: impl Into<Value>) {
        self.log(RunEvent::info(message).with_data(key, value));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(RunEvent::warn(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(RunEvent::error(message));
    }

    /// Error event carrying `exception: {type, message}` for `err`.
    pub fn error_with<E: std::error::Error>(&self, message: impl Into<String>, err: &E) {
        self.log(RunEvent::error(message).with_exception(err));
    }

    pub fn finish(&self) {
        self.registry.finish(self.run_id);
    }

    /// Emitter handed to node services running inside this run.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter::new(self.run_id, self.registry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagcore::{ExecutionError, RunLevel};
    use std::time::Duration;

    #[test]
    fn writes_levels_and_exception() {
        let registry = Arc::new(RunRegistry::new(Duration::from_secs(60), 8));
        let run = registry.create("workflow");
        let logger = RunLogger::new(registry.clone(), run.run_id);

        logger.info("starting");
        logger.warn("slow");
        logger.error_with("node failed", &ExecutionError::Timeout { ms: 5 });
        logger.emitter().for_node(9).info("from node");
        logger.finish();

        let state = registry.get(run.run_id).unwrap();
        let levels: Vec<RunLevel> = state.events.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![RunLevel::Info, RunLevel::Warn, RunLevel::Error, RunLevel::Info]);
        assert_eq!(state.events[2].data["exception"]["type"], "ExecutionError");
        assert_eq!(state.events[2].data["exception"]["message"], "Timeout after 5ms");
        assert_eq!(state.events[3].data["node_id"], 9);
        assert!(state.is_finished());
    }
}
