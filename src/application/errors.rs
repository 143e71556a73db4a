//! Application layer errors

use thiserror::Error;

/// Errors surfaced by the orchestration core to its caller.
///
/// Graph errors (`MissingDependency`, `CircularDependency`) abort loading of the whole module
/// set. `ModuleLoad` is isolated to a single module and callers are expected to skip it.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Module '{module_id}' depends on missing module '{missing_dependency}'")]
    MissingDependency {
        module_id: String,
        missing_dependency: String,
    },

    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Failed to load module '{module_id}': {cause}")]
    ModuleLoad { module_id: String, cause: String },

    #[error("Module '{module_id}' requires modules that are not loaded: {}", missing.join(", "))]
    DependencyNotLoaded {
        module_id: String,
        missing: Vec<String>,
    },

    #[error("Module not loaded: {0}")]
    NotLoaded(String),

    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Core module '{0}' cannot be disabled")]
    CoreModule(String),
}

impl OrchestratorError {
    pub fn load(module_id: impl Into<String>, cause: impl ToString) -> Self {
        OrchestratorError::ModuleLoad {
            module_id: module_id.into(),
            cause: cause.to_string(),
        }
    }

    /// Graph errors make a load order impossible to compute
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::MissingDependency { .. } | OrchestratorError::CircularDependency { .. }
        )
    }
}

/// Failure reported by a command, event, bus or cron handler
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Cron error: {0}")]
    Cron(#[from] CronError),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Errors returned by the host platform adapter
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Interaction already acknowledged")]
    AlreadyAcknowledged,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rejected by platform: {0}")]
    Rejected(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Errors from the cron job table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = OrchestratorError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
        assert!(err.is_graph_error());
        assert!(!OrchestratorError::load("a", "boom").is_graph_error());
    }
}
