//! Lifecycle contract for background engines hosted by the daemon.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Start/stop lifecycle plus a health probe. `start` and `stop` are
/// idempotence-checked: starting a running engine or stopping a stopped one
/// is an error.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) -> EngineResult<()>;
    fn stop(&self) -> EngineResult<()>;
    fn health(&self) -> EngineHealth;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Ready,
    Degraded,
    Failed,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl EngineHealth {
    pub fn new(status: HealthStatus, detail: Option<String>) -> Self {
        Self { status, detail }
    }
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Stopped,
            detail: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error("engine encountered an error: {source}")]
    Failure {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
