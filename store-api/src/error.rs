use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which store primitive failed. `subscribe` is infallible and has no
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Set,
    Update,
    Push,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Get => "get",
            StoreOp::Set => "set",
            StoreOp::Update => "update",
            StoreOp::Push => "push",
        }
    }
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors are cloneable so fault plans and tests can hand copies around;
/// underlying io errors are carried as rendered detail strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable during {op} at '{path}'")]
    Unavailable { op: StoreOp, path: String },
    #[error("corrupt record at '{path}': {detail}")]
    Corrupt { path: String, detail: String },
    #[error("io error at '{path}': {detail}")]
    Io { path: String, detail: String },
}

impl StoreError {
    pub fn unavailable(op: StoreOp, path: impl std::fmt::Display) -> Self {
        StoreError::Unavailable {
            op,
            path: path.to_string(),
        }
    }

    pub fn corrupt(path: impl std::fmt::Display, detail: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.to_string(),
            detail: detail.into(),
        }
    }

    pub fn io(path: impl std::fmt::Display, err: &std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_string(),
            detail: err.to_string(),
        }
    }

    /// Transient failures may be retried; corruption and io failures are
    /// surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}
