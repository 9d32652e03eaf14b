use std::path::PathBuf;

use crate::runtime::DriverState;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open core library {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("core is missing required symbols: {}", .0.join(", "))]
    MissingSymbols(Vec<&'static str>),
    #[error("core reports API version {found}, expected {expected}")]
    ApiVersion { found: u32, expected: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("cannot {op} while driver is {state:?}")]
    InvalidState { op: &'static str, state: DriverState },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("failed to read content {path}: {source}")]
    Content {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("core rejected content {0}")]
    GameRejected(PathBuf),
    #[error("content path contains an interior NUL byte: {0}")]
    InvalidPath(PathBuf),
    #[error("core failed to {0}")]
    CoreCall(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
