use booksync_core::{FrameError, SessionError};
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("invalid slot path: {0}")]
    Frame(#[from] FrameError),
    #[error("expected PATH=VALUE, got '{0}'")]
    InvalidAssignment(String),
    #[error("counter '{name}' unavailable: {reason}")]
    Counter { name: String, reason: String },
    #[error("failed to encode json: {0}")]
    Json(#[from] serde_json::Error),
}
