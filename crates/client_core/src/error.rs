use shared::domain::{ItemId, MediaKind};
use thiserror::Error;

use crate::editor::EditorPhase;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("persistence failed: {source:#}")]
    Persistence { source: anyhow::Error },
    #[error("index {index} is out of bounds for {len} entries")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("editor is {0}")]
    NotEditable(EditorPhase),
    #[error("a save or delete is already in progress")]
    Busy,
    #[error("sequence has never been saved")]
    NotPersisted,
}

impl EditorError {
    pub fn persistence(source: anyhow::Error) -> Self {
        Self::Persistence { source }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// A stored reference whose target is missing from the catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} '{item_id}' is no longer in the catalog")]
pub struct ResolutionError {
    pub kind: MediaKind,
    pub item_id: ItemId,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{kind} '{item_id}' not found")]
    NotFound { kind: MediaKind, item_id: ItemId },
    #[error("an upload is already in progress")]
    Busy,
    #[error("persistence failed: {source:#}")]
    Persistence { source: anyhow::Error },
}

impl LibraryError {
    pub fn persistence(source: anyhow::Error) -> Self {
        Self::Persistence { source }
    }
}
