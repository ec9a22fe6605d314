use std::sync::Arc;

use anyhow::Result;
use shared::domain::{Sequence, SequenceId};
use tracing::warn;

use crate::{
    catalog::{Catalog, CatalogLoader},
    editor::SequenceEditor,
    error::EditorError,
    Collaborators,
};

/// The instructor's list of sequences and the entry point for editing them.
pub struct SequenceBrowser {
    collaborators: Collaborators,
    loader: CatalogLoader,
    catalog: Option<Arc<Catalog>>,
    sequences: Vec<Sequence>,
}

impl SequenceBrowser {
    pub fn new(collaborators: Collaborators) -> Self {
        let loader = CatalogLoader::new(collaborators.documents.clone());
        Self {
            collaborators,
            loader,
            catalog: None,
            sequences: Vec::new(),
        }
    }

    /// Re-reads the sequence list, in creation order.
    pub async fn refresh(&mut self) -> Result<&[Sequence]> {
        let user_id = self.collaborators.auth.current_user().await?;
        self.sequences = self.collaborators.documents.list_sequences(user_id).await?;
        Ok(&self.sequences)
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn catalog(&self) -> Option<&Arc<Catalog>> {
        self.catalog.as_ref()
    }

    /// Loads the catalog snapshot once and shares it with later sessions.
    pub async fn load_catalog(&mut self) -> Result<Arc<Catalog>> {
        if let Some(catalog) = &self.catalog {
            return Ok(catalog.clone());
        }
        let user_id = self.collaborators.auth.current_user().await?;
        let catalog = Arc::new(self.loader.load(user_id).await?);
        self.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    /// Drops the cached snapshot so the next session sees catalog changes.
    pub fn invalidate_catalog(&mut self) {
        self.catalog = None;
    }

    pub async fn open_new(&mut self) -> Result<SequenceEditor, EditorError> {
        self.open(None).await
    }

    pub async fn open_existing(
        &mut self,
        sequence_id: SequenceId,
    ) -> Result<SequenceEditor, EditorError> {
        self.open(Some(sequence_id)).await
    }

    async fn open(&mut self, existing: Option<SequenceId>) -> Result<SequenceEditor, EditorError> {
        let catalog = match self.load_catalog().await {
            Ok(catalog) => Some(catalog),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "catalog unavailable; editor stays load-pending");
                None
            }
        };
        let mut editor = SequenceEditor::new(
            self.collaborators.auth.clone(),
            self.collaborators.documents.clone(),
        );
        editor.initialize(existing, catalog).await?;
        Ok(editor)
    }
}

#[cfg(test)]
#[path = "tests/browser_tests.rs"]
mod tests;
