use std::{fmt, sync::Arc};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use shared::domain::{CatalogItem, Sequence, SequenceDocument, SequenceEntryRef, SequenceId};
use tracing::{debug, info, warn};

use crate::{
    catalog::Catalog,
    entries::{reconcile, EntryList, SequenceEntry},
    error::{EditorError, ResolutionError},
    AuthService, DocumentStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorPhase {
    Uninitialized,
    /// Waiting for a catalog snapshot to resolve stored entries.
    Loading,
    Editing,
    Saving,
    Deleting,
    Closed,
}

impl fmt::Display for EditorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EditorPhase::Uninitialized => "uninitialized",
            EditorPhase::Loading => "loading",
            EditorPhase::Editing => "editing",
            EditorPhase::Saving => "saving",
            EditorPhase::Deleting => "deleting",
            EditorPhase::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub sequence: Sequence,
    /// `true` when this save created the document.
    pub created: bool,
}

/// One editing session over a single sequence.
///
/// Edits are local until `save`. A session ends in `Closed` after a
/// successful save or delete, or after `cancel`.
pub struct SequenceEditor {
    auth: Arc<dyn AuthService>,
    documents: Arc<dyn DocumentStore>,
    phase: EditorPhase,
    sequence_id: SequenceId,
    persisted: bool,
    created_at: Option<DateTime<Utc>>,
    name: String,
    description: String,
    entries: EntryList,
    catalog: Option<Arc<Catalog>>,
    pending_refs: Vec<SequenceEntryRef>,
    unresolved: Vec<ResolutionError>,
}

impl SequenceEditor {
    pub fn new(auth: Arc<dyn AuthService>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            auth,
            documents,
            phase: EditorPhase::Uninitialized,
            sequence_id: SequenceId::generate(),
            persisted: false,
            created_at: None,
            name: String::new(),
            description: String::new(),
            entries: EntryList::new(),
            catalog: None,
            pending_refs: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    /// Starts the session. With `existing`, the stored document is fetched
    /// and its entries are resolved once a catalog is available. Without a
    /// catalog the editor stays in `Loading` until `provide_catalog`.
    pub async fn initialize(
        &mut self,
        existing: Option<SequenceId>,
        catalog: Option<Arc<Catalog>>,
    ) -> Result<(), EditorError> {
        if self.phase != EditorPhase::Uninitialized {
            return Err(EditorError::NotEditable(self.phase));
        }

        if let Some(sequence_id) = existing {
            let user_id = self
                .auth
                .current_user()
                .await
                .map_err(EditorError::persistence)?;
            let document = self
                .documents
                .get_sequence(user_id, &sequence_id)
                .await
                .map_err(EditorError::persistence)?
                .ok_or_else(|| {
                    EditorError::persistence(anyhow!("sequence '{sequence_id}' not found"))
                })?;

            info!(
                sequence_id = %sequence_id,
                entries = document.sequence.len(),
                "opened existing sequence"
            );
            self.sequence_id = sequence_id;
            self.persisted = true;
            self.created_at = Some(document.created_at);
            self.name = document.name;
            self.description = document.description;
            self.pending_refs = document.sequence;
        } else {
            debug!(sequence_id = %self.sequence_id, "opened new sequence");
        }

        if catalog.is_some() {
            self.catalog = catalog;
        }
        self.phase = EditorPhase::Loading;
        self.finish_loading();
        Ok(())
    }

    /// Supplies the catalog snapshot for this session. Later snapshots are
    /// ignored; reopen the sequence to pick up catalog changes.
    pub fn provide_catalog(&mut self, catalog: Arc<Catalog>) {
        if self.catalog.is_some() {
            debug!(sequence_id = %self.sequence_id, "catalog already provided; ignoring");
            return;
        }
        self.catalog = Some(catalog);
        if self.phase == EditorPhase::Loading {
            self.finish_loading();
        }
    }

    fn finish_loading(&mut self) {
        if self.pending_refs.is_empty() {
            self.phase = EditorPhase::Editing;
            return;
        }
        let Some(catalog) = self.catalog.as_deref() else {
            return;
        };
        let reconciled = reconcile(&self.pending_refs, catalog);
        self.entries = reconciled.entries;
        self.unresolved = reconciled.unresolved;
        self.pending_refs.clear();
        self.phase = EditorPhase::Editing;
    }

    pub fn phase(&self) -> EditorPhase {
        self.phase
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, EditorPhase::Saving | EditorPhase::Deleting)
    }

    pub fn sequence_id(&self) -> &SequenceId {
        &self.sequence_id
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn entries(&self) -> &EntryList {
        &self.entries
    }

    pub fn catalog(&self) -> Option<&Arc<Catalog>> {
        self.catalog.as_ref()
    }

    /// References that did not resolve when the session was loaded.
    pub fn unresolved(&self) -> &[ResolutionError] {
        &self.unresolved
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), EditorError> {
        self.ensure_editing()?;
        self.name = name.into();
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<(), EditorError> {
        self.ensure_editing()?;
        self.description = description.into();
        Ok(())
    }

    /// Appends `item`; duplicates are allowed. Returns its index.
    pub fn add_entry(&mut self, item: CatalogItem) -> Result<usize, EditorError> {
        self.ensure_editing()?;
        Ok(self.entries.push(item))
    }

    pub fn remove_entry(&mut self, index: usize) -> Result<SequenceEntry, EditorError> {
        self.ensure_editing()?;
        self.entries.remove(index)
    }

    /// No-op for the first entry.
    pub fn move_left(&mut self, index: usize) -> Result<(), EditorError> {
        self.ensure_editing()?;
        self.entries.move_left(index).map(|_| ())
    }

    /// No-op for the last entry.
    pub fn move_right(&mut self, index: usize) -> Result<(), EditorError> {
        self.ensure_editing()?;
        self.entries.move_right(index).map(|_| ())
    }

    /// Resets name, description, and entries of the open session.
    pub fn clear(&mut self) -> Result<(), EditorError> {
        self.ensure_editing()?;
        self.name.clear();
        self.description.clear();
        self.entries.clear();
        self.unresolved.clear();
        Ok(())
    }

    /// Entries in persisted form, in display order.
    pub fn serialize(&self) -> Vec<SequenceEntryRef> {
        self.entries.to_refs()
    }

    /// Writes the session as one full-document replace. A blank name is
    /// rejected before any call is made. On failure the session keeps every
    /// edit and returns to `Editing`.
    pub async fn save(&mut self) -> Result<SaveOutcome, EditorError> {
        self.ensure_editing()?;
        if self.name.trim().is_empty() {
            return Err(EditorError::Validation("name required".into()));
        }

        let user_id = self
            .auth
            .current_user()
            .await
            .map_err(EditorError::persistence)?;

        let now = Utc::now();
        let created_at = self.created_at.unwrap_or(now);
        let document = SequenceDocument {
            name: self.name.clone(),
            description: self.description.clone(),
            sequence: self.serialize(),
            created_at,
            updated_at: now.max(created_at),
        };

        self.phase = EditorPhase::Saving;
        match self
            .documents
            .put_sequence(user_id, &self.sequence_id, &document)
            .await
        {
            Ok(()) => {
                let created = !self.persisted;
                self.persisted = true;
                self.created_at = Some(created_at);
                self.phase = EditorPhase::Closed;
                info!(
                    sequence_id = %self.sequence_id,
                    entries = document.sequence.len(),
                    created,
                    "sequence saved"
                );
                Ok(SaveOutcome {
                    sequence: Sequence {
                        id: self.sequence_id.clone(),
                        document,
                    },
                    created,
                })
            }
            Err(error) => {
                self.phase = EditorPhase::Editing;
                warn!(sequence_id = %self.sequence_id, error = %format!("{error:#}"), "sequence save failed");
                Err(EditorError::persistence(error))
            }
        }
    }

    /// Removes the stored document. Only valid for a sequence that exists
    /// in the store.
    pub async fn delete(&mut self) -> Result<(), EditorError> {
        self.ensure_editing()?;
        if !self.persisted {
            return Err(EditorError::NotPersisted);
        }

        let user_id = self
            .auth
            .current_user()
            .await
            .map_err(EditorError::persistence)?;

        self.phase = EditorPhase::Deleting;
        match self
            .documents
            .delete_sequence(user_id, &self.sequence_id)
            .await
        {
            Ok(()) => {
                self.persisted = false;
                self.phase = EditorPhase::Closed;
                info!(sequence_id = %self.sequence_id, "sequence deleted");
                Ok(())
            }
            Err(error) => {
                self.phase = EditorPhase::Editing;
                warn!(sequence_id = %self.sequence_id, error = %format!("{error:#}"), "sequence delete failed");
                Err(EditorError::persistence(error))
            }
        }
    }

    /// Ends the session without writing anything.
    pub fn cancel(&mut self) -> Result<(), EditorError> {
        if self.is_submitting() {
            return Err(EditorError::Busy);
        }
        if self.phase != EditorPhase::Closed {
            debug!(sequence_id = %self.sequence_id, "editing cancelled");
            self.phase = EditorPhase::Closed;
        }
        Ok(())
    }

    fn ensure_editing(&self) -> Result<(), EditorError> {
        match self.phase {
            EditorPhase::Editing => Ok(()),
            EditorPhase::Saving | EditorPhase::Deleting => Err(EditorError::Busy),
            other => Err(EditorError::NotEditable(other)),
        }
    }
}

#[cfg(test)]
#[path = "tests/editor_tests.rs"]
mod tests;
