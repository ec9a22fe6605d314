use shared::domain::{CatalogItem, ItemId, MediaKind, SequenceEntryRef};
use tracing::warn;

use crate::{catalog::Catalog, error::EditorError, error::ResolutionError};

/// One slot of an open sequence.
///
/// `Unresolved` keeps a stored reference whose item is missing from the
/// catalog snapshot so it is written back unchanged on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceEntry {
    Resolved(CatalogItem),
    Unresolved(SequenceEntryRef),
}

impl SequenceEntry {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Resolved(item) => item.kind,
            Self::Unresolved(entry) => entry.kind,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::Resolved(item) => &item.id,
            Self::Unresolved(entry) => &entry.item_id,
        }
    }

    pub fn item(&self) -> Option<&CatalogItem> {
        match self {
            Self::Resolved(item) => Some(item),
            Self::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Human-readable label for listings.
    pub fn label(&self) -> String {
        match self {
            Self::Resolved(item) => item.display_name.clone(),
            Self::Unresolved(entry) => format!("<missing {} {}>", entry.kind, entry.item_id),
        }
    }

    pub fn to_ref(&self) -> SequenceEntryRef {
        SequenceEntryRef::new(self.kind(), self.item_id().clone())
    }
}

impl From<CatalogItem> for SequenceEntry {
    fn from(item: CatalogItem) -> Self {
        Self::Resolved(item)
    }
}

/// Maps a stored reference onto the matching catalog item.
pub fn resolve(entry: &SequenceEntryRef, catalog: &Catalog) -> Result<SequenceEntry, ResolutionError> {
    catalog
        .find(entry.kind, &entry.item_id)
        .cloned()
        .map(SequenceEntry::Resolved)
        .ok_or_else(|| ResolutionError {
            kind: entry.kind,
            item_id: entry.item_id.clone(),
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub entries: EntryList,
    pub unresolved: Vec<ResolutionError>,
}

/// Resolves every stored reference in order. Missing items become
/// `Unresolved` placeholders at their original position.
pub fn reconcile(refs: &[SequenceEntryRef], catalog: &Catalog) -> Reconciled {
    let mut reconciled = Reconciled::default();
    for entry in refs {
        match resolve(entry, catalog) {
            Ok(resolved) => {
                reconciled.entries.push(resolved);
            }
            Err(error) => {
                warn!(kind = %error.kind, item_id = %error.item_id, "sequence references a missing item");
                reconciled
                    .entries
                    .push(SequenceEntry::Unresolved(entry.clone()));
                reconciled.unresolved.push(error);
            }
        }
    }
    reconciled
}

/// Ordered, duplicate-friendly list of entries. `swap` is the only
/// reordering primitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryList {
    entries: Vec<SequenceEntry>,
}

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SequenceEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceEntry> {
        self.entries.iter()
    }

    pub fn push(&mut self, entry: impl Into<SequenceEntry>) -> usize {
        self.entries.push(entry.into());
        self.entries.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Result<SequenceEntry, EditorError> {
        self.check_index(index)?;
        Ok(self.entries.remove(index))
    }

    pub fn swap(&mut self, a: usize, b: usize) -> Result<(), EditorError> {
        self.check_index(a)?;
        self.check_index(b)?;
        self.entries.swap(a, b);
        Ok(())
    }

    /// Swaps with the previous slot. Returns `false` for the first slot.
    pub fn move_left(&mut self, index: usize) -> Result<bool, EditorError> {
        self.check_index(index)?;
        if index == 0 {
            return Ok(false);
        }
        self.swap(index, index - 1)?;
        Ok(true)
    }

    /// Swaps with the next slot. Returns `false` for the last slot.
    pub fn move_right(&mut self, index: usize) -> Result<bool, EditorError> {
        self.check_index(index)?;
        if index + 1 == self.entries.len() {
            return Ok(false);
        }
        self.swap(index, index + 1)?;
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_refs(&self) -> Vec<SequenceEntryRef> {
        self.entries.iter().map(SequenceEntry::to_ref).collect()
    }

    fn check_index(&self, index: usize) -> Result<(), EditorError> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(EditorError::IndexOutOfBounds {
                index,
                len: self.entries.len(),
            })
        }
    }
}

impl FromIterator<SequenceEntry> for EntryList {
    fn from_iter<I: IntoIterator<Item = SequenceEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[path = "tests/entries_tests.rs"]
mod tests;
