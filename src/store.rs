//! Record store: the per-row photo records.
//!
//! The store is plain data owned by the tracker's coordination context. Stage
//! runners receive snapshots and report [`Outcome`]s; only the tracker writes.

use bytes::Bytes;
use url::Url;

use crate::catalog::CatalogEntry;
use crate::error::{Error, Result};
use crate::types::{Outcome, PhotoState, RowId};

/// Domain record for one row
#[derive(Clone, Debug, PartialEq)]
pub struct Photo {
    /// Display name
    pub name: String,
    /// Source image URL
    pub url: Url,
    /// Pipeline state
    pub state: PhotoState,
    /// Current image payload (raw after fetch, processed after transform)
    pub image: Option<Bytes>,
}

impl Photo {
    /// Create a fresh record in the `New` state with no image
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
            state: PhotoState::New,
            image: None,
        }
    }

    /// Apply a stage outcome, returning whether the record changed
    ///
    /// Transitions that would regress the state are ignored, so a late result
    /// from a task that was already forgotten can never move a record backwards.
    /// `Failed` only comes out of the fetch stage and only applies to `New`
    /// records; it never discards a completed download.
    pub fn apply(&mut self, outcome: &Outcome) -> bool {
        match (outcome, self.state) {
            (Outcome::Downloaded(payload), PhotoState::New) if !payload.is_empty() => {
                self.image = Some(payload.clone());
                self.state = PhotoState::Downloaded;
                true
            }
            (Outcome::Filtered(payload), PhotoState::Downloaded) if !payload.is_empty() => {
                self.image = Some(payload.clone());
                self.state = PhotoState::Filtered;
                true
            }
            (Outcome::Failed(_), PhotoState::New) => {
                self.image = None;
                self.state = PhotoState::Failed;
                true
            }
            _ => false,
        }
    }
}

/// Ordered collection of row records
#[derive(Clone, Debug, Default)]
pub struct RecordStore {
    photos: Vec<Photo>,
}

impl RecordStore {
    /// Create a store from records; row ids are their positions
    pub fn new(photos: Vec<Photo>) -> Self {
        Self { photos }
    }

    /// Build a store from catalog entries, every row starting `New`
    pub fn from_catalog(entries: Vec<CatalogEntry>) -> Self {
        Self::new(
            entries
                .into_iter()
                .map(|entry| Photo::new(entry.name, entry.url))
                .collect(),
        )
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.photos.len()
    }

    /// Whether the store has no rows
    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    /// Look up a row's record
    pub fn get(&self, row: RowId) -> Option<&Photo> {
        self.photos.get(row.0)
    }

    /// Mutate a row's record in place
    pub fn update<R>(&mut self, row: RowId, mutation: impl FnOnce(&mut Photo) -> R) -> Result<R> {
        self.photos
            .get_mut(row.0)
            .map(mutation)
            .ok_or(Error::RowNotFound(row))
    }

    /// Apply a stage outcome to a row, returning whether the record changed
    pub fn apply(&mut self, row: RowId, outcome: &Outcome) -> Result<bool> {
        self.update(row, |photo| photo.apply(outcome))
    }

    /// Iterate rows with their ids
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &Photo)> {
        self.photos
            .iter()
            .enumerate()
            .map(|(idx, photo)| (RowId(idx), photo))
    }
}
