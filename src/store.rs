use std::future::Future;

use crate::api::ApiError;
use crate::models::Assessment;

/// Local working copy of the assessment list with optimistic edits: mutate
/// first, confirm against the remote store, restore the exact prior state
/// when the remote call fails. A single active editor is assumed; the remote
/// store is last-write-wins.
pub struct AssessmentStore {
    rows: Vec<Assessment>,
}

impl AssessmentStore {
    pub fn new(mut rows: Vec<Assessment>) -> Self {
        for row in &mut rows {
            row.normalize_dates();
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[Assessment] {
        &self.rows
    }

    pub fn find(&self, id: &str) -> Option<&Assessment> {
        self.rows.iter().find(|r| r.id.trimmed() == id.trim())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.id.trimmed() == id.trim())
    }

    /// Apply `patch` locally, then confirm with `save`. On failure the row is
    /// restored to its snapshot before the error is returned.
    pub async fn update_fields<F, Fut>(
        &mut self,
        id: &str,
        patch: &[(String, String)],
        save: F,
    ) -> Result<(), ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let index = self.position(id).ok_or(ApiError::NotFound)?;
        let snapshot = self.rows[index].clone();
        for (key, value) in patch {
            self.rows[index].set_field(key, value);
        }

        match save().await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.rows[index] = snapshot;
                Err(error)
            }
        }
    }

    /// Remove the row locally, then confirm with `delete`. A remote not-found
    /// means the record was already gone and still counts as success
    /// (`Ok(false)`); any other failure reinserts the row at its old index.
    pub async fn delete<F, Fut>(&mut self, id: &str, delete: F) -> Result<bool, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let index = self.position(id).ok_or(ApiError::NotFound)?;
        let snapshot = self.rows.remove(index);

        match delete().await {
            Ok(()) => Ok(true),
            Err(ApiError::NotFound) => Ok(false),
            Err(error) => {
                self.rows.insert(index, snapshot);
                Err(error)
            }
        }
    }
}
