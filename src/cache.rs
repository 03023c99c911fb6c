use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::api::ApiError;
use crate::models::{Assessment, PhoneLog};

type Slot<T> = Arc<OnceCell<T>>;

/// Session-scoped memo cache for the expensive list fetches. The first
/// caller for a key runs the fetch; concurrent callers await the same
/// in-flight result instead of issuing duplicates. Entries never expire on
/// their own; `invalidate` drops everything. A failed fetch leaves its slot
/// empty, so the next caller retries.
///
/// Constructed per session and passed where needed; there is no global.
#[derive(Default)]
pub struct FetchCache {
    assessments: Mutex<Slot<Vec<Assessment>>>,
    all_phone_logs: Mutex<Slot<Vec<PhoneLog>>>,
    phone_logs_by_id: Mutex<HashMap<String, Slot<Vec<PhoneLog>>>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assessments<F, Fut>(&self, fetch: F) -> Result<Vec<Assessment>, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Assessment>, ApiError>>,
    {
        let slot = self.assessments.lock().await.clone();
        slot.get_or_try_init(fetch).await.cloned()
    }

    pub async fn all_phone_logs<F, Fut>(&self, fetch: F) -> Result<Vec<PhoneLog>, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<PhoneLog>, ApiError>>,
    {
        let slot = self.all_phone_logs.lock().await.clone();
        slot.get_or_try_init(fetch).await.cloned()
    }

    pub async fn phone_logs<F, Fut>(
        &self,
        patient_id: &str,
        fetch: F,
    ) -> Result<Vec<PhoneLog>, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<PhoneLog>, ApiError>>,
    {
        let slot = self
            .phone_logs_by_id
            .lock()
            .await
            .entry(patient_id.to_string())
            .or_default()
            .clone();
        slot.get_or_try_init(fetch).await.cloned()
    }

    /// Drop every memoized result. Callers holding an in-flight fetch keep
    /// the slot they started with.
    pub async fn invalidate(&self) {
        *self.assessments.lock().await = Slot::default();
        *self.all_phone_logs.lock().await = Slot::default();
        self.phone_logs_by_id.lock().await.clear();
    }
}
