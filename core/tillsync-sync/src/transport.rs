//! Remote target abstraction.
//!
//! The queue and the cache only talk to the remote through [`SyncTarget`],
//! so the HTTP client, the in-process relay and the test mock are
//! interchangeable.

use crate::error::SyncResult;
use crate::protocol::{FetchQuery, FetchResponse, PushRequest, PushResponse};
use async_trait::async_trait;

/// The remote sync target.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Delivers mutations. Entries already seen by id must be acknowledged
    /// without being applied again.
    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse>;

    /// Fetches the authoritative records of one collection for a tenant.
    async fn fetch(&self, query: FetchQuery) -> SyncResult<FetchResponse>;
}

/// A mock target for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::Rejection;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tillsync_types::{Collection, EntryId, Record, RecordId, TenantId};

    #[derive(Default)]
    struct MockState {
        requests: Vec<PushRequest>,
        applied: Vec<EntryId>,
        seen: HashSet<EntryId>,
        failures_remaining: usize,
        stalls_remaining: usize,
        failing_records: HashSet<RecordId>,
        rejecting_records: HashMap<RecordId, String>,
        records: HashMap<(TenantId, Collection), Vec<Record>>,
        fetch_error: Option<String>,
        fetches: Vec<FetchQuery>,
    }

    /// In-memory target with scriptable failures.
    ///
    /// Accepted entries are remembered by id, so redelivery is acknowledged
    /// without being recorded twice in [`MockTarget::applied`].
    #[derive(Default)]
    pub struct MockTarget {
        state: Mutex<MockState>,
    }

    impl MockTarget {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fails the next `n` pushes with a network error.
        pub fn fail_next_pushes(&self, n: usize) {
            self.state.lock().unwrap().failures_remaining = n;
        }

        /// Makes the next `n` pushes hang forever without being recorded.
        pub fn stall_next_pushes(&self, n: usize) {
            self.state.lock().unwrap().stalls_remaining = n;
        }

        /// Fails every push carrying a mutation of `record_id`.
        pub fn fail_record(&self, record_id: impl Into<RecordId>) {
            self.state.lock().unwrap().failing_records.insert(record_id.into());
        }

        /// Stops failing pushes for `record_id`.
        pub fn heal_record(&self, record_id: impl Into<RecordId>) {
            self.state.lock().unwrap().failing_records.remove(&record_id.into());
        }

        /// Answers pushes of `record_id` with a rejection.
        pub fn reject_record(&self, record_id: impl Into<RecordId>, reason: impl Into<String>) {
            self.state
                .lock()
                .unwrap()
                .rejecting_records
                .insert(record_id.into(), reason.into());
        }

        /// Sets the authoritative set returned by fetch.
        pub fn set_records(&self, tenant_id: impl Into<TenantId>, collection: Collection, records: Vec<Record>) {
            self.state
                .lock()
                .unwrap()
                .records
                .insert((tenant_id.into(), collection), records);
        }

        /// Makes every fetch fail (or succeed again with `None`).
        pub fn set_fetch_error(&self, error: Option<&str>) {
            self.state.lock().unwrap().fetch_error = error.map(str::to_string);
        }

        /// Entry ids applied, in delivery order, without duplicates.
        pub fn applied(&self) -> Vec<EntryId> {
            self.state.lock().unwrap().applied.clone()
        }

        /// Every push request received, failed ones included.
        pub fn requests(&self) -> Vec<PushRequest> {
            self.state.lock().unwrap().requests.clone()
        }

        pub fn fetches(&self) -> Vec<FetchQuery> {
            self.state.lock().unwrap().fetches.clone()
        }
    }

    #[async_trait]
    impl SyncTarget for MockTarget {
        async fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
            let stall = {
                let mut state = self.state.lock().unwrap();
                let stall = state.stalls_remaining > 0;
                if stall {
                    state.stalls_remaining -= 1;
                }
                stall
            };
            if stall {
                std::future::pending::<()>().await;
            }

            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());

            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                return Err(SyncError::Network("mock: connection reset".into()));
            }
            if request
                .entries
                .iter()
                .any(|e| state.failing_records.contains(&e.record_id))
            {
                return Err(SyncError::Network("mock: upstream unavailable".into()));
            }

            let mut response = PushResponse::default();
            for entry in &request.entries {
                if let Some(reason) = state.rejecting_records.get(&entry.record_id) {
                    response.rejected.push(Rejection {
                        id: entry.entry_id,
                        reason: reason.clone(),
                    });
                    continue;
                }
                if state.seen.insert(entry.entry_id) {
                    state.applied.push(entry.entry_id);
                }
                response.accepted.push(entry.entry_id);
            }
            Ok(response)
        }

        async fn fetch(&self, query: FetchQuery) -> SyncResult<FetchResponse> {
            let mut state = self.state.lock().unwrap();
            state.fetches.push(query.clone());
            if let Some(error) = &state.fetch_error {
                return Err(SyncError::Network(error.clone()));
            }
            let records = state
                .records
                .get(&(query.tenant_id.clone(), query.collection))
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|r| query.since.is_none_or(|since| r.written_at() >= since))
                .collect();
            Ok(FetchResponse { records })
        }
    }
}
