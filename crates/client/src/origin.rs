//! Per-origin validation state
//!
//! `unknown → validating → pending ⇄ paired`, with `invalid` reachable while
//! validating or pending. The first caller to look up an origin is told
//! `validating` and owns the handshake; the record already reads `pending`
//! for everyone else.

use std::collections::HashMap;

use mterelay_core::{ClientId, Origin, OriginStatus};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct OriginRecord {
    status: OriginStatus,
    client_id: Option<ClientId>,
}

/// Point-in-time view of one origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginSnapshot {
    pub origin: Origin,
    pub status: OriginStatus,
    pub client_id: Option<ClientId>,
}

#[derive(Default)]
pub struct OriginTable {
    records: Mutex<HashMap<Origin, OriginRecord>>,
}

impl OriginTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status for a request about to be sent.
    ///
    /// A never-seen origin is recorded as `pending` and `validating` is
    /// returned to this caller only.
    pub fn get_status(&self, origin: &Origin) -> OriginStatus {
        let mut records = self.records.lock();
        match records.get(origin) {
            Some(record) => record.status,
            None => {
                debug!("First request to {}, validating", origin);
                records.insert(
                    origin.clone(),
                    OriginRecord {
                        status: OriginStatus::Pending,
                        client_id: None,
                    },
                );
                OriginStatus::Validating
            }
        }
    }

    /// Current status without claiming anything
    pub fn peek(&self, origin: &Origin) -> OriginStatus {
        self.records
            .lock()
            .get(origin)
            .map(|r| r.status)
            .unwrap_or(OriginStatus::Unknown)
    }

    /// Set status, and the client id when one is given
    pub fn set_status(&self, origin: &Origin, status: OriginStatus, client_id: Option<ClientId>) {
        let mut records = self.records.lock();
        let record = records.entry(origin.clone()).or_insert(OriginRecord {
            status,
            client_id: None,
        });
        if record.status != status {
            debug!("{}: {} -> {}", origin, record.status, status);
        }
        record.status = status;
        if client_id.is_some() {
            record.client_id = client_id;
        }
    }

    pub fn client_id(&self, origin: &Origin) -> Option<ClientId> {
        self.records.lock().get(origin).and_then(|r| r.client_id.clone())
    }

    /// Record a client id without touching the status
    pub fn set_client_id(&self, origin: &Origin, client_id: ClientId) {
        if let Some(record) = self.records.lock().get_mut(origin) {
            record.client_id = Some(client_id);
        }
    }

    pub fn clear_client_id(&self, origin: &Origin) {
        if let Some(record) = self.records.lock().get_mut(origin) {
            record.client_id = None;
        }
    }

    /// Move a known origin back to `pending` with no client id.
    ///
    /// Only succeeds while `rejected` is still the current client id, so a
    /// late rejection of an already replaced id is ignored. Returns true for
    /// the one caller that performed the transition; that caller
    /// re-validates while the rest wait.
    pub fn claim_revalidation(&self, origin: &Origin, rejected: Option<&ClientId>) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(origin) {
            Some(record)
                if record.status == OriginStatus::Paired
                    && record.client_id.as_ref() == rejected =>
            {
                debug!("{}: client id rejected, re-validating", origin);
                record.status = OriginStatus::Pending;
                record.client_id = None;
                true
            }
            _ => false,
        }
    }

    /// Move a `paired` origin back to `pending`, keeping its client id.
    ///
    /// Taken when the pair queue ran dry. Returns true for the one caller
    /// that negotiates new pairs.
    pub fn claim_repair(&self, origin: &Origin) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(origin) {
            Some(record) if record.status == OriginStatus::Paired => {
                debug!("{}: out of pairs, re-pairing", origin);
                record.status = OriginStatus::Pending;
                true
            }
            _ => false,
        }
    }

    /// Forget an origin so the next caller validates it again
    pub fn reset(&self, origin: &Origin) {
        self.records.lock().remove(origin);
    }

    pub fn snapshot(&self) -> Vec<OriginSnapshot> {
        let mut snapshot: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(origin, record)| OriginSnapshot {
                origin: origin.clone(),
                status: record.status,
                client_id: record.client_id.clone(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.origin.cmp(&b.origin));
        snapshot
    }
}
