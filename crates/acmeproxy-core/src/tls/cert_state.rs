// Single-flight issuance slot for one certificate identity

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{CertError, developer_fatal};

use super::certificate::IssuedCert;

pub type CertResult = Result<Arc<IssuedCert>, CertError>;

#[derive(Default)]
struct Slot {
    issuing: bool,
    result: Option<CertResult>,
    finished_at: Option<Instant>,
}

/// Issuance lock and last known result for one certificate identity.
///
/// At most one caller at a time wins [`CertState::start_issue`]; everybody else waits on
/// [`CertState::wait_finish_issue`] and observes the result the winner passes to
/// [`CertState::finish_issue`].
pub struct CertState {
    slot: Mutex<Slot>,
    /// Bumped once per finished issuance, waking every waiter subscribed before it
    finished: watch::Sender<u64>,
}

impl CertState {
    pub fn new() -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            slot: Mutex::new(Slot::default()),
            finished,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns true if the caller now owns the issuance and must call `finish_issue`
    pub fn start_issue(&self) -> bool {
        let mut slot = self.slot();
        if slot.issuing {
            return false;
        }
        slot.issuing = true;
        true
    }

    /// Store the result of the issuance started by `start_issue` and wake all waiters
    pub fn finish_issue(&self, result: CertResult) {
        let mut slot = self.slot();
        if !slot.issuing {
            drop(slot);
            developer_fatal("finish_issue called without a matching start_issue");
            return;
        }

        slot.issuing = false;
        slot.result = Some(result);
        slot.finished_at = Some(Instant::now());
        self.finished.send_modify(|generation| *generation += 1);
    }

    /// Wait for the in-flight issuance, or return the last result if nothing is in flight.
    ///
    /// Cancelling `cancel` only stops this waiter; the issuance keeps going for the others.
    pub async fn wait_finish_issue(&self, cancel: &CancellationToken) -> CertResult {
        let mut finished = {
            let slot = self.slot();
            if !slot.issuing {
                return slot.result.clone().unwrap_or(Err(CertError::NotIssuedYet));
            }
            // Subscribing under the lock guarantees the finish is observed as a change
            self.finished.subscribe()
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(CertError::Cancelled),
            changed = finished.changed() => match changed {
                Ok(()) => self.cert(),
                Err(_) => Err(CertError::Cancelled),
            },
        }
    }

    /// Non-blocking read of the last known result
    pub fn cert(&self) -> CertResult {
        self.slot()
            .result
            .clone()
            .unwrap_or(Err(CertError::NotIssuedYet))
    }

    pub fn is_issuing(&self) -> bool {
        self.slot().issuing
    }

    /// The stored error, if the last issuance failed less than `window` ago
    pub fn recent_error(&self, window: Duration) -> Option<CertError> {
        let slot = self.slot();
        match (&slot.result, slot.finished_at) {
            (Some(Err(err)), Some(at)) if at.elapsed() < window => Some(err.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for CertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot();
        f.debug_struct("CertState")
            .field("issuing", &slot.issuing)
            .field("has_cert", &matches!(slot.result, Some(Ok(_))))
            .field("last_error", &slot.result.as_ref().and_then(|r| r.as_ref().err()))
            .finish()
    }
}
