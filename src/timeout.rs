//! Per-session deadline timers.
//!
//! [`TimeoutSupervisor`] keeps at most one armed timer per [`SessionKey`].
//! Arming a key that already has a timer cancels the old one first, so a
//! stale timer can never outlive the session it was armed for. Expired timers
//! are reported as [`Expiry`] events on a channel instead of calling back into
//! the controller directly.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::SessionKey;

/// A timer that ran out for the session `session_id` under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub key: SessionKey,
    pub session_id: Uuid,
}

struct ArmedTimer {
    session_id: Uuid,
    cancel: CancellationToken,
}

pub struct TimeoutSupervisor {
    timers: Mutex<HashMap<SessionKey, ArmedTimer>>,
    expired_tx: mpsc::UnboundedSender<Expiry>,
    /// Parent of every timer token; cancelled on shutdown.
    shutdown: CancellationToken,
}

impl TimeoutSupervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            timers: Mutex::new(HashMap::new()),
            expired_tx,
            shutdown: CancellationToken::new(),
        };
        (supervisor, expired_rx)
    }

    /// Arms a timer for `session_id`, replacing whatever was armed for `key`.
    pub fn arm(&self, key: &SessionKey, session_id: Uuid, after: Duration) {
        let cancel = self.shutdown.child_token();

        {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = timers.insert(
                key.clone(),
                ArmedTimer {
                    session_id,
                    cancel: cancel.clone(),
                },
            );
            if let Some(previous) = previous {
                tracing::debug!(session = %key, replaced = %previous.session_id, "Replacing timer");
                previous.cancel.cancel();
            }
        }

        let expiry = Expiry {
            key: key.clone(),
            session_id,
        };
        let expired_tx = self.expired_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    tracing::info!(session = %expiry.key, id = %expiry.session_id, "Session time is up");
                    let _ = expired_tx.send(expiry);
                }
            }
        });
    }

    /// Cancels the timer armed for `key`. A timer that already fired may still
    /// deliver its expiry.
    pub fn cancel(&self, key: &SessionKey) -> bool {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);

        match removed {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels the timer of one particular session. Leaves `key` alone when it
    /// was re-armed for another session in the meantime.
    pub fn disarm(&self, key: &SessionKey, session_id: Uuid) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if timers.get(key).is_some_and(|t| t.session_id == session_id) {
            if let Some(timer) = timers.remove(key) {
                timer.cancel.cancel();
            }
        }
    }

    pub fn armed_for(&self, key: &SessionKey) -> Option<Uuid> {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|t| t.session_id)
    }

    pub fn armed(&self) -> usize {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Drop for TimeoutSupervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
