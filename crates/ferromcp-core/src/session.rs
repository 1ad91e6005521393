//! Session-state primitives shared by the client and server session cores.
//!
//! A session's lifecycle is
//! `unconnected → connecting → initializing → active → closing → closed`;
//! only in `active` do non-initialize requests proceed. The pieces here keep
//! that machine honest: the [`StateCell`] validates transitions, the
//! [`InFlightTable`] accounts for outstanding outbound requests so that
//! close/wait never deadlock, the [`InitializedGate`] fires exactly once, and
//! the [`KeepaliveHandle`] is assigned exactly once over a session's life.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ferromcp_protocol::{Error, JsonRpcResponse, RequestId, Result};

/// Session lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// No transport attached yet
    Unconnected,
    /// Transport dialing/handshaking
    Connecting,
    /// `initialize` exchanged but `initialized` not yet seen
    Initializing,
    /// Fully open; normal traffic flows
    Active,
    /// Graceful shutdown in progress
    Closing,
    /// Both directions closed
    Closed,
}

/// Mutex-guarded session state with forward-only transitions.
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<SessionState>,
}

impl StateCell {
    /// Start in `Unconnected`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Unconnected),
        }
    }

    /// Current state.
    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// Advance to `next`. The machine only moves forward; an attempt to move
    /// backwards is rejected and logged, since it indicates a dispatch bug.
    pub fn advance(&self, next: SessionState) -> Result<()> {
        let mut state = self.state.lock();
        if next < *state {
            warn!(from = ?*state, to = ?next, "refusing backwards session transition");
            return Err(Error::internal(format!(
                "invalid session transition {:?} -> {next:?}",
                *state
            )));
        }
        *state = next;
        Ok(())
    }

    /// Whether normal (non-initialize) requests may proceed.
    pub fn is_active(&self) -> bool {
        self.get() == SessionState::Active
    }

    /// Whether the session has begun shutting down.
    pub fn is_closing(&self) -> bool {
        self.get() >= SessionState::Closing
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// One outstanding outbound request.
struct InFlightEntry {
    responder: oneshot::Sender<JsonRpcResponse>,
    cancel: CancellationToken,
}

/// Table of outstanding outbound requests, keyed by request id.
///
/// Entries pair a capacity-one response channel with a cancel handle. The
/// table also backs `Wait()`: it notifies whenever it drains to empty.
pub struct InFlightTable {
    entries: Mutex<HashMap<RequestId, InFlightEntry>>,
    drained: Notify,
}

impl std::fmt::Debug for InFlightTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightTable")
            .field("len", &self.len())
            .finish()
    }
}

impl InFlightTable {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            drained: Notify::new(),
        }
    }

    /// Register an outbound request. Returns the response receiver and a
    /// cancel token the sender can trip to abort the wait.
    pub fn register(
        &self,
        id: RequestId,
    ) -> (oneshot::Receiver<JsonRpcResponse>, CancellationToken) {
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        self.entries.lock().insert(
            id,
            InFlightEntry {
                responder: tx,
                cancel: cancel.clone(),
            },
        );
        (rx, cancel)
    }

    /// Route an incoming response to its waiter. Returns whether an entry
    /// matched; unmatched responses are the caller's to log.
    pub fn resolve(&self, id: &RequestId, response: JsonRpcResponse) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.responder.send(response);
                self.notify_if_drained();
                true
            }
            None => false,
        }
    }

    /// Cancel one outstanding request (the waiter observes its token).
    pub fn cancel(&self, id: &RequestId) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                self.notify_if_drained();
                true
            }
            None => false,
        }
    }

    /// Drop an entry without resolving it (used when the waiter gave up).
    pub fn forget(&self, id: &RequestId) {
        self.entries.lock().remove(id);
        self.notify_if_drained();
    }

    /// Cancel everything; used when the transport dies.
    pub fn abort_all(&self) {
        let entries: Vec<_> = {
            let mut map = self.entries.lock();
            map.drain().collect()
        };
        for (_, entry) in entries {
            entry.cancel.cancel();
        }
        self.drained.notify_waiters();
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Wait until every outstanding request has resolved.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn notify_if_drained(&self) {
        if self.is_empty() {
            self.drained.notify_waiters();
        }
    }
}

impl Default for InFlightTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-shot gate for the `initialized` notification.
#[derive(Debug, Default)]
pub struct InitializedGate {
    fired: AtomicBool,
}

impl InitializedGate {
    /// New, unfired gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the gate. Returns `false` if it had already fired; the caller
    /// must treat that as a protocol error and must not restart keepalive.
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    /// Whether the gate has fired.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Cancel handle for the keepalive task, assigned exactly once.
///
/// # Panics
///
/// Arming twice panics: the session core arms keepalive from exactly one
/// place (first `initialized` on the server, post-handshake on the client),
/// so a second arm is a programming error, not a runtime condition.
#[derive(Debug, Default)]
pub struct KeepaliveHandle {
    token: Mutex<Option<CancellationToken>>,
}

impl KeepaliveHandle {
    /// New, unarmed handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the cancel token for the keepalive task.
    pub fn arm(&self, token: CancellationToken) {
        let mut slot = self.token.lock();
        assert!(slot.is_none(), "keepalive cancel handle assigned twice");
        *slot = Some(token);
    }

    /// Whether keepalive has been armed.
    pub fn is_armed(&self) -> bool {
        self.token.lock().is_some()
    }

    /// Cancel the keepalive task, if armed. Idempotent.
    pub fn cancel(&self) {
        if let Some(token) = self.token.lock().as_ref() {
            token.cancel();
        }
    }
}

/// Counts live background tasks so `Wait()` can block until all are done.
#[derive(Clone, Debug, Default)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

#[derive(Debug, Default)]
struct WaitGroupInner {
    count: Mutex<usize>,
    zero: Notify,
}

/// Guard decrementing the owning [`WaitGroup`] on drop.
pub struct WaitGuard {
    inner: Arc<WaitGroupInner>,
}

impl WaitGroup {
    /// New group with zero members.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; dropping the guard removes it.
    pub fn enter(&self) -> WaitGuard {
        *self.inner.count.lock() += 1;
        WaitGuard {
            inner: self.inner.clone(),
        }
    }

    /// Wait until the member count reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.zero.notified();
            if *self.inner.count.lock() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        let mut count = self.inner.count.lock();
        *count -= 1;
        if *count == 0 {
            self.inner.zero.notify_waiters();
        }
    }
}
