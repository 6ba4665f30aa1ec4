//! # Fan-in Rollup
//!
//! Aggregates the completions of several candidate operations into a single
//! callback that fires exactly once.
//!
//! Each candidate is invoked synchronously with a [`Reply`] handle and returns
//! a [`Dispatch`]:
//! - `Complete` / `Failed`: finished immediately, the handle is not needed
//! - `InProgress`: the candidate keeps the handle and completes it later,
//!   possibly from another thread
//!
//! No lock is held while a candidate runs. The shared tally is guarded by a
//! mutex held only for each increment-and-check, and the callback always runs
//! after that mutex is released. A handle dropped without completing counts
//! as a failed reply, so the aggregate cannot hang on a lost handle.

use crate::error::Status;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result of invoking one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Finished successfully before returning
    Complete,
    /// Will report through its [`Reply`] handle
    InProgress,
    /// Finished with an error before returning
    Failed(Status),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Candidate still executing
    Running,
    /// Candidate returned `InProgress`, waiting on its reply
    Deferred,
    /// Handle dropped while the candidate was still executing
    Abandoned,
    Resolved,
}

type Callback = Box<dyn FnOnce(Status) + Send>;

struct Tally {
    requests: usize,
    replies: usize,
    // unresolved slots, plus one while candidates are still being invoked
    outstanding: usize,
    status: Status,
    slots: Vec<SlotState>,
    callback: Option<Callback>,
}

impl Tally {
    fn record(&mut self, status: Status) {
        if self.status.is_success() && !status.is_success() {
            self.status = status;
        }
    }

    /// Mark a slot resolved; returns the callback if this was the last one
    fn resolve(&mut self, slot: usize) -> Option<(Callback, Status)> {
        self.slots[slot] = SlotState::Resolved;
        self.release()
    }

    fn release(&mut self) -> Option<(Callback, Status)> {
        self.outstanding -= 1;
        if self.outstanding == 0 {
            let status = self.status;
            self.callback.take().map(|cb| (cb, status))
        } else {
            None
        }
    }
}

struct Shared {
    tally: Mutex<Tally>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Tally> {
        // a panicking candidate must not wedge the remaining replies
        self.tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reply(&self, slot: usize, status: Status) {
        let fire = {
            let mut tally = self.lock();
            if tally.slots[slot] == SlotState::Resolved {
                return;
            }
            tally.replies += 1;
            tally.record(status);
            debug!(slot, replies = tally.replies, requests = tally.requests, %status, "Rollup reply");
            tally.resolve(slot)
        };
        fire_callback(fire);
    }

    fn abandon(&self, slot: usize) {
        let deferred = {
            let mut tally = self.lock();
            match tally.slots[slot] {
                SlotState::Running => {
                    tally.slots[slot] = SlotState::Abandoned;
                    false
                }
                SlotState::Deferred => true,
                SlotState::Abandoned | SlotState::Resolved => false,
            }
        };
        if deferred {
            warn!(slot, "Rollup reply handle dropped without completing");
            self.reply(slot, Status::ERROR);
        }
    }

    fn returned(&self, slot: usize, dispatch: Dispatch) {
        let fire = {
            let mut tally = self.lock();
            let state = tally.slots[slot];
            match dispatch {
                Dispatch::Complete | Dispatch::Failed(_) => {
                    if let Dispatch::Failed(status) = dispatch {
                        tally.record(status);
                    }
                    if state == SlotState::Resolved {
                        None
                    } else {
                        tally.resolve(slot)
                    }
                }
                Dispatch::InProgress => {
                    tally.requests += 1;
                    match state {
                        SlotState::Running => {
                            tally.slots[slot] = SlotState::Deferred;
                            None
                        }
                        SlotState::Abandoned => {
                            warn!(slot, "Candidate went in progress but dropped its reply handle");
                            tally.replies += 1;
                            tally.record(Status::ERROR);
                            tally.resolve(slot)
                        }
                        SlotState::Deferred | SlotState::Resolved => None,
                    }
                }
            }
        };
        fire_callback(fire);
    }

    fn finish_dispatch(&self) {
        let fire = self.lock().release();
        fire_callback(fire);
    }
}

fn fire_callback(fire: Option<(Callback, Status)>) {
    if let Some((callback, status)) = fire {
        debug!(%status, "Rollup complete");
        callback(status);
    }
}

/// Completion handle given to each candidate
pub struct Reply {
    shared: Arc<Shared>,
    slot: usize,
    done: bool,
}

impl Reply {
    /// Report the candidate's final status
    pub fn complete(mut self, status: Status) {
        self.done = true;
        self.shared.reply(self.slot, status);
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if !self.done {
            self.shared.abandon(self.slot);
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply").field("slot", &self.slot).finish()
    }
}

/// Shared fan-in state for one rollup
#[derive(Clone)]
pub struct RollupTracker {
    shared: Arc<Shared>,
}

impl RollupTracker {
    /// Invoke every candidate and arrange for `callback` to fire exactly once
    /// with the first non-success status seen, or success.
    ///
    /// If no candidate goes in progress the callback fires before this returns.
    pub fn initiate<I, F, C>(candidates: I, callback: C) -> Self
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(Reply) -> Dispatch,
        C: FnOnce(Status) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            tally: Mutex::new(Tally {
                requests: 0,
                replies: 0,
                outstanding: 1,
                status: Status::SUCCESS,
                slots: Vec::new(),
                callback: Some(Box::new(callback)),
            }),
        });

        for candidate in candidates {
            let slot = {
                let mut tally = shared.lock();
                tally.slots.push(SlotState::Running);
                tally.outstanding += 1;
                tally.slots.len() - 1
            };
            let reply = Reply {
                shared: Arc::clone(&shared),
                slot,
                done: false,
            };
            let dispatch = candidate(reply);
            shared.returned(slot, dispatch);
        }
        shared.finish_dispatch();

        Self { shared }
    }

    /// Like [`initiate`](Self::initiate), resolving a future instead of
    /// calling back
    pub fn initiate_async<I, F>(candidates: I) -> RollupHandle
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(Reply) -> Dispatch,
    {
        let (tx, rx) = oneshot::channel();
        let tracker = Self::initiate(candidates, move |status| {
            let _ = tx.send(status);
        });
        RollupHandle { tracker, rx }
    }

    /// Candidates that went in progress
    pub fn requests(&self) -> usize {
        self.shared.lock().requests
    }

    /// Replies delivered so far
    pub fn replies(&self) -> usize {
        self.shared.lock().replies
    }

    /// Whether the aggregate callback has fired
    pub fn is_complete(&self) -> bool {
        self.shared.lock().outstanding == 0
    }

    /// First non-success status recorded so far
    pub fn status(&self) -> Status {
        self.shared.lock().status
    }
}

/// Pending result of [`RollupTracker::initiate_async`]
pub struct RollupHandle {
    tracker: RollupTracker,
    rx: oneshot::Receiver<Status>,
}

impl RollupHandle {
    pub fn tracker(&self) -> &RollupTracker {
        &self.tracker
    }

    /// Wait for the last reply
    pub async fn wait(self) -> Status {
        self.rx.await.unwrap_or(Status::ERROR)
    }
}
