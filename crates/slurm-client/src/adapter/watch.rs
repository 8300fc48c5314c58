// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polling-based watch.
//!
//! slurmrestd has no change feed, so a watch lists the resource on an
//! interval and diffs consecutive snapshots. The first successful poll only
//! records a baseline. Events go out on a bounded channel; the poller stops
//! when the caller's context is done or the receiver is dropped.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::classify::ErrorKind;
use crate::context::CallContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    /// Time between polls (default: 5s)
    pub poll_interval: Duration,
    /// Event channel capacity (default: 100)
    pub buffer: usize,
    /// Report everything seen by the first poll as `Added`
    pub emit_initial: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            buffer: 100,
            emit_initial: false,
        }
    }
}

impl WatchOptions {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_initial(mut self) -> Self {
        self.emit_initial = true;
        self
    }
}

#[derive(Debug)]
pub enum WatchEvent<T> {
    /// A resource appeared.
    Added(T),
    /// A known resource changed state.
    StateChanged { previous: String, current: T },
    /// A known resource is no longer listed.
    Removed { key: String, last_state: String },
    /// One poll failed. Polling continues.
    Failed(Error),
}

/// Compare a fresh snapshot against the known states and update them.
fn diff<T>(
    known: &mut HashMap<String, String>,
    items: Vec<T>,
    baseline: bool,
    key_of: fn(&T) -> String,
    state_of: fn(&T) -> String,
) -> Vec<WatchEvent<T>> {
    let mut events = Vec::new();
    let mut seen = BTreeSet::new();

    for item in items {
        let key = key_of(&item);
        let state = state_of(&item);
        seen.insert(key.clone());

        match known.insert(key, state.clone()) {
            None if !baseline => events.push(WatchEvent::Added(item)),
            None => {}
            Some(previous) if previous != state => events.push(WatchEvent::StateChanged {
                previous,
                current: item,
            }),
            Some(_) => {}
        }
    }

    let mut gone: Vec<String> = known
        .keys()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();
    gone.sort();
    for key in gone {
        if let Some(last_state) = known.remove(&key) {
            events.push(WatchEvent::Removed { key, last_state });
        }
    }

    events
}

/// Start a poller task and return its event stream.
pub(crate) fn spawn_poller<T, F, Fut>(
    ctx: CallContext,
    options: WatchOptions,
    poll: F,
    key_of: fn(&T) -> String,
    state_of: fn(&T) -> String,
) -> mpsc::Receiver<WatchEvent<T>>
where
    T: Send + 'static,
    F: Fn(CallContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.buffer.max(1));

    tokio::spawn(async move {
        let mut known = HashMap::new();
        let mut baseline = !options.emit_initial;

        'polling: loop {
            let outcome = tokio::select! {
                biased;

                _ = ctx.done() => break 'polling,
                _ = tx.closed() => break 'polling,
                outcome = poll(ctx.clone()) => outcome,
            };

            let events = match outcome {
                Ok(items) => {
                    let events = diff(&mut known, items, baseline, key_of, state_of);
                    baseline = false;
                    events
                }
                Err(err) if err.kind() == ErrorKind::Cancelled => break 'polling,
                Err(err) => {
                    warn!(error = %err, "Watch poll failed");
                    vec![WatchEvent::Failed(err)]
                }
            };

            for event in events {
                tokio::select! {
                    biased;

                    _ = ctx.done() => break 'polling,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break 'polling;
                        }
                    }
                }
            }

            tokio::select! {
                biased;

                _ = ctx.done() => break 'polling,
                _ = tx.closed() => break 'polling,
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
        }

        debug!("Watch stopped");
    });

    rx
}
