use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use kondate_protocol::ProgressEvent;

struct ChannelState {
    tx: broadcast::Sender<ProgressEvent>,
    /// Events published while no subscriber was attached, bounded by the
    /// backlog cap (oldest dropped first).
    backlog: Mutex<VecDeque<ProgressEvent>>,
}

/// Fan-out hub: one bounded channel per session.
pub struct ProgressHub {
    channels: DashMap<String, Arc<ChannelState>>,
    backlog_cap: usize,
    heartbeat: Duration,
}

impl ProgressHub {
    pub fn new(backlog_cap: usize, heartbeat: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            backlog_cap,
            heartbeat,
        }
    }

    fn state(&self, session_id: &str) -> Arc<ChannelState> {
        self.channels
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(ChannelState {
                    tx: broadcast::channel(self.backlog_cap.max(1)).0,
                    backlog: Mutex::new(VecDeque::new()),
                })
            })
            .value()
            .clone()
    }

    /// Publish an event; never blocks the caller.
    ///
    /// With live subscribers the event fans out immediately; otherwise it
    /// lands in the backlog so a late subscriber still sees recent history.
    pub fn publish(&self, session_id: &str, event: ProgressEvent) {
        let state = self.state(session_id);
        if state.tx.receiver_count() > 0 {
            let _ = state.tx.send(event);
        } else {
            let mut backlog = state.backlog.lock().unwrap();
            if backlog.len() >= self.backlog_cap {
                backlog.pop_front();
            }
            backlog.push_back(event);
        }
    }

    /// Attach a subscriber; queued events are delivered first.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let state = self.state(session_id);
        let rx = state.tx.subscribe();
        let backlog: VecDeque<ProgressEvent> = state.backlog.lock().unwrap().drain(..).collect();
        debug!(session = %session_id, queued = backlog.len(), "subscriber attached");
        Subscription {
            backlog,
            rx,
            heartbeat: self.heartbeat,
            heartbeat_counter: 0,
            close_pending: false,
            done: false,
        }
    }

    /// Publish a terminal event and tear the channel down.
    ///
    /// Used when a session is evicted: any attached subscriber sees the
    /// terminal frame, then its stream closes.
    pub fn close_with(&self, session_id: &str, event: ProgressEvent) {
        self.publish(session_id, event);
        self.channels.remove(session_id);
    }

    /// Drop the channel state without a terminal frame.
    pub fn remove(&self, session_id: &str) {
        self.channels.remove(session_id);
    }
}

/// One subscriber's view of a session's event stream.
///
/// `next()` yields events in publication order, inserts heartbeats on
/// idle, and ends after the `close` frame that follows a terminal event.
/// Dropping the subscription detaches it without affecting the publisher.
pub struct Subscription {
    backlog: VecDeque<ProgressEvent>,
    rx: broadcast::Receiver<ProgressEvent>,
    heartbeat: Duration,
    heartbeat_counter: u64,
    close_pending: bool,
    done: bool,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        if self.close_pending {
            self.done = true;
            return Some(ProgressEvent::close());
        }

        if let Some(event) = self.backlog.pop_front() {
            if event.is_terminal() {
                self.close_pending = true;
            }
            return Some(event);
        }

        loop {
            match tokio::time::timeout(self.heartbeat, self.rx.recv()).await {
                Ok(Ok(event)) => {
                    if event.is_terminal() {
                        self.close_pending = true;
                    }
                    return Some(event);
                }
                // Fell behind the bounded buffer: skip to the oldest
                // retained event on the next iteration.
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                // Publisher gone (channel torn down): close out.
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    self.done = true;
                    return Some(ProgressEvent::close());
                }
                Err(_elapsed) => {
                    self.heartbeat_counter += 1;
                    return Some(ProgressEvent::heartbeat(self.heartbeat_counter));
                }
            }
        }
    }
}
