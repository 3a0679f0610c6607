//! Fan-out of daemon log events to connected log listeners.

use crate::rpc::daemon_service::LogListenerClient;
use crate::rpc::LogEvent;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::DAEMON_TARGET;

/// Events kept for listeners that connect late.
pub const BACKLOG_LIMIT: usize = 256;

type ListenerId = u64;

/// Registry of log listeners.
///
/// Events published before the first listener connects are kept in a
/// bounded backlog and replayed to each new listener, so the startup lines
/// reach a client that subscribes after `start`.
#[derive(Default)]
pub struct LogHub {
    listeners: HashMap<ListenerId, LogListenerClient>,
    backlog: VecDeque<LogEvent>,
    next_id: ListenerId,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener, replays the backlog to it, then pings it so the
    /// listener knows the replay is complete.
    ///
    /// Returns `None` when the listener failed during replay.
    pub async fn add(&mut self, client: LogListenerClient) -> Option<ListenerId> {
        for event in &self.backlog {
            if client
                .log(tarpc::context::current(), event.clone())
                .await
                .is_err()
            {
                debug!(target: DAEMON_TARGET, "log listener failed during replay");
                return None;
            }
        }
        match client.ping(tarpc::context::current()).await {
            Ok(true) => {}
            _ => {
                debug!(target: DAEMON_TARGET, "log listener did not answer after replay");
                return None;
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, client);
        Some(id)
    }

    pub fn count(&self) -> usize {
        self.listeners.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Sends an event to every listener, dropping the ones that fail.
    pub async fn publish(&mut self, event: LogEvent) {
        if self.backlog.len() == BACKLOG_LIMIT {
            self.backlog.pop_front();
        }
        self.backlog.push_back(event.clone());

        let mut failed = Vec::new();
        for (id, client) in &self.listeners {
            if client
                .log(tarpc::context::current(), event.clone())
                .await
                .is_err()
            {
                failed.push(*id);
            }
        }
        for id in failed {
            self.listeners.remove(&id);
            debug!(target: DAEMON_TARGET, listener = id, "removed dead log listener");
        }
    }

    /// Pings every listener and drops the ones that do not answer.
    pub async fn prune(&mut self) {
        let mut failed = Vec::new();
        for (id, client) in &self.listeners {
            match client.ping(tarpc::context::current()).await {
                Ok(true) => {}
                _ => failed.push(*id),
            }
        }
        for id in failed {
            self.listeners.remove(&id);
        }
    }
}

#[cfg(test)]
#[path = "tests/log_hub_tests.rs"]
mod tests;
