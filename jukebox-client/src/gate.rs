use std::{collections::VecDeque, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, trace, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 250;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_DELAY_STEP: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Every poll waits `initial_delay`.
    Constant,
    /// Poll `n` (0-based) waits `initial_delay + n * step`.
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub step: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            step: DEFAULT_DELAY_STEP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Constant => self.initial_delay,
            Backoff::Linear => self
                .initial_delay
                .saturating_add(self.step.saturating_mul(attempt)),
        }
    }
}

#[derive(Debug)]
struct PendingSend {
    payload: String,
    /// Polls already charged against the budget.
    attempt: u32,
    /// First poll is the moment `send_when_ready` was called.
    next_poll: Instant,
}

impl PendingSend {
    fn new(payload: String) -> Self {
        Self {
            payload,
            attempt: 0,
            next_poll: Instant::now(),
        }
    }
}

/// Holds outgoing payloads until the socket reports `Open`.
///
/// Every payload goes through one FIFO drained by a single task, so payloads
/// leave in the order `send_when_ready` was called even while the socket is
/// still connecting. Each payload carries its own retry budget, counted from
/// the call to `send_when_ready`; a payload whose budget runs out is logged
/// and dropped wherever it sits in the queue, and the caller is never told.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    state_rx: watch::Receiver<ConnectionState>,
    pending_tx: mpsc::UnboundedSender<PendingSend>,
}

impl ConnectionGate {
    /// Spawns the task that drains pending sends into `outbound_tx`.
    ///
    /// With `closed_is_final` set, a `Closed` state drops pending payloads
    /// at once instead of polling out their budget.
    pub fn spawn(
        policy: RetryPolicy,
        state_rx: watch::Receiver<ConnectionState>,
        outbound_tx: mpsc::UnboundedSender<String>,
        closed_is_final: bool,
    ) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        tokio::spawn(flush_pending(
            policy,
            state_rx.clone(),
            pending_rx,
            outbound_tx,
            closed_is_final,
        ));
        Self {
            state_rx,
            pending_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn send_when_ready(&self, payload: impl Into<String>) {
        if self.pending_tx.send(PendingSend::new(payload.into())).is_err() {
            warn!("connection gate stopped; dropping outgoing payload");
        }
    }
}

async fn flush_pending(
    policy: RetryPolicy,
    state_rx: watch::Receiver<ConnectionState>,
    mut pending_rx: mpsc::UnboundedReceiver<PendingSend>,
    outbound_tx: mpsc::UnboundedSender<String>,
    closed_is_final: bool,
) {
    let mut queue: VecDeque<PendingSend> = VecDeque::new();
    let mut accepting = true;
    loop {
        if queue.is_empty() {
            match pending_rx.recv().await {
                Some(pending) => queue.push_back(pending),
                None => break,
            }
        }
        while let Ok(pending) = pending_rx.try_recv() {
            queue.push_back(pending);
        }

        poll_queue(&policy, &state_rx, &outbound_tx, &mut queue, closed_is_final);

        let Some(wake) = queue.iter().map(|pending| pending.next_poll).min() else {
            continue;
        };
        trace!(queued = queue.len(), "waiting for connection");
        if accepting {
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                received = pending_rx.recv() => match received {
                    Some(pending) => queue.push_back(pending),
                    None => accepting = false,
                },
            }
        } else {
            tokio::time::sleep_until(wake).await;
        }
    }
    debug!("connection gate drained");
}

/// One look at the connection on behalf of every queued payload.
///
/// `Open` flushes the whole queue in order. Otherwise each payload whose poll
/// is due is charged one attempt, and any payload with nothing left is dropped.
fn poll_queue(
    policy: &RetryPolicy,
    state_rx: &watch::Receiver<ConnectionState>,
    outbound_tx: &mpsc::UnboundedSender<String>,
    queue: &mut VecDeque<PendingSend>,
    closed_is_final: bool,
) {
    let state = *state_rx.borrow();
    match state {
        ConnectionState::Open => {
            for pending in queue.drain(..) {
                if outbound_tx.send(pending.payload).is_err() {
                    warn!("socket writer gone; dropping outgoing payload");
                }
            }
            return;
        }
        ConnectionState::Closed if closed_is_final => {
            warn!(
                dropped = queue.len(),
                "connection closed; dropping outgoing payloads"
            );
            queue.clear();
            return;
        }
        ConnectionState::Connecting | ConnectionState::Closed => {}
    }

    let now = Instant::now();
    queue.retain_mut(|pending| {
        if pending.next_poll > now {
            return true;
        }
        if pending.attempt >= policy.max_attempts {
            warn!(
                attempts = pending.attempt,
                ?state,
                "connection not ready; dropping outgoing payload"
            );
            return false;
        }
        pending.next_poll += policy.delay_for(pending.attempt);
        pending.attempt += 1;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_delay_grows_with_attempt() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(5),
            step: Duration::from_millis(10),
            max_attempts: 3,
            backoff: Backoff::Linear,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(5));
        assert_eq!(policy.delay_for(1), Duration::from_millis(15));
        assert_eq!(policy.delay_for(4), Duration::from_millis(45));
    }

    #[test]
    fn constant_delay_ignores_attempt() {
        let policy = RetryPolicy {
            backoff: Backoff::Constant,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), policy.delay_for(200));
    }

    #[test]
    fn default_budget_is_250_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 250);
    }
}
