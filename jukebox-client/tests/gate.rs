use std::time::Duration;

use jukebox_client::{Backoff, ConnectionGate, ConnectionState, RetryPolicy};
use tokio::sync::{mpsc, watch};

const TICK: Duration = Duration::from_millis(10);

fn constant_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        initial_delay: TICK,
        step: Duration::ZERO,
        max_attempts,
        backoff: Backoff::Constant,
    }
}

struct Harness {
    gate: ConnectionGate,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

fn harness(policy: RetryPolicy, initial: ConnectionState, closed_is_final: bool) -> Harness {
    let (state_tx, state_rx) = watch::channel(initial);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let gate = ConnectionGate::spawn(policy, state_rx, outbound_tx, closed_is_final);
    Harness {
        gate,
        state_tx,
        outbound_rx,
    }
}

fn open_after(state_tx: watch::Sender<ConnectionState>, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        state_tx.send_replace(ConnectionState::Open);
    });
}

#[tokio::test(start_paused = true)]
async fn open_gate_delivers_without_waiting() {
    let mut h = harness(constant_policy(3), ConnectionState::Open, true);
    h.gate.send_when_ready("CHAT\r\nhi\r\nEND\r\n");

    let started = tokio::time::Instant::now();
    let delivered = h.outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("CHAT\r\nhi\r\nEND\r\n"));
    assert!(started.elapsed() < TICK);
}

#[tokio::test(start_paused = true)]
async fn delivers_once_after_socket_opens_within_budget() {
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(constant_policy(10), ConnectionState::Connecting, true);

    gate.send_when_ready("SKIP\r\nEND\r\n");
    open_after(state_tx, Duration::from_millis(45));

    let delivered = outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("SKIP\r\nEND\r\n"));
    assert_eq!(gate.state(), ConnectionState::Open);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(outbound_rx.try_recv().is_err(), "payload delivered twice");
}

#[tokio::test(start_paused = true)]
async fn drops_payload_when_budget_runs_out_first() {
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(constant_policy(3), ConnectionState::Connecting, true);

    gate.send_when_ready("first");
    open_after(state_tx, Duration::from_millis(45));

    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.send_when_ready("second");

    let delivered = outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("second"));
    assert!(outbound_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn pending_sends_keep_caller_order() {
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(constant_policy(50), ConnectionState::Connecting, true);

    for n in 0..5 {
        gate.send_when_ready(format!("payload-{n}"));
    }
    open_after(state_tx, Duration::from_millis(75));

    for n in 0..5 {
        let delivered = outbound_rx.recv().await;
        assert_eq!(delivered, Some(format!("payload-{n}")));
    }
}

#[tokio::test(start_paused = true)]
async fn linear_backoff_waits_longer_each_poll() {
    let policy = RetryPolicy {
        initial_delay: TICK,
        step: TICK,
        max_attempts: 4,
        backoff: Backoff::Linear,
    };
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(policy, ConnectionState::Connecting, true);

    // polls land at 0, 10, 30, 60 and 100ms; the last one sees Open
    gate.send_when_ready("late");
    open_after(state_tx, Duration::from_millis(95));

    let started = tokio::time::Instant::now();
    let delivered = outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("late"));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn closed_connection_drops_pending_when_final() {
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(constant_policy(250), ConnectionState::Closed, true);

    gate.send_when_ready("never");
    tokio::time::sleep(TICK).await;
    state_tx.send_replace(ConnectionState::Open);
    gate.send_when_ready("after reopen");

    let delivered = outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("after reopen"));
}

#[tokio::test(start_paused = true)]
async fn closed_connection_keeps_polling_when_reconnecting() {
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(constant_policy(250), ConnectionState::Closed, false);

    gate.send_when_ready("survives");
    open_after(state_tx, Duration::from_millis(500));

    let delivered = outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("survives"));
}

#[tokio::test(start_paused = true)]
async fn queued_sends_expire_on_their_own_budget() {
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(constant_policy(3), ConnectionState::Connecting, true);

    // every payload's window closes at 30ms, well before the socket opens
    gate.send_when_ready("a");
    gate.send_when_ready("b");
    gate.send_when_ready("c");
    open_after(state_tx, Duration::from_millis(75));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(outbound_rx.try_recv().is_err(), "expired payload delivered");

    gate.send_when_ready("fresh");
    let delivered = outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("fresh"));
    assert!(outbound_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn later_send_gets_a_window_of_its_own() {
    let Harness {
        gate,
        state_tx,
        mut outbound_rx,
    } = harness(constant_policy(3), ConnectionState::Connecting, true);

    // "early" polls at 0, 10, 20 and gives up at 30; "late" polls at 25, 35, 45
    gate.send_when_ready("early");
    open_after(state_tx, Duration::from_millis(40));
    tokio::time::sleep(Duration::from_millis(25)).await;
    gate.send_when_ready("late");

    let delivered = outbound_rx.recv().await;
    assert_eq!(delivered.as_deref(), Some("late"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(outbound_rx.try_recv().is_err());
}
