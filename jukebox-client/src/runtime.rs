use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use jukebox_core::{
    ChatStyle, ClientState, Dispatcher, Frame, Framer, Intent, Outgoing, Update, init_frame,
    now_playing_request,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, interval_at, timeout},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::gate::{ConnectionGate, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
const CONNECT_BACKOFF_BASE_MS: u64 = 200;
const RECONNECT_BASE_MS: u64 = 500;
const RECONNECT_MAX_MS: u64 = 30_000;

/// What to do once an established socket closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ReconnectPolicy {
    /// The session ends with the first socket.
    #[default]
    Never,
    /// Open a fresh socket, giving up after `max_attempts` consecutive
    /// failures.
    Backoff { max_attempts: u32 },
}

pub fn reconnect_delay(attempt: u32) -> Duration {
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1).min(6));
    let delay_ms = RECONNECT_BASE_MS.saturating_mul(pow).min(RECONNECT_MAX_MS);
    let jitter_window = (delay_ms / 10).max(1);
    let jitter = rand::rng().random_range(0..=(jitter_window * 2));
    Duration::from_millis(delay_ms.saturating_sub(jitter_window).saturating_add(jitter))
}

/// Shared context of one client session: the local state, the gate in front
/// of the socket, and the channel updates flow out through.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<ClientState>>,
    gate: ConnectionGate,
    framer: Framer,
    updates_tx: mpsc::UnboundedSender<Update>,
}

impl Session {
    pub fn connection_state(&self) -> ConnectionState {
        self.gate.state()
    }

    pub fn snapshot(&self) -> Option<ClientState> {
        self.state.lock().ok().map(|state| state.clone())
    }

    pub fn handle_intent(&self, intent: Intent) {
        let outgoing = match self.state.lock() {
            Ok(mut state) => state.handle_intent(intent),
            Err(_) => {
                error!("client state lock poisoned; ignoring intent");
                return;
            }
        };

        match outgoing {
            Outgoing::Send(frame) => self.send_frame(&frame),
            Outgoing::Notice(text) => self.notice(text),
            Outgoing::Nothing => {}
        }
    }

    pub fn send_frame(&self, frame: &Frame) {
        match self.framer.encode_frame(frame) {
            Ok(text) => {
                debug!(kind = %frame.kind, lines = frame.lines.len(), "outgoing frame");
                self.gate.send_when_ready(text);
            }
            Err(err) => warn!("failed to encode outgoing frame: {}", err),
        }
    }

    fn notice(&self, text: String) {
        let _ = self.updates_tx.send(Update::Chat {
            text,
            style: ChatStyle::Local,
        });
    }
}

/// Starts a session against `config.server_url`.
///
/// Returns the session handle, the stream of UI updates, and a task that
/// finishes once the connection is gone for good.
pub fn open(config: ClientConfig) -> (Session, mpsc::UnboundedReceiver<Update>, JoinHandle<()>) {
    let framer = Framer::new(config.payload_order);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel::<Update>();

    let closed_is_final = config.reconnect == ReconnectPolicy::Never;
    let gate = ConnectionGate::spawn(config.retry, state_rx, outbound_tx, closed_is_final);

    let state = Arc::new(Mutex::new(ClientState::new(config.nickname.clone())));
    let session = Session {
        state: Arc::clone(&state),
        gate: gate.clone(),
        framer,
        updates_tx: updates_tx.clone(),
    };

    let inbound = Inbound {
        dispatcher: Dispatcher::new(framer),
        state,
        updates_tx: updates_tx.clone(),
    };

    let now_playing_every = config.now_playing_interval;
    let driver = tokio::spawn(drive_connection(
        config,
        state_tx,
        outbound_rx,
        inbound,
        updates_tx,
    ));
    let poller = tokio::spawn(poll_now_playing(gate, framer, now_playing_every));

    let finished = tokio::spawn(async move {
        if let Err(err) = driver.await {
            error!("connection task failed: {}", err);
        }
        poller.abort();
        info!("session ended");
    });

    (session, updates_rx, finished)
}

struct Inbound {
    dispatcher: Dispatcher,
    state: Arc<Mutex<ClientState>>,
    updates_tx: mpsc::UnboundedSender<Update>,
}

impl Inbound {
    fn handle(&self, raw: &str) {
        let mut batch: Vec<Update> = Vec::new();
        let result = match self.state.lock() {
            Ok(mut state) => self.dispatcher.process_inbound(raw, &mut state, &mut batch),
            Err(_) => {
                error!("client state lock poisoned; dropping inbound message");
                return;
            }
        };

        for update in batch {
            let _ = self.updates_tx.send(update);
        }

        match result {
            Ok(handled) => debug!(handled, "inbound message processed"),
            Err(err) => warn!("decode frame failed: {}", err),
        }
    }
}

async fn drive_connection(
    config: ClientConfig,
    state_tx: watch::Sender<ConnectionState>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound: Inbound,
    updates_tx: mpsc::UnboundedSender<Update>,
) {
    let notice = |text: String| {
        let _ = updates_tx.send(Update::Chat {
            text,
            style: ChatStyle::Local,
        });
    };

    let init = match inbound.dispatcher.framer().encode_frame(&init_frame()) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to encode init frame: {}", err);
            state_tx.send_replace(ConnectionState::Closed);
            return;
        }
    };

    let mut failures: u32 = 0;
    loop {
        state_tx.send_replace(ConnectionState::Connecting);

        match connect_with_retry(&config.server_url).await {
            Ok(mut ws) => {
                if let Err(err) = ws.send(Message::Text(init.clone().into())).await {
                    warn!("failed to send init frame: {}", err);
                } else {
                    failures = 0;
                    state_tx.send_replace(ConnectionState::Open);
                    info!(server_url = %config.server_url, "connected");
                    notice(format!("connected to {}", config.server_url));

                    run_socket(ws, &mut outbound_rx, &inbound).await;
                    notice("connection closed".to_owned());
                }
            }
            Err(msg) => notice(msg),
        }

        state_tx.send_replace(ConnectionState::Closed);

        match config.reconnect {
            ReconnectPolicy::Never => break,
            ReconnectPolicy::Backoff { max_attempts } => {
                failures += 1;
                if failures > max_attempts {
                    warn!(max_attempts, "giving up on reconnecting");
                    notice("giving up on reconnecting".to_owned());
                    break;
                }
                let delay = reconnect_delay(failures);
                info!(attempt = failures, ?delay, "reconnecting");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn connect_with_retry(server_url: &str) -> Result<WsStream, String> {
    let mut attempt: u32 = 1;
    loop {
        info!(
            attempt,
            max_attempts = MAX_CONNECT_ATTEMPTS,
            server_url = %server_url,
            "connecting"
        );

        let msg = match timeout(CONNECT_TIMEOUT, connect_async(server_url)).await {
            Ok(Ok((ws, _))) => return Ok(ws),
            Ok(Err(err)) => format!("connect failed: {err}"),
            Err(_) => format!("connect timed out after {:?}", CONNECT_TIMEOUT),
        };
        error!(attempt, server_url = %server_url, "{msg}");
        if attempt >= MAX_CONNECT_ATTEMPTS {
            return Err(msg);
        }

        let backoff_ms = CONNECT_BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        attempt += 1;
    }
}

async fn run_socket(
    ws: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    inbound: &Inbound,
) {
    let (mut ws_write, mut ws_read) = ws.split();

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(payload) => {
                        if let Err(err) = ws_write.send(Message::Text(payload.into())).await {
                            warn!("write failed: {}", err);
                            break;
                        }
                    }
                    None => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = ws_read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => inbound.handle(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed connection");
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "ignoring binary message");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("read failed: {}", err);
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn poll_now_playing(gate: ConnectionGate, framer: Framer, every: Duration) {
    let request = match framer.encode_frame(&now_playing_request()) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to encode now playing request: {}", err);
            return;
        }
    };

    let mut ticker = interval_at(Instant::now() + every, every);
    loop {
        ticker.tick().await;
        gate.send_when_ready(request.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_is_capped() {
        for attempt in [1, 3, 7, 40] {
            let delay = reconnect_delay(attempt);
            assert!(delay <= Duration::from_millis(RECONNECT_MAX_MS + RECONNECT_MAX_MS / 10));
        }
        assert!(reconnect_delay(1) >= Duration::from_millis(450));
    }
}
