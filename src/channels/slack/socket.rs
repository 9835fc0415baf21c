//! Socket Mode: one outbound WebSocket, every envelope acked on the same
//! socket, reconnect with exponential backoff until stopped.

use super::api::SlackApiClient;
use super::ingest::{AppMention, SlackIngest, SlashCommand};
use super::SlackError;
use serde::Deserialize;
use serde_json::json;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const SOCKET_IDLE_SLEEP: Duration = Duration::from_millis(40);
const STOP_POLL: Duration = Duration::from_millis(25);
const DISPATCH_BUFFER_CAPACITY: usize = 256;

/// Doubling delay: 1 s, 2 s, 4 s … capped at 30 s, back to 1 s on reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EventsApiPayload {
    #[serde(default)]
    event: Option<AppMention>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Slash(SlashCommand),
    Mention(AppMention),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEnvelope {
    pub ack: Option<String>,
    pub inbound: Option<Inbound>,
    pub disconnect: bool,
}

/// Decodes one text frame. Unknown envelope types still yield their ack.
pub fn parse_envelope(text: &str) -> Option<ParsedEnvelope> {
    let envelope: SocketEnvelope = serde_json::from_str(text).ok()?;
    let mut parsed = ParsedEnvelope {
        ack: envelope.envelope_id.filter(|id| !id.trim().is_empty()),
        ..ParsedEnvelope::default()
    };
    match envelope.kind.as_str() {
        "disconnect" => parsed.disconnect = true,
        "slash_commands" => {
            parsed.inbound = envelope
                .payload
                .and_then(|payload| serde_json::from_value::<SlashCommand>(payload).ok())
                .map(Inbound::Slash);
        }
        "events_api" => {
            parsed.inbound = envelope
                .payload
                .and_then(|payload| serde_json::from_value::<EventsApiPayload>(payload).ok())
                .and_then(|payload| payload.event)
                .filter(|event| event.kind == "app_mention")
                .map(Inbound::Mention);
        }
        _ => {}
    }
    Some(parsed)
}

pub fn ack_frame(envelope_id: &str) -> String {
    json!({ "envelope_id": envelope_id }).to_string()
}

fn dispatch(ingest: &SlackIngest, inbound: Inbound) {
    match inbound {
        Inbound::Slash(slash) => {
            if let Err(err) = ingest.handle_slash(&slash) {
                tracing::info!(channel = %slash.channel_id, error = %err, "slash command rejected");
            }
        }
        Inbound::Mention(event) => {
            if let Err(err) = ingest.handle_mention(&event) {
                tracing::info!(channel = %event.channel, error = %err, "mention rejected");
            }
        }
    }
}

fn should_stop(stop: &AtomicBool) -> bool {
    stop.load(Ordering::Relaxed)
}

/// Sleeps in short steps; returns false if `stop` was raised meanwhile.
fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) -> bool {
    let mut remaining = delay;
    while remaining > Duration::ZERO {
        if should_stop(stop) {
            return false;
        }
        let step = remaining.min(STOP_POLL);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !should_stop(stop)
}

fn is_fatal(err: &SlackError) -> bool {
    match err {
        SlackError::MissingCredential(_) => true,
        SlackError::ApiResponse(code) => matches!(
            code.as_str(),
            "invalid_auth" | "not_authed" | "token_revoked" | "account_inactive" | "missing_scope"
        ),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionOutcome {
    Disconnected,
    StopRequested,
}

/// Runs until `stop` is raised. Returns an error only for failures a
/// reconnect cannot fix (missing or revoked app token).
pub fn run_socket_mode(
    api: &SlackApiClient,
    ingest: Arc<SlackIngest>,
    stop: &AtomicBool,
) -> Result<(), SlackError> {
    let mut backoff = Backoff::default();
    while !should_stop(stop) {
        let url = match api.open_socket_url() {
            Ok(url) => url,
            Err(err) if is_fatal(&err) => {
                tracing::error!(error = %err, "slack socket mode cannot start");
                return Err(err);
            }
            Err(err) => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "slack socket url open failed");
                if !sleep_unless_stopped(delay, stop) {
                    break;
                }
                continue;
            }
        };

        let mut socket = match connect(url.as_str()) {
            Ok((socket, _)) => socket,
            Err(err) => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "slack socket connect failed");
                if !sleep_unless_stopped(delay, stop) {
                    break;
                }
                continue;
            }
        };
        backoff.reset();
        tracing::info!("slack socket connected");

        if let Err(err) = set_socket_nonblocking(&mut socket) {
            tracing::warn!(error = %err, "failed to configure slack socket");
            let _ = socket.close(None);
            if !sleep_unless_stopped(backoff.next_delay(), stop) {
                break;
            }
            continue;
        }

        match process_connection(&mut socket, Arc::clone(&ingest), stop) {
            ConnectionOutcome::StopRequested => break,
            ConnectionOutcome::Disconnected => {
                let delay = backoff.next_delay();
                tracing::info!(retry_in_ms = delay.as_millis() as u64, "slack socket disconnected; reconnecting");
                if !sleep_unless_stopped(delay, stop) {
                    break;
                }
            }
        }
    }
    tracing::info!("slack socket loop stopped");
    Ok(())
}

fn process_connection(
    socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
    ingest: Arc<SlackIngest>,
    stop: &AtomicBool,
) -> ConnectionOutcome {
    let (sender, receiver): (SyncSender<Inbound>, Receiver<Inbound>) =
        mpsc::sync_channel(DISPATCH_BUFFER_CAPACITY);
    let worker = thread::spawn(move || {
        while let Ok(inbound) = receiver.recv() {
            dispatch(&ingest, inbound);
        }
    });

    let mut outcome = ConnectionOutcome::Disconnected;
    loop {
        if should_stop(stop) {
            outcome = ConnectionOutcome::StopRequested;
            break;
        }
        match socket.read() {
            Ok(Message::Text(text)) => {
                let Some(parsed) = parse_envelope(text.as_str()) else {
                    continue;
                };
                if let Some(id) = &parsed.ack {
                    if let Err(err) = socket.send(Message::Text(ack_frame(id))) {
                        tracing::warn!(envelope_id = %id, error = %err, "failed to ack envelope");
                    }
                }
                if parsed.disconnect {
                    tracing::info!("slack requested disconnect");
                    break;
                }
                if let Some(inbound) = parsed.inbound {
                    match sender.try_send(inbound) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!("slack dispatch queue full; dropping envelope");
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = socket.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                thread::sleep(SOCKET_IDLE_SLEEP);
            }
            Err(tungstenite::Error::ConnectionClosed) => break,
            Err(err) => {
                tracing::warn!(error = %err, "slack socket read failed");
                break;
            }
        }
    }

    drop(sender);
    let _ = worker.join();
    let _ = socket.close(None);
    outcome
}

fn set_socket_nonblocking(
    socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
) -> Result<(), SlackError> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_nonblocking(true),
        MaybeTlsStream::Rustls(stream) => stream.sock.set_nonblocking(true),
        _ => Ok(()),
    }
    .map_err(|err| SlackError::Socket(format!("failed to configure socket mode stream: {err}")))
}
