//! The local event source connection: a line-delimited feed of observed
//! protocol events, read from a relay-local socket and authenticated the
//! way the relay's own control port is, by password or cookie file.
//!
//! Reconnection is attempted at a configured, fixed interval rather than
//! with backoff: a relay-local control port is either up or down, and
//! waiting longer after each failure buys nothing.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder, Retryable as _};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics_ids::METRICS_ID_DC_SOURCE_GAP;

/// One event observed at the local event source, decoded from its wire
/// line but not yet matched against any counter's subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// The event's type name, matched against
    /// [`privcount_types::counter::EventSubscription::event_types`].
    pub event_type: String,
    /// Field name/value pairs carried by the event line.
    pub fields: BTreeMap<String, String>,
}

/// How this process authenticates to the local event source.
pub enum SourceAuth {
    /// A plaintext password, sent as the first line after connecting.
    Password(SecretString),
    /// The contents of a cookie file, read fresh on every connection
    /// attempt (the file may rotate between attempts).
    CookieFile(PathBuf),
}

/// A connected (or reconnecting) handle onto the local event source.
///
/// Events flow in over a bounded channel. A liveness `"Ping"` event is
/// dropped silently if the channel is full; any other event type failing
/// to enqueue is a subscription-affecting gap the caller must treat as
/// round-ending, reported via [`EventSource::overflowed`].
pub struct EventSource {
    events_rx: mpsc::Receiver<RawEvent>,
    overflowed: Arc<AtomicBool>,
    source_gaps: Arc<AtomicU64>,
}

impl EventSource {
    /// Connects to `addr`, authenticates with `auth`, and spawns the
    /// background task that reads and reconnects for as long as the
    /// returned handle is alive.
    pub fn connect(
        addr: SocketAddr,
        auth: SourceAuth,
        reconnect_interval: Duration,
        queue_capacity: usize,
    ) -> Self {
        let (tx, events_rx) = mpsc::channel(queue_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let source_gaps = Arc::new(AtomicU64::new(0));
        tokio::spawn(run(
            addr,
            auth,
            reconnect_interval,
            tx,
            overflowed.clone(),
            source_gaps.clone(),
        ));
        Self {
            events_rx,
            overflowed,
            source_gaps,
        }
    }

    /// Wraps an already-populated channel, for tests and for the
    /// standalone event injector, bypassing the network entirely.
    pub fn from_channel(events_rx: mpsc::Receiver<RawEvent>) -> Self {
        Self {
            events_rx,
            overflowed: Arc::new(AtomicBool::new(false)),
            source_gaps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Waits for the next event. Returns `None` once the source task has
    /// exited and every buffered event has been drained.
    pub async fn recv(&mut self) -> Option<RawEvent> {
        self.events_rx.recv().await
    }

    /// `true` once a counter-affecting event has been dropped because
    /// the queue was full; the caller must end the round.
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Number of reconnects observed so far, each a potential gap in
    /// the events this process could have counted.
    pub fn source_gaps(&self) -> u64 {
        self.source_gaps.load(Ordering::Relaxed)
    }
}

async fn run(
    addr: SocketAddr,
    auth: SourceAuth,
    reconnect_interval: Duration,
    tx: mpsc::Sender<RawEvent>,
    overflowed: Arc<AtomicBool>,
    source_gaps: Arc<AtomicU64>,
) {
    let mut first_attempt = true;
    loop {
        if !first_attempt {
            source_gaps.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(METRICS_ID_DC_SOURCE_GAP).increment(1);
        }
        first_attempt = false;

        let backoff = ConstantBuilder::default().with_delay(reconnect_interval).build();
        let stream = (|| connect_once(addr, &auth))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .notify(|err: &std::io::Error, delay: Duration| {
                warn!(%err, ?delay, "event source unreachable, retrying");
            })
            .await;
        let Ok(stream) = stream else {
            // A fixed-delay backoff with no max-times set never exhausts.
            break;
        };
        info!(%addr, "connected to event source");

        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(event) = parse_event(&line) else {
                        debug!(%line, "unparseable event line, skipping");
                        continue;
                    };
                    let is_ping = event.event_type == "Ping";
                    if is_ping {
                        let _ = tx.try_send(event);
                    } else if tx.try_send(event).is_err() {
                        warn!("event queue full, ending round");
                        overflowed.store(true, Ordering::Relaxed);
                        return;
                    }
                }
                Ok(None) => {
                    warn!("event source closed connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "event source read error");
                    break;
                }
            }
        }
    }
}

async fn connect_once(addr: SocketAddr, auth: &SourceAuth) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    authenticate(&mut stream, auth).await?;
    Ok(stream)
}

async fn authenticate(stream: &mut TcpStream, auth: &SourceAuth) -> std::io::Result<()> {
    let secret = match auth {
        SourceAuth::Password(password) => password.expose_secret().to_owned(),
        SourceAuth::CookieFile(path) => tokio::fs::read_to_string(path).await?.trim().to_owned(),
    };
    stream.write_all(secret.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    Ok(())
}

/// Parses one wire line of the form `EventType field1=value1 field2=value2`
/// into a [`RawEvent`], returning `None` for a blank or malformed line.
fn parse_event(line: &str) -> Option<RawEvent> {
    let mut parts = line.split_whitespace();
    let event_type = parts.next()?.to_string();
    let mut fields = BTreeMap::new();
    for part in parts {
        let (key, value) = part.split_once('=')?;
        fields.insert(key.to_string(), value.to_string());
    }
    Some(RawEvent { event_type, fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_type_and_fields() {
        let event = parse_event("Cell circuit_id=42 relay=guard").unwrap();
        assert_eq!(event.event_type, "Cell");
        assert_eq!(event.fields.get("circuit_id").unwrap(), "42");
        assert_eq!(event.fields.get("relay").unwrap(), "guard");
    }

    #[test]
    fn blank_line_is_not_an_event() {
        assert!(parse_event("").is_none());
    }

    #[test]
    fn field_without_equals_is_malformed() {
        assert!(parse_event("Cell notakeyvalue").is_none());
    }

    #[tokio::test]
    async fn from_channel_delivers_injected_events() {
        let (tx, rx) = mpsc::channel(8);
        let mut source = EventSource::from_channel(rx);
        tx.send(RawEvent {
            event_type: "Cell".into(),
            fields: BTreeMap::new(),
        })
        .await
        .unwrap();
        drop(tx);
        let event = source.recv().await.unwrap();
        assert_eq!(event.event_type, "Cell");
        assert!(source.recv().await.is_none());
        assert!(!source.overflowed());
    }
}
