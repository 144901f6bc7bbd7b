//! TCP bus client — newline-delimited JSON frames with reconnect backoff.
//!
//! The client owns a single connection to the broker. A background reader
//! task routes inbound frames: `res` frames complete pending requests, `msg`
//! frames fan out to subscription callbacks, `req` frames are served by
//! registered reply handlers. On connection loss the reader re-dials with
//! the same bounded backoff used at connect time and replays all
//! subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{MessageBus, MessageCallback, ReplyFn};
use crate::error::{BusError, Result};
use crate::frames::Frame;

/// First rung of the reconnect delay ladder (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Ceiling of the reconnect delay ladder (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Hard cap per frame line.
const MAX_LINE_BYTES: usize = 1024 * 1024;

type Writer = FramedWrite<OwnedWriteHalf, LinesCodec>;
type Reader = FramedRead<OwnedReadHalf, LinesCodec>;

struct Inner {
    url: String,
    max_attempts: u32,
    writer: Mutex<Option<Writer>>,
    pending: DashMap<String, oneshot::Sender<Value>>,
    subscriptions: DashMap<String, Vec<(Option<String>, MessageCallback)>>,
    repliers: DashMap<String, ReplyFn>,
    connected: AtomicBool,
    shutdown: AtomicBool,
}

/// TCP [`MessageBus`] client.
pub struct RemoteBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RemoteBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBus")
            .field("url", &self.inner.url)
            .field("connected", &self.inner.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl RemoteBus {
    /// Dial the broker, retrying with exponential backoff up to
    /// `max_attempts` times, then start the reader task.
    pub async fn connect(url: &str, max_attempts: u32) -> Result<Self> {
        let inner = Arc::new(Inner {
            url: url.to_string(),
            max_attempts,
            writer: Mutex::new(None),
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
            repliers: DashMap::new(),
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let reader = dial_with_backoff(&inner).await?;
        tokio::spawn(reader_loop(Arc::clone(&inner), reader));
        info!(url, "connected to message bus");
        Ok(Self { inner })
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        send_frame(&self.inner, frame).await
    }
}

#[async_trait]
impl MessageBus for RemoteBus {
    async fn publish(&self, subject: &str, message: Value) -> Result<()> {
        self.send_frame(Frame::Pub {
            subject: subject.to_string(),
            payload: message,
        })
        .await
    }

    async fn request(&self, subject: &str, message: Value, timeout: Duration) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);

        if let Err(e) = self
            .send_frame(Frame::Req {
                id: id.clone(),
                subject: subject.to_string(),
                payload: message,
            })
            .await
        {
            self.inner.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped — the connection died with the request in flight.
            Ok(Err(_)) => Err(BusError::NotConnected),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(BusError::Timeout {
                    subject: subject.to_string(),
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        callback: MessageCallback,
    ) -> Result<()> {
        self.inner
            .subscriptions
            .entry(subject.to_string())
            .or_default()
            .push((queue.map(String::from), callback));
        self.send_frame(Frame::Sub {
            subject: subject.to_string(),
            queue: queue.map(String::from),
        })
        .await
    }

    async fn reply_handler(&self, subject: &str, handler: ReplyFn) -> Result<()> {
        self.inner.repliers.insert(subject.to_string(), handler);
        self.send_frame(Frame::Sub {
            subject: subject.to_string(),
            queue: None,
        })
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.connected.store(false, Ordering::Release);
        let mut guard = self.inner.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = SinkExt::<String>::close(&mut writer).await;
        }
        info!("disconnected from message bus");
        Ok(())
    }
}

async fn send_frame(inner: &Inner, frame: Frame) -> Result<()> {
    let mut guard = inner.writer.lock().await;
    let writer = guard.as_mut().ok_or(BusError::NotConnected)?;
    writer.send(frame.encode()).await.map_err(codec_err)?;
    Ok(())
}

fn codec_err(e: LinesCodecError) -> BusError {
    match e {
        LinesCodecError::Io(io) => BusError::Io(io),
        LinesCodecError::MaxLineLengthExceeded => {
            BusError::Io(std::io::Error::other("frame exceeds line length cap"))
        }
    }
}

/// Dial with a bounded delay ladder, store the write half, return the
/// reader.
async fn dial_with_backoff(inner: &Arc<Inner>) -> Result<Reader> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match TcpStream::connect(&inner.url).await {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                let writer = FramedWrite::new(
                    write_half,
                    LinesCodec::new_with_max_length(MAX_LINE_BYTES),
                );
                *inner.writer.lock().await = Some(writer);
                inner.connected.store(true, Ordering::Release);
                debug!(url = %inner.url, attempt, "bus connection established");
                return Ok(FramedRead::new(
                    read_half,
                    LinesCodec::new_with_max_length(MAX_LINE_BYTES),
                ));
            }
            Err(e) => {
                if attempt >= inner.max_attempts {
                    return Err(BusError::ConnectFailed {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                let delay = backoff_delay(attempt);
                warn!(
                    url = %inner.url,
                    attempt,
                    max = inner.max_attempts,
                    error = %e,
                    delay_secs = delay.as_secs(),
                    "bus dial failed, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Delay before retry `attempt + 1`: the ladder 5 s, 10 s, 20 s, … capped
/// at 300 s, nudged upward by up to 10 % jitter so a fleet of clients does
/// not re-dial the broker in lockstep.
fn backoff_delay(attempt: u32) -> Duration {
    let rung = attempt.saturating_sub(1).min(6);
    let base = (BACKOFF_BASE_SECS << rung).min(BACKOFF_MAX_SECS);
    Duration::from_secs(base + jitter_for(attempt, base))
}

/// Pseudo-random value in `0..=base_secs / 10`, seeded from the subsecond
/// clock xor-folded with the attempt counter — enough spread for retry
/// staggering without pulling in a rand dependency.
fn jitter_for(attempt: u32, base_secs: u64) -> u64 {
    let span = base_secs / 10;
    if span == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seed = (nanos >> 9) ^ nanos.rotate_left(23) ^ u64::from(attempt).wrapping_mul(0x9e37_79b9);
    seed % (span + 1)
}

/// Drive the connection: route inbound frames, reconnect on loss.
async fn reader_loop(inner: Arc<Inner>, mut reader: Reader) {
    loop {
        match reader.next().await {
            Some(Ok(line)) => match Frame::decode(&line) {
                Ok(frame) => dispatch_frame(&inner, frame),
                Err(e) => warn!(error = %e, "discarding undecodable frame"),
            },
            Some(Err(e)) => {
                warn!(error = %e, "bus read error");
                if !recover(&inner, &mut reader).await {
                    return;
                }
            }
            None => {
                if !recover(&inner, &mut reader).await {
                    return;
                }
            }
        }
    }
}

fn dispatch_frame(inner: &Arc<Inner>, frame: Frame) {
    match frame {
        Frame::Res { id, payload } => {
            if let Some((_, tx)) = inner.pending.remove(&id) {
                let _ = tx.send(payload);
            }
        }
        Frame::Msg { subject, payload } => {
            // Snapshot callbacks so one may re-enter the bus.
            let callbacks: Vec<MessageCallback> = inner
                .subscriptions
                .get(&subject)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            for callback in callbacks {
                callback(payload.clone());
            }
        }
        Frame::Req { id, subject, payload } => {
            let handler = inner.repliers.get(&subject).map(|h| h.clone());
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let reply = match handler {
                    Some(handler) => handler(payload).await,
                    None => json!({ "error": format!("no handler for subject: {subject}") }),
                };
                if let Err(e) = send_frame(&inner, Frame::Res { id, payload: reply }).await {
                    warn!(error = %e, "failed to send reply frame");
                }
            });
        }
        // pub/sub frames flow client → broker only.
        Frame::Pub { subject, .. } | Frame::Sub { subject, .. } => {
            debug!(subject, "ignoring outbound-only frame from broker");
        }
    }
}

/// Reconnect after a lost connection. Returns false when the loop should end
/// (explicit disconnect, or retries exhausted).
async fn recover(inner: &Arc<Inner>, reader: &mut Reader) -> bool {
    inner.connected.store(false, Ordering::Release);
    inner.writer.lock().await.take();
    // In-flight requests cannot complete — drop their senders.
    inner.pending.clear();

    if inner.shutdown.load(Ordering::Acquire) {
        return false;
    }

    warn!(url = %inner.url, "bus connection lost, reconnecting");
    match dial_with_backoff(inner).await {
        Ok(new_reader) => {
            *reader = new_reader;
            replay_subscriptions(inner).await;
            info!(url = %inner.url, "bus connection restored");
            true
        }
        Err(e) => {
            error!(error = %e, "bus reconnect failed, giving up");
            false
        }
    }
}

/// Re-announce every subscription and reply endpoint on a fresh connection.
async fn replay_subscriptions(inner: &Arc<Inner>) {
    let mut frames: Vec<Frame> = Vec::new();
    for entry in inner.subscriptions.iter() {
        for (queue, _) in entry.value() {
            frames.push(Frame::Sub {
                subject: entry.key().clone(),
                queue: queue.clone(),
            });
        }
    }
    for entry in inner.repliers.iter() {
        frames.push(Frame::Sub {
            subject: entry.key().clone(),
            queue: None,
        });
    }
    for frame in frames {
        if let Err(e) = send_frame(inner, frame).await {
            warn!(error = %e, "failed to replay subscription");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::net::TcpListener;

    /// Minimal single-client broker: answers `req` with an echo reply and
    /// mirrors `pub` frames back as `msg` when the client has subscribed.
    async fn spawn_broker() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = FramedRead::new(read_half, LinesCodec::new());
            let mut writer = FramedWrite::new(write_half, LinesCodec::new());
            let mut subscribed: Vec<String> = Vec::new();

            while let Some(Ok(line)) = reader.next().await {
                match Frame::decode(&line).unwrap() {
                    Frame::Req { id, payload, .. } => {
                        let frame = Frame::Res {
                            id,
                            payload: json!({ "echo": payload }),
                        };
                        writer.send(frame.encode()).await.unwrap();
                    }
                    Frame::Sub { subject, .. } => subscribed.push(subject),
                    Frame::Pub { subject, payload } => {
                        if subscribed.contains(&subject) {
                            let frame = Frame::Msg { subject, payload };
                            writer.send(frame.encode()).await.unwrap();
                        }
                    }
                    _ => {}
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn request_reply_roundtrip() {
        let addr = spawn_broker().await;
        let bus = RemoteBus::connect(&addr, 1).await.unwrap();

        let reply = bus
            .request("svc.echo", json!({"n": 7}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(reply["echo"]["n"], 7);
    }

    #[tokio::test]
    async fn subscribed_messages_reach_callback() {
        let addr = spawn_broker().await;
        let bus = RemoteBus::connect(&addr, 1).await.unwrap();

        let hits = Arc::new(AtomicU32::new(0));
        let hits_cb = hits.clone();
        bus.subscribe(
            "conversation.t",
            None,
            Arc::new(move |msg| {
                assert_eq!(msg["type"], "music_result");
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        bus.publish("conversation.t", json!({"type": "music_result"}))
            .await
            .unwrap();

        // The mirror travels broker → client asynchronously.
        for _ in 0..50 {
            if hits.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("message never delivered");
    }

    #[test]
    fn backoff_ladder_doubles_and_caps_with_bounded_jitter() {
        for (attempt, base) in [(1u32, 5u64), (2, 10), (3, 20), (6, 160), (7, 300), (12, 300)] {
            let secs = backoff_delay(attempt).as_secs();
            assert!(
                secs >= base && secs <= base + base / 10,
                "attempt {attempt}: got {secs}s for base {base}s"
            );
        }
    }

    #[tokio::test]
    async fn connect_to_dead_broker_fails_bounded() {
        let err = RemoteBus::connect("127.0.0.1:1", 1).await.unwrap_err();
        assert!(matches!(err, BusError::ConnectFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn request_after_disconnect_is_refused() {
        let addr = spawn_broker().await;
        let bus = RemoteBus::connect(&addr, 1).await.unwrap();
        bus.disconnect().await.unwrap();
        let err = bus
            .request("svc.echo", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotConnected));
    }
}
