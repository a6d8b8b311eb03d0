use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::types::Environment;

const DERIBIT_WS_LIVE: &str = "wss://www.deribit.com/ws/api/v2";
const DERIBIT_WS_TESTNET: &str = "wss://test.deribit.com/ws/api/v2";

const RECONNECT_DELAY_SECS: u64 = 5;
/// Per-instrument fan-out buffer; a slow consumer loses its oldest ticks,
/// never back-pressures the socket reader.
const SUBSCRIBER_BUFFER: usize = 256;

/// One public ticker event as delivered to executors.
#[derive(Debug, Clone)]
pub struct TickerUpdate {
    pub instrument: String,
    pub last_price: Decimal,
    pub timestamp_ms: i64,
}

/// Returned when the receiving end of a tick channel is gone.
#[derive(Debug)]
pub struct TickSendError;

struct TickShared {
    queue: std::sync::Mutex<VecDeque<TickerUpdate>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

/// Bounded single-consumer tick channel that evicts its oldest entry on
/// overflow, so a lagging consumer always wakes to the freshest prices
/// instead of a stale backlog.
pub fn tick_channel(capacity: usize) -> (TickSender, TickReceiver) {
    let shared = Arc::new(TickShared {
        queue: std::sync::Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        capacity: capacity.max(1),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
    });
    (
        TickSender {
            shared: Arc::clone(&shared),
        },
        TickReceiver { shared },
    )
}

pub struct TickSender {
    shared: Arc<TickShared>,
}

impl TickSender {
    /// Queues an update, dropping the oldest queued one when the buffer is
    /// full. Returns `true` when an eviction happened so the caller can log
    /// the overflow.
    pub fn send(&self, update: TickerUpdate) -> Result<bool, TickSendError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TickSendError);
        }
        let evicted = {
            let mut queue = self.shared.queue.lock().expect("tick queue poisoned");
            let evicted = if queue.len() >= self.shared.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(update);
            evicted
        };
        self.shared.notify.notify_one();
        Ok(evicted)
    }
}

impl Drop for TickSender {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

pub struct TickReceiver {
    shared: Arc<TickShared>,
}

impl TickReceiver {
    /// Waits for the next update, draining oldest-first. Returns `None`
    /// once the sender is gone and the buffer is empty. Cancel-safe: a
    /// cancelled wait leaves queued updates in place.
    pub async fn recv(&mut self) -> Option<TickerUpdate> {
        loop {
            if let Some(update) = self
                .shared
                .queue
                .lock()
                .expect("tick queue poisoned")
                .pop_front()
            {
                return Some(update);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }
}

impl Drop for TickReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Anything that can hand out per-instrument ticker channels. The live
/// implementation is the Deribit WebSocket feed; tests push ticks by hand.
#[async_trait]
pub trait TickerSource: Send + Sync {
    async fn subscribe(&self, instrument: &str) -> TickReceiver;
}

type SubscriberMap = Arc<Mutex<HashMap<String, Vec<TickSender>>>>;

/// Reconnecting ticker feed for one Deribit connection.
///
/// A single socket-reader task demultiplexes `ticker.*` notifications to
/// per-instrument subscriber channels. Dropped receivers are pruned lazily;
/// on reconnect every known instrument is resubscribed.
pub struct DeribitTickerStream {
    subscribers: SubscriberMap,
    subscribe_tx: mpsc::UnboundedSender<String>,
}

impl DeribitTickerStream {
    /// Spawns the socket task and returns the stream handle.
    pub fn spawn(environment: Environment) -> Self {
        let url = match environment {
            Environment::Live => DERIBIT_WS_LIVE,
            Environment::Testnet => DERIBIT_WS_TESTNET,
        };

        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();

        let task_subscribers = Arc::clone(&subscribers);
        tokio::spawn(run_feed(url.to_string(), task_subscribers, subscribe_rx));

        Self {
            subscribers,
            subscribe_tx,
        }
    }
}

#[async_trait]
impl TickerSource for DeribitTickerStream {
    /// Registers interest in an instrument's ticker channel and returns the
    /// receiving end for it. Multiple subscribers per instrument are fine.
    async fn subscribe(&self, instrument: &str) -> TickReceiver {
        let (tx, rx) = tick_channel(SUBSCRIBER_BUFFER);
        {
            let mut map = self.subscribers.lock().await;
            map.entry(instrument.to_string()).or_default().push(tx);
        }
        // The socket task issues (or re-issues) the subscribe frame.
        let _ = self.subscribe_tx.send(instrument.to_string());
        rx
    }
}

async fn run_feed(
    url: String,
    subscribers: SubscriberMap,
    mut subscribe_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        match run_connection(&url, &subscribers, &mut subscribe_rx).await {
            Ok(()) => warn!("ticker feed closed, reconnecting"),
            Err(err) => error!("ticker feed error: {}, reconnecting", err),
        }
        tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }
}

async fn run_connection(
    url: &str,
    subscribers: &SubscriberMap,
    subscribe_rx: &mut mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();
    info!("ticker feed connected: {}", url);

    // Resubscribe everything we already track.
    let known: Vec<String> = {
        let map = subscribers.lock().await;
        map.keys().cloned().collect()
    };
    if !known.is_empty() {
        write
            .send(Message::Text(subscribe_frame(&known).to_string()))
            .await?;
    }

    loop {
        tokio::select! {
            Some(instrument) = subscribe_rx.recv() => {
                write
                    .send(Message::Text(subscribe_frame(&[instrument]).to_string()))
                    .await?;
            }
            message = read.next() => {
                let message = match message {
                    Some(m) => m?,
                    None => return Ok(()),
                };
                match message {
                    Message::Text(text) => {
                        if let Some(update) = parse_ticker_notification(&text) {
                            dispatch(subscribers, update).await;
                        }
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

fn subscribe_frame(instruments: &[impl AsRef<str>]) -> Value {
    let channels: Vec<String> = instruments
        .iter()
        .map(|i| format!("ticker.{}.100ms", i.as_ref()))
        .collect();
    json!({
        "jsonrpc": "2.0",
        "method": "public/subscribe",
        "params": { "channels": channels }
    })
}

fn parse_ticker_notification(text: &str) -> Option<TickerUpdate> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value["method"].as_str() != Some("subscription") {
        return None;
    }

    let channel = value["params"]["channel"].as_str()?;
    let instrument = channel.strip_prefix("ticker.")?.rsplit_once('.')?.0;

    let data = &value["params"]["data"];
    let last_price = Decimal::try_from(data["last_price"].as_f64()?).ok()?;
    let timestamp_ms = data["timestamp"].as_i64()?;

    Some(TickerUpdate {
        instrument: instrument.to_string(),
        last_price,
        timestamp_ms,
    })
}

async fn dispatch(subscribers: &SubscriberMap, update: TickerUpdate) {
    let mut map = subscribers.lock().await;
    let Some(senders) = map.get_mut(&update.instrument) else {
        return;
    };

    senders.retain(|tx| match tx.send(update.clone()) {
        Ok(false) => true,
        Ok(true) => {
            warn!(
                "ticker buffer full for {}, dropped oldest tick",
                update.instrument
            );
            true
        }
        Err(TickSendError) => {
            debug!("ticker subscriber for {} gone", update.instrument);
            false
        }
    });

    if senders.is_empty() {
        map.remove(&update.instrument);
    }
}
