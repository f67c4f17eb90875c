//! 测试辅助工具模块
//! Test utilities module
//!
//! Scriptable stand-ins for the transport, its channels and registered queues.

#![cfg(test)]

use crate::{
    error::{Error, Result},
    registry::Queue,
    transport::{
        BrokerChannel, ChannelEvent, Transport, TransportEvent, TransportEventSink,
        TransportFactory,
    },
};
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex, Once,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "broker_link=debug".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Shared, ordered record of releases across mocks.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(journal: &Option<Journal>, entry: &str) {
    if let Some(journal) = journal {
        journal.lock().unwrap().push(entry.to_string());
    }
}

/// How a mock transport's `acquire` behaves.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireMode {
    /// Never resolves; the test raises events by hand.
    Pending,
    Succeed,
    Fail(String),
}

pub struct MockChannel {
    ready: watch::Sender<bool>,
    events: broadcast::Sender<ChannelEvent>,
    releases: AtomicUsize,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            ready,
            events,
            releases: AtomicUsize::new(0),
        })
    }

    pub fn signal_acquired(&self) {
        self.ready.send_replace(true);
        self.emit(ChannelEvent::Acquired);
    }

    /// Raises an event as the broker would.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn acquired(&self) -> Result<()> {
        let mut rx = self.ready.subscribe();
        let ready = rx.wait_for(|ready| *ready).await.is_ok();
        if ready {
            Ok(())
        } else {
            Err(Error::transport("channel dropped"))
        }
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn release(&self) -> Result<bool> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.emit(ChannelEvent::Released);
        Ok(true)
    }
}

pub struct MockTransport {
    sink: Mutex<Option<TransportEventSink>>,
    acquire: AcquireMode,
    channel: Mutex<Option<Arc<MockChannel>>>,
    channel_error: Mutex<Option<String>>,
    journal: Option<Journal>,
    plain: AtomicUsize,
    confirm: AtomicUsize,
    releases: AtomicUsize,
}

impl MockTransport {
    fn build(acquire: AcquireMode, sink: Option<TransportEventSink>, journal: Option<Journal>) -> Self {
        Self {
            sink: Mutex::new(sink),
            acquire,
            channel: Mutex::new(None),
            channel_error: Mutex::new(None),
            journal,
            plain: AtomicUsize::new(0),
            confirm: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// A standalone transport without a connection behind it.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(AcquireMode::Pending, None, None))
    }

    pub fn with_channel(channel: Arc<MockChannel>) -> Arc<Self> {
        let transport = Self::new();
        *transport.channel.lock().unwrap() = Some(channel);
        transport
    }

    pub fn reject_channels(&self, message: &str) {
        *self.channel_error.lock().unwrap() = Some(message.to_string());
    }

    /// Raises an event towards the owning connection.
    pub fn raise(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.raise(event);
        }
    }

    pub fn generation(&self) -> u64 {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .map(|sink| sink.generation())
            .unwrap_or_default()
    }

    pub fn plain_channels(&self) -> usize {
        self.plain.load(Ordering::SeqCst)
    }

    pub fn confirm_channels(&self) -> usize {
        self.confirm.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn next_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        if let Some(message) = self.channel_error.lock().unwrap().clone() {
            return Err(Error::transport(message));
        }
        let channel = self
            .channel
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| {
                let channel = MockChannel::new();
                channel.signal_acquired();
                channel
            });
        Ok(channel)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn acquire(&self) -> Result<()> {
        self.raise(TransportEvent::Acquiring);
        match &self.acquire {
            AcquireMode::Pending => std::future::pending().await,
            AcquireMode::Succeed => Ok(()),
            AcquireMode::Fail(message) => Err(Error::transport(message)),
        }
    }

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.plain.fetch_add(1, Ordering::SeqCst);
        self.next_channel()
    }

    async fn create_confirm_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.confirm.fetch_add(1, Ordering::SeqCst);
        self.next_channel()
    }

    async fn release(&self) -> Result<bool> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        record(&self.journal, "transport");
        Ok(true)
    }
}

/// Builds a fresh `MockTransport` per connect attempt and remembers them all.
#[derive(Default)]
pub struct MockFactory {
    acquire: Mutex<Option<AcquireMode>>,
    channel: Mutex<Option<Arc<MockChannel>>>,
    channel_error: Mutex<Option<String>>,
    create_error: Mutex<Option<String>>,
    journal: Mutex<Option<Journal>>,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn new(acquire: AcquireMode) -> Arc<Self> {
        let factory = Arc::new(Self::default());
        factory.set_acquire(acquire);
        factory
    }

    pub fn set_acquire(&self, acquire: AcquireMode) {
        *self.acquire.lock().unwrap() = Some(acquire);
    }

    pub fn set_channel(&self, channel: Arc<MockChannel>) {
        *self.channel.lock().unwrap() = Some(channel);
    }

    pub fn reject_channels(&self, message: &str) {
        *self.channel_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_create(&self, message: &str) {
        *self.create_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_journal(&self, journal: Journal) {
        *self.journal.lock().unwrap() = Some(journal);
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        self.created.lock().unwrap().last().cloned().unwrap()
    }
}

/// Lets tests keep an `Arc<MockFactory>` while the connection owns a clone.
pub struct SharedFactory(pub Arc<MockFactory>);

impl TransportFactory for SharedFactory {
    fn create(&self, sink: TransportEventSink) -> Result<Arc<dyn Transport>> {
        let factory = &self.0;
        if let Some(message) = factory.create_error.lock().unwrap().clone() {
            return Err(Error::transport(message));
        }
        let acquire = factory
            .acquire
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(AcquireMode::Pending);
        let journal = factory.journal.lock().unwrap().clone();
        let transport = Arc::new(MockTransport::build(acquire, Some(sink), journal));
        *transport.channel.lock().unwrap() = factory.channel.lock().unwrap().clone();
        *transport.channel_error.lock().unwrap() = factory.channel_error.lock().unwrap().clone();
        factory.created.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

pub struct MockQueue {
    releases: AtomicUsize,
    error: Option<String>,
    delay: Duration,
    gate: Option<Arc<Notify>>,
    journal: Option<Journal>,
}

impl MockQueue {
    fn build(error: Option<String>, delay: Duration, gate: Option<Arc<Notify>>, journal: Option<Journal>) -> Arc<Self> {
        Arc::new(Self {
            releases: AtomicUsize::new(0),
            error,
            delay,
            gate,
            journal,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(None, Duration::ZERO, None, None)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::build(Some(message.to_string()), Duration::ZERO, None, None)
    }

    /// Records into `journal` after sleeping for `delay`.
    pub fn recording(journal: Journal, delay: Duration) -> Arc<Self> {
        Self::build(None, delay, None, Some(journal))
    }

    /// Blocks in `release` until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Self::build(None, Duration::ZERO, Some(gate), None)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Queue for MockQueue {
    async fn release(&self) -> Result<bool> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        record(&self.journal, "queue");
        match &self.error {
            Some(message) => Err(Error::transport(message)),
            None => Ok(true),
        }
    }
}
