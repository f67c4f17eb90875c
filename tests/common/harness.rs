//! tests/common/harness.rs
use async_trait::async_trait;
use broker_link::{
    BrokerChannel, ChannelEvent, Connection, ConnectionConfig, Error, Queue, Result, Transport,
    TransportEvent, TransportEventSink,
};
use std::sync::{
    Arc, Mutex, Once,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::broadcast;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "broker_link=debug,lifecycle=info".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// Ordered record of everything released during a test.
#[derive(Clone, Default)]
pub struct Ledger(Arc<Mutex<Vec<String>>>);

impl Ledger {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// A channel that is usable as soon as it is created.
pub struct LoopbackChannel {
    ledger: Ledger,
    events: broadcast::Sender<ChannelEvent>,
}

#[async_trait]
impl BrokerChannel for LoopbackChannel {
    async fn acquired(&self) -> Result<()> {
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn release(&self) -> Result<bool> {
        self.ledger.push("channel");
        let _ = self.events.send(ChannelEvent::Released);
        Ok(true)
    }
}

/// A transport that connects at once and can be told to drop its link.
pub struct LoopbackTransport {
    sink: TransportEventSink,
    ledger: Ledger,
}

impl LoopbackTransport {
    pub fn drop_link(&self) {
        self.sink.raise(TransportEvent::Closed);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn acquire(&self) -> Result<()> {
        self.sink.raise(TransportEvent::Acquiring);
        Ok(())
    }

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let (events, _) = broadcast::channel(8);
        Ok(Arc::new(LoopbackChannel {
            ledger: self.ledger.clone(),
            events,
        }))
    }

    async fn create_confirm_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.create_channel().await
    }

    async fn release(&self) -> Result<bool> {
        self.ledger.push("transport");
        Ok(true)
    }
}

/// A queue that records its release in the ledger.
pub struct LedgerQueue {
    pub name: String,
    pub ledger: Ledger,
    pub releases: AtomicUsize,
}

impl LedgerQueue {
    pub fn new(name: &str, ledger: &Ledger) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ledger: ledger.clone(),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Queue for LedgerQueue {
    async fn release(&self) -> Result<bool> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.ledger.push(format!("queue:{}", self.name));
        Ok(true)
    }
}

/// A connection over loopback transports, plus handles to inspect them.
pub struct TestHarness {
    pub connection: Connection,
    pub ledger: Ledger,
    pub transports: Arc<Mutex<Vec<Arc<LoopbackTransport>>>>,
}

impl TestHarness {
    pub fn new(name: &str) -> Self {
        init_tracing();
        let ledger = Ledger::default();
        let transports: Arc<Mutex<Vec<Arc<LoopbackTransport>>>> = Arc::default();

        let factory_ledger = ledger.clone();
        let factory_transports = transports.clone();
        let factory = move |sink: TransportEventSink| -> Result<Arc<dyn Transport>> {
            let transport = Arc::new(LoopbackTransport {
                sink,
                ledger: factory_ledger.clone(),
            });
            factory_transports.lock().unwrap().push(transport.clone());
            Ok(transport)
        };

        let connection = Connection::new(ConnectionConfig::named(name), factory);
        Self {
            connection,
            ledger,
            transports,
        }
    }

    pub fn latest(&self) -> Arc<LoopbackTransport> {
        self.transports.lock().unwrap().last().cloned().unwrap()
    }

    pub fn created(&self) -> usize {
        self.transports.lock().unwrap().len()
    }
}

#[allow(dead_code)]
pub fn is_closed(err: &Error) -> bool {
    matches!(err, Error::Closed | Error::Closing)
}
