//! Connection events and their subscribers.
//!
//! 连接事件及其订阅者。

use crate::error::Error;
use dashmap::DashMap;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::broadcast;

/// An event emitted by a connection.
/// 连接发出的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt began.
    /// 连接尝试开始。
    Connecting,
    /// The first successful transition into `Connected`.
    /// 第一次成功进入 `Connected`。
    Connected,
    /// Any later successful transition into `Connected`.
    /// 之后任何一次成功进入 `Connected`。
    Reconnected,
    /// A connect attempt failed.
    /// 连接尝试失败。
    Failed {
        error: Error,
        /// The message reported by the transport or channel, when the failure
        /// came from one. `None` for timeouts and other local causes.
        /// 当失败来自传输层或通道时，为其报告的消息；超时等本地原因为 `None`。
        message: Option<String>,
    },
    /// The connection closed for good.
    /// 连接已永久关闭。
    Closed,
}

/// Payload-free discriminant of [`ConnectionEvent`], used to subscribe.
/// [`ConnectionEvent`] 的无负载判别值，用于订阅。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connecting,
    Connected,
    Reconnected,
    Failed,
    Closed,
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connecting => EventKind::Connecting,
            ConnectionEvent::Connected => EventKind::Connected,
            ConnectionEvent::Reconnected => EventKind::Reconnected,
            ConnectionEvent::Failed { .. } => EventKind::Failed,
            ConnectionEvent::Closed => EventKind::Closed,
        }
    }

    pub(crate) fn failed(error: Error) -> Self {
        let message = match &error {
            Error::TransportFailure { message } | Error::ChannelCreation { message } => {
                Some(message.clone())
            }
            _ => None,
        };
        ConnectionEvent::Failed { error, message }
    }
}

/// 事件监听器类型定义
/// Event listener type definition
pub type EventHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

struct Listener {
    kind: EventKind,
    once: bool,
    handler: EventHandler,
}

/// Multi-consumer event fan-out.
///
/// Handlers run on the connection's actor task, in registration order.
///
/// 多消费者事件分发。处理器在连接的 actor 任务上按注册顺序运行。
pub(crate) struct EventBus {
    listeners: DashMap<u64, Listener>,
    next_id: AtomicU64,
    stream: broadcast::Sender<ConnectionEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners_count", &self.listeners.len())
            .field("stream_receivers", &self.stream.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub(crate) fn new() -> Arc<Self> {
        let (stream, _) = broadcast::channel(64);
        Arc::new(Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(0),
            stream,
        })
    }

    pub(crate) fn register(
        self: &Arc<Self>,
        kind: EventKind,
        once: bool,
        handler: EventHandler,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, Listener { kind, once, handler });
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.stream.subscribe()
    }

    pub(crate) fn clear(&self) {
        self.listeners.clear();
    }

    /// Delivers `event` to every matching handler and to stream subscribers.
    ///
    /// Handlers are called without holding any map guard, so a handler may
    /// register or remove listeners itself. A `once` listener is removed before
    /// it runs and therefore fires at most one time.
    ///
    /// 将 `event` 传递给所有匹配的处理器和流订阅者。调用处理器时不持有任何映射锁，
    /// 因此处理器可以自行注册或移除监听器。`once` 监听器在运行前被移除，因此最多触发一次。
    pub(crate) fn emit(&self, event: ConnectionEvent) {
        let kind = event.kind();
        let mut ids: Vec<u64> = self
            .listeners
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();

        for id in ids {
            let once = match self.listeners.get(&id) {
                Some(listener) => listener.once,
                None => continue,
            };
            let handler = if once {
                self.listeners.remove(&id).map(|(_, listener)| listener.handler)
            } else {
                self.listeners
                    .get(&id)
                    .map(|listener| Arc::clone(&listener.handler))
            };
            if let Some(handler) = handler {
                handler(&event);
            }
        }

        // No stream subscribers is not an error.
        let _ = self.stream.send(event);
    }
}

/// Handle returned by `on`/`once`; `off` unsubscribes.
///
/// `on`/`once` 返回的句柄；调用 `off` 取消订阅。
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Removes the handler. Returns `false` if it was already gone.
    /// 移除处理器。如果已被移除则返回 `false`。
    pub fn off(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.listeners.remove(&self.id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_failed_message_only_carries_transport_text() {
        match ConnectionEvent::failed(Error::transport("broker went away")) {
            ConnectionEvent::Failed { message, .. } => {
                assert_eq!(message.as_deref(), Some("broker went away"))
            }
            other => panic!("unexpected event {other:?}"),
        }
        match ConnectionEvent::failed(Error::ConnectTimeout) {
            ConnectionEvent::Failed { error, message } => {
                assert_eq!(error, Error::ConnectTimeout);
                assert_eq!(message, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn counter(bus: &Arc<EventBus>, kind: EventKind, once: bool) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus.register(
            kind,
            once,
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (count, sub)
    }

    #[test]
    fn test_on_receives_every_matching_event() {
        let bus = EventBus::new();
        let (connected, _sub) = counter(&bus, EventKind::Connected, false);
        let (closed, _sub2) = counter(&bus, EventKind::Closed, false);

        bus.emit(ConnectionEvent::Connected);
        bus.emit(ConnectionEvent::Connected);
        bus.emit(ConnectionEvent::Reconnected);

        assert_eq!(connected.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let bus = EventBus::new();
        let (count, sub) = counter(&bus, EventKind::Connecting, true);

        bus.emit(ConnectionEvent::Connecting);
        bus.emit(ConnectionEvent::Connecting);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!sub.off());
    }

    #[test]
    fn test_off_unsubscribes() {
        let bus = EventBus::new();
        let (count, sub) = counter(&bus, EventKind::Connecting, false);

        bus.emit(ConnectionEvent::Connecting);
        assert!(sub.off());
        bus.emit(ConnectionEvent::Connecting);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_register_listeners_while_emitting() {
        let bus = EventBus::new();
        let (count, _) = counter(&bus, EventKind::Closed, false);
        let inner_bus = Arc::clone(&bus);
        bus.register(
            EventKind::Connected,
            true,
            Arc::new(move |_| {
                let _ = inner_bus.register(EventKind::Connected, false, Arc::new(|_| {}));
            }),
        );

        bus.emit(ConnectionEvent::Connected);
        bus.emit(ConnectionEvent::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_subscribers_see_payload() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ConnectionEvent::failed(Error::ConnectTimeout));

        match rx.recv().await.unwrap() {
            ConnectionEvent::Failed { error, message } => {
                assert_eq!(error, Error::ConnectTimeout);
                assert_eq!(message.as_deref(), Some("connection attempt timed out"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
