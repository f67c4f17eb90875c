//! The user-facing connection handle.
//!
//! A [`Connection`] is a cheap, cloneable handle to an actor task that owns the
//! transport and every piece of connection state. All operations are messages
//! to that actor; callers only ever suspend on the returned futures.
//!
//! 面向用户的连接句柄。
//!
//! [`Connection`] 是一个廉价、可克隆的句柄，指向拥有传输实例和全部连接状态的 actor 任务。
//! 所有操作都是发往该 actor 的消息；调用者只会在返回的 future 上挂起。

mod actor;
pub(crate) mod command;
mod event;
mod state;
mod waiters;


pub use event::{ConnectionEvent, EventHandler, EventKind, Subscription};
pub use state::ConnectionState;

use crate::{
    channel::{ChannelProxy, ChannelRequest},
    config::{ConfigLookup, ConnectionConfig},
    error::{Error, Result},
    registry::Queue,
    transport::TransportFactory,
};
use actor::ConnectionActor;
use command::Command;
use event::EventBus;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// A handle to a logical, possibly reconnecting, broker connection.
///
/// 指向一个逻辑上的、可能会重连的代理连接的句柄。
#[derive(Clone)]
pub struct Connection {
    name: Arc<str>,
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("state", &self.current_state())
            .field("events", &self.events)
            .finish()
    }
}

impl Connection {
    /// Creates a connection in the `Disconnected` state and spawns its actor.
    ///
    /// Must be called from within a tokio runtime. No transport is created
    /// until the first `connect` or `get_channel`.
    ///
    /// 创建一个处于 `Disconnected` 状态的连接并派生其 actor。
    /// 必须在 tokio 运行时内调用。在第一次 `connect` 或 `get_channel` 之前不会创建传输实例。
    pub fn new(config: ConnectionConfig, factory: impl TransportFactory) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let events = EventBus::new();
        let name: Arc<str> = Arc::from(config.name.as_str());

        let actor = ConnectionActor::new(
            config,
            Arc::new(factory),
            command_rx,
            state_tx,
            Arc::clone(&events),
        );
        tokio::spawn(actor.run());

        Self {
            name,
            command_tx,
            state_rx,
            events,
        }
    }

    /// Creates a connection from a configuration lookup.
    ///
    /// 从配置查找源创建连接。
    pub fn from_lookup(lookup: &dyn ConfigLookup, factory: impl TransportFactory) -> Result<Self> {
        let config = ConnectionConfig::from_lookup(lookup)?;
        Ok(Self::new(config, factory))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The state the actor most recently entered.
    /// actor 最近进入的状态。
    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Resolves once the connection is `Connected`.
    ///
    /// Returns at once if already connected, joins an attempt in flight, and
    /// otherwise starts a new one. Fails with the error of the attempt.
    ///
    /// 在连接进入 `Connected` 后返回。若已连接则立即返回；若有进行中的尝试则加入；
    /// 否则开始新的尝试。失败时返回该尝试的错误。
    pub async fn connect(&self) -> Result<()> {
        self.request(|response_tx| Command::Connect { response_tx })
            .await?
    }

    /// Acquires a channel, waiting behind connection readiness.
    ///
    /// The returned proxy's channel has already signalled `acquired`. If the
    /// gating attempt fails, so does this call, with the attempt's error.
    ///
    /// 获取一个通道，并在连接就绪之后执行。返回的代理所持有的通道已发出 `acquired` 信号。
    /// 如果所依赖的连接尝试失败，此调用也会以该尝试的错误失败。
    pub async fn get_channel(&self, request: ChannelRequest) -> Result<ChannelProxy> {
        self.request(|response_tx| Command::GetChannel {
            request,
            response_tx,
        })
        .await?
    }

    /// Registers a queue to be released before the transport on close.
    ///
    /// 注册一个队列，在关闭时先于传输实例被释放。
    pub async fn add_queue(&self, queue: Arc<dyn Queue>) -> Result<()> {
        self.request(|response_tx| Command::AddQueue { queue, response_tx })
            .await?
    }

    /// Closes the connection.
    ///
    /// If the link is live every registered queue is released, and all of them
    /// settle before the transport is released. If the link is already lost
    /// the queues are dropped unreleased. The connection ends `Closed` even if
    /// a release fails; the failure is returned. Closing a closed connection
    /// succeeds without doing anything.
    ///
    /// 关闭连接。如果链路存活，则释放所有已注册的队列，并在全部完成后才释放传输实例。
    /// 如果链路已经丢失，则直接丢弃队列而不释放。即使释放失败，连接最终也会处于 `Closed`，
    /// 失败会被返回。关闭已关闭的连接会直接成功。
    pub async fn close(&self) -> Result<()> {
        self.request(|response_tx| Command::Close { response_tx })
            .await?
    }

    /// Resolves the first time `state` is reached, or at once if it is the
    /// current state. Fails with [`Error::Closed`] if the connection closes
    /// first.
    ///
    /// 在第一次到达 `state` 时返回；若当前即为该状态则立即返回。
    /// 若连接先行关闭，则返回 [`Error::Closed`]。
    pub async fn after(&self, state: ConnectionState) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(Command::After { state, response_tx })
            .await
            .map_err(|_| Error::ActorGone)?;
        response_rx.await.map_err(|_| Error::Closed)
    }

    /// Calls `handler` for every event of `kind`.
    ///
    /// Handlers run on the actor task and must not block.
    ///
    /// 对每个 `kind` 类型的事件调用 `handler`。处理器在 actor 任务上运行，不得阻塞。
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.events.register(kind, false, Arc::new(handler))
    }

    /// Calls `handler` for the next event of `kind` only.
    /// 仅对下一个 `kind` 类型的事件调用 `handler`。
    pub fn once<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.events.register(kind, true, Arc::new(handler))
    }

    /// A stream of every event emitted from now on.
    /// 从现在起发出的所有事件的流。
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn remove_all_listeners(&self) {
        self.events.clear();
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|_| Error::ActorGone)?;
        response_rx.await.map_err(|_| Error::ActorGone)
    }
}
