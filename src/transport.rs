//! Traits for abstracting over the broker transport.
//!
//! The connection never builds a transport itself. It asks an injected
//! [`TransportFactory`] for a new instance on every connect attempt and hands it
//! a [`TransportEventSink`] bound to that attempt's generation, so events from a
//! superseded instance can be recognised and dropped.
//!
//! 用于抽象代理传输层的 trait。
//!
//! 连接从不自行构建传输实例。每次连接尝试时，它都会向注入的 [`TransportFactory`]
//! 请求一个新实例，并传入绑定到该尝试代数的 [`TransportEventSink`]，
//! 从而可以识别并丢弃来自已被取代实例的事件。

use crate::{connection::command::Internal, error::Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// Monotonically increasing tag identifying one transport instance.
/// 标识一个传输实例的单调递增标签。
pub type Generation = u64;

/// Lifecycle events a transport raises.
/// 传输层触发的生命周期事件。
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport started acquiring a link.
    /// 传输层开始获取链路。
    Acquiring,
    /// The link is up.
    /// 链路已建立。
    Acquired,
    /// The attempt or the link failed.
    /// 尝试或链路失败。
    Failed(crate::error::Error),
    /// The transport was released underneath the connection.
    /// 传输层在连接之下被释放。
    Released,
    /// The link was lost.
    /// 链路丢失。
    Closed,
}

/// A handle a transport uses to raise events towards its owning connection.
///
/// 传输层用于向其所属连接触发事件的句柄。
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<Internal>,
}

impl TransportEventSink {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<Internal>) -> Self {
        Self { generation, tx }
    }

    /// The generation this sink is bound to.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Raises an event. Returns `false` if the connection is gone.
    ///
    /// 触发一个事件。如果连接已不存在则返回 `false`。
    pub fn raise(&self, event: TransportEvent) -> bool {
        trace!(generation = self.generation, ?event, "Transport raised event");
        self.tx
            .send(Internal::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Events a broker channel raises over its lifetime.
/// 代理通道在其生命周期内触发的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel finished its handshake.
    /// 通道完成握手。
    Acquired,
    /// The broker reported an error on the channel.
    /// 代理报告了通道上的错误。
    Failed(crate::error::Error),
    /// The broker closed the channel.
    /// 代理关闭了通道。
    Closed,
    /// The channel was released by its owner.
    /// 通道被其所有者释放。
    Released,
}

/// One channel on a broker link.
///
/// 代理链路上的一个通道。
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Resolves once the channel has finished its own handshake.
    /// 在通道完成自身握手后返回。
    async fn acquired(&self) -> Result<()>;

    /// A stream of this channel's events from now on.
    /// 从此刻起该通道的事件流。
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Releases the channel.
    /// 释放通道。
    async fn release(&self) -> Result<bool>;
}

/// One physical connection attempt to a broker.
///
/// 到代理的一次物理连接尝试。
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Drives the connect attempt. `Ok` counts as the link being acquired.
    /// 驱动连接尝试。返回 `Ok` 视为链路已获取。
    async fn acquire(&self) -> Result<()>;

    /// Creates a plain channel.
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>>;

    /// Creates a channel with publisher confirms enabled.
    async fn create_confirm_channel(&self) -> Result<Arc<dyn BrokerChannel>>;

    /// Releases the link.
    /// 释放链路。
    async fn release(&self) -> Result<bool>;
}

/// Produces a fresh transport for each connect attempt.
///
/// 为每次连接尝试生成新的传输实例。
pub trait TransportFactory: Send + Sync + 'static {
    /// Creates a transport that raises its events through `sink`.
    /// 创建一个通过 `sink` 触发事件的传输实例。
    fn create(&self, sink: TransportEventSink) -> Result<Arc<dyn Transport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(TransportEventSink) -> Result<Arc<dyn Transport>> + Send + Sync + 'static,
{
    fn create(&self, sink: TransportEventSink) -> Result<Arc<dyn Transport>> {
        self(sink)
    }
}
