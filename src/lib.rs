#![deny(clippy::expect_used, clippy::unwrap_used)]

//! Connection lifecycle core for a message-broker client.
//! 消息代理客户端的连接生命周期核心。
//!
//! A [`Connection`] manages one logical broker link on top of an injected
//! [`TransportFactory`]: it sequences connect, reconnect, fail and close,
//! hands out channels once the link is ready, and drains registered queues
//! before the transport is released.
//!
//! [`Connection`] 在注入的 [`TransportFactory`] 之上管理一个逻辑代理链路：
//! 它负责连接、重连、失败和关闭的顺序，在链路就绪后分发通道，并在释放传输实例前排空已注册的队列。

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod transport;

mod testing;

pub use channel::{ChannelProxy, ChannelRequest};
pub use config::{ConfigLookup, ConnectionConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionState, EventKind, Subscription};
pub use error::{Error, Result};
pub use registry::Queue;
pub use transport::{
    BrokerChannel, ChannelEvent, Generation, Transport, TransportEvent, TransportEventSink,
    TransportFactory,
};
