//! Channel acquisition on top of a connected transport.
//!
//! 在已连接的传输层之上获取通道。

use crate::{
    error::{Error, Result},
    transport::{BrokerChannel, ChannelEvent, Transport},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::broadcast;
use tracing::debug;

/// Parameters of a `get_channel` call.
///
/// `get_channel` 调用的参数。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRequest {
    pub name: Option<String>,
    pub confirm: bool,
    pub description: Option<String>,
}

impl ChannelRequest {
    /// A plain channel request with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Requests a confirm channel.
    pub fn confirm(mut self) -> Self {
        self.confirm = true;
        self
    }

    /// Attaches a description used in logs.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Owner of one acquired channel. The caller releases it independently of the
/// connection's own lifecycle.
///
/// 一个已获取通道的所有者。调用者可以独立于连接自身的生命周期释放它。
pub struct ChannelProxy {
    request: ChannelRequest,
    channel: Arc<dyn BrokerChannel>,
    released: AtomicBool,
}

impl std::fmt::Debug for ChannelProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelProxy")
            .field("request", &self.request)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChannelProxy {
    /// Creates a channel on `transport` and waits for it to signal `acquired`.
    ///
    /// A create call that returns is not enough; the proxy is only handed out
    /// after the channel itself reports that it is usable.
    ///
    /// 在 `transport` 上创建通道并等待其发出 `acquired` 信号。
    /// 仅当通道自身报告可用后才返回代理。
    pub(crate) async fn acquire(
        transport: Arc<dyn Transport>,
        request: ChannelRequest,
    ) -> Result<Self> {
        let created = if request.confirm {
            transport.create_confirm_channel().await
        } else {
            transport.create_channel().await
        };
        let channel = created.map_err(|e| Error::ChannelCreation {
            message: e.to_string(),
        })?;
        channel.acquired().await.map_err(|e| Error::ChannelCreation {
            message: e.to_string(),
        })?;
        debug!(
            name = request.name.as_deref().unwrap_or(""),
            confirm = request.confirm,
            description = request.description.as_deref().unwrap_or(""),
            "Channel acquired"
        );
        Ok(Self {
            request,
            channel,
            released: AtomicBool::new(false),
        })
    }

    /// The channel's name, if one was requested.
    pub fn name(&self) -> Option<&str> {
        self.request.name.as_deref()
    }

    /// Whether this is a confirm channel.
    pub fn is_confirm(&self) -> bool {
        self.request.confirm
    }

    pub fn description(&self) -> Option<&str> {
        self.request.description.as_deref()
    }

    /// The underlying broker channel.
    /// 底层代理通道。
    pub fn channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.channel
    }

    /// Subscribes to the underlying channel's events.
    ///
    /// 订阅底层通道的事件。
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.channel.events()
    }

    /// Whether `release` has already been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Releases the channel. Calling this twice only releases once.
    ///
    /// 释放通道。重复调用只会释放一次。
    pub async fn release(&self) -> Result<bool> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(true);
        }
        debug!(name = self.name().unwrap_or(""), "Releasing channel");
        self.channel.release().await
    }
}
