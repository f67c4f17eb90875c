//! Messages processed by the connection actor.

use super::state::ConnectionState;
use crate::{
    channel::{ChannelProxy, ChannelRequest},
    error::{Error, Result},
    registry::Queue,
    transport::{Generation, TransportEvent},
};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Commands sent to the actor by `Connection` handles.
///
/// 由 `Connection` 句柄发送给 actor 的命令。
pub(crate) enum Command {
    Connect {
        response_tx: oneshot::Sender<Result<()>>,
    },
    GetChannel {
        request: ChannelRequest,
        response_tx: oneshot::Sender<Result<ChannelProxy>>,
    },
    AddQueue {
        queue: Arc<dyn Queue>,
        response_tx: oneshot::Sender<Result<()>>,
    },
    Close {
        response_tx: oneshot::Sender<Result<()>>,
    },
    After {
        state: ConnectionState,
        response_tx: oneshot::Sender<()>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect { .. } => f.write_str("Connect"),
            Command::GetChannel { request, .. } => {
                f.debug_struct("GetChannel").field("request", request).finish()
            }
            Command::AddQueue { .. } => f.write_str("AddQueue"),
            Command::Close { .. } => f.write_str("Close"),
            Command::After { state, .. } => f.debug_struct("After").field("state", state).finish(),
        }
    }
}

/// Messages the actor sends itself: transport events and the results of
/// work it spawned.
///
/// actor 发送给自身的消息：传输事件以及其派生任务的结果。
#[derive(Debug)]
pub(crate) enum Internal {
    /// Raised by the transport of `generation`.
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    /// A channel could not be created on the transport of `generation`.
    ChannelFailed {
        generation: Generation,
        error: Error,
    },
    /// Drain and transport release finished.
    CloseComplete { result: Result<()> },
}
