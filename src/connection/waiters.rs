//! Per-state waiter lists backing `Connection::after`.
//!
//! 支撑 `Connection::after` 的按状态等待者列表。

use super::state::ConnectionState;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Callers waiting for a state to be entered.
///
/// Each waiter is satisfied exactly once and then forgotten.
///
/// 等待某个状态被进入的调用者。每个等待者只会被满足一次，之后即被移除。
#[derive(Debug, Default)]
pub(crate) struct StateWaiters {
    waiting: HashMap<ConnectionState, Vec<oneshot::Sender<()>>>,
}

impl StateWaiters {
    pub(crate) fn register(&mut self, state: ConnectionState, tx: oneshot::Sender<()>) {
        self.waiting.entry(state).or_default().push(tx);
    }

    /// Wakes everyone waiting for `state`. Returns how many were woken.
    /// 唤醒所有等待 `state` 的调用者，返回被唤醒的数量。
    pub(crate) fn notify(&mut self, state: ConnectionState) -> usize {
        let Some(waiters) = self.waiting.remove(&state) else {
            return 0;
        };
        let count = waiters.len();
        for tx in waiters {
            // The caller may have stopped waiting.
            let _ = tx.send(());
        }
        count
    }

    /// Drops every remaining waiter; their receivers observe an error.
    /// 丢弃所有剩余的等待者；它们的接收端会观察到错误。
    pub(crate) fn abandon_all(&mut self) {
        self.waiting.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }
}
