//! Tracks dependent queues and drains them before the transport is released.
//!
//! 跟踪依赖的队列，并在释放传输层之前将其排空。

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// A consumer or producer holding broker resources scoped to the connection.
///
/// 持有连接范围内代理资源的消费者或生产者。
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Releases the queue's broker resources.
    /// 释放队列的代理资源。
    async fn release(&self) -> Result<bool>;
}

/// Append-only list of queues that must be released on an orderly close.
///
/// 有序关闭时必须释放的队列的只追加列表。
#[derive(Default)]
pub(crate) struct QueueRegistry {
    entries: Vec<Arc<dyn Queue>>,
    draining: bool,
}

impl QueueRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a queue. Duplicates are kept and drained once per registration.
    ///
    /// 注册一个队列。重复注册会被保留，并且每次注册都会单独排空。
    pub(crate) fn add(&mut self, queue: Arc<dyn Queue>) -> Result<()> {
        if self.draining {
            return Err(Error::Closing);
        }
        self.entries.push(queue);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Freezes the registry and takes the queues to drain.
    ///
    /// 冻结注册表并取出需要排空的队列。
    pub(crate) fn begin_drain(&mut self) -> Vec<Arc<dyn Queue>> {
        self.draining = true;
        std::mem::take(&mut self.entries)
    }

    /// Forgets every queue without releasing it.
    /// 忘记所有队列而不释放它们。
    pub(crate) fn discard(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

/// Releases every queue concurrently and waits for all of them to settle.
///
/// Failures do not short-circuit the barrier; they are counted and reported
/// once every release has settled.
///
/// 并发释放所有队列并等待全部完成。失败不会使屏障提前结束，
/// 而是在所有释放都完成后统一计数并报告。
pub(crate) async fn drain(queues: Vec<Arc<dyn Queue>>) -> Result<usize> {
    let total = queues.len();
    let results = join_all(queues.iter().map(|queue| queue.release())).await;

    let failures: Vec<Error> = results.into_iter().filter_map(|r| r.err()).collect();
    if let Some(first) = failures.first() {
        warn!(failed = failures.len(), total, error = %first, "Queue drain incomplete");
        return Err(Error::Drain {
            failed: failures.len(),
            total,
            message: first.to_string(),
        });
    }

    debug!(total, "All queues drained");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockQueue;

    #[test]
    fn test_add_rejected_once_draining() {
        let mut registry = QueueRegistry::new();
        registry.add(MockQueue::new()).unwrap();
        registry.add(MockQueue::new()).unwrap();

        let snapshot = registry.begin_drain();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.add(MockQueue::new()), Err(Error::Closing));
    }

    #[test]
    fn test_discard_does_not_release() {
        let queue = MockQueue::new();
        let mut registry = QueueRegistry::new();
        registry.add(queue.clone()).unwrap();
        registry.add(queue.clone()).unwrap();

        assert_eq!(registry.discard(), 2);
        assert_eq!(queue.releases(), 0);
    }

    #[tokio::test]
    async fn test_drain_releases_each_registration() {
        let queue = MockQueue::new();
        let queues: Vec<Arc<dyn Queue>> = (0..5).map(|_| queue.clone() as Arc<dyn Queue>).collect();

        assert_eq!(drain(queues).await.unwrap(), 5);
        assert_eq!(queue.releases(), 5);
    }

    #[tokio::test]
    async fn test_drain_waits_for_every_queue_despite_failures() {
        let good = MockQueue::new();
        let bad = MockQueue::failing("gone");
        let queues: Vec<Arc<dyn Queue>> = vec![
            good.clone() as Arc<dyn Queue>,
            bad.clone() as Arc<dyn Queue>,
            good.clone() as Arc<dyn Queue>,
        ];

        let err = drain(queues).await.unwrap_err();
        assert!(matches!(err, Error::Drain { failed: 1, total: 3, .. }));
        assert_eq!(good.releases(), 2);
        assert_eq!(bad.releases(), 1);
    }
}
