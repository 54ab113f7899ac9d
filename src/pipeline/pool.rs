use crate::app::ports::{MessageSinkPort, SinkAck};
use crate::envelope::PublishEnvelope;
use crate::error::SinkError;
use crate::observability::metrics;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Process-wide, bounded set of broker channels.
///
/// A lease is held for one publish call; its permit returns to the pool when
/// the lease drops, whichever way the call ends.
#[derive(Clone)]
pub struct ChannelPool {
    sink: Arc<dyn MessageSinkPort>,
    permits: Arc<Semaphore>,
    size: usize,
}

pub struct ChannelLease {
    pool: ChannelPool,
    _permit: OwnedSemaphorePermit,
}

impl ChannelPool {
    pub fn new(sink: Arc<dyn MessageSinkPort>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            sink,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits for a free channel. Returns `None` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<ChannelLease> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = self.permits.clone().acquire_owned() => permit.ok()?,
        };
        metrics::publish::channels_in_use(self.in_use());
        Some(ChannelLease {
            pool: self.clone(),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.size - self.available()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl ChannelLease {
    pub async fn send(&self, envelope: &PublishEnvelope) -> Result<SinkAck, SinkError> {
        self.pool.sink.send(envelope).await
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        // The permit is released after this body runs.
        metrics::publish::channels_in_use(self.pool.in_use().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemorySink;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let pool = ChannelPool::new(Arc::new(MemorySink::new()), 2);
        let token = CancellationToken::new();

        let a = pool.acquire(&token).await.unwrap();
        let _b = pool.acquire(&token).await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_then_cancels() {
        let pool = ChannelPool::new(Arc::new(MemorySink::new()), 1);
        let token = CancellationToken::new();
        let _held = pool.acquire(&token).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let token = token.clone();
            tokio::spawn(async move { pool.acquire(&token).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert!(!waiter.await.unwrap());
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let pool = ChannelPool::new(Arc::new(MemorySink::new()), 0);
        assert_eq!(pool.size(), 1);
    }
}
