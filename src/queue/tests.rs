use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tempfile::tempdir;
use tokio::time::{sleep, Duration};

/// Processor that fails the first `retries_before_success` attempts of each
/// record with `Retry`, drops payloads equal to `poison`, and records
/// everything it successfully delivered.
struct MockProcessor {
    delivered: Mutex<Vec<Vec<u8>>>,
    attempts: AtomicU32,
    retries_before_success: u32,
    poison: Option<Vec<u8>>,
}

impl MockProcessor {
    fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
            retries_before_success: 0,
            poison: None,
        }
    }

    fn flaky(retries: u32) -> Self {
        Self {
            retries_before_success: retries,
            ..Self::new()
        }
    }

    fn with_poison(payload: &[u8]) -> Self {
        Self {
            poison: Some(payload.to_vec()),
            ..Self::new()
        }
    }

    fn delivered(&self) -> Vec<Vec<u8>> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl HitProcessor for MockProcessor {
    async fn process(&self, payload: &[u8]) -> HitDisposition {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(poison) = &self.poison {
            if payload == poison.as_slice() {
                return HitDisposition::Drop("poison payload".to_string());
            }
        }
        if attempt < self.retries_before_success {
            return HitDisposition::Retry;
        }
        self.delivered.lock().unwrap().push(payload.to_vec());
        HitDisposition::Delivered
    }
}

fn fast_backoff() -> Backoff {
    Backoff::new(10, 50)
}

#[tokio::test]
async fn test_suspended_queue_makes_no_dispatch_attempts() {
    let dir = tempdir().unwrap();
    let processor = Arc::new(MockProcessor::new());
    let queue = DurableHitQueue::open("test", dir.path(), processor.clone(), fast_backoff())
        .await
        .unwrap();

    assert_eq!(queue.state(), QueueState::Suspended);
    queue.enqueue(b"a").await.unwrap();
    queue.enqueue(b"b").await.unwrap();

    sleep(Duration::from_millis(200)).await;
    assert!(processor.delivered().is_empty());
    assert_eq!(queue.pending().await, 2);
}

#[tokio::test]
async fn test_resume_drains_in_original_order() {
    let dir = tempdir().unwrap();
    let processor = Arc::new(MockProcessor::new());
    let queue = DurableHitQueue::open("test", dir.path(), processor.clone(), fast_backoff())
        .await
        .unwrap();

    queue.enqueue(b"one").await.unwrap();
    queue.enqueue(b"two").await.unwrap();
    queue.enqueue(b"three").await.unwrap();

    queue.start();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(
        processor.delivered(),
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
    assert_eq!(queue.pending().await, 0);
}

#[tokio::test]
async fn test_retryable_failure_is_retried_until_delivered() {
    let dir = tempdir().unwrap();
    let processor = Arc::new(MockProcessor::flaky(3));
    let queue = DurableHitQueue::open("test", dir.path(), processor.clone(), fast_backoff())
        .await
        .unwrap();

    queue.start();
    queue.enqueue(b"stubborn").await.unwrap();

    sleep(Duration::from_millis(500)).await;
    assert_eq!(processor.delivered(), vec![b"stubborn".to_vec()]);
    assert_eq!(queue.pending().await, 0);
    assert!(processor.attempts.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn test_non_retryable_record_is_dropped_and_queue_continues() {
    let dir = tempdir().unwrap();
    let processor = Arc::new(MockProcessor::with_poison(b"bad"));
    let queue = DurableHitQueue::open("test", dir.path(), processor.clone(), fast_backoff())
        .await
        .unwrap();

    queue.enqueue(b"bad").await.unwrap();
    queue.enqueue(b"good").await.unwrap();
    queue.start();

    sleep(Duration::from_millis(300)).await;
    assert_eq!(processor.delivered(), vec![b"good".to_vec()]);
    assert_eq!(queue.pending().await, 0);
}

#[tokio::test]
async fn test_suspend_halts_retries_without_loss() {
    let dir = tempdir().unwrap();
    let processor = Arc::new(MockProcessor::flaky(u32::MAX));
    let queue = DurableHitQueue::open("test", dir.path(), processor.clone(), fast_backoff())
        .await
        .unwrap();

    queue.start();
    queue.enqueue(b"offline").await.unwrap();
    sleep(Duration::from_millis(150)).await;

    queue.suspend();
    sleep(Duration::from_millis(50)).await;
    let attempts_at_suspend = processor.attempts.load(Ordering::SeqCst);
    assert!(attempts_at_suspend > 0);

    // No further attempts while suspended; the record stays durable.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(processor.attempts.load(Ordering::SeqCst), attempts_at_suspend);
    assert_eq!(queue.pending().await, 1);
}

#[tokio::test]
async fn test_enqueued_records_survive_restart_before_dispatch() {
    let dir = tempdir().unwrap();
    {
        let queue = DurableHitQueue::open(
            "test",
            dir.path(),
            Arc::new(MockProcessor::new()),
            fast_backoff(),
        )
        .await
        .unwrap();
        queue.enqueue(b"persisted-1").await.unwrap();
        queue.enqueue(b"persisted-2").await.unwrap();
        // Never started; dropped while suspended.
    }

    let processor = Arc::new(MockProcessor::new());
    let queue = DurableHitQueue::open("test", dir.path(), processor.clone(), fast_backoff())
        .await
        .unwrap();
    assert_eq!(queue.pending().await, 2);

    queue.start();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(
        processor.delivered(),
        vec![b"persisted-1".to_vec(), b"persisted-2".to_vec()]
    );
}
