//! Integration tests for the Redis queue driver.
//!
//! These tests need a running Redis server.
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test redis_queue -- --ignored

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use queue_forge::job::{Job, JobContext, JobRecord, JobRegistry};
use queue_forge::worker::{JobOutcome, Worker, WorkerConfig};
use queue_forge::{JobError, QueueDriver, QueueEntry, RedisQueue};
use serde::{Deserialize, Serialize};

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").expect("REDIS_URL environment variable must be set for integration tests")
}

async fn create_test_queue() -> (RedisQueue, String) {
    let prefix = format!("queue-forge-test-{}", uuid::Uuid::new_v4().simple());
    let driver = RedisQueue::connect(&get_redis_url(), &prefix)
        .await
        .expect("Redis should be reachable");
    let queue = format!("q-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    (driver, queue)
}

#[derive(Debug, Serialize, Deserialize)]
struct AlwaysFails {
    max: u32,
}

#[async_trait]
impl Job for AlwaysFails {
    const CLASS: &'static str = "tests.always_fails";

    fn max_tries(&self) -> u32 {
        self.max
    }

    async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Err(JobError::failed("upstream rejected the request"))
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_queue -- --ignored
async fn test_push_pop_is_fifo_and_counts_attempts() {
    let (driver, queue) = create_test_queue().await;

    driver.push("first", &queue, 0).await.unwrap();
    driver.push("second", &queue, 0).await.unwrap();
    assert_eq!(driver.size(&queue).await.unwrap(), 2);

    let first = driver.pop(&queue).await.unwrap().expect("entry available");
    let second = driver.pop(&queue).await.unwrap().expect("entry available");

    assert_eq!(first.payload, "first");
    assert_eq!(first.attempts, 1);
    assert_eq!(second.payload, "second");
    assert!(driver.pop(&queue).await.unwrap().is_none());
    assert_eq!(driver.size(&queue).await.unwrap(), 0);
    assert_eq!(driver.reserved_len(&queue).await.unwrap(), 2);

    driver.clear(&queue).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_delay_is_honored() {
    let (driver, queue) = create_test_queue().await;

    driver.push("later", &queue, 1).await.unwrap();
    assert!(driver.pop(&queue).await.unwrap().is_none());
    assert_eq!(driver.size(&queue).await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let entry = driver.pop(&queue).await.unwrap().expect("delay elapsed");
    assert_eq!(entry.payload, "later");

    driver.clear(&queue).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_single_entry_is_claimed_once() {
    let (driver, queue) = create_test_queue().await;
    let driver = Arc::new(driver);
    driver.push("only", &queue, 0).await.unwrap();

    let (a, b) = tokio::join!(driver.pop(&queue), driver.pop(&queue));
    let claimed = [a.unwrap(), b.unwrap()];

    assert_eq!(claimed.iter().filter(|entry| entry.is_some()).count(), 1);

    driver.clear(&queue).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_concurrent_migration_never_duplicates() {
    let (driver, queue) = create_test_queue().await;
    let driver = Arc::new(driver);
    for i in 0..40 {
        driver.push(&format!("job-{}", i), &queue, 1).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let driver = Arc::clone(&driver);
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(entry) = driver.pop(&queue).await.unwrap() {
                claimed.push(entry.payload);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for payload in handle.await.unwrap() {
            total += 1;
            seen.insert(payload);
        }
    }

    assert_eq!(total, 40);
    assert_eq!(seen.len(), 40);

    driver.clear(&queue).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_release_delete_and_reclaim() {
    let (driver, queue) = create_test_queue().await;
    driver.push("job", &queue, 0).await.unwrap();

    let entry = driver.pop(&queue).await.unwrap().unwrap();
    driver.release(&entry, &queue, 0).await.unwrap();
    let again = driver.pop(&queue).await.unwrap().unwrap();
    assert_eq!(again.id, entry.id);
    assert_eq!(again.attempts, 2);

    // Nothing is older than a minute yet.
    assert_eq!(driver.reclaim(&queue, Duration::from_secs(60)).await.unwrap(), 0);
    assert_eq!(driver.reclaim(&queue, Duration::ZERO).await.unwrap(), 1);
    assert_eq!(driver.reserved_len(&queue).await.unwrap(), 0);

    let reclaimed = driver.pop(&queue).await.unwrap().unwrap();
    assert_eq!(reclaimed.attempts, 3);

    driver.delete(&reclaimed, &queue).await.unwrap();
    driver.delete(&reclaimed, &queue).await.unwrap();
    driver
        .release(&QueueEntry::claim("missing", 1), &queue, 0)
        .await
        .unwrap();
    assert_eq!(driver.size(&queue).await.unwrap(), 0);
    assert_eq!(driver.reserved_len(&queue).await.unwrap(), 0);

    driver.clear(&queue).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_superseded_claim_settles_nothing() {
    let (driver, queue) = create_test_queue().await;
    driver.push("job", &queue, 0).await.unwrap();

    let first = driver.pop(&queue).await.unwrap().unwrap();
    assert_eq!(driver.reclaim(&queue, Duration::ZERO).await.unwrap(), 1);
    let second = driver.pop(&queue).await.unwrap().unwrap();
    assert_eq!(second.attempts, 2);

    driver.release(&first, &queue, 0).await.unwrap();
    driver.delete(&first, &queue).await.unwrap();
    assert!(driver.pop(&queue).await.unwrap().is_none());
    assert_eq!(driver.reserved_len(&queue).await.unwrap(), 1);

    driver.delete(&second, &queue).await.unwrap();
    assert_eq!(driver.reserved_len(&queue).await.unwrap(), 0);

    driver.clear(&queue).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_worker_exhaustion_records_failed_job() {
    let (driver, queue) = create_test_queue().await;
    let driver = Arc::new(driver);
    let payload = JobRecord::from_job(&AlwaysFails { max: 2 })
        .unwrap()
        .with_queue(queue.as_str())
        .to_payload()
        .unwrap();
    driver.push(&payload, &queue, 0).await.unwrap();

    let worker = Worker::new(
        "redis-test",
        Arc::clone(&driver) as Arc<dyn QueueDriver>,
        Arc::new(JobRegistry::new().with::<AlwaysFails>()),
        WorkerConfig::new(queue.as_str()).with_sleep(Duration::from_millis(10)),
    );

    assert_eq!(worker.run_next().await.unwrap(), Some(JobOutcome::Released));
    assert_eq!(worker.run_next().await.unwrap(), Some(JobOutcome::Failed));
    assert_eq!(worker.run_next().await.unwrap(), None);

    let failed = driver.failed_jobs(&queue, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload, payload);
    assert_eq!(failed[0].connection, "redis");
    assert!(failed[0].exception.contains("upstream rejected the request"));

    driver.clear(&queue).await.unwrap();
}
