#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use cache_core::{
    CacheEvent, CacheKey, CacheRequest, ImageKind, ImageLookup, JobStatus, MediaType, QueueConfig,
    QueueError,
};
use tokio::sync::broadcast;

use common::{FakeSource, MemoryStore, start, start_with_store, test_config};

fn poster(media_id: u64) -> CacheRequest {
    CacheRequest::new(MediaType::Movie, media_id, ImageKind::Poster, "https://o/img.jpg")
}

fn drain(rx: &mut broadcast::Receiver<CacheEvent>) -> Vec<CacheEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn duplicate_enqueue_returns_same_job() -> Result<(), Box<dyn Error>> {
    let h = start(
        test_config(),
        FakeSource::ok().with_delay(Duration::from_millis(300)),
    )
    .await;
    let mut events = h.queue.subscribe();

    let (first, second) = tokio::join!(h.queue.enqueue(poster(550)), h.queue.enqueue(poster(550)));
    let (first, second) = (first?, second?);
    assert_eq!(first, second);

    let stats = h.queue.get_queue_stats().await?;
    assert_eq!(stats.queued + stats.active, 1);

    let job = h.wait_terminal(first).await;
    assert_eq!(job.status, JobStatus::Completed);

    let enqueued = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, CacheEvent::JobEnqueued { .. }))
        .count();
    assert_eq!(enqueued, 1);
    Ok(())
}

#[tokio::test]
async fn terminal_key_can_be_enqueued_again() -> Result<(), Box<dyn Error>> {
    let h = start(test_config(), FakeSource::ok()).await;

    let first = h.queue.enqueue(poster(550)).await?;
    h.wait_terminal(first).await;

    let second = h.queue.enqueue(poster(550)).await?;
    assert_ne!(first, second);
    h.wait_terminal(second).await;
    Ok(())
}

#[tokio::test]
async fn burst_respects_concurrency_bound() -> Result<(), Box<dyn Error>> {
    let config = QueueConfig {
        concurrency: 3,
        ..test_config()
    };
    let h = start(config, FakeSource::ok().with_delay(Duration::from_millis(40))).await;
    let mut events = h.queue.subscribe();

    let mut ids = Vec::new();
    for media_id in 1..=12 {
        ids.push(h.queue.enqueue(poster(media_id)).await?);
        let stats = h.queue.get_queue_stats().await?;
        assert!(stats.active <= 3, "active = {}", stats.active);
    }
    for id in ids {
        assert_eq!(h.wait_terminal(id).await.status, JobStatus::Completed);
    }

    assert!(h.source.max_concurrent.load(std::sync::atomic::Ordering::SeqCst) <= 3);

    // Replay the transitions and check the bound held at every step.
    let mut active: i64 = 0;
    for event in drain(&mut events) {
        if let CacheEvent::JobStatusChanged {
            old_status,
            new_status,
            ..
        } = event
        {
            if new_status == JobStatus::Active && old_status != JobStatus::Active {
                active += 1;
            }
            if old_status == JobStatus::Active && new_status != JobStatus::Active {
                active -= 1;
            }
            assert!(active <= 3);
        }
    }
    assert_eq!(active, 0);

    let stats = h.queue.get_queue_stats().await?;
    assert_eq!(stats.completed, 12);
    assert_eq!(stats.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn always_failing_fetch_exhausts_retries() -> Result<(), Box<dyn Error>> {
    let h = start(test_config(), FakeSource::always_failing()).await;
    let mut events = h.queue.subscribe();

    let job_id = h.queue.enqueue(poster(550)).await?;
    let job = h.wait_terminal(job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.error.as_deref().is_some_and(|e| e.contains("503")));
    assert!(h.store.record(&job.key()).is_none());

    let events = drain(&mut events);
    let transitions: Vec<(JobStatus, JobStatus)> = events
        .iter()
        .filter_map(|e| match e {
            CacheEvent::JobStatusChanged {
                old_status,
                new_status,
                ..
            } if old_status != new_status => Some((*old_status, *new_status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (JobStatus::Queued, JobStatus::Active),
            (JobStatus::Active, JobStatus::Failed),
            (JobStatus::Failed, JobStatus::Queued),
            (JobStatus::Queued, JobStatus::Active),
            (JobStatus::Active, JobStatus::Failed),
            (JobStatus::Failed, JobStatus::Queued),
            (JobStatus::Queued, JobStatus::Active),
            (JobStatus::Active, JobStatus::Failed),
        ]
    );

    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CacheEvent::JobFailed { attempts, .. } => Some(*attempts),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![3]);

    // Stays failed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let again = h.queue.get_status(job_id).await?.ok_or("job evicted")?;
    assert_eq!(again.status, JobStatus::Failed);
    assert_eq!(again.attempts, 3);
    Ok(())
}

#[tokio::test]
async fn retry_after_backoff_succeeds() -> Result<(), Box<dyn Error>> {
    let config = QueueConfig {
        retry_backoff_ms: 100,
        ..test_config()
    };
    let h = start(config, FakeSource::failing(1)).await;
    let mut events = h.queue.subscribe();

    let job_id = h.queue.enqueue(poster(550)).await?;

    tokio::time::sleep(Duration::from_millis(40)).await;
    let waiting = h.queue.get_status(job_id).await?.ok_or("job missing")?;
    assert_eq!(waiting.status, JobStatus::Queued);
    assert_eq!(waiting.attempts, 1);
    // The error belongs to the failed attempt, not the queued retry.
    assert!(waiting.error.is_none());

    let events = drain(&mut events);
    let attempt_error = events.iter().find_map(|e| match e {
        CacheEvent::JobStatusChanged {
            new_status: JobStatus::Failed,
            error,
            ..
        } => error.clone(),
        _ => None,
    });
    assert!(attempt_error.is_some_and(|e| e.contains("503")));
    let requeued = events.iter().find_map(|e| match e {
        CacheEvent::JobStatusChanged {
            old_status: JobStatus::Failed,
            new_status: JobStatus::Queued,
            error,
            ..
        } => Some(error.clone()),
        _ => None,
    });
    assert_eq!(requeued, Some(None));

    // Still holds the key while waiting out the backoff.
    assert_eq!(h.queue.enqueue(poster(550)).await?, job_id);

    let job = h.wait_terminal(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert!(job.error.is_none());
    Ok(())
}

#[tokio::test]
async fn completed_job_persists_record() -> Result<(), Box<dyn Error>> {
    let h = start(test_config(), FakeSource::ok()).await;
    let mut events = h.queue.subscribe();

    let request = CacheRequest::new(MediaType::Tv, 1399, ImageKind::Backdrop, "/got.jpg");
    let key = request.key;
    let job_id = h.queue.enqueue(request).await?;
    let job = h.wait_terminal(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    let expected_url = "https://cdn.test/w_1280,c_limit,q_auto,f_auto/tv/1399/backdrop";
    assert_eq!(job.delivery_url.as_deref(), Some(expected_url));

    let record = h.store.record(&key).ok_or("record missing")?;
    assert_eq!(record.delivery_url, expected_url);
    assert_eq!(record.public_id, "tv/1399/backdrop");
    assert_eq!(record.source_url, "/got.jpg");
    assert!(h.host.has_asset("tv/1399/backdrop"));

    let events = drain(&mut events);
    let progress: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            CacheEvent::JobStatusChanged { progress: Some(p), .. } => Some(p.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec!["fetching", "uploading", "saving"]);

    assert!(events.iter().any(|e| matches!(
        e,
        CacheEvent::JobCompleted { job_id: id, delivery_url, .. }
            if *id == job_id && delivery_url == expected_url
    )));
    Ok(())
}

#[tokio::test]
async fn slow_fetch_times_out() -> Result<(), Box<dyn Error>> {
    let config = QueueConfig {
        max_attempts: 1,
        job_timeout_secs: 1,
        ..test_config()
    };
    let h = start(config, FakeSource::ok().with_delay(Duration::from_secs(5))).await;

    let job_id = h.queue.enqueue(poster(550)).await?;
    let job = h.wait_terminal(job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().is_some_and(|e| e.contains("timed out")));
    Ok(())
}

#[tokio::test]
async fn slow_record_write_is_not_cut_off_by_the_timeout() -> Result<(), Box<dyn Error>> {
    let config = QueueConfig {
        job_timeout_secs: 1,
        ..test_config()
    };
    let store = MemoryStore::slow(Duration::from_millis(1500));
    let h = start_with_store(config, FakeSource::ok(), store).await;

    let request = poster(550);
    let key = request.key;
    let job_id = h.queue.enqueue(request).await?;
    let job = h.wait_terminal(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert!(h.store.record(&key).is_some());
    assert_eq!(h.source.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn crashed_worker_is_replaced_and_job_retried() -> Result<(), Box<dyn Error>> {
    let h = start(test_config(), FakeSource::panicking()).await;

    let job_id = h.queue.enqueue(poster(550)).await?;
    let job = h.wait_terminal(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);

    // The pool is back at full strength.
    let a = h.queue.enqueue(poster(1)).await?;
    let b = h.queue.enqueue(poster(2)).await?;
    h.wait_terminal(a).await;
    h.wait_terminal(b).await;
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_rejected() -> Result<(), Box<dyn Error>> {
    let h = start(test_config(), FakeSource::ok()).await;

    let result = h
        .queue
        .enqueue(CacheRequest::new(MediaType::Movie, 0, ImageKind::Poster, "/a.jpg"))
        .await;
    assert!(matches!(result, Err(QueueError::InvalidRequest(_))));

    let result = h
        .queue
        .enqueue(CacheRequest::new(MediaType::Movie, 1, ImageKind::Poster, ""))
        .await;
    assert!(matches!(result, Err(QueueError::InvalidRequest(_))));
    Ok(())
}

#[tokio::test]
async fn resolve_serves_fresh_records_and_enqueues_otherwise() -> Result<(), Box<dyn Error>> {
    let h = start(test_config(), FakeSource::ok()).await;
    let max_age = Duration::from_secs(24 * 60 * 60);

    let ImageLookup::Pending { job_id } = h.queue.resolve(poster(550), max_age).await? else {
        return Err("expected a pending lookup".into());
    };
    h.wait_terminal(job_id).await;

    match h.queue.resolve(poster(550), max_age).await? {
        ImageLookup::Cached { record } => assert_eq!(record.public_id, "movie/550/poster"),
        other => return Err(format!("expected cached, got {other:?}").into()),
    }

    // A new source url makes the record stale.
    let moved = CacheRequest::new(MediaType::Movie, 550, ImageKind::Poster, "https://o/new.jpg");
    assert!(matches!(
        h.queue.resolve(moved, max_age).await?,
        ImageLookup::Pending { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn invalidate_removes_record_and_asset() -> Result<(), Box<dyn Error>> {
    let h = start(test_config(), FakeSource::ok()).await;
    let key = CacheKey::new(MediaType::Person, 287, ImageKind::Profile);

    let job_id = h
        .queue
        .enqueue(CacheRequest::new(MediaType::Person, 287, ImageKind::Profile, "/brad.jpg"))
        .await?;
    h.wait_terminal(job_id).await;
    assert!(h.host.has_asset("person/287/profile"));

    assert!(h.queue.invalidate(&key).await?);
    assert!(h.store.record(&key).is_none());
    assert!(!h.host.has_asset("person/287/profile"));

    assert!(!h.queue.invalidate(&key).await?);
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_work_then_stops() -> Result<(), Box<dyn Error>> {
    let h = start(
        test_config(),
        FakeSource::ok().with_delay(Duration::from_millis(100)),
    )
    .await;
    let mut events = h.queue.subscribe();

    h.queue.enqueue(poster(550)).await?;
    h.queue.shutdown(Duration::from_secs(5)).await;
    h.handle.await?;

    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, CacheEvent::JobCompleted { .. })));

    let result = h.queue.enqueue(poster(551)).await;
    assert_eq!(result, Err(QueueError::ShuttingDown));
    Ok(())
}
