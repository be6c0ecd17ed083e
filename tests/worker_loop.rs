use std::time::Duration;

use chrono::Utc;
use delayed_worker::{
    handler_fn, Attributes, HandlerContext, JobSpec, StatusBoard, Worker, WorkerBuildError,
};
use helpers::StaticCounter;
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod helpers;

static COUNTED: StaticCounter = StaticCounter::new();

#[tokio::test]
async fn it_should_work_off_every_due_job_and_exit() {
    helpers::with_test_db(|test_db| async move {
        let registry = helpers::test_registry();
        registry.register("count", |_: &HandlerContext, _: &Attributes| {
            Ok(handler_fn(|| async {
                COUNTED.increment().await;
                Ok::<(), String>(())
            }))
        });
        let store = test_db
            .store_options()
            .registry(registry)
            .init()
            .await
            .expect("Failed to create store");

        for _ in 0..12 {
            store
                .enqueue(JobSpec::default(), json!({"type": "count"}))
                .await
                .expect("Failed to enqueue job");
        }
        store
            .enqueue(
                JobSpec::builder()
                    .run_at(Utc::now() + chrono::Duration::hours(1))
                    .build(),
                json!({"type": "count"}),
            )
            .await
            .expect("Failed to enqueue job");

        let worker = test_db
            .create_worker_options(&store)
            .batch_size(5)
            .exit_on_complete(true)
            .init()
            .expect("Failed to create worker");

        tokio::time::timeout(Duration::from_secs(10), worker.run())
            .await
            .expect("Worker should exit on its own")
            .expect("Worker failed");

        assert_eq!(COUNTED.get().await, 12);
        let jobs = test_db.get_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(worker.status().is_ok());
    })
    .await;
}

#[tokio::test]
async fn it_should_report_batch_counts() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        for payload in [
            json!({"type": "succeed"}),
            json!({"type": "fail"}),
            json!({"type": "succeed"}),
        ] {
            store
                .enqueue(JobSpec::default(), payload)
                .await
                .expect("Failed to enqueue job");
        }
        let worker = test_db
            .create_worker_options(&store)
            .init()
            .expect("Failed to create worker");

        let stats = worker.work_off(2).await.expect("Failed to work off jobs");
        assert_eq!(stats.total(), 2);

        let stats = worker.work_off(10).await.expect("Failed to work off jobs");
        assert_eq!(stats.total(), 1);

        // The failed job is rescheduled into the future
        let stats = worker.work_off(10).await.expect("Failed to work off jobs");
        assert_eq!(stats.total(), 0);

        let jobs = test_db.get_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(*jobs[0].attempts(), 1);
    })
    .await;
}

#[tokio::test]
async fn it_should_stop_sleeping_on_shutdown() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let worker = test_db
            .create_worker_options(&store)
            .sleep_delay(Duration::from_secs(3600))
            .init()
            .expect("Failed to create worker");

        let handle = worker.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown_and_wait())
            .await
            .expect("Worker should stop promptly")
            .expect("Worker failed");
    })
    .await;
}

#[tokio::test]
async fn it_should_stop_every_worker_sharing_a_token() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let token = CancellationToken::new();
        let handles: Vec<_> = (0..3)
            .map(|n| {
                test_db
                    .create_worker_options(&store)
                    .name(&format!("pool-{n}"))
                    .sleep_delay(Duration::from_secs(3600))
                    .shutdown_token(token.clone())
                    .init()
                    .expect("Failed to create worker")
                    .start()
            })
            .collect();

        token.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle.wait())
                .await
                .expect("Worker should stop promptly")
                .expect("Worker failed");
        }
    })
    .await;
}

#[tokio::test]
async fn it_should_release_its_locks_on_shutdown() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let id = store
            .enqueue(
                JobSpec::builder()
                    .run_at(Utc::now() + chrono::Duration::hours(1))
                    .build(),
                json!({"type": "succeed"}),
            )
            .await
            .expect("Failed to enqueue job")
            .id()
            .expect("Job has an id");
        test_db
            .lock_job(id, "locker", Utc::now().timestamp_millis())
            .await;

        let worker = test_db
            .create_worker_options(&store)
            .name("locker")
            .exit_on_complete(true)
            .init()
            .expect("Failed to create worker");
        worker.run().await.expect("Worker failed");

        let row = test_db.get_job(id).await.expect("Job should be kept");
        assert_eq!(row.locked_by(), &None);
        assert_eq!(row.locked_at(), &None);
    })
    .await;
}

#[tokio::test]
async fn it_should_keep_its_locks_when_asked_to() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let id = store
            .enqueue(
                JobSpec::builder()
                    .run_at(Utc::now() + chrono::Duration::hours(1))
                    .build(),
                json!({"type": "succeed"}),
            )
            .await
            .expect("Failed to enqueue job")
            .id()
            .expect("Job has an id");
        test_db
            .lock_job(id, "locker", Utc::now().timestamp_millis())
            .await;

        let worker = test_db
            .create_worker_options(&store)
            .name("locker")
            .exit_on_complete(true)
            .clear_locks_on_shutdown(false)
            .init()
            .expect("Failed to create worker");
        worker.run().await.expect("Worker failed");

        let row = test_db.get_job(id).await.expect("Job should be kept");
        assert_eq!(row.locked_by().as_deref(), Some("locker"));
    })
    .await;
}

#[tokio::test]
async fn it_should_report_infrastructure_errors_on_the_status_board() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        let status = StatusBoard::new();
        let worker = test_db
            .create_worker_options(&store)
            .sleep_delay(Duration::from_millis(20))
            .status_board(status.clone())
            .clear_locks_on_shutdown(false)
            .init()
            .expect("Failed to create worker");

        sqlx::query("drop table delayed_jobs")
            .execute(&test_db.pool)
            .await
            .expect("Failed to drop table");

        let handle = worker.start();
        let mut reported = false;
        for _ in 0..100 {
            if !status.is_ok() {
                reported = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(reported, "The worker should report the failing store");
        assert!(status.message().contains("delayed_jobs"));
        assert!(*status.current().consecutive_errors() >= 1);
        assert!(!handle.is_finished(), "Store errors should not stop the loop");

        handle.shutdown_and_wait().await.expect("Worker failed");
    })
    .await;
}

#[tokio::test]
async fn it_should_validate_worker_options() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;

        let result = Worker::options().init();
        assert_eq!(result.err(), Some(WorkerBuildError::MissingStore));

        let result = test_db.create_worker_options(&store).max_attempts(0).init();
        assert!(matches!(
            result,
            Err(WorkerBuildError::InvalidOption {
                option: "max_attempts",
                ..
            })
        ));

        let result = test_db.create_worker_options(&store).batch_size(0).init();
        assert!(matches!(
            result,
            Err(WorkerBuildError::InvalidOption {
                option: "batch_size",
                ..
            })
        ));

        let worker = test_db
            .create_worker_options(&store)
            .init()
            .expect("Failed to create worker");
        assert!(worker.name().starts_with("delayed_worker_"));
        assert_eq!(*worker.max_attempts(), 25);
        assert_eq!(*worker.sleep_delay(), Duration::from_secs(5));
        assert_eq!(*worker.max_run_time(), Duration::from_secs(4 * 3600));
    })
    .await;
}
