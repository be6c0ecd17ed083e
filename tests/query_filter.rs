use delayed_worker::{
    Aggregate, CompareOp, DelayedWorkerError, Having, JobColumn, JobFilter, JobSpec, JobStore,
};
use serde_json::{json, Map, Value};

mod helpers;

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

async fn seed(store: &JobStore) {
    for (queue, priority) in [
        (Some("mailers"), 1),
        (Some("mailers"), 2),
        (Some("mailers"), 3),
        (Some("reports"), 1),
        (None, 0),
    ] {
        let spec = match queue {
            Some(queue) => JobSpec::builder().queue(queue).priority(priority).build(),
            None => JobSpec::builder().priority(priority).build(),
        };
        store
            .enqueue(spec, json!({"type": "succeed"}))
            .await
            .expect("Failed to enqueue job");
    }
}

#[tokio::test]
async fn it_should_count_matching_rows() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        seed(&store).await;

        assert_eq!(store.count(&JobFilter::new()).await.expect("count"), 5);
        assert_eq!(
            store
                .count(&JobFilter::new().eq(JobColumn::Queue, "mailers"))
                .await
                .expect("count"),
            3
        );
        assert_eq!(
            store
                .count(&JobFilter::new().eq(JobColumn::Queue, None::<String>))
                .await
                .expect("count"),
            1
        );
        assert_eq!(
            store
                .count(&JobFilter::new().eq(JobColumn::FailedAt, None::<i64>).limit(2))
                .await
                .expect("count"),
            2
        );
    })
    .await;
}

#[tokio::test]
async fn it_should_count_groups() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        seed(&store).await;

        let grouped = JobFilter::new().group_by([JobColumn::Queue]);
        assert_eq!(store.count(&grouped).await.expect("count"), 3);

        let busy = JobFilter::new()
            .group_by([JobColumn::Queue])
            .having(Having::new(Aggregate::Count(None), CompareOp::Gt, 1));
        assert_eq!(store.count(&busy).await.expect("count"), 1);
    })
    .await;
}

#[tokio::test]
async fn it_should_find_rows_as_json() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        seed(&store).await;

        let rows = store
            .find(
                &JobFilter::new()
                    .eq(JobColumn::Queue, "mailers")
                    .order_by(JobColumn::Priority, true)
                    .limit(2),
            )
            .await
            .expect("find");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["priority"], json!(3));
        assert_eq!(rows[1]["priority"], json!(2));
        assert_eq!(rows[0]["queue"], json!("mailers"));
        assert_eq!(rows[0]["locked_by"], Value::Null);
        assert!(rows[0]["created_at"].is_string());
        assert!(rows[0]["run_at"].is_string());

        let page = store
            .find(
                &JobFilter::new()
                    .eq(JobColumn::Queue, "mailers")
                    .order_by(JobColumn::Priority, false)
                    .limit(1)
                    .offset(1),
            )
            .await
            .expect("find");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["priority"], json!(2));
    })
    .await;
}

#[tokio::test]
async fn it_should_find_groups_with_counts() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        seed(&store).await;

        let filter = JobFilter::from_params(&params(json!({
            "group_by": "queue",
            "having": "count(*) >= 1",
            "order_by": "queue asc"
        })))
        .expect("Filter should parse");
        let rows = store.find(&filter).await.expect("find");

        let groups: Vec<(Value, Value)> = rows
            .iter()
            .map(|row| (row["queue"].clone(), row["count"].clone()))
            .collect();
        assert_eq!(
            groups,
            vec![
                (Value::Null, json!(1)),
                (json!("mailers"), json!(3)),
                (json!("reports"), json!(1)),
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn it_should_find_jobs() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;
        seed(&store).await;

        let jobs = store
            .find_jobs(
                &JobFilter::new()
                    .eq(JobColumn::Priority, 1_i64)
                    .order_by(JobColumn::Id, false),
            )
            .await
            .expect("find_jobs");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].queue().as_deref(), Some("mailers"));
        assert_eq!(jobs[1].queue().as_deref(), Some("reports"));

        let grouped = store
            .find_jobs(&JobFilter::new().group_by([JobColumn::Queue]))
            .await;
        assert!(matches!(grouped, Err(DelayedWorkerError::InvalidFilter(_))));
    })
    .await;
}

#[tokio::test]
async fn it_should_reject_invalid_filters() {
    helpers::with_test_db(|test_db| async move {
        let store = test_db.create_store().await;

        for invalid in [
            json!({"limit": 0}),
            json!({"limit": "ten"}),
            json!({"limit": 5, "offset": -1}),
            json!({"group_by": ""}),
            json!({"group_by": "nope"}),
            json!({"order_by": "priority sideways"}),
            json!({"having": "count(*) > 1"}),
            json!({"group_by": "queue", "having": "most(*) > 1"}),
            json!({"bogus_column": 1}),
        ] {
            let result = JobFilter::from_params(&params(invalid.clone()));
            assert!(
                matches!(result, Err(DelayedWorkerError::InvalidFilter(_))),
                "{invalid} should be rejected"
            );
        }

        let result = store.count(&JobFilter::new().offset(3)).await;
        assert!(matches!(result, Err(DelayedWorkerError::InvalidFilter(_))));
    })
    .await;
}
