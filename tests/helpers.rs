#![allow(dead_code)]

use std::sync::Arc;

use delayed_worker::{
    handler_fn, require_str, Attributes, DbJob, HandlerContext, JobStore, Registry, StoreOptions,
    WorkerOptions,
};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub pool: AnyPool,
    pub url: String,
    dir: Arc<TempDir>,
}

impl TestDatabase {
    async fn drop(&self) {
        self.pool.close().await;
    }

    pub fn store_options(&self) -> StoreOptions {
        JobStore::options()
            .pool(self.pool.clone())
            .registry(test_registry())
    }

    pub async fn create_store(&self) -> JobStore {
        self.store_options()
            .init()
            .await
            .expect("Failed to create store")
    }

    pub fn create_worker_options(&self, store: &JobStore) -> WorkerOptions {
        WorkerOptions::default()
            .store(store.clone())
            .listen_os_shutdown_signals(false)
    }

    pub async fn get_jobs(&self) -> Vec<DbJob> {
        sqlx::query_as("select * from delayed_jobs order by id asc")
            .fetch_all(&self.pool)
            .await
            .expect("Failed to get jobs")
    }

    pub async fn get_job(&self, id: i64) -> Option<DbJob> {
        sqlx::query_as("select * from delayed_jobs where id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .expect("Failed to get job")
    }

    /// Locks job `id` as `worker_name` at `locked_at` (epoch millis).
    pub async fn lock_job(&self, id: i64, worker_name: &str, locked_at: i64) {
        sqlx::query("update delayed_jobs set locked_by = ?, locked_at = ? where id = ?")
            .bind(worker_name.to_string())
            .bind(locked_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .expect("Failed to lock job");
    }

    pub async fn set_failed_at(&self, id: i64, failed_at: i64) {
        sqlx::query("update delayed_jobs set failed_at = ? where id = ?")
            .bind(failed_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .expect("Failed to fail job");
    }

    pub async fn make_jobs_run_now(&self) {
        sqlx::query("update delayed_jobs set run_at = null")
            .execute(&self.pool)
            .await
            .expect("Failed to update jobs");
    }
}

/// `succeed`, `fail` (with the payload's `message`, default `boom`) and `panic`.
pub fn test_registry() -> Registry {
    let registry = Registry::new();
    registry.register("succeed", |_: &HandlerContext, _: &Attributes| {
        Ok(handler_fn(|| async { Ok::<(), String>(()) }))
    });
    registry.register("fail", |_: &HandlerContext, attributes: &Attributes| {
        let message = require_str(attributes, "message")
            .unwrap_or("boom")
            .to_string();
        Ok(handler_fn(move || {
            let message = message.clone();
            async move { Err::<(), _>(message) }
        }))
    });
    registry.register("panic", |_: &HandlerContext, _: &Attributes| {
        Ok(handler_fn(|| async {
            if true {
                panic!("handler exploded");
            }
            Ok::<(), String>(())
        }))
    });
    registry
}

pub async fn create_test_database() -> TestDatabase {
    install_default_drivers();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("jobs.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());

    // SQLite allows one writer at a time
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    TestDatabase {
        pool,
        url,
        dir: Arc::new(dir),
    }
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database().await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}

pub struct StaticCounter {
    cell: OnceCell<Mutex<u32>>,
}
async fn init_job_count() -> Mutex<u32> {
    Mutex::new(0)
}
impl StaticCounter {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn increment(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        let mut count = cell.lock().await;
        *count += 1;
        *count
    }

    pub async fn get(&self) -> u32 {
        let cell = self.cell.get_or_init(init_job_count).await;
        *cell.lock().await
    }
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}
