use std::any::Any;
use std::sync::Arc;

use delayed_worker_handler::HandlerRegistry;
use getset::Getters;

use crate::store::JobStore;

/// Registry of handler factories for jobs of a [`JobStore`].
pub type Registry = HandlerRegistry<HandlerContext>;

/// Shared state handed to handler factories.
///
/// It carries the store the job came from, so a handler can enqueue follow-up
/// jobs, the name of the invoking worker (absent for jobs run synchronously
/// at enqueue) and the application state registered on the store.
#[derive(Clone, Getters)]
pub struct HandlerContext {
    #[getset(get = "pub")]
    store: JobStore,
    worker_name: Option<String>,
    app_state: Option<Arc<dyn Any + Send + Sync>>,
}

impl HandlerContext {
    pub(crate) fn new(
        store: JobStore,
        worker_name: Option<String>,
        app_state: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        HandlerContext {
            store,
            worker_name,
            app_state,
        }
    }

    pub fn worker_name(&self) -> Option<&str> {
        self.worker_name.as_deref()
    }

    /// Application state registered with
    /// [`StoreOptions::app_state`](crate::StoreOptions::app_state), if it has type `T`.
    pub fn app_state<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.app_state.as_deref()?.downcast_ref()
    }
}
