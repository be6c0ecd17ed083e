mod handler;
mod options;
mod registry;

pub use handler::{handler_fn, BoxedHandler, FnHandler, Handler, PerformFuture};
pub use options::{optional_str, require_i64, require_str, Attributes, BuildHandlerError};
pub use registry::{HandlerFactory, HandlerRegistry};
