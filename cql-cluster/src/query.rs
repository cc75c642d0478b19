//! Execution of queries against the cluster: host selection, retries and speculative
//! executions.

mod context;
mod executable_query;
mod query_executor;

pub use self::context::{Canceller, QueryContext};
pub use self::executable_query::{AttemptInfo, ExecutableQuery};
pub use self::query_executor::QueryExecutor;
