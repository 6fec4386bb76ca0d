//! Push pipeline: request mapping, response classification, execution and
//! conflict resolution

mod executor;
mod outcome;
mod request;
mod resolve;


pub use executor::PushSummary;
pub(crate) use executor::PushExecutor;
pub use outcome::{classify, Outcome};
pub use request::build_request;
pub use resolve::Resolution;
pub(crate) use resolve::resolve;
