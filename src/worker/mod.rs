//! Per-repo worker system for webhook deliveries.
//!
//! Each repository gets a dedicated worker that runs deliveries serially, so
//! checkout, terraform and reporting for one repository never overlap, while
//! different repositories run concurrently.
//!
//! # Module Structure
//!
//! - [`pipeline`]: checkout, configuration, execution and reporting for one delivery
//! - `dispatch`: routing of jobs to per-repo queues
//! - `worker`: the per-repo event loop
//! - `message`: worker message types

mod dispatch;
mod message;
pub mod pipeline;
mod worker;

pub use dispatch::{DEFAULT_QUEUE_CAPACITY, DispatchError, Dispatcher};
pub use message::{Job, WorkerMessage};
pub use pipeline::{Outcome, Pipeline, PipelineError};
pub use worker::RepoWorker;
