pub mod job_execution;
pub mod worker_lifecycle;

pub use job_execution::JobExecutionManager;
pub use worker_lifecycle::WorkerLifecycle;
