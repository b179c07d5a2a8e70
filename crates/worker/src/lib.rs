pub mod components;
pub mod executors;
pub mod pool;

pub use components::{JobExecutionManager, WorkerLifecycle};
pub use executors::{ExecutionOutcome, JobExecutor, ShellExecutor};
pub use pool::{
    ExecutableLauncher, StopReport, SupervisionOutcome, WorkerEntry, WorkerLauncher,
    WorkerManifest, WorkerPool,
};
