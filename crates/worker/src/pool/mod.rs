pub mod manifest;
pub mod process;
pub mod supervisor;

pub use manifest::{WorkerEntry, WorkerManifest, MANIFEST_VERSION};
pub use process::{is_alive, send_signal};
pub use supervisor::{ExecutableLauncher, StopReport, SupervisionOutcome, WorkerLauncher, WorkerPool};
