pub mod app;
pub mod cli;
pub mod shutdown;

pub use app::{Application, QueueStatus};
pub use cli::Cli;
