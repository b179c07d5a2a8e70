pub mod app_config;
pub mod database;
pub mod logging;
pub mod queue_worker;

pub use app_config::*;
pub use database::*;
pub use logging::*;
pub use queue_worker::*;
