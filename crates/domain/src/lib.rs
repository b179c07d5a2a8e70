pub mod entities;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use queuectl_errors::{QueueError, QueueResult};
pub use repositories::*;
pub use services::*;
pub use value_objects::*;
