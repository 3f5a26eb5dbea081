pub mod config;
pub mod delay;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod inventory;
pub mod io;
pub mod partition;
pub mod paths;
pub mod queue;
pub mod resource;
pub mod scheduler;
pub mod tree;
pub mod types;

pub use error::{Result, TreeopsError};
