pub mod audio;
pub mod config;
pub mod connection;
pub mod constants;
pub mod dispatch;
pub mod events;
pub mod history;
pub mod models;
pub mod runtime;
pub mod store;
pub mod tracing_setup;

pub use config::CoreConfig;
pub use events::CoreEvent;
pub use runtime::{CoreError, CoreHandle, CoreRuntime, RuntimeParts};
