pub mod config;
pub mod input;
pub mod listen;
pub mod prefs;

pub use config::{default_config_path, resolve_config, Overrides};
pub use input::InputCommand;
pub use listen::run_listen;
