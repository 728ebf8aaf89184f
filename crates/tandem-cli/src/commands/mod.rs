pub mod assets;
pub mod common;
pub mod completions;
pub mod config;
pub mod record;
pub mod sync;
pub mod version;
pub mod watch;
