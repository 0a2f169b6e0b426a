pub mod batch;
pub mod cli;
pub mod config;
pub mod events;
pub mod filter;
pub mod hash_cache;
pub mod store;
pub mod timestamp;
pub mod updater;
pub mod watcher;

pub use batch::*;
pub use config::*;
pub use events::*;
pub use filter::*;
pub use hash_cache::*;
pub use store::*;
pub use timestamp::*;
pub use updater::*;
pub use watcher::*;
