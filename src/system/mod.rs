pub mod collector;
pub mod details;
pub mod error;
pub mod history;
pub mod kill;
pub mod platform;
pub mod process;
pub mod resolver;
pub mod snapshot;
pub mod store;
