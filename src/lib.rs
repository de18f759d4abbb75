//! Live process monitor core: samples `/proc` on a background thread, builds
//! a process tree with subtree aggregates, terminates processes and whole
//! subtrees, and resolves connection peers to host and service names.

pub mod config;
pub mod format;
pub mod system;
