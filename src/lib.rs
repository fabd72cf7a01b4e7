//! A userspace versioning overlay filesystem.
//!
//! Every write allocates a fresh, immutable revision of a file rather than
//! mutating one in place; deletes are tombstones, not removals. See the
//! [`fs`] module for the operation dispatcher that ties the pieces below
//! together into a [`fuser::Filesystem`].

pub mod config;
pub mod error;
pub mod fs;
pub mod handle;
pub mod ino;
pub mod mangle;
pub mod node;
pub mod revision;
