//! `objectfs` projects an object-storage backend as a POSIX-like,
//! mountable virtual filesystem.
//!
//! This crate implements the VFS core: the inode/handle model, a
//! key-value-backed metadata index, and a write-back chunk-cache /
//! multipart-upload engine. It is deliberately independent of any
//! specific kernel-protocol library — wiring [`Fs`] up to `fuser`, a
//! WebDAV server, or anything else that needs a filesystem-shaped API
//! is the job of a thin adapter built on top, not of this crate.

pub mod backend;
pub mod cache;
pub mod error;
mod fs;
pub mod handle;
pub mod inode;
mod key;
pub mod kv;
pub mod upload;

pub use error::{Error, Result};
pub use fs::{AttrChanges, Config, Fs, FsStats};
pub use inode::Inode;
