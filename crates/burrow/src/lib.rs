//! Burrow core: assemble layered mount-namespace environments.
//!
//! A burrow wraps a single host application in a lightweight mount
//! namespace whose filesystem view is composed from one or more layers
//! overlaid on the running host. There is no PID, network, IPC, UTS or
//! user isolation beyond what the caller asks for; only the mount
//! namespace is private.
//!
//! The crate is organised bottom-up:
//!
//! - [`fsutil`] wraps the mount and tree-walking syscalls,
//! - [`namespace`] creates mount and user namespaces,
//! - [`pathstate`] records per-path dispositions in a prefix tree,
//! - [`assembler`] turns a configured environment into a mounted view,
//! - [`digger`] inverts assembly, capturing a build command's mutations
//!   into a new layer,
//! - [`autoprofile`] turns a captured tree into a layer config.

pub mod assembler;
pub mod autoprofile;
pub mod cli;
pub mod digger;
pub mod engine;
pub mod exec;
pub mod fsutil;
pub mod namespace;
pub mod pathstate;
pub mod registry;
pub mod runtime;
pub mod setup;
pub mod snapshot;

pub use assembler::{AssemblyContext, Environment, EnvironmentState};
pub use engine::Engine;
