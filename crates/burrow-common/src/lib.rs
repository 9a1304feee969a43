//! Common types shared across the Burrow workspace.

pub mod capability;
pub mod error;
pub mod paths;

pub use capability::Capability;
pub use error::{BurrowError, BurrowResult, ChildStatus};
