//! Linux namespace creation.

pub mod mount;
pub mod user;

pub use mount::create_mount_namespace;
pub use user::{create_user_namespace, IdMap};
