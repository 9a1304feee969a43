//! Configuration handling for Burrow.
//!
//! The config file format is a small block-structured language:
//! `environment` blocks declare ordered layer stacks, `profile` blocks map
//! wrapper commands to environments. [`load`] reads a file (following
//! `config` includes), [`Config::write`] emits the canonical form, and
//! [`flatten`] reduces every environment to a flat layer list with all
//! `use-environment` references spliced in.

pub mod flatten;
pub mod model;
pub mod parser;
pub mod writer;

pub use flatten::{flatten, flatten_one, FlatEnvironment};
pub use model::{
    Config, EnvironmentConfig, LayerConfig, LayerKind, PathDirective, PathKind, ProfileConfig,
    DEFAULT_CLIENT_PATH,
};
pub use parser::{load, parse_str};
