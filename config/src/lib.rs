//! Configuration types for the change data capture crates.
//!
//! The structs in [`shared`] are deserialized from the files and environment variables read by
//! [`load_config`].

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config};
pub use secret::SerializableSecretString;
