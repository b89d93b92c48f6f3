mod connection;
mod endpoint;
mod replicator;
mod source;
mod validation;

pub use connection::*;
pub use endpoint::*;
pub use replicator::*;
pub use source::*;
pub use validation::*;
