//! Core trait definitions

mod connector;
mod transport;

pub use connector::Connector;
pub use transport::{DuplexChannel, DuplexIo, FileMode, ForwardedChannel, Transport};
