//! Remote sessions and their connection stacks

mod builder;
mod remote;
mod stack;

pub use builder::SessionBuilder;
pub use remote::RemoteSession;
pub use stack::{ConnectionStack, Hop};

pub(crate) use remote::SessionInner;
