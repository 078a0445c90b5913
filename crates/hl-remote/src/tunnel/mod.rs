//! Port-forward tunnels
//!
//! A [`TunnelManager`] binds a local listener (forward mode) or registers a
//! remote forward (reverse mode) and hands the result to an accept loop
//! running on its own task. Each accepted connection gets a [`Pipe`] on its
//! own task as well. Stopping a tunnel cancels its token, which wakes the
//! accept loop and every pipe it spawned.

mod accept;
mod events;
mod manager;
mod pipe;
mod registry;
mod types;

pub use events::{StopReason, TunnelEvent};
pub use manager::{ForwardRequest, ReverseRequest, TunnelManager, DEFAULT_REVERSE_BIND};
pub use pipe::{CloseReason, Pipe, PipeOutcome, PipeStats};
pub use registry::TunnelRegistry;
pub use types::{Tunnel, TunnelId, TunnelMode};
