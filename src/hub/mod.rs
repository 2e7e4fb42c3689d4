//! Subscriber registry, connection lifecycle and line fan-out.
//!
//! Lines flow from the line source into [`Broadcaster::on_line`], which
//! pushes them onto the outbound queue of every connection in the
//! [`Registry`]. Per-connection writer tasks drain those queues.

pub mod broadcast;
pub mod connection;
pub mod registry;

pub use broadcast::*;
pub use connection::*;
pub use registry::*;
