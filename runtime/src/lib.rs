//! The reactor and the per-connection framing layer that sits on top of it,
//! plus the ambient logger every binary in the workspace installs at
//! startup.

pub mod connection;
pub mod logger;
pub mod reactor;

pub use connection::{Connection, DispatchOutcome, Flow, Stream};
pub use logger::Logger;
pub use reactor::Reactor;
