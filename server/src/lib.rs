//! `ttsd`'s configuration loader and request dispatcher, split out as a
//! library so integration tests can drive them without a real socket.

pub mod config;
pub mod dispatch;
