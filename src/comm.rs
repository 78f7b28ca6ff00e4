//! # Communications Library
//!
//! Everything the launcher exchanges with the manager, and with the TA host
//! processes it starts, travels as framed messages over Unix stream sockets.
//! File descriptors ride along as ancillary data.

pub mod frame;
pub mod message;
pub mod transport;

mod rwutil;
