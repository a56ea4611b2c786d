//! The line based control channel.
//!
//! A [`ControlServer`] listens on one TCP port, serves one client at a time
//! and hands every received command line to a [`CommandDispatcher`].  Each
//! answer ends with the success or failure token so a client always knows
//! where a response stops.  Other threads steer the server through
//! [`ControlHandle`]: drop the current client, or shut the whole thing down.
use crate::common::box_error::BoxError;

pub mod announce;
pub mod commands;
pub mod control_server;

pub use commands::{HostCommands, ParameterHandler};
pub use control_server::{ControlHandle, ControlServer, ControlSettings};

pub const DEFAULT_PORT: u16 = 33337;
pub const DEFAULT_INTERFACE: &str = "127.0.0.1";
pub const DEFAULT_OK_ACK: &str = "(MHA:success)";
pub const DEFAULT_FAIL_ACK: &str = "(MHA:failure)";

/// Whatever interprets the command lines arriving on the control channel
#[cfg_attr(test, mockall::automock)]
pub trait CommandDispatcher: Send {
    /// Execute one command line (line ending already removed).  The returned
    /// text is sent back before the success token, an error's text before the
    /// failure token.
    fn dispatch(&mut self, line: &str) -> Result<String, BoxError>;

    /// True once a command asked the server to shut down
    fn exit_requested(&self) -> bool;

    /// Called once the listening socket is bound
    fn server_started(&mut self, _port: u16) {}
}
