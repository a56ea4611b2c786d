//! rtmha - Real Time audio host core
//!
//! provides the library elements for an audio processing host whose plugins
//! are reconfigured over a TCP control line while audio keeps running:
//!
//! - [`hot_swap`]: lock free configuration hand-off to the audio thread
//! - [`reactor`]: waitable events and a multiplexed wait over sockets,
//!   deadlines and cross thread notifications
//! - [`tcp`]: buffered connections, the single client server and the client
//! - [`thread`]: detached thread with a completion event and captured result
//! - [`control`]: the control line protocol and the host's command surface
//! - [`processing`]: plugins and the per block processing loop
//! - [`host`]: settings, logging, lock file and the server restart loop
extern crate json;

pub mod common;
pub mod control;
pub mod host;
pub mod hot_swap;
pub mod processing;
pub mod reactor;
pub mod tcp;
pub mod thread;
