//! Pieces shared by the library and the `rtmha` binary.
pub mod box_error;
pub mod config;
