//! Error type for the layers that mix error sources.
//!
//! Command handlers, thread functions and the host bootstrap can fail for
//! socket, parse, file or plain text reasons; boxing keeps them `?`
//! compatible and lets the errors cross thread boundaries.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
