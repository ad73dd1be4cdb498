//! Share local files through an ephemeral Tor onion service.
//!
//! Each file is published under a random, extension-preserving URL path on a
//! fresh onion address. Knowing the URL is the only access control.

pub mod config;
pub mod control;
pub mod filename;
pub mod logging;
pub mod onion;
pub mod server;
