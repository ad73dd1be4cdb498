//! Onion service identity and bring-up.

mod bootstrap;
mod identity;

pub use bootstrap::{
    bootstrap, BootstrapConfig, BootstrapError, HiddenService, COOKIE_LENGTH,
    DEFAULT_AUTH_COOKIE, DEFAULT_CONTROL_SOCKET, DEFAULT_VIRTUAL_PORT,
};
pub use identity::{OnionAddress, ServiceIdentity};
