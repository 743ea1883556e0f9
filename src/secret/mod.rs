//! SSH credential resolution
//!
//! Fetches the private key from a secret store once per invocation and
//! holds it in wiped-on-drop memory until the session has authenticated.

mod resolver;
mod secrets_manager;

pub use resolver::*;
pub use secrets_manager::*;
