//! Remote file server access
//!
//! `session` defines the seam the pipeline depends on and `ssh` implements
//! it over SSH/SFTP with ssh2.

mod session;
mod ssh;

pub use session::*;
pub use ssh::*;
