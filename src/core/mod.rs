//! Invocation orchestration
//!
//! Drives one stateless invocation: resolve the secret, open the session,
//! list the remote directory, route and transfer every entry with per-file
//! failure isolation, close the session and summarize into a
//! [`TransferReport`].

mod context;
mod pipeline;
mod report;
mod state;

pub use context::*;
pub use pipeline::*;
pub use report::*;
pub use state::*;
