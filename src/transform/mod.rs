//! Content transforms applied between SFTP read and upload
//!
//! The transform set is closed: identifiers are parsed into [`Transform`]
//! and anything else fails the file with `UnsupportedTransform`.
//!
//! | Identifier   | Streaming | Object name        |
//! |--------------|-----------|--------------------|
//! | `none`       | yes       | unchanged          |
//! | `gzip`       | yes       | `<name>.gz`        |
//! | `lz4`        | yes       | `<name>.lz4`       |
//! | `unzip`      | no        | first member name  |
//! | `unzip-gzip` | no        | `<member>.gz`      |
//!
//! Buffering transforms hold the whole input in memory and refuse inputs
//! larger than the configured bound.

mod archive;
mod engine;
mod kind;

pub use engine::*;
pub use kind::*;
