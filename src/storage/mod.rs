//! Object storage module
//!
//! Provides the upload sink seam and its S3 implementation. Uploads read
//! from staged files so memory stays bounded regardless of object size.

mod s3;
mod sink;

pub use s3::*;
pub use sink::*;
