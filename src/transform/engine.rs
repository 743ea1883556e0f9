//! Transform execution
//!
//! Transforms stream from a reader into a writer. Both ends are wrapped so an
//! I/O failure can be attributed to the remote read, the staging write, or
//! the transform itself.

use crate::error::{Result, TransferError};
use crate::transform::{archive, Transform};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::path::Path;

/// Copy buffer for streaming transforms (1 MB)
pub const STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// One file's transform invocation
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    /// Transform identifier from the routing decision
    pub transform_id: &'a str,
    /// Object name before transformation
    pub object_name: &'a str,
    /// Remote path, for read error context
    pub source_path: &'a Path,
    /// Staging file, for write error context
    pub staging_path: &'a Path,
}

/// Result of a successful transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// Transform that ran
    pub transform: Transform,
    /// Object name after transformation
    pub object_name: String,
    /// Bytes consumed from the source
    pub bytes_in: u64,
    /// Bytes written to the output
    pub bytes_out: u64,
}

pub(super) enum StepError {
    Io(io::Error),
    Failed(TransferError),
}

impl From<io::Error> for StepError {
    fn from(err: io::Error) -> Self {
        StepError::Io(err)
    }
}

struct Tracked<T> {
    inner: T,
    bytes: u64,
    failed: bool,
}

impl<T> Tracked<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            bytes: 0,
            failed: false,
        }
    }
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                self.bytes += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

impl<W: Write> Write for Tracked<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(n) => {
                self.bytes += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| {
            self.failed = true;
            e
        })
    }
}

/// Applies transforms with a bound on buffered input
#[derive(Debug, Clone)]
pub struct Transformer {
    max_buffered_input: u64,
}

impl Transformer {
    /// Create a transformer; buffering transforms refuse inputs above `max_buffered_input`
    pub fn new(max_buffered_input: u64) -> Self {
        Self { max_buffered_input }
    }

    /// Memory bound for buffering transforms
    pub fn max_buffered_input(&self) -> u64 {
        self.max_buffered_input
    }

    /// Reject an input before reading it when its listed size is already too large
    pub fn check_input_size(&self, transform: Transform, size: u64) -> Result<()> {
        if transform.buffers_input() && size > self.max_buffered_input {
            return Err(TransferError::TransformInputTooLarge {
                limit: self.max_buffered_input,
            });
        }
        Ok(())
    }

    /// Run the requested transform from `input` into `output`
    pub fn apply(
        &self,
        request: &TransformRequest<'_>,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<TransformOutput> {
        let transform: Transform = request.transform_id.parse()?;

        let mut reader = Tracked::new(input);
        let mut writer = Tracked::new(output);

        let result = self
            .run(transform, request.object_name, &mut reader, &mut writer)
            .and_then(|name| {
                writer.flush()?;
                Ok(name)
            });

        match result {
            Ok(name) => Ok(TransformOutput {
                transform,
                object_name: name,
                bytes_in: reader.bytes,
                bytes_out: writer.bytes,
            }),
            Err(StepError::Failed(err)) => Err(err),
            Err(StepError::Io(err)) => Err(if reader.failed {
                TransferError::ReadFailed {
                    path: request.source_path.to_path_buf(),
                    message: err.to_string(),
                }
            } else if writer.failed {
                TransferError::staging(request.staging_path, err)
            } else {
                TransferError::TransformFailed {
                    transform: transform.id().to_string(),
                    message: err.to_string(),
                }
            }),
        }
    }

    fn run(
        &self,
        transform: Transform,
        object_name: &str,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> std::result::Result<String, StepError> {
        let name = match transform {
            Transform::Identity => {
                copy(reader, writer)?;
                object_name.to_string()
            }
            Transform::Gzip => {
                let mut encoder = GzEncoder::new(writer, Compression::default());
                copy(reader, &mut encoder)?;
                encoder.finish()?;
                object_name.to_string()
            }
            Transform::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
                copy(reader, &mut encoder)?;
                encoder
                    .finish()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                object_name.to_string()
            }
            Transform::Unzip => archive::extract_first(reader, writer, self.max_buffered_input)?,
            Transform::UnzipGzip => {
                let mut encoder = GzEncoder::new(writer, Compression::default());
                let member = archive::extract_first(reader, &mut encoder, self.max_buffered_input)?;
                encoder.finish()?;
                member
            }
        };

        Ok(match transform.name_suffix() {
            Some(suffix) => format!("{}{}", name, suffix),
            None => name,
        })
    }
}

fn copy(reader: &mut dyn Read, writer: &mut dyn Write) -> io::Result<u64> {
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    Ok(total)
}
