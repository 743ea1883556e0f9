//! ZIP extraction
//!
//! ZIP needs random access to its central directory, so the archive is
//! buffered in memory up to the configured bound before extraction.

use super::engine::StepError;
use crate::error::TransferError;
use std::io::{self, Cursor, Read, Write};
use tracing::warn;
use zip::result::ZipError;
use zip::ZipArchive;

/// Extract the first regular file of an archive into `output`.
///
/// Returns the member's base name.
pub(super) fn extract_first(
    input: &mut dyn Read,
    output: &mut dyn Write,
    limit: u64,
) -> Result<String, StepError> {
    let mut buffer = Vec::new();
    input.take(limit.saturating_add(1)).read_to_end(&mut buffer)?;
    if buffer.len() as u64 > limit {
        return Err(StepError::Failed(TransferError::TransformInputTooLarge { limit }));
    }

    let mut archive = ZipArchive::new(Cursor::new(buffer)).map_err(zip_error)?;
    let members = archive.len();

    for index in 0..members {
        let mut member = archive.by_index(index).map_err(zip_error)?;
        if member.is_dir() {
            continue;
        }

        let name = member
            .enclosed_name()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .ok_or_else(|| {
                StepError::Failed(invalid(format!("unsafe member name '{}'", member.name())))
            })?;

        if members > index + 1 {
            warn!(member = %name, members, "Archive has more entries; only the first file is extracted");
        }

        io::copy(&mut member, output)?;
        return Ok(name);
    }

    Err(StepError::Failed(invalid("archive contains no files".to_string())))
}

fn zip_error(err: ZipError) -> StepError {
    match err {
        ZipError::Io(e) => StepError::Io(e),
        other => StepError::Failed(invalid(other.to_string())),
    }
}

fn invalid(message: String) -> TransferError {
    TransferError::TransformFailed {
        transform: "unzip".to_string(),
        message,
    }
}
