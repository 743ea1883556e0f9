//! Transform identifiers

use crate::error::TransferError;
use std::str::FromStr;

/// Known content transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Passthrough
    Identity,
    /// Gzip compression
    Gzip,
    /// LZ4 frame compression
    Lz4,
    /// Extract the first file of a ZIP archive
    Unzip,
    /// Extract the first file of a ZIP archive, then gzip it
    UnzipGzip,
}

impl Transform {
    /// All transforms, in identifier order
    pub const ALL: [Transform; 5] = [
        Self::Identity,
        Self::Gzip,
        Self::Lz4,
        Self::Unzip,
        Self::UnzipGzip,
    ];

    /// Configuration identifier
    pub fn id(&self) -> &'static str {
        match self {
            Self::Identity => "none",
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
            Self::Unzip => "unzip",
            Self::UnzipGzip => "unzip-gzip",
        }
    }

    /// Whether the transform must hold its whole input in memory
    pub fn buffers_input(&self) -> bool {
        matches!(self, Self::Unzip | Self::UnzipGzip)
    }

    /// Suffix appended to the object name after the content step
    pub fn name_suffix(&self) -> Option<&'static str> {
        match self {
            Self::Gzip | Self::UnzipGzip => Some(".gz"),
            Self::Lz4 => Some(".lz4"),
            Self::Identity | Self::Unzip => None,
        }
    }
}

impl FromStr for Transform {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.id() == s.trim())
            .ok_or_else(|| TransferError::UnsupportedTransform(s.to_string()))
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_identifiers_parse_back() {
        for t in Transform::ALL {
            assert_eq!(t.id().parse::<Transform>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_identifier() {
        let err = "rot13".parse::<Transform>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedTransform);
    }

    #[test]
    fn test_buffering_set() {
        assert!(Transform::Unzip.buffers_input());
        assert!(!Transform::Gzip.buffers_input());
        assert_eq!(Transform::UnzipGzip.name_suffix(), Some(".gz"));
    }
}
