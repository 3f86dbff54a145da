//! Error types for archive parsing, decoding and playback.

use thiserror::Error;

/// Convenient result alias for archive parsing and playback.
pub type Result<T> = std::result::Result<T, SndarcError>;

/// Render a 4-byte tag as printable text for diagnostics.
pub(crate) fn fourcc(magic: [u8; 4]) -> String {
    magic
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Errors that may occur while parsing or replaying sound archives.
#[derive(Debug, Error)]
pub enum SndarcError {
    /// Root chunk tag does not match any known container format.
    #[error("unrecognized container magic '{}'", fourcc(*magic))]
    UnrecognizedContainer {
        /// The 4-byte tag encountered at the start of the stream.
        magic: [u8; 4],
    },
    /// Root byte-order mark is neither 0xFFFE nor 0xFEFF.
    #[error("bad byte order mark {bom:02X?}")]
    BadByteOrderMark {
        /// The two bytes read where the BOM was expected.
        bom: [u8; 2],
    },
    /// A section locator points outside the backing stream.
    #[error("section offset 0x{offset:08X} out of bounds in '{}' (stream is {len} bytes)", fourcc(*magic))]
    SectionOutOfBounds {
        /// Magic of the chunk whose section table is being read.
        magic: [u8; 4],
        /// File-relative offset of the out-of-range section.
        offset: u32,
        /// Length of the backing stream.
        len: usize,
    },
    /// Buffer too small to contain the requested structure.
    #[error("unexpected end of data at offset 0x{offset:08X} (wanted {wanted}, {available} available)")]
    UnexpectedEof {
        /// Offset of the failed read.
        offset: usize,
        /// Number of bytes requested.
        wanted: usize,
        /// Number of bytes remaining.
        available: usize,
    },
    /// A required section is missing from a container.
    #[error("missing '{}' section", fourcc(*magic))]
    MissingSection {
        /// Magic of the absent section.
        magic: [u8; 4],
    },
    /// Computed byte range for a resolved file exceeds its limits.
    #[error("file range out of bounds: base {base} + offset {offset} + size {size} exceeds limit {limit}")]
    FileBounds {
        /// Base offset into the shared file section (0 when checking the
        /// group-declared limit).
        base: i64,
        /// Item offset within the group.
        offset: u32,
        /// Item size in bytes.
        size: u32,
        /// The limit that was exceeded.
        limit: u64,
    },
    /// A sound entry carries a type tag with no known payload shape.
    #[error("unknown sound type tag 0x{tag:02X}")]
    UnknownSoundType {
        /// The unrecognized type tag.
        tag: u8,
    },
    /// A wave file carries an unknown sample format tag.
    #[error("unknown wave format tag 0x{tag:02X}")]
    UnknownWaveFormat {
        /// The unrecognized format tag.
        tag: u8,
    },
    /// A table index is outside the decoded table.
    #[error("{kind} index {index} out of range (table has {len} entries)")]
    IndexOutOfRange {
        /// Which table was being indexed.
        kind: &'static str,
        /// The requested index.
        index: usize,
        /// Number of entries in the table.
        len: usize,
    },
    /// IO error from the host filesystem.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Generic validation error.
    #[error("{msg}")]
    InvalidData {
        /// Human-readable explanation of the validation failure.
        msg: String,
    },
}

impl From<String> for SndarcError {
    fn from(msg: String) -> Self {
        SndarcError::InvalidData { msg }
    }
}

impl From<&str> for SndarcError {
    fn from(msg: &str) -> Self {
        SndarcError::InvalidData {
            msg: msg.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_printable() {
        assert_eq!(fourcc(*b"RSAR"), "RSAR");
        assert_eq!(fourcc([0x00, 0x41, 0xFF, 0x42]), "?A?B");
    }

    #[test]
    fn test_bounds_error_carries_values() {
        let err = SndarcError::FileBounds {
            base: 0,
            offset: 0x40,
            size: 0x100,
            limit: 0x80,
        };
        let msg = err.to_string();
        assert!(msg.contains("64"));
        assert!(msg.contains("256"));
        assert!(msg.contains("128"));
    }
}
