//! Chunk loader for the chunked sound-archive container family.
//!
//! Containers are trees of tagged binary sections. A root chunk carries a
//! 4-byte magic, a byte order mark fixing endianness for the whole tree, a
//! per-format header and a section locator table; each locator is seeked to
//! and the child chunk loaded recursively. Child chunks own a private
//! payload view and are registered by magic on their parent (at most one
//! section per magic — later entries replace earlier ones).
//!
//! Type dispatch is a closed table over `(magic, parent magic)`; anything
//! unrecognized below the root loads as a raw chunk.

use std::collections::HashMap;

use crate::error::{Result, SndarcError};
use crate::stream::{ByteView, Endian};

/// A 4-byte section tag.
pub type Magic = [u8; 4];

/// Root tag of the first archive generation.
pub const RSAR: Magic = *b"RSAR";
/// Root tag of the second archive generation.
pub const FSAR: Magic = *b"FSAR";
/// Root tag of the third archive generation.
pub const CSAR: Magic = *b"CSAR";
/// Sequence file tag.
pub const RSEQ: Magic = *b"RSEQ";
/// Instrument bank tag.
pub const RBNK: Magic = *b"RBNK";
/// Wave archive tag.
pub const RWAR: Magic = *b"RWAR";
/// Single wave tag.
pub const RWAV: Magic = *b"RWAV";
/// Info table section (inside `RSAR`).
pub const INFO: Magic = *b"INFO";
/// Symbol/string section (inside `RSAR`).
pub const SYMB: Magic = *b"SYMB";
/// String table section (inside `FSAR`/`CSAR`).
pub const STRG: Magic = *b"STRG";
/// Shared file payload section.
pub const FILE: Magic = *b"FILE";
/// Sequence label section (inside `RSEQ`).
pub const LABL: Magic = *b"LABL";
/// Sequence bytecode section (inside `RSEQ`).
pub const DATA: Magic = *b"DATA";
/// Wave archive entry table section (inside `RWAR`).
pub const TABL: Magic = *b"TABL";

/// Which archive format variant a root chunk uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// First generation: u16 version header, no section reference IDs.
    Rsar,
    /// Second generation: u32 version header, reference IDs, u16 count.
    Fsar,
    /// Third generation: u32 version header, reference IDs, u32 count.
    Csar,
}

/// Closed set of chunk roles, selected by `(magic, parent magic)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// A sound archive root.
    Archive(ArchiveKind),
    /// A sequence file root.
    Sequence,
    /// An instrument bank root.
    Bank,
    /// A wave archive root.
    WaveArchive,
    /// A single wave file root.
    Wave,
    /// The info table section of an archive.
    Info,
    /// The label section of a sequence.
    Labels,
    /// Any other section: raw payload only.
    Raw,
}

fn kind_for(magic: Magic, parent: Option<Magic>) -> ChunkKind {
    match (magic, parent) {
        (RSAR, None) => ChunkKind::Archive(ArchiveKind::Rsar),
        (FSAR, None) => ChunkKind::Archive(ArchiveKind::Fsar),
        (CSAR, None) => ChunkKind::Archive(ArchiveKind::Csar),
        (RSEQ, None) => ChunkKind::Sequence,
        (RBNK, None) => ChunkKind::Bank,
        (RWAR, None) => ChunkKind::WaveArchive,
        (RWAV, None) => ChunkKind::Wave,
        (INFO, Some(RSAR)) => ChunkKind::Info,
        (LABL, Some(RSEQ)) => ChunkKind::Labels,
        _ => ChunkKind::Raw,
    }
}

/// A tagged pointer-or-inline-value reference.
///
/// Evaluates to absent when the pointer is zero; callers must check
/// [`DataRef::is_present`] (and usually the type tag) before following it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataRef {
    /// Nonzero when the pointer is an offset rather than an inline value.
    pub is_offset: bool,
    /// Format-specific tag describing what the reference points at.
    pub data_type: u8,
    /// Offset (relative to the owning chunk's payload) or inline value.
    pub pointer: u32,
}

impl DataRef {
    /// Whether the reference points at anything.
    pub fn is_present(&self) -> bool {
        self.pointer != 0
    }
}

/// A node in the container tree: tag, byte order, private payload and
/// child sections.
///
/// Payload offsets are always relative to the chunk's own payload start;
/// `file_start` records where the chunk began in the enclosing stream so
/// cross-chunk references can be translated explicitly.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// The chunk's 4-byte tag.
    pub magic: Magic,
    /// Role selected by the dispatch table.
    pub kind: ChunkKind,
    /// Byte order for every multi-byte field in the tree.
    pub endian: Endian,
    /// Offset of the chunk's magic within the stream it was loaded from.
    pub file_start: u32,
    /// Container format version (width varies by format).
    pub version: u32,
    /// The chunk's private payload (empty for sectioned roots).
    pub data: ByteView,
    sections: HashMap<Magic, Chunk>,
}

struct SectionLayout {
    has_ref_ids: bool,
    wide_count: bool,
    version_first: bool,
    pad_after_count: bool,
}

fn root_layout(magic: Magic) -> Option<SectionLayout> {
    match magic {
        RSAR | RSEQ | RBNK | RWAR | RWAV => Some(SectionLayout {
            has_ref_ids: false,
            wide_count: false,
            version_first: true,
            pad_after_count: false,
        }),
        FSAR => Some(SectionLayout {
            has_ref_ids: true,
            wide_count: false,
            version_first: false,
            pad_after_count: true,
        }),
        CSAR => Some(SectionLayout {
            has_ref_ids: true,
            wide_count: true,
            version_first: false,
            pad_after_count: false,
        }),
        _ => None,
    }
}

impl Chunk {
    /// Load a chunk tree from the start of `stream`.
    pub fn load_root(stream: &ByteView) -> Result<Chunk> {
        let mut cursor = stream.clone();
        cursor.seek(0)?;
        Chunk::load(&mut cursor, None)
    }

    /// Load a chunk at the current position of `stream`.
    ///
    /// Root chunks (no parent) read a byte order mark and a sectioned
    /// header; child chunks inherit their parent's byte order and consume a
    /// declared-size payload.
    pub fn load(stream: &mut ByteView, parent: Option<(Magic, Endian)>) -> Result<Chunk> {
        let file_start = stream.position() as u32;
        let magic = stream.read_tag()?;
        let kind = kind_for(magic, parent.map(|(m, _)| m));

        match parent {
            None => {
                let bom = [stream.read_u8()?, stream.read_u8()?];
                let endian = match bom {
                    [0xFF, 0xFE] => Endian::Little,
                    [0xFE, 0xFF] => Endian::Big,
                    _ => return Err(SndarcError::BadByteOrderMark { bom }),
                };
                let layout = root_layout(magic)
                    .ok_or(SndarcError::UnrecognizedContainer { magic })?;
                Chunk::load_sectioned(stream, magic, kind, endian, file_start, layout)
            }
            Some((parent_magic, endian)) => {
                let mut size = stream
                    .read_u32(endian)?
                    .checked_sub(8)
                    .ok_or_else(|| SndarcError::InvalidData {
                        msg: format!(
                            "section '{}' declares a size smaller than its header",
                            crate::error::fourcc(magic)
                        ),
                    })?;
                // RSAR embeds one extra word between the FILE header and its
                // payload.
                if parent_magic == RSAR && magic == FILE {
                    stream.skip(4)?;
                    size = size.saturating_sub(4);
                }
                let data = stream.read_view(size as usize)?;
                Ok(Chunk {
                    magic,
                    kind,
                    endian,
                    file_start,
                    version: 0,
                    data,
                    sections: HashMap::new(),
                })
            }
        }
    }

    fn load_sectioned(
        stream: &mut ByteView,
        magic: Magic,
        kind: ChunkKind,
        endian: Endian,
        file_start: u32,
        layout: SectionLayout,
    ) -> Result<Chunk> {
        let version;
        if layout.version_first {
            version = stream.read_u16(endian)? as u32;
            let _file_size = stream.read_u32(endian)?;
            let _header_size = stream.read_u16(endian)?;
        } else {
            let _header_size = stream.read_u16(endian)?;
            version = stream.read_u32(endian)?;
            let _file_size = stream.read_u32(endian)?;
        }
        let section_count = if layout.wide_count {
            stream.read_u32(endian)? as usize
        } else {
            stream.read_u16(endian)? as usize
        };
        if layout.pad_after_count {
            stream.skip(2)?;
        }

        let mut locators = Vec::with_capacity(section_count);
        for _ in 0..section_count {
            if layout.has_ref_ids {
                stream.skip(4)?;
            }
            locators.push(stream.read_u32(endian)?);
            stream.skip(4)?;
        }

        let mut chunk = Chunk {
            magic,
            kind,
            endian,
            file_start,
            version,
            data: ByteView::empty(),
            sections: HashMap::new(),
        };
        for offset in locators {
            let target = file_start as usize + offset as usize;
            if stream.seek(target).is_err() {
                return Err(SndarcError::SectionOutOfBounds {
                    magic,
                    offset,
                    len: stream.len(),
                });
            }
            let section = Chunk::load(stream, Some((magic, endian)))?;
            chunk.sections.insert(section.magic, section);
        }
        Ok(chunk)
    }

    /// Look up a child section by magic.
    pub fn section(&self, magic: Magic) -> Option<&Chunk> {
        self.sections.get(&magic)
    }

    /// Look up a child section, failing with a missing-section error.
    pub fn require_section(&self, magic: Magic) -> Result<&Chunk> {
        self.section(magic)
            .ok_or(SndarcError::MissingSection { magic })
    }

    // Payload parse helpers ------------------------------------------------

    /// Read one byte of the payload.
    pub fn parse_u8(&self, offset: usize) -> Result<u8> {
        self.data.u8_at(offset)
    }

    /// Read one signed byte of the payload.
    pub fn parse_i8(&self, offset: usize) -> Result<i8> {
        self.data.i8_at(offset)
    }

    /// Read a u16 from the payload.
    pub fn parse_u16(&self, offset: usize) -> Result<u16> {
        self.data.u16_at(offset, self.endian)
    }

    /// Read an i16 from the payload.
    pub fn parse_i16(&self, offset: usize) -> Result<i16> {
        self.data.i16_at(offset, self.endian)
    }

    /// Read a u32 from the payload.
    pub fn parse_u32(&self, offset: usize) -> Result<u32> {
        self.data.u32_at(offset, self.endian)
    }

    /// Read an i32 from the payload.
    pub fn parse_i32(&self, offset: usize) -> Result<i32> {
        self.data.i32_at(offset, self.endian)
    }

    /// Read a NUL-terminated string from the payload.
    pub fn parse_cstring(&self, offset: usize) -> Result<String> {
        self.data.cstring_at(offset)
    }

    /// Read a u32-length-prefixed string from the payload.
    pub fn parse_lpstring(&self, offset: usize) -> Result<String> {
        self.data.lpstring_at(offset, self.endian)
    }

    /// Read a tagged reference from the payload.
    pub fn parse_data_ref(&self, offset: usize) -> Result<DataRef> {
        Ok(DataRef {
            is_offset: self.data.u8_at(offset)? != 0,
            data_type: self.data.u8_at(offset + 1)?,
            pointer: self.data.u32_at(offset + 4, self.endian)?,
        })
    }

    /// Read a `{count, count x 8-byte DataRef}` table header at `base`.
    pub fn parse_data_ref_table(&self, base: usize) -> Result<Vec<DataRef>> {
        let count = self.parse_u32(base)? as usize;
        let mut refs = Vec::with_capacity(count);
        for i in 0..count {
            refs.push(self.parse_data_ref(base + 4 + i * 8)?);
        }
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::build_container;

    #[test]
    fn test_root_magic_and_bom() {
        let bytes = build_container(RSEQ, &[(DATA, vec![0; 16])]);
        let chunk = Chunk::load_root(&ByteView::from_vec(bytes)).unwrap();
        assert_eq!(chunk.magic, RSEQ);
        assert_eq!(chunk.kind, ChunkKind::Sequence);
        assert_eq!(chunk.endian, Endian::Big);
        assert_eq!(chunk.version, 1);
        assert!(chunk.section(DATA).is_some());
    }

    #[test]
    fn test_unknown_root_magic_is_fatal() {
        let bytes = build_container(*b"XXXX", &[]);
        assert!(matches!(
            Chunk::load_root(&ByteView::from_vec(bytes)),
            Err(SndarcError::UnrecognizedContainer { magic }) if &magic == b"XXXX"
        ));
    }

    #[test]
    fn test_bad_bom_is_fatal() {
        let mut bytes = build_container(RSEQ, &[]);
        bytes[4] = 0x00;
        assert!(matches!(
            Chunk::load_root(&ByteView::from_vec(bytes)),
            Err(SndarcError::BadByteOrderMark { .. })
        ));
    }

    #[test]
    fn test_section_offset_out_of_bounds() {
        let mut bytes = build_container(RSEQ, &[(DATA, vec![0; 4])]);
        // Corrupt the locator offset.
        bytes[16..20].copy_from_slice(&0xFFFF_0000u32.to_be_bytes());
        assert!(matches!(
            Chunk::load_root(&ByteView::from_vec(bytes)),
            Err(SndarcError::SectionOutOfBounds { magic, .. }) if magic == RSEQ
        ));
    }

    #[test]
    fn test_child_offsets_relative_to_own_start() {
        // Round-trip offset integrity: the child's recorded file_start must
        // equal the locator offset it was loaded through.
        let bytes = build_container(RSEQ, &[(DATA, vec![1, 2, 3, 4]), (LABL, vec![9; 8])]);
        let view = ByteView::from_vec(bytes.clone());
        let chunk = Chunk::load_root(&view).unwrap();
        let data = chunk.section(DATA).unwrap();
        let labl = chunk.section(LABL).unwrap();
        for section in [data, labl] {
            let at = section.file_start as usize;
            assert_eq!(&bytes[at..at + 4], &section.magic);
        }
        assert_eq!(data.parse_u8(0).unwrap(), 1);
        assert_eq!(labl.data.len(), 8);
    }

    #[test]
    fn test_last_section_wins_on_magic_collision() {
        let bytes = build_container(RSEQ, &[(DATA, vec![1; 4]), (DATA, vec![2; 4])]);
        let chunk = Chunk::load_root(&ByteView::from_vec(bytes)).unwrap();
        assert_eq!(chunk.section(DATA).unwrap().parse_u8(0).unwrap(), 2);
    }

    #[test]
    fn test_data_ref_absent_when_zero() {
        let mut payload = vec![0u8; 8];
        payload[0] = 1;
        payload[1] = 2;
        let bytes = build_container(RSEQ, &[(DATA, payload)]);
        let chunk = Chunk::load_root(&ByteView::from_vec(bytes)).unwrap();
        let r = chunk.section(DATA).unwrap().parse_data_ref(0).unwrap();
        assert!(r.is_offset);
        assert_eq!(r.data_type, 2);
        assert!(!r.is_present());
    }
}
