//! Sound archive façade: string tables, info tables and logical-file
//! resolution over the shared `FILE` section.

use crate::chunk::{ArchiveKind, Chunk, ChunkKind, FILE, INFO, STRG, SYMB};
use crate::context::ArchiveContext;
use crate::error::{Result, SndarcError};
use crate::info::InfoTables;
use crate::stream::ByteView;

/// Which half of a packed file to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileHalf {
    /// The structural half (sequence/bank/wave-archive headers).
    Main,
    /// The audio half (raw wave payloads).
    Audio,
}

/// An opened sound archive: root chunk tree, name table and info tables.
pub struct SoundArchive {
    root: Chunk,
    kind: ArchiveKind,
    strings: Vec<String>,
    info: Option<InfoTables>,
}

impl SoundArchive {
    /// Open an archive from an in-memory byte view.
    pub fn open(data: &ByteView) -> Result<SoundArchive> {
        let root = Chunk::load_root(data)?;
        let kind = match root.kind {
            ChunkKind::Archive(kind) => kind,
            _ => {
                return Err(SndarcError::UnrecognizedContainer { magic: root.magic });
            }
        };

        let strings = match kind {
            ArchiveKind::Rsar => parse_symb(root.require_section(SYMB)?)?,
            ArchiveKind::Fsar | ArchiveKind::Csar => parse_strg(root.require_section(STRG)?)?,
        };

        let info = match kind {
            ArchiveKind::Rsar => Some(InfoTables::parse(root.require_section(INFO)?, &strings)?),
            // Later generations keep their directory in a different shape;
            // only the name table is decoded for them.
            ArchiveKind::Fsar | ArchiveKind::Csar => None,
        };

        Ok(SoundArchive {
            root,
            kind,
            strings,
            info,
        })
    }

    /// Which format generation this archive uses.
    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    /// The root chunk of the archive.
    pub fn root(&self) -> &Chunk {
        &self.root
    }

    /// All decoded names.
    pub fn names(&self) -> &[String] {
        &self.strings
    }

    /// Look up a name by symbol index.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }

    /// The archive's info tables.
    pub fn info(&self) -> Result<&InfoTables> {
        self.info
            .as_ref()
            .ok_or(SndarcError::MissingSection { magic: INFO })
    }

    /// Resolve a logical file to a byte view over its first position, or to
    /// the named external file through the context.
    pub fn file(&self, index: usize, half: FileHalf, ctx: &ArchiveContext) -> Result<ByteView> {
        let info = self.info()?;
        let entry = info
            .files
            .get(index)
            .ok_or(SndarcError::IndexOutOfRange {
                kind: "file",
                index,
                len: info.files.len(),
            })?;
        if let Some(name) = &entry.external_name {
            return ctx.open_file(name);
        }
        let pos = entry.positions.first().ok_or(SndarcError::InvalidData {
            msg: format!("file entry {index} has neither a name nor positions"),
        })?;
        self.file_in_group(pos.group as usize, pos.index as usize, half)
    }

    /// Resolve a (group, item) coordinate to a byte view inside the shared
    /// `FILE` section.
    ///
    /// Both limits are enforced: the item range against the group's declared
    /// size for that half, and the absolute range against the decoded
    /// section payload.
    pub fn file_in_group(&self, group: usize, index: usize, half: FileHalf) -> Result<ByteView> {
        let info = self.info()?;
        let entry = info
            .groups
            .get(group)
            .ok_or(SndarcError::IndexOutOfRange {
                kind: "group",
                index: group,
                len: info.groups.len(),
            })?;
        let item = entry
            .items
            .get(index)
            .ok_or(SndarcError::IndexOutOfRange {
                kind: "group item",
                index,
                len: entry.items.len(),
            })?;

        let (region_offset, offset, size, max_size) = match half {
            FileHalf::Main => (
                entry.file_offset,
                item.file_offset,
                item.file_size,
                entry.file_size,
            ),
            FileHalf::Audio => (
                entry.audio_offset,
                item.audio_offset,
                item.audio_size,
                entry.audio_size,
            ),
        };

        if offset as u64 + size as u64 > max_size as u64 {
            return Err(SndarcError::FileBounds {
                base: 0,
                offset,
                size,
                limit: max_size as u64,
            });
        }

        let section = self.root.require_section(FILE)?;
        let base =
            region_offset as i64 - section.file_start as i64 - self.file_header_constant();
        let end = base + offset as i64 + size as i64;
        if base < 0 || end > section.data.len() as i64 {
            return Err(SndarcError::FileBounds {
                base,
                offset,
                size,
                limit: section.data.len() as u64,
            });
        }

        section.data.view((base + offset as i64) as usize, size as usize)
    }

    /// Header bytes the loader strips before the `FILE` payload; group
    /// offsets are file-absolute and must be translated past them.
    fn file_header_constant(&self) -> i64 {
        match self.kind {
            ArchiveKind::Rsar => 0xC,
            ArchiveKind::Fsar | ArchiveKind::Csar => 0x8,
        }
    }
}

/// Decode the `SYMB` name table: a table offset, then offsets to
/// NUL-terminated strings.
fn parse_symb(symb: &Chunk) -> Result<Vec<String>> {
    let mut offset = symb.parse_u32(0)? as usize;
    let count = symb.parse_u32(offset)? as usize;
    let mut strings = Vec::with_capacity(count);
    for _ in 0..count {
        offset += 4;
        let at = symb.parse_u32(offset)? as usize;
        strings.push(symb.parse_cstring(at)?);
    }
    Ok(strings)
}

/// Decode the `STRG` name table: 12-byte entries of biased positions and
/// explicit lengths.
fn parse_strg(strg: &Chunk) -> Result<Vec<String>> {
    let table = strg.parse_u32(4)? as usize;
    let count = strg.parse_u32(table)? as usize;
    let mut strings = Vec::with_capacity(count);
    for i in 0..count {
        let entry = table + 4 + i * 12;
        let at = strg.parse_u32(entry + 4)? as usize + 16;
        let len = strg.parse_u32(entry + 8)? as usize;
        strings.push(strg.data.string_at(at, len)?);
    }
    Ok(strings)
}
