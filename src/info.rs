//! Info tables: the archive's directory of sounds, banks, players, files
//! and groups.
//!
//! All records are decoded once from the `INFO` section into flat read-only
//! tables. Indices between tables are validated while parsing so later
//! lookups can trust them.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::chunk::Chunk;
use crate::error::{Result, SndarcError};

/// What kind of asset a sound entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SoundType {
    /// A sequenced song (bytecode + bank).
    Seq = 0x1,
    /// A streamed track.
    Strm = 0x2,
    /// A one-shot wave.
    Wave = 0x3,
}

/// Pan attenuation curve selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[allow(missing_docs)]
pub enum PanCurve {
    Sqrt = 0,
    Sqrt0Db = 1,
    Sqrt0DbClamp = 2,
    SinCos = 3,
    SinCos0Db = 4,
    SinCos0DbClamp = 5,
    Linear = 6,
    Linear0Db = 7,
    Linear0DbClamp = 8,
}

/// Distance decay curve for 3D-positioned sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum DecayCurve {
    /// Linear attenuation over distance.
    Linear = 1,
    /// Logarithmic attenuation over distance.
    Logarithmic = 2,
}

bitflags! {
    /// Which channel parameters 3D positioning is allowed to control.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sound3dFlags: u32 {
        /// Distance controls volume.
        const VOLUME = 1 << 0;
        /// Distance controls priority.
        const PRIORITY = 1 << 1;
        /// Position controls pan.
        const PAN = 1 << 2;
        /// Position controls surround pan.
        const SURROUND_PAN = 1 << 3;
        /// Distance controls the lowpass filter.
        const FILTER = 1 << 4;
    }
}

/// 3D positioning parameters attached to a sound entry.
#[derive(Debug, Clone, Copy)]
pub struct Sound3d {
    /// Which parameters positioning controls (unknown bits preserved).
    pub flags: Sound3dFlags,
    /// Distance decay curve.
    pub curve: Option<DecayCurve>,
    /// Decay ratio.
    pub ratio: u8,
    /// Doppler factor.
    pub doppler: u8,
}

/// Payload of a sequence-type sound.
#[derive(Debug, Clone, Copy)]
pub struct SeqSoundData {
    /// Label index naming the entry point inside the sequence file.
    pub label_entry: u32,
    /// Index into the bank table (negative when unset).
    pub bank_index: i32,
    /// Bitmask of tracks the player allocates.
    pub track_mask: u32,
    /// Channel allocation priority.
    pub channel_priority: u8,
    /// Whether channel allocation is fixed.
    pub fix_flag: u8,
}

/// Payload of a stream-type sound.
#[derive(Debug, Clone, Copy)]
pub struct StreamSoundData {
    /// Byte offset where streaming starts.
    pub start_pos: u32,
    /// Number of interleaved channels.
    pub channel_count: u16,
    /// Per-track allocation flags.
    pub track_flags: u16,
}

/// Payload of a wave-type sound.
#[derive(Debug, Clone, Copy)]
pub struct WaveSoundData {
    /// Index of the wave inside the file's audio half.
    pub wave_index: u32,
    /// Bitmask of tracks the player allocates.
    pub track_mask: u32,
    /// Channel allocation priority.
    pub channel_priority: u8,
    /// Whether channel allocation is fixed.
    pub fix_flag: u8,
}

/// Shape-specific payload of a sound entry, selected by its type tag.
#[derive(Debug, Clone, Copy)]
pub enum SoundPayload {
    /// Sequenced song data.
    Seq(SeqSoundData),
    /// Streamed track data.
    Stream(StreamSoundData),
    /// One-shot wave data.
    Wave(WaveSoundData),
}

impl SoundPayload {
    /// The type tag this payload was selected by.
    pub fn sound_type(&self) -> SoundType {
        match self {
            SoundPayload::Seq(_) => SoundType::Seq,
            SoundPayload::Stream(_) => SoundType::Strm,
            SoundPayload::Wave(_) => SoundType::Wave,
        }
    }
}

/// One playable sound asset.
#[derive(Debug, Clone)]
pub struct SoundEntry {
    /// Resolved name (empty when the archive carries no symbol for it).
    pub name: String,
    /// Index of the file that stores the sound's bytes.
    pub file_index: u32,
    /// Player responsible for this sound.
    pub player_id: u32,
    /// 3D positioning parameters.
    pub sound3d: Sound3d,
    /// Default volume (0-127).
    pub volume: u8,
    /// Playback priority.
    pub priority: u8,
    /// Remote filter strength.
    pub remote_filter: u8,
    /// Type-specific payload.
    pub payload: SoundPayload,
    /// First user parameter word.
    pub user1: u32,
    /// Second user parameter word.
    pub user2: u32,
    /// Whether pan balances instead of attenuating.
    pub balance_pan: bool,
    /// Pan attenuation curve.
    pub pan_curve: Option<PanCurve>,
    /// Actor player slot.
    pub actor_player_id: u8,
}

/// One instrument bank reference.
#[derive(Debug, Clone)]
pub struct BankEntry {
    /// Resolved name.
    pub name: String,
    /// Index of the file that stores the bank.
    pub file_index: u32,
    /// Bank slot index (negative when unset).
    pub bank_index: i32,
}

/// One player definition.
#[derive(Debug, Clone)]
pub struct PlayerEntry {
    /// Resolved name.
    pub name: String,
    /// Maximum simultaneous sounds.
    pub sound_count: u8,
    /// Heap reserved for this player, in bytes.
    pub heap_size: u32,
}

/// Coordinates of a file inside a group.
#[derive(Debug, Clone, Copy)]
pub struct FilePosition {
    /// Group table index.
    pub group: u32,
    /// Item index within the group.
    pub index: u32,
}

/// One logical file: either an external path or positions inside the
/// shared file section.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Size of the main (structure) half in bytes.
    pub main_size: u32,
    /// Size of the audio half in bytes.
    pub audio_size: u32,
    /// Original entry number.
    pub entry_number: i32,
    /// Path of an out-of-container file, when present.
    pub external_name: Option<String>,
    /// Locations of the file's bytes inside groups.
    pub positions: Vec<FilePosition>,
}

/// One item stored inside a group.
#[derive(Debug, Clone, Copy)]
pub struct GroupItem {
    /// Index of the file entry this item backs.
    pub file_index: u32,
    /// Offset of the main half within the group's main region.
    pub file_offset: u32,
    /// Size of the main half.
    pub file_size: u32,
    /// Offset of the audio half within the group's audio region.
    pub audio_offset: u32,
    /// Size of the audio half.
    pub audio_size: u32,
}

/// One group of packed files inside the shared file section.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    /// Resolved name.
    pub name: String,
    /// Original entry number.
    pub entry_number: u32,
    /// Path of an external group payload, when present.
    pub external_path: Option<String>,
    /// File-absolute offset of the group's main region.
    pub file_offset: u32,
    /// Declared size of the main region.
    pub file_size: u32,
    /// File-absolute offset of the group's audio region.
    pub audio_offset: u32,
    /// Declared size of the audio region.
    pub audio_size: u32,
    /// The group's items.
    pub items: Vec<GroupItem>,
}

/// The five decoded top-level tables.
#[derive(Debug, Clone, Default)]
pub struct InfoTables {
    /// Playable sounds.
    pub sounds: Vec<SoundEntry>,
    /// Instrument banks.
    pub banks: Vec<BankEntry>,
    /// Players.
    pub players: Vec<PlayerEntry>,
    /// Logical files.
    pub files: Vec<FileEntry>,
    /// File groups.
    pub groups: Vec<GroupEntry>,
}

fn name_of(strings: &[String], index: u32) -> String {
    strings.get(index as usize).cloned().unwrap_or_default()
}

impl InfoTables {
    /// Decode the five tables from the `INFO` section.
    pub fn parse(chunk: &Chunk, strings: &[String]) -> Result<InfoTables> {
        let mut tables = InfoTables::default();
        for r in chunk.parse_data_ref_table(chunk.parse_data_ref(0x00)?.pointer as usize)? {
            tables
                .sounds
                .push(parse_sound(chunk, r.pointer as usize, strings)?);
        }
        for r in chunk.parse_data_ref_table(chunk.parse_data_ref(0x08)?.pointer as usize)? {
            tables
                .banks
                .push(parse_bank(chunk, r.pointer as usize, strings)?);
        }
        for r in chunk.parse_data_ref_table(chunk.parse_data_ref(0x10)?.pointer as usize)? {
            tables
                .players
                .push(parse_player(chunk, r.pointer as usize, strings)?);
        }
        for r in chunk.parse_data_ref_table(chunk.parse_data_ref(0x18)?.pointer as usize)? {
            tables.files.push(parse_file(chunk, r.pointer as usize)?);
        }
        for r in chunk.parse_data_ref_table(chunk.parse_data_ref(0x20)?.pointer as usize)? {
            tables
                .groups
                .push(parse_group(chunk, r.pointer as usize, strings)?);
        }
        tables.validate()?;
        Ok(tables)
    }

    /// Cross-check indices between tables so later lookups cannot go out of
    /// range.
    fn validate(&self) -> Result<()> {
        for sound in &self.sounds {
            if sound.file_index as usize >= self.files.len() {
                return Err(SndarcError::IndexOutOfRange {
                    kind: "file",
                    index: sound.file_index as usize,
                    len: self.files.len(),
                });
            }
        }
        for file in &self.files {
            for pos in &file.positions {
                let group = self.groups.get(pos.group as usize).ok_or({
                    SndarcError::IndexOutOfRange {
                        kind: "group",
                        index: pos.group as usize,
                        len: self.groups.len(),
                    }
                })?;
                if pos.index as usize >= group.items.len() {
                    return Err(SndarcError::IndexOutOfRange {
                        kind: "group item",
                        index: pos.index as usize,
                        len: group.items.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn parse_sound(chunk: &Chunk, offset: usize, strings: &[String]) -> Result<SoundEntry> {
    let sound3d_ref = chunk.parse_data_ref(offset + 0x0C)?;
    let sound3d = if sound3d_ref.is_present() {
        let at = sound3d_ref.pointer as usize;
        Sound3d {
            flags: Sound3dFlags::from_bits_retain(chunk.parse_u32(at)?),
            curve: DecayCurve::from_u8(chunk.parse_u8(at + 0x4)?),
            ratio: chunk.parse_u8(at + 0x5)?,
            doppler: chunk.parse_u8(at + 0x6)?,
        }
    } else {
        Sound3d {
            flags: Sound3dFlags::empty(),
            curve: None,
            ratio: 0,
            doppler: 0,
        }
    };

    let type_tag = chunk.parse_u8(offset + 0x16)?;
    let payload_at = chunk.parse_data_ref(offset + 0x18)?.pointer as usize;
    let payload = match SoundType::from_u8(type_tag) {
        Some(SoundType::Seq) => SoundPayload::Seq(SeqSoundData {
            label_entry: chunk.parse_u32(payload_at)?,
            bank_index: chunk.parse_i32(payload_at + 4)?,
            track_mask: chunk.parse_u32(payload_at + 8)?,
            channel_priority: chunk.parse_u8(payload_at + 12)?,
            fix_flag: chunk.parse_u8(payload_at + 13)?,
        }),
        Some(SoundType::Strm) => SoundPayload::Stream(StreamSoundData {
            start_pos: chunk.parse_u32(payload_at)?,
            channel_count: chunk.parse_u16(payload_at + 4)?,
            track_flags: chunk.parse_u16(payload_at + 6)?,
        }),
        Some(SoundType::Wave) => SoundPayload::Wave(WaveSoundData {
            wave_index: chunk.parse_u32(payload_at)?,
            track_mask: chunk.parse_u32(payload_at + 4)?,
            channel_priority: chunk.parse_u8(payload_at + 8)?,
            fix_flag: chunk.parse_u8(payload_at + 9)?,
        }),
        None => return Err(SndarcError::UnknownSoundType { tag: type_tag }),
    };

    Ok(SoundEntry {
        name: name_of(strings, chunk.parse_u32(offset)?),
        file_index: chunk.parse_u32(offset + 0x4)?,
        player_id: chunk.parse_u32(offset + 0x8)?,
        sound3d,
        volume: chunk.parse_u8(offset + 0x14)?,
        priority: chunk.parse_u8(offset + 0x15)?,
        remote_filter: chunk.parse_u8(offset + 0x17)?,
        payload,
        user1: chunk.parse_u32(offset + 0x20)?,
        user2: chunk.parse_u32(offset + 0x24)?,
        balance_pan: chunk.parse_u8(offset + 0x28)? != 0,
        pan_curve: PanCurve::from_u8(chunk.parse_u8(offset + 0x29)?),
        actor_player_id: chunk.parse_u8(offset + 0x2A)?,
    })
}

fn parse_bank(chunk: &Chunk, offset: usize, strings: &[String]) -> Result<BankEntry> {
    Ok(BankEntry {
        name: name_of(strings, chunk.parse_u32(offset)?),
        file_index: chunk.parse_u32(offset + 4)?,
        bank_index: chunk.parse_i32(offset + 8)?,
    })
}

fn parse_player(chunk: &Chunk, offset: usize, strings: &[String]) -> Result<PlayerEntry> {
    Ok(PlayerEntry {
        name: name_of(strings, chunk.parse_u32(offset)?),
        sound_count: chunk.parse_u8(offset + 4)?,
        heap_size: chunk.parse_u32(offset + 8)?,
    })
}

fn parse_file(chunk: &Chunk, offset: usize) -> Result<FileEntry> {
    let name_ref = chunk.parse_data_ref(offset + 0x0C)?;
    let external_name = if name_ref.is_present() && name_ref.is_offset {
        Some(chunk.parse_cstring(name_ref.pointer as usize)?)
    } else {
        None
    };

    let positions_at = chunk.parse_data_ref(offset + 0x14)?;
    let mut positions = Vec::new();
    if positions_at.is_present() {
        for r in chunk.parse_data_ref_table(positions_at.pointer as usize)? {
            let at = r.pointer as usize;
            positions.push(FilePosition {
                group: chunk.parse_u32(at)?,
                index: chunk.parse_u32(at + 4)?,
            });
        }
    }

    Ok(FileEntry {
        main_size: chunk.parse_u32(offset)?,
        audio_size: chunk.parse_u32(offset + 0x4)?,
        entry_number: chunk.parse_i32(offset + 0x8)?,
        external_name,
        positions,
    })
}

fn parse_group(chunk: &Chunk, offset: usize, strings: &[String]) -> Result<GroupEntry> {
    let path_ref = chunk.parse_data_ref(offset + 0x8)?;
    let external_path = if path_ref.is_present() && path_ref.is_offset {
        Some(chunk.parse_cstring(path_ref.pointer as usize)?)
    } else {
        None
    };

    let mut items = Vec::new();
    let items_ref = chunk.parse_data_ref(offset + 0x20)?;
    if items_ref.is_present() {
        for r in chunk.parse_data_ref_table(items_ref.pointer as usize)? {
            let at = r.pointer as usize;
            items.push(GroupItem {
                file_index: chunk.parse_u32(at)?,
                file_offset: chunk.parse_u32(at + 0x4)?,
                file_size: chunk.parse_u32(at + 0x8)?,
                audio_offset: chunk.parse_u32(at + 0xC)?,
                audio_size: chunk.parse_u32(at + 0x10)?,
            });
        }
    }

    Ok(GroupEntry {
        name: name_of(strings, chunk.parse_u32(offset)?),
        entry_number: chunk.parse_u32(offset + 0x4)?,
        external_path,
        file_offset: chunk.parse_u32(offset + 0x10)?,
        file_size: chunk.parse_u32(offset + 0x14)?,
        audio_offset: chunk.parse_u32(offset + 0x18)?,
        audio_size: chunk.parse_u32(offset + 0x1C)?,
        items,
    })
}
