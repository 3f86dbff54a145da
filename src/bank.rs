//! Instrument banks: per-program key/velocity regions mapping notes to
//! waves and articulation parameters.

use crate::chunk::{Chunk, ChunkKind, DataRef, DATA};
use crate::error::{Result, SndarcError};

/// Reference type tag: a single instrument record.
pub const REF_DIRECT: u8 = 1;
/// Reference type tag: a range table over key or velocity.
pub const REF_RANGE: u8 = 2;
/// Reference type tag: an index table over key or velocity.
pub const REF_INDEX: u8 = 3;

/// Articulation record selected by a (program, key, velocity) lookup.
#[derive(Debug, Clone)]
pub struct InstrumentSample {
    /// Reference to the wave (the pointer is a wave-archive index).
    pub wave: DataRef,
    /// Attack curve code (7-bit).
    pub attack: i8,
    /// Decay curve code.
    pub decay: i8,
    /// Sustain level code.
    pub sustain: i8,
    /// Release curve code.
    pub release: i8,
    /// Hold time code.
    pub hold: i8,
    /// Skip the release phase entirely.
    pub ignore_release: bool,
    /// Alternate assignment group.
    pub alternate: u8,
    /// The key at which the wave plays at its recorded rate.
    pub base_note: u8,
    /// Default volume.
    pub volume: u8,
    /// Default pan.
    pub pan: u8,
    /// Default surround pan.
    pub surround: u8,
    /// Fixed-point fine pitch adjustment.
    pub pitch: u32,
    /// Optional LFO table reference.
    pub lfo_table: DataRef,
    /// Optional envelope table reference.
    pub env_table: DataRef,
    /// Optional randomizer table reference.
    pub rand_table: DataRef,
}

/// One velocity region inside a key region.
#[derive(Debug, Clone)]
pub struct VelSplit {
    /// Lowest velocity covered (inclusive).
    pub min_vel: u8,
    /// Highest velocity covered (inclusive).
    pub max_vel: u8,
    /// The articulation record for this region.
    pub sample: InstrumentSample,
}

/// One key region of a program.
#[derive(Debug, Clone)]
pub struct KeySplit {
    /// Lowest key covered (inclusive).
    pub min_key: u8,
    /// Highest key covered (inclusive).
    pub max_key: u8,
    /// Velocity regions inside this key range.
    pub vel_splits: Vec<VelSplit>,
}

/// One program: an ordered, non-overlapping set of key regions.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Key regions in ascending order.
    pub key_splits: Vec<KeySplit>,
}

/// A parsed instrument bank.
pub struct BankFile {
    chunk: Chunk,
    programs: Vec<Program>,
}

impl BankFile {
    /// Parse a bank from its loaded chunk tree.
    pub fn parse(chunk: Chunk) -> Result<BankFile> {
        if chunk.kind != ChunkKind::Bank {
            return Err(SndarcError::InvalidData {
                msg: format!(
                    "expected a bank file, found '{}'",
                    crate::error::fourcc(chunk.magic)
                ),
            });
        }
        let data = chunk.require_section(DATA)?;
        let mut programs = Vec::new();
        for r in data.parse_data_ref_table(0)? {
            programs.push(parse_program(data, r)?);
        }
        Ok(BankFile { chunk, programs })
    }

    /// The chunk tree this bank was parsed from.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// All decoded programs.
    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    /// Resolve (program, key, velocity) to an articulation record.
    ///
    /// Regions are continuous and non-overlapping by construction; the
    /// first matching key range, then the first matching velocity range,
    /// wins. Returns `None` when no region covers the coordinates.
    pub fn sample(&self, program: usize, key: u8, velocity: u8) -> Option<&InstrumentSample> {
        let program = self.programs.get(program)?;
        let key_split = program
            .key_splits
            .iter()
            .find(|s| s.min_key <= key && key <= s.max_key)?;
        let vel_split = key_split
            .vel_splits
            .iter()
            .find(|s| s.min_vel <= velocity && velocity <= s.max_vel)?;
        Some(&vel_split.sample)
    }
}

fn parse_program(data: &Chunk, r: DataRef) -> Result<Program> {
    if !r.is_present() {
        return Ok(Program::default());
    }
    let mut key_splits = Vec::new();
    for (min_key, max_key, child) in resolve_ranges(data, r)? {
        let mut vel_splits = Vec::new();
        for (min_vel, max_vel, leaf) in resolve_ranges(data, child)? {
            if leaf.data_type != REF_DIRECT {
                return Err(SndarcError::InvalidData {
                    msg: format!(
                        "bank region nests deeper than key/velocity (type {})",
                        leaf.data_type
                    ),
                });
            }
            vel_splits.push(VelSplit {
                min_vel,
                max_vel,
                sample: parse_instrument(data, leaf.pointer as usize)?,
            });
        }
        key_splits.push(KeySplit {
            min_key,
            max_key,
            vel_splits,
        });
    }
    Ok(Program { key_splits })
}

/// Expand one reference level into `(min, max, child)` ranges over the full
/// 0..=127 axis.
fn resolve_ranges(data: &Chunk, r: DataRef) -> Result<Vec<(u8, u8, DataRef)>> {
    match r.data_type {
        REF_DIRECT => Ok(vec![(0, 127, r)]),
        REF_RANGE => {
            let base = r.pointer as usize;
            let count = data.parse_u8(base)? as usize;
            let mut ranges = Vec::with_capacity(count);
            // Upper bounds follow the count; the reference table starts at
            // the next 4-byte boundary.
            let refs_at = (base + 1 + count + 3) & !3;
            let mut min = 0u8;
            for i in 0..count {
                let max = data.parse_u8(base + 1 + i)?;
                let child = data.parse_data_ref(refs_at + i * 8)?;
                if child.is_present() {
                    ranges.push((min, max, child));
                }
                min = max.saturating_add(1);
            }
            Ok(ranges)
        }
        REF_INDEX => {
            let base = r.pointer as usize;
            let min = data.parse_u8(base)?;
            let max = data.parse_u8(base + 1)?;
            let refs_at = base + 4;
            let mut ranges = Vec::new();
            for (i, value) in (min..=max).enumerate() {
                let child = data.parse_data_ref(refs_at + i * 8)?;
                if child.is_present() {
                    ranges.push((value, value, child));
                }
            }
            Ok(ranges)
        }
        other => Err(SndarcError::InvalidData {
            msg: format!("unknown bank reference type {other}"),
        }),
    }
}

fn parse_instrument(data: &Chunk, offset: usize) -> Result<InstrumentSample> {
    Ok(InstrumentSample {
        wave: data.parse_data_ref(offset)?,
        attack: data.parse_i8(offset + 8)?,
        decay: data.parse_i8(offset + 9)?,
        sustain: data.parse_i8(offset + 10)?,
        release: data.parse_i8(offset + 11)?,
        hold: data.parse_i8(offset + 12)?,
        ignore_release: data.parse_u8(offset + 13)? != 0,
        alternate: data.parse_u8(offset + 14)?,
        base_note: data.parse_u8(offset + 15)?,
        volume: data.parse_u8(offset + 16)?,
        pan: data.parse_u8(offset + 17)?,
        surround: data.parse_u8(offset + 18)?,
        pitch: data.parse_u32(offset + 20)?,
        lfo_table: data.parse_data_ref(offset + 24)?,
        env_table: data.parse_data_ref(offset + 32)?,
        rand_table: data.parse_data_ref(offset + 40)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::RBNK;
    use crate::stream::ByteView;
    use crate::testutil::{build_container, put_data_ref, put_u32};

    /// Write a 48-byte instrument record at `at` referencing `wave_index`.
    fn put_instrument(p: &mut [u8], at: usize, wave_index: u32, base_note: u8) {
        put_data_ref(p, at, REF_INDEX, wave_index);
        p[at] = 0; // wave refs are index-valued, not offsets
        p[at + 8] = 90; // attack
        p[at + 9] = 100; // decay
        p[at + 10] = 80; // sustain
        p[at + 11] = 110; // release
        p[at + 12] = 0; // hold
        p[at + 15] = base_note;
        p[at + 16] = 127; // volume
        p[at + 17] = 64; // pan
    }

    /// One program whose key axis splits at 59/60 into two instruments.
    fn build_bank_payload() -> Vec<u8> {
        let mut p = vec![0u8; 0x140];
        put_u32(&mut p, 0, 1); // one program
        put_data_ref(&mut p, 4, REF_RANGE, 0x20);
        // key range table at 0x20: two ranges with maxes 59 and 127
        p[0x20] = 2;
        p[0x21] = 59;
        p[0x22] = 127;
        // refs at 0x24 (aligned)
        put_data_ref(&mut p, 0x24, REF_DIRECT, 0x40);
        put_data_ref(&mut p, 0x2C, REF_DIRECT, 0x80);
        put_instrument(&mut p, 0x40, 1, 48);
        put_instrument(&mut p, 0x80, 2, 72);
        p
    }

    fn parse_bank(payload: Vec<u8>) -> BankFile {
        let bytes = build_container(RBNK, &[(DATA, payload)]);
        let chunk = Chunk::load_root(&ByteView::from_vec(bytes)).unwrap();
        BankFile::parse(chunk).unwrap()
    }

    #[test]
    fn test_key_split_boundaries_inclusive() {
        let bank = parse_bank(build_bank_payload());
        assert_eq!(bank.sample(0, 59, 100).unwrap().wave.pointer, 1);
        assert_eq!(bank.sample(0, 60, 100).unwrap().wave.pointer, 2);
        assert_eq!(bank.sample(0, 0, 1).unwrap().wave.pointer, 1);
        assert_eq!(bank.sample(0, 127, 127).unwrap().wave.pointer, 2);
    }

    #[test]
    fn test_missing_program_is_none() {
        let bank = parse_bank(build_bank_payload());
        assert!(bank.sample(1, 60, 100).is_none());
    }

    #[test]
    fn test_velocity_ranges_nested_under_keys() {
        let mut p = vec![0u8; 0x140];
        put_u32(&mut p, 0, 1);
        // Program -> key range table with one full-range entry that nests a
        // velocity range table.
        put_data_ref(&mut p, 4, REF_RANGE, 0x20);
        p[0x20] = 1;
        p[0x21] = 127;
        put_data_ref(&mut p, 0x24, REF_RANGE, 0x30);
        // velocity ranges: 0-63 and 64-127
        p[0x30] = 2;
        p[0x31] = 63;
        p[0x32] = 127;
        put_data_ref(&mut p, 0x34, REF_DIRECT, 0x50);
        put_data_ref(&mut p, 0x3C, REF_DIRECT, 0x90);
        put_instrument(&mut p, 0x50, 7, 60);
        put_instrument(&mut p, 0x90, 8, 60);

        let bank = parse_bank(p);
        assert_eq!(bank.sample(0, 60, 63).unwrap().wave.pointer, 7);
        assert_eq!(bank.sample(0, 60, 64).unwrap().wave.pointer, 8);
    }

    #[test]
    fn test_direct_program_covers_everything() {
        let mut p = vec![0u8; 0x80];
        put_u32(&mut p, 0, 1);
        put_data_ref(&mut p, 4, REF_DIRECT, 0x20);
        put_instrument(&mut p, 0x20, 5, 60);
        let bank = parse_bank(p);
        assert_eq!(bank.sample(0, 0, 0).unwrap().wave.pointer, 5);
        assert_eq!(bank.sample(0, 127, 127).unwrap().wave.pointer, 5);
        assert_eq!(bank.sample(0, 64, 1).unwrap().base_note, 60);
    }

    #[test]
    fn test_index_table_per_key() {
        let mut p = vec![0u8; 0x100];
        put_u32(&mut p, 0, 1);
        put_data_ref(&mut p, 4, REF_INDEX, 0x20);
        // keys 35..=36, one instrument each
        p[0x20] = 35;
        p[0x21] = 36;
        put_data_ref(&mut p, 0x24, REF_DIRECT, 0x40);
        put_data_ref(&mut p, 0x2C, REF_DIRECT, 0x80);
        put_instrument(&mut p, 0x40, 11, 35);
        put_instrument(&mut p, 0x80, 12, 36);
        let bank = parse_bank(p);
        assert_eq!(bank.sample(0, 35, 100).unwrap().wave.pointer, 11);
        assert_eq!(bank.sample(0, 36, 100).unwrap().wave.pointer, 12);
        assert!(bank.sample(0, 37, 100).is_none());
    }
}
