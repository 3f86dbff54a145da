//! Wave files and wave archives.
//!
//! A wave file carries per-channel sample locations plus codec parameters;
//! a wave archive packs many wave files and hands out byte views into its
//! data section. Decoded samples are cached on the context keyed by their
//! archive index.

use std::sync::Arc;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::chunk::{Chunk, ChunkKind, DataRef, DATA, TABL};
use crate::codec::{AdpcmParams, DspAdpcmDecoder, PcmDecoder, PcmWidth, SampleData};
use crate::context::ArchiveContext;
use crate::error::{Result, SndarcError};
use crate::stream::ByteView;

/// Sample encoding of a wave file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum WaveFormat {
    /// Signed 8-bit PCM.
    Pcm8 = 0,
    /// 16-bit PCM in the container's byte order.
    Pcm16 = 1,
    /// DSP-ADPCM nibble stream.
    Adpcm = 2,
}

/// Predictor parameters for one ADPCM channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdpcmInfo {
    /// Eight coefficient pairs.
    pub coefs: [i16; 16],
    /// Stored gain.
    pub gain: i16,
    /// Initial predictor/scale byte.
    pub initial_pred: u16,
    /// Initial sample history.
    pub history: [i16; 2],
    /// Predictor/scale at the loop point.
    pub loop_pred: u16,
    /// Sample history at the loop point.
    pub loop_history: [i16; 2],
}

/// Location and mixing info for one channel of a wave.
#[derive(Debug, Clone, Copy)]
pub struct ChannelInfo {
    /// Offset of the channel's payload inside the data section.
    pub sample_offset: u32,
    /// ADPCM parameters (meaningful only for ADPCM waves).
    pub adpcm: AdpcmInfo,
    /// Front left/right mix volumes.
    pub volume: [u32; 2],
    /// Surround left/right mix volumes.
    pub surround_volume: [u32; 2],
}

/// A parsed wave file.
pub struct WaveFile {
    chunk: Chunk,
    /// Sample encoding.
    pub format: WaveFormat,
    /// Whether the wave loops.
    pub looped: bool,
    /// Playback rate in Hz.
    pub sample_rate: u32,
    /// Loop start (nibbles for ADPCM, sample frames for PCM).
    pub loop_start: u32,
    /// Loop end (same units as `loop_start`).
    pub loop_end: u32,
    /// Data location reference.
    pub data_location: DataRef,
    /// Per-channel locations and parameters.
    pub channels: Vec<ChannelInfo>,
}

impl WaveFile {
    /// Parse a wave file from its loaded chunk tree.
    pub fn parse(chunk: Chunk) -> Result<WaveFile> {
        if chunk.kind != ChunkKind::Wave {
            return Err(SndarcError::InvalidData {
                msg: format!(
                    "expected a wave file, found '{}'",
                    crate::error::fourcc(chunk.magic)
                ),
            });
        }
        let info = chunk.require_section(crate::chunk::INFO)?;

        let format_tag = info.parse_u8(0)?;
        let format = WaveFormat::from_u8(format_tag)
            .ok_or(SndarcError::UnknownWaveFormat { tag: format_tag })?;
        let looped = info.parse_u8(1)? != 0;
        // The rate field shares its top byte with the channel count.
        let channel_count = info.parse_u8(2)? as usize;
        let sample_rate = info.parse_u32(2)? & 0x00FF_FFFF;
        let data_location = DataRef {
            is_offset: info.parse_u8(6)? != 0,
            data_type: 0,
            pointer: info.parse_u32(20)?,
        };
        let loop_start = info.parse_u32(8)?;
        let loop_end = info.parse_u32(12)?;
        let table = info.parse_u32(16)? as usize;

        let mut channels = Vec::with_capacity(channel_count);
        for i in 0..channel_count {
            let offset = info.parse_u32(table + i * 4)? as usize;
            let mut adpcm = AdpcmInfo::default();
            if format == WaveFormat::Adpcm {
                let at = info.parse_u32(offset + 4)? as usize;
                for (j, coef) in adpcm.coefs.iter_mut().enumerate() {
                    *coef = info.parse_i16(at + j * 2)?;
                }
                adpcm.gain = info.parse_i16(at + 0x2C)?;
                adpcm.initial_pred = info.parse_u16(at + 0x2E)?;
                adpcm.history = [info.parse_i16(at + 0x30)?, info.parse_i16(at + 0x32)?];
                adpcm.loop_pred = info.parse_u16(at + 0x34)?;
                adpcm.loop_history = [info.parse_i16(at + 0x36)?, info.parse_i16(at + 0x38)?];
            }
            channels.push(ChannelInfo {
                sample_offset: info.parse_u32(offset)?,
                adpcm,
                volume: [info.parse_u32(offset + 8)?, info.parse_u32(offset + 12)?],
                surround_volume: [info.parse_u32(offset + 16)?, info.parse_u32(offset + 20)?],
            });
        }

        Ok(WaveFile {
            chunk,
            format,
            looped,
            sample_rate,
            loop_start,
            loop_end,
            data_location,
            channels,
        })
    }

    /// Decode every channel into one multi-channel sample buffer.
    pub fn sample(&self, sample_id: u64) -> Result<SampleData> {
        let data = self.chunk.require_section(DATA)?;
        let mut combined: Option<SampleData> = None;

        for channel in &self.channels {
            let offset = channel.sample_offset as usize;
            let decoded = match self.format {
                WaveFormat::Adpcm => {
                    let params = AdpcmParams {
                        sample_rate: self.sample_rate,
                        loop_start: self.looped.then_some(self.loop_start),
                        loop_end: self.loop_end,
                        gain: 1.0,
                        history: channel.adpcm.history,
                        coefs: channel.adpcm.coefs,
                    };
                    let available = data.data.len().saturating_sub(offset);
                    let len = (self.loop_end as usize / 2).min(available);
                    let view = data.data.view(offset, len)?;
                    DspAdpcmDecoder::new(params).decode_range(view.bytes(), sample_id)
                }
                WaveFormat::Pcm8 | WaveFormat::Pcm16 => {
                    let width = if self.format == WaveFormat::Pcm8 {
                        PcmWidth::Pcm8
                    } else {
                        PcmWidth::Pcm16
                    };
                    let len = match width {
                        PcmWidth::Pcm8 => self.loop_end as usize,
                        PcmWidth::Pcm16 => self.loop_end as usize * 2,
                    };
                    let view = data.data.view(offset, len)?;
                    let decoder = PcmDecoder {
                        width,
                        endian: self.chunk.endian,
                        sample_rate: self.sample_rate,
                        loop_start: self.looped.then_some(self.loop_start),
                        loop_end: self.looped.then_some(self.loop_end),
                    };
                    decoder.decode_range(view.bytes(), sample_id)
                }
            };

            match combined.as_mut() {
                None => combined = Some(decoded),
                Some(sample) => sample.channels.extend(decoded.channels),
            }
        }

        let mut sample = combined.unwrap_or_else(|| SampleData::new(sample_id, self.sample_rate));
        if !self.looped {
            sample.loop_start = None;
            sample.loop_end = None;
        }
        Ok(sample)
    }
}

/// A parsed wave archive: an entry table over a shared data section.
pub struct WaveArchive {
    chunk: Chunk,
    entries: Vec<(DataRef, u32)>,
}

impl WaveArchive {
    /// Parse a wave archive from its loaded chunk tree.
    pub fn parse(chunk: Chunk) -> Result<WaveArchive> {
        if chunk.kind != ChunkKind::WaveArchive {
            return Err(SndarcError::InvalidData {
                msg: format!(
                    "expected a wave archive, found '{}'",
                    crate::error::fourcc(chunk.magic)
                ),
            });
        }
        let table = chunk.require_section(TABL)?;
        let count = table.parse_u32(0)? as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let at = 4 + i * 12;
            entries.push((table.parse_data_ref(at)?, table.parse_u32(at + 8)?));
        }
        Ok(WaveArchive { chunk, entries })
    }

    /// Number of waves in the archive.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive holds no waves.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A byte view over one embedded wave file.
    pub fn wave_data(&self, index: usize) -> Result<ByteView> {
        let (offset, size) = *self
            .entries
            .get(index)
            .ok_or(SndarcError::IndexOutOfRange {
                kind: "wave",
                index,
                len: self.entries.len(),
            })?;
        let data = self.chunk.require_section(DATA)?;
        // Entry pointers include the data section's 8-byte header.
        let at = (offset.pointer as usize)
            .checked_sub(8)
            .ok_or_else(|| SndarcError::InvalidData {
                msg: format!("wave {index} points inside the section header"),
            })?;
        data.data.view(at, size as usize)
    }

    /// Load and parse one embedded wave file.
    pub fn wave(&self, index: usize) -> Result<WaveFile> {
        let view = self.wave_data(index)?;
        WaveFile::parse(Chunk::load_root(&view)?)
    }

    /// Decode one wave, at most once per index per context.
    pub fn sample(&self, index: usize, ctx: &ArchiveContext) -> Result<Arc<SampleData>> {
        ctx.sample_or_decode(index as u64, || self.wave(index)?.sample(index as u64))
    }
}
