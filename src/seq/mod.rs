//! Sequence files: bytecode tracks, tempo map and entry-point labels.

mod cmd;
mod cursor;
mod event;
mod parser;

pub use cmd::{SeqCmd, EXTENDED_BASE};
pub use cursor::{TimedEvent, TrackCursor};
pub use event::{note_symbol, EventPrefix, TrackEvent, SYNTHETIC_OFFSET};
pub use parser::TRACK_COUNT;

use std::collections::BTreeMap;

use crate::chunk::{Chunk, ChunkKind, DATA, LABL};
use crate::context::ParseOptions;
use crate::error::{Result, SndarcError};

/// Default seconds per tick: 120 beats per minute at 48 ticks per beat.
const DEFAULT_SECONDS_PER_TICK: f64 = 60.0 / (120.0 * 48.0);

/// Sparse map of seconds-per-tick breakpoints keyed by tick position.
#[derive(Debug, Clone)]
pub struct TempoMap {
    points: BTreeMap<u32, f64>,
}

impl Default for TempoMap {
    fn default() -> Self {
        let mut points = BTreeMap::new();
        points.insert(0, DEFAULT_SECONDS_PER_TICK);
        TempoMap { points }
    }
}

impl TempoMap {
    /// Set the seconds-per-tick rate from `tick` onwards.
    pub fn set(&mut self, tick: u32, seconds_per_tick: f64) {
        self.points.insert(tick, seconds_per_tick);
    }

    /// Convert a tick position to seconds by piecewise summation over the
    /// breakpoints at or before it.
    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        let mut seconds = 0.0;
        let mut last_tick = 0u64;
        let mut last_rate = DEFAULT_SECONDS_PER_TICK;
        for (&tick, &rate) in &self.points {
            let tick = tick as u64;
            if tick >= ticks {
                break;
            }
            seconds += (tick - last_tick) as f64 * last_rate;
            last_tick = tick;
            last_rate = rate;
        }
        seconds + (ticks - last_tick) as f64 * last_rate
    }
}

/// Loop bounds recorded when a track's parse closed on a back-edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLoop {
    /// Tick position of the loop entry.
    pub start_ticks: u32,
    /// Tick position of the loop back-edge.
    pub end_ticks: u32,
    /// Event index of the loop entry.
    pub start_index: usize,
    /// Event index of the last event in the loop body.
    pub end_index: usize,
}

/// One decoded track: an ordered event list plus replay bookkeeping.
#[derive(Debug, Clone)]
pub struct Track {
    /// Track slot index.
    pub index: usize,
    /// Decoded events in timeline order.
    pub events: Vec<TrackEvent>,
    /// Replay loop discovered during the parse, if any.
    pub loop_info: Option<TrackLoop>,
    /// Tick position of the last event (or the loop end).
    pub end_ticks: u32,
}

impl Track {
    /// Whether the track decoded any events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Find the event decoded from byte offset `offset`.
    pub fn find_event(&self, offset: u32) -> Option<usize> {
        self.events.iter().position(|e| e.offset == offset)
    }

    /// Ticks the track spans before looping or ending.
    pub fn length_ticks(&self) -> u32 {
        self.loop_info
            .as_ref()
            .map(|l| l.end_ticks)
            .unwrap_or(self.end_ticks)
    }
}

/// A named entry point inside a sequence file.
#[derive(Debug, Clone)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Bytecode offset the label refers to.
    pub data_offset: u32,
}

/// A parsed sequence file: tracks, tempo map, labels and any recoverable
/// diagnostics produced while decoding.
pub struct SequenceFile {
    chunk: Chunk,
    labels: Vec<Label>,
    /// Decoded track slots (fixed count; unused slots are empty).
    pub tracks: Vec<Track>,
    /// Shared tempo map for tick-to-seconds conversion.
    pub tempo: TempoMap,
    /// Recoverable diagnostics collected during the parse.
    pub warnings: Vec<String>,
    /// Whether bookkeeping opcodes were recorded alongside playable events
    /// (verbose parses; affects report layout).
    pub verbose_events: bool,
}

impl SequenceFile {
    /// Parse a sequence from its loaded chunk tree.
    pub fn parse(chunk: Chunk, options: &ParseOptions) -> Result<SequenceFile> {
        if chunk.kind != ChunkKind::Sequence {
            return Err(SndarcError::InvalidData {
                msg: format!(
                    "expected a sequence file, found '{}'",
                    crate::error::fourcc(chunk.magic)
                ),
            });
        }

        let labels = match chunk.section(LABL) {
            Some(labl) => parse_labels(labl)?,
            None => Vec::new(),
        };

        let data = chunk.require_section(DATA)?;
        // Bytecode offsets are relative to the word after the data-offset
        // field; the entry point is biased by the section header size.
        let start_offset = data
            .parse_u32(0)?
            .checked_sub(0x0C)
            .ok_or_else(|| SndarcError::InvalidData {
                msg: "sequence data offset inside section header".to_string(),
            })?;
        let code = data.data.view_from(4)?;

        let mut tempo = TempoMap::default();
        let (tracks, warnings) = parser::parse_tracks(
            &code,
            data.endian,
            start_offset,
            &mut tempo,
            options.verbose,
        );

        Ok(SequenceFile {
            chunk,
            labels,
            tracks,
            tempo,
            warnings,
            verbose_events: options.verbose,
        })
    }

    /// The chunk tree this sequence was parsed from.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// All entry-point labels.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Look up a label name by index.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|l| l.name.as_str())
    }

    /// Longest track length in seconds; playback cursors use this as their
    /// default cutoff so looped tracks terminate.
    pub fn max_length(&self) -> f64 {
        self.tracks
            .iter()
            .map(|t| self.tempo.ticks_to_seconds(t.length_ticks() as u64))
            .fold(0.0, f64::max)
    }

    /// Create a playback cursor over one track.
    pub fn cursor(&self, track_index: usize) -> Option<TrackCursor<'_>> {
        let track = self.tracks.get(track_index)?;
        Some(TrackCursor::new(track, &self.tempo, self.max_length()))
    }
}

fn parse_labels(labl: &Chunk) -> Result<Vec<Label>> {
    let count = labl.parse_u32(0)? as usize;
    let mut labels = Vec::with_capacity(count);
    for i in 0..count {
        let entry = labl.parse_u32(4 + i * 4)? as usize;
        labels.push(Label {
            data_offset: labl.parse_u32(entry)?,
            name: labl.parse_lpstring(entry + 4)?,
        });
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::RSEQ;
    use crate::stream::ByteView;
    use crate::testutil::{build_container, put_u32, seq_data_section as data_section};

    fn labl_section(names: &[&str]) -> Vec<u8> {
        let mut body = vec![0u8; 4 + names.len() * 4];
        put_u32(&mut body, 0, names.len() as u32);
        let mut blob = Vec::new();
        let base = body.len();
        let mut at = base;
        for (i, name) in names.iter().enumerate() {
            put_u32(&mut body, 4 + i * 4, at as u32);
            let mut entry = vec![0u8; 8];
            put_u32(&mut entry, 0, 0x100 + i as u32); // data offset
            put_u32(&mut entry, 4, name.len() as u32);
            entry.extend_from_slice(name.as_bytes());
            at += entry.len();
            blob.extend_from_slice(&entry);
        }
        body.extend_from_slice(&blob);
        body
    }

    fn parse_sequence(code: &[u8], labels: &[&str]) -> SequenceFile {
        let mut sections = vec![(crate::chunk::DATA, data_section(code))];
        if !labels.is_empty() {
            sections.push((LABL, labl_section(labels)));
        }
        let bytes = build_container(RSEQ, &sections);
        let chunk = Chunk::load_root(&ByteView::from_vec(bytes)).unwrap();
        SequenceFile::parse(chunk, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_tempo_default() {
        let tempo = TempoMap::default();
        let seconds = tempo.ticks_to_seconds(48);
        // One beat at 120 bpm is half a second.
        assert!((seconds - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_piecewise() {
        let mut tempo = TempoMap::default();
        tempo.set(100, 60.0 / (240.0 * 48.0));
        let at_100 = tempo.ticks_to_seconds(100);
        let at_148 = tempo.ticks_to_seconds(148);
        assert!((at_148 - at_100 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_sequence_with_labels() {
        let seq = parse_sequence(&[60, 100, 48, 0xFF], &["intro", "chorus"]);
        assert_eq!(seq.label(0), Some("intro"));
        assert_eq!(seq.label(1), Some("chorus"));
        assert_eq!(seq.label(2), None);
        assert_eq!(seq.labels()[1].data_offset, 0x101);
        assert_eq!(seq.tracks[0].events.len(), 1);
        assert!(seq.warnings.is_empty());
    }

    #[test]
    fn test_max_length_covers_all_tracks() {
        // One note of 48 ticks = half a second at the default tempo...
        let seq = parse_sequence(&[60, 100, 48, 62, 100, 48, 0xFF], &[]);
        // ...but length is measured to the last event's start.
        let expected = seq.tempo.ticks_to_seconds(48);
        assert!((seq.max_length() - expected).abs() < 1e-9);
    }
}
