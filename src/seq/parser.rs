//! Build pass: decode each track's bytecode into a timed event list.
//!
//! Tracks are parsed once. `AddTrack` spawns are handled through an explicit
//! work queue, subroutines through an explicit offset stack, and the first
//! backwards `Goto` onto an already-decoded event closes the track as its
//! replay loop. Malformed jumps are recoverable: they are reported as
//! warnings and the track simply ends, because partially-understood format
//! variants are expected.

use std::collections::{HashSet, VecDeque};

use super::cmd::{SeqCmd, EXTENDED_BASE};
use super::event::{EventPrefix, TrackEvent, SYNTHETIC_OFFSET};
use super::{TempoMap, Track, TrackLoop};
use crate::error::Result;
use crate::stream::{ByteView, Endian};

/// Number of track slots a sequence can address.
pub const TRACK_COUNT: usize = 16;

/// Reads primitive operands out of the bytecode section.
struct EventReader<'a> {
    code: &'a ByteView,
    endian: Endian,
    offset: usize,
}

impl<'a> EventReader<'a> {
    fn read_u8(&mut self) -> Result<u8> {
        let v = self.code.u8_at(self.offset)?;
        self.offset += 1;
        Ok(v)
    }

    fn read_i16(&mut self) -> Result<i16> {
        let v = self.code.i16_at(self.offset, self.endian)?;
        self.offset += 2;
        Ok(v)
    }

    fn read_u24(&mut self) -> Result<u32> {
        let b = [self.read_u8()?, self.read_u8()?, self.read_u8()?];
        Ok(match self.endian {
            Endian::Little => b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16,
            Endian::Big => (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32,
        })
    }

    /// Variable-length quantity: 7 bits per byte, high bit continues,
    /// big-endian bit order.
    fn read_vlq(&mut self) -> Result<u32> {
        let mut value = 0u32;
        loop {
            let byte = self.read_u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    fn read_one(&mut self) -> Result<(u16, i32, i32)> {
        let mut cmd = self.read_u8()? as u16;
        let mut param1 = 0i32;
        let mut param2 = 0i32;

        if cmd < 0x80 {
            param1 = self.read_u8()? as i32;
            param2 = self.read_vlq()? as i32;
            return Ok((cmd, param1, param2));
        }

        match SeqCmd::from_raw(cmd) {
            Some(SeqCmd::Rest) | Some(SeqCmd::ProgramChange) => {
                param1 = self.read_vlq()? as i32;
            }
            Some(SeqCmd::AddTrack) => {
                param1 = self.read_u8()? as i32;
                param2 = self.read_u24()? as i32;
            }
            Some(SeqCmd::Goto) | Some(SeqCmd::Gosub) => {
                param1 = self.read_u24()? as i32;
            }
            Some(SeqCmd::ModDelay)
            | Some(SeqCmd::Tempo)
            | Some(SeqCmd::Sweep)
            | Some(SeqCmd::AllocTracks) => {
                param1 = self.read_i16()? as i32;
            }
            Some(SeqCmd::Extended) => {
                cmd = EXTENDED_BASE + self.read_u8()? as u16;
                param1 = self.read_u8()? as i32;
                param2 = self.read_i16()? as i32;
            }
            Some(SeqCmd::PrefixRand) => {
                param1 = self.read_i16()? as i32;
                param2 = self.read_i16()? as i32;
            }
            Some(SeqCmd::PrefixVar) => {
                param1 = self.read_u8()? as i32;
            }
            Some(SeqCmd::PrefixTime)
            | Some(SeqCmd::PrefixTimeRand)
            | Some(SeqCmd::PrefixTimeVar)
            | Some(SeqCmd::LoopEnd)
            | Some(SeqCmd::Return)
            | Some(SeqCmd::TrackEnd) => {}
            _ => {
                param1 = self.read_u8()? as i32;
            }
        }
        Ok((cmd, param1, param2))
    }

    /// Read the next event, folding any run of prefix opcodes into the
    /// wrapped event's metadata. Time-scaled prefixes read their trailing
    /// operands after the wrapped event, innermost first.
    fn read_event(&mut self, tick: u32) -> Result<TrackEvent> {
        let mut pending: Vec<EventPrefix> = Vec::new();
        loop {
            let offset = self.offset as u32;
            let (cmd, param1, param2) = self.read_one()?;
            if SeqCmd::is_prefix(cmd) {
                pending.push(EventPrefix {
                    cmd: cmd as u8,
                    param1: param1 as i16,
                    param2: param2 as i16,
                });
                continue;
            }

            let mut event = TrackEvent {
                offset,
                timestamp: tick,
                cmd,
                prefixes: Vec::new(),
                param1,
                param2,
                param3: 0,
            };
            for mut prefix in pending.into_iter().rev() {
                if prefix.cmd as u16 >= SeqCmd::PrefixTime as u16 {
                    prefix.param1 = self.read_i16()?;
                    if prefix.cmd as u16 == SeqCmd::PrefixTimeRand as u16 {
                        prefix.param2 = self.read_i16()?;
                    }
                }
                event.prefixes.insert(0, prefix);
            }
            return Ok(event);
        }
    }
}

struct TrackBuilder {
    index: usize,
    events: Vec<TrackEvent>,
    tick_pos: u32,
    note_wait: bool,
    started: bool,
    loop_info: Option<TrackLoop>,
    tempo_bpm: f64,
    ppqn: f64,
}

impl TrackBuilder {
    fn new(index: usize) -> Self {
        TrackBuilder {
            index,
            events: Vec::new(),
            tick_pos: 0,
            note_wait: true,
            started: false,
            loop_info: None,
            tempo_bpm: 120.0,
            ppqn: 48.0,
        }
    }

    /// Append an event, advancing the tick position. Note durations only
    /// consume time while note-wait mode is enabled.
    fn add_event(&mut self, event: TrackEvent) {
        if !event.is_note() || self.note_wait {
            self.tick_pos += event.duration();
        }
        self.events.push(event);
    }

    fn find_event(&self, offset: u32) -> Option<usize> {
        self.events.iter().position(|e| e.offset == offset)
    }

    fn seconds_per_tick(&self) -> f64 {
        60.0 / (self.tempo_bpm * self.ppqn)
    }

    fn finish(self) -> Track {
        let end_ticks = self
            .loop_info
            .as_ref()
            .map(|l| l.end_ticks)
            .or_else(|| self.events.last().map(|e| e.timestamp))
            .unwrap_or(0);
        Track {
            index: self.index,
            events: self.events,
            loop_info: self.loop_info,
            end_ticks,
        }
    }
}

struct Spawn {
    slot: usize,
    offset: u32,
    lead_ticks: u32,
}

/// Decode all track slots reachable from the sequence entry point.
pub(crate) fn parse_tracks(
    code: &ByteView,
    endian: Endian,
    start_offset: u32,
    tempo: &mut TempoMap,
    record_all: bool,
) -> (Vec<Track>, Vec<String>) {
    let mut builders: Vec<TrackBuilder> = (0..TRACK_COUNT).map(TrackBuilder::new).collect();
    let mut warnings = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(Spawn {
        slot: 0,
        offset: start_offset,
        lead_ticks: 0,
    });

    while let Some(spawn) = queue.pop_front() {
        if spawn.slot >= builders.len() {
            warnings.push(format!("track slot {} out of range", spawn.slot));
            continue;
        }
        if builders[spawn.slot].started {
            warnings.push(format!("track {} spawned twice", spawn.slot));
            continue;
        }
        builders[spawn.slot].started = true;
        if spawn.lead_ticks > 0 {
            builders[spawn.slot].add_event(TrackEvent {
                offset: SYNTHETIC_OFFSET,
                timestamp: 0,
                cmd: SeqCmd::Rest as u16,
                prefixes: Vec::new(),
                param1: spawn.lead_ticks as i32,
                param2: 0,
                param3: 0,
            });
        }
        parse_track(
            &mut builders[spawn.slot],
            code,
            endian,
            spawn.offset,
            tempo,
            &mut queue,
            &mut warnings,
            record_all,
        );
    }

    (
        builders.into_iter().map(TrackBuilder::finish).collect(),
        warnings,
    )
}

#[allow(clippy::too_many_arguments)]
fn parse_track(
    track: &mut TrackBuilder,
    code: &ByteView,
    endian: Endian,
    offset: u32,
    tempo: &mut TempoMap,
    queue: &mut VecDeque<Spawn>,
    warnings: &mut Vec<String>,
    record_all: bool,
) {
    let mut reader = EventReader {
        code,
        endian,
        offset: offset as usize,
    };
    let mut call_stack: Vec<usize> = Vec::new();
    let mut taken_jumps: HashSet<u32> = HashSet::new();

    while reader.offset < code.len() {
        let event = match reader.read_event(track.tick_pos) {
            Ok(event) => event,
            Err(err) => {
                warnings.push(format!(
                    "track {}: truncated event stream: {err}",
                    track.index
                ));
                break;
            }
        };
        if record_all {
            track.add_event(event.clone());
        }

        match SeqCmd::from_raw(event.cmd) {
            Some(SeqCmd::TrackEnd) => break,
            Some(SeqCmd::AddTrack) => {
                queue.push_back(Spawn {
                    slot: event.param1 as usize,
                    offset: event.param2 as u32,
                    lead_ticks: track.tick_pos,
                });
            }
            Some(SeqCmd::Gosub) => {
                let target = event.param1 as usize;
                if target < code.len() {
                    call_stack.push(reader.offset);
                    reader.offset = target;
                } else {
                    warnings.push(format!(
                        "track {}: call target 0x{:06X} out of range",
                        track.index, event.param1
                    ));
                }
            }
            Some(SeqCmd::Return) => match call_stack.pop() {
                Some(return_offset) => reader.offset = return_offset,
                None => {
                    warnings.push(format!(
                        "track {}: return with empty call stack at 0x{:06X}",
                        track.index, event.offset
                    ));
                    break;
                }
            },
            Some(SeqCmd::Tempo) => {
                track.tempo_bpm = event.param1 as f64;
                tempo.set(track.tick_pos, track.seconds_per_tick());
            }
            Some(SeqCmd::Ppqn) => {
                track.ppqn = event.param1 as f64;
                tempo.set(track.tick_pos, track.seconds_per_tick());
            }
            Some(SeqCmd::WaitEnable) => {
                track.note_wait = event.param1 != 0;
            }
            Some(SeqCmd::AllocTracks) => {}
            _ => {
                let is_goto = event.cmd == SeqCmd::Goto as u16;
                let goto_origin = event.offset;
                let target = event.param1 as u32;
                if !record_all {
                    track.add_event(event.clone());
                }
                if is_goto {
                    if let Some(start_index) = track.find_event(target) {
                        track.loop_info = Some(TrackLoop {
                            start_ticks: track.events[start_index].timestamp,
                            end_ticks: event.timestamp,
                            start_index,
                            end_index: track.events.len() - 1,
                        });
                        break;
                    }
                    if !taken_jumps.insert(goto_origin) {
                        warnings.push(format!(
                            "track {}: jump cycle at 0x{:06X}",
                            track.index, goto_origin
                        ));
                        break;
                    }
                    if (target as usize) < code.len() {
                        reader.offset = target as usize;
                    } else {
                        warnings.push(format!(
                            "track {}: jump target 0x{:06X} out of range",
                            track.index, target
                        ));
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: Vec<u8>) -> (Vec<Track>, TempoMap, Vec<String>) {
        let view = ByteView::from_vec(code);
        let mut tempo = TempoMap::default();
        let (tracks, warnings) = parse_tracks(&view, Endian::Big, 0, &mut tempo, false);
        (tracks, tempo, warnings)
    }

    #[test]
    fn test_vlq_round_trip() {
        // Encodings of 0, 127, 128, 16383, 16384 per the 7-bit scheme.
        let cases: [(&[u8], u32); 5] = [
            (&[0x00], 0),
            (&[0x7F], 127),
            (&[0x81, 0x00], 128),
            (&[0xFF, 0x7F], 16383),
            (&[0x81, 0x80, 0x00], 16384),
        ];
        for (bytes, expected) in cases {
            let view = ByteView::from_vec(bytes.to_vec());
            let mut reader = EventReader {
                code: &view,
                endian: Endian::Big,
                offset: 0,
            };
            assert_eq!(reader.read_vlq().unwrap(), expected);
        }
    }

    #[test]
    fn test_note_then_end() {
        // Note 60, velocity 100, duration 48; then track end.
        let (tracks, _, warnings) = parse(vec![60, 100, 48, 0xFF]);
        assert!(warnings.is_empty());
        let track = &tracks[0];
        assert_eq!(track.events.len(), 1);
        assert_eq!(track.events[0].cmd, 60);
        assert_eq!(track.events[0].param1, 100);
        assert_eq!(track.events[0].param2, 48);
        assert_eq!(track.end_ticks, 0);
    }

    #[test]
    fn test_notes_advance_ticks_only_with_note_wait() {
        // Two notes, then WaitEnable(0), then another note and a rest.
        let (tracks, _, _) = parse(vec![
            60, 100, 24, // note at tick 0
            62, 100, 24, // note at tick 24
            0xC7, 0x00, // WaitEnable off
            64, 100, 24, // note at tick 48, no longer advances
            0x80, 12, // rest still advances
            65, 100, 24, // note at tick 60
            0xFF,
        ]);
        let timestamps: Vec<u32> = tracks[0].events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![0, 24, 48, 48, 60]);
    }

    #[test]
    fn test_add_track_inserts_synthetic_rest() {
        // Track 0: rest 96, AddTrack(1, offset of track1), note, end.
        // Track 1 starts with a synthetic rest of 96 ticks.
        let code = vec![
            0x80, 96, // rest
            0x88, 1, 0x00, 0x00, 0x0B, // AddTrack slot 1 at offset 11
            60, 100, 48, 0xFF, // note + end (track 0)
            62, 100, 24, 0xFF, // track 1 body at offset 11
        ];
        let (tracks, _, warnings) = parse(code);
        assert!(warnings.is_empty());
        let spawned = &tracks[1];
        assert_eq!(spawned.events.len(), 2);
        assert!(spawned.events[0].is_synthetic());
        assert_eq!(spawned.events[0].param1, 96);
        assert_eq!(spawned.events[1].timestamp, 96);
    }

    #[test]
    fn test_subroutine_parsed_inline() {
        // Gosub to a note subroutine, then a second note after return.
        let code = vec![
            0x8A, 0x00, 0x00, 0x08, // gosub 8
            62, 100, 24, // note after return
            0xFF, // end
            60, 100, 24, // subroutine: note
            0xFD, // return
        ];
        let (tracks, _, warnings) = parse(code);
        assert!(warnings.is_empty());
        let cmds: Vec<u16> = tracks[0].events.iter().map(|e| e.cmd).collect();
        assert_eq!(cmds, vec![60, 62]);
        assert_eq!(tracks[0].events[1].timestamp, 24);
    }

    #[test]
    fn test_unexpected_return_is_recoverable() {
        let (tracks, _, warnings) = parse(vec![60, 100, 24, 0xFD, 62, 100, 24, 0xFF]);
        assert_eq!(tracks[0].events.len(), 1);
        assert!(warnings.iter().any(|w| w.contains("empty call stack")));
    }

    #[test]
    fn test_backwards_goto_records_loop() {
        let code = vec![
            60, 100, 24, // note at tick 0, offset 0
            62, 100, 24, // note at tick 24, offset 3
            0x89, 0x00, 0x00, 0x03, // goto offset 3
            0xFF,
        ];
        let (tracks, _, warnings) = parse(code);
        assert!(warnings.is_empty());
        let track = &tracks[0];
        let info = track.loop_info.as_ref().expect("loop recorded");
        assert_eq!(info.start_index, 1);
        assert_eq!(info.start_ticks, 24);
        assert_eq!(info.end_ticks, 48);
        assert_eq!(info.end_index, track.events.len() - 1);
    }

    #[test]
    fn test_goto_out_of_range_warns() {
        let (tracks, _, warnings) = parse(vec![60, 100, 24, 0x89, 0x0F, 0x00, 0x00, 0xFF]);
        assert_eq!(tracks[0].events.len(), 2); // note + goto are kept
        assert!(warnings.iter().any(|w| w.contains("out of range")));
    }

    #[test]
    fn test_tempo_updates_map() {
        let code = vec![
            0x80, 96, // rest to tick 96
            0xE1, 0x00, 0xF0, // tempo 240
            60, 100, 48, 0xFF,
        ];
        let (_, tempo, _) = parse(code);
        // Before tick 96: 120 bpm, 48 ppqn.
        let early = tempo.ticks_to_seconds(96);
        assert!((early - 96.0 * 60.0 / (120.0 * 48.0)).abs() < 1e-9);
        // 48 ticks after the change run at 240 bpm.
        let late = tempo.ticks_to_seconds(144);
        assert!((late - (early + 48.0 * 60.0 / (240.0 * 48.0))).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_attachment() {
        // PrefixRand(10, 20) wrapping a volume change.
        let code = vec![
            0xA0, 0x00, 0x0A, 0x00, 0x14, // prefix rand 10,20
            0xC1, 90, // volume
            0xFF,
        ];
        let (tracks, _, warnings) = parse(code);
        assert!(warnings.is_empty());
        let event = &tracks[0].events[0];
        assert_eq!(event.cmd, SeqCmd::Volume as u16);
        assert_eq!(event.prefixes.len(), 1);
        assert_eq!(event.prefixes[0].param1, 10);
        assert_eq!(event.prefixes[0].param2, 20);
    }

    #[test]
    fn test_time_prefix_reads_trailing_operand() {
        // PrefixTime wraps a pan event; its s16 operand follows the event.
        let code = vec![
            0xA3, // prefix time
            0xC0, 64, // pan
            0x00, 0x30, // trailing time operand = 48
            0xFF,
        ];
        let (tracks, _, _) = parse(code);
        let event = &tracks[0].events[0];
        assert_eq!(event.cmd, SeqCmd::Pan as u16);
        assert_eq!(event.prefixes[0].param1, 48);
    }

    #[test]
    fn test_extended_opcode_decodes() {
        let code = vec![
            0xF0, 0x80, 0x03, 0x00, 0x05, // VarSet var 3 = 5
            0xFF,
        ];
        let (tracks, _, _) = parse(code);
        let event = &tracks[0].events[0];
        assert_eq!(event.cmd, SeqCmd::VarSet as u16);
        assert_eq!(event.param1, 3);
        assert_eq!(event.param2, 5);
    }
}
