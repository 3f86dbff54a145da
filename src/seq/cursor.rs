//! Playback pass: a restartable iterator over a decoded track.
//!
//! The cursor replays the event list built by the parse pass without ever
//! re-decoding bytecode. The recorded parse loop is replayed by wrapping the
//! index and offsetting timestamps by whole loop lengths; `LoopStart`/
//! `LoopEnd` pairs run on an explicit stack. Termination is cooperative: a
//! caller-supplied maximum timestamp is checked once per candidate event.

use super::cmd::SeqCmd;
use super::event::TrackEvent;
use super::{TempoMap, Track};

/// An event yielded by the cursor with its replay-adjusted time.
#[derive(Debug, Clone)]
pub struct TimedEvent<'a> {
    /// The decoded event.
    pub event: &'a TrackEvent,
    /// Tick position including loop-replay offsets.
    pub ticks: u64,
    /// Start time in seconds.
    pub seconds: f64,
    /// End time in seconds (start plus the event's tick duration).
    pub end_seconds: f64,
}

/// Stateful cursor over one track's decoded events.
pub struct TrackCursor<'a> {
    track: &'a Track,
    tempo: &'a TempoMap,
    index: usize,
    loops: u64,
    loop_stack: Vec<(usize, Option<u32>)>,
    max_seconds: f64,
    finished: bool,
    spins: usize,
    warnings: Vec<String>,
}

impl<'a> TrackCursor<'a> {
    /// Create a cursor with the given cutoff time in seconds.
    pub fn new(track: &'a Track, tempo: &'a TempoMap, max_seconds: f64) -> Self {
        TrackCursor {
            track,
            tempo,
            index: 0,
            loops: 0,
            loop_stack: Vec::new(),
            max_seconds,
            finished: false,
            spins: 0,
            warnings: Vec::new(),
        }
    }

    /// Override the cutoff time.
    pub fn set_max_seconds(&mut self, max_seconds: f64) {
        self.max_seconds = max_seconds;
    }

    /// Whether the cursor has emitted its last event.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Diagnostics for jumps that could not be resolved during playback.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn loop_span(&self) -> u64 {
        self.track
            .loop_info
            .map(|l| (l.end_ticks - l.start_ticks) as u64)
            .unwrap_or(0)
    }

    /// Produce the next playable event, handling control flow internally.
    pub fn next_event(&mut self) -> Option<TimedEvent<'a>> {
        while !self.finished {
            // A cursor that keeps jumping without emitting is stuck in a
            // control-flow cycle with no time progress.
            if self.spins > self.track.events.len() * 2 + 16 {
                self.warnings
                    .push(format!("track {}: control flow stalled", self.track.index));
                self.finished = true;
                return None;
            }

            if let Some(info) = self.track.loop_info {
                if self.index > info.end_index {
                    self.index = info.start_index;
                    self.loops += 1;
                }
            }
            let Some(event) = self.track.events.get(self.index) else {
                self.finished = true;
                return None;
            };

            let ticks = event.timestamp as u64 + self.loops * self.loop_span();
            let seconds = self.tempo.ticks_to_seconds(ticks);
            if seconds > self.max_seconds {
                self.finished = true;
                return None;
            }

            self.index += 1;
            self.spins += 1;

            match SeqCmd::from_raw(event.cmd) {
                Some(SeqCmd::Goto) => {
                    match self.track.find_event(event.param1 as u32) {
                        Some(target) => self.index = target,
                        None => {
                            self.warnings.push(format!(
                                "track {}: unresolved jump to 0x{:06X} at 0x{:06X}",
                                self.track.index, event.param1, event.offset
                            ));
                            self.finished = true;
                            return None;
                        }
                    }
                }
                Some(SeqCmd::LoopStart) => {
                    let count = event.param1 as u32;
                    let remaining = if count == 0 { None } else { Some(count) };
                    self.loop_stack.push((self.index, remaining));
                }
                Some(SeqCmd::LoopEnd) => match self.loop_stack.last_mut() {
                    Some((start, remaining)) => match remaining {
                        None => self.index = *start,
                        Some(0) => {
                            self.loop_stack.pop();
                        }
                        Some(n) => {
                            *n -= 1;
                            self.index = *start;
                        }
                    },
                    None => {
                        self.warnings.push(format!(
                            "track {}: loop end without loop start at 0x{:06X}",
                            self.track.index, event.offset
                        ));
                    }
                },
                _ => {
                    self.spins = 0;
                    let end_ticks = ticks + event.duration() as u64;
                    return Some(TimedEvent {
                        event,
                        ticks,
                        seconds,
                        end_seconds: self.tempo.ticks_to_seconds(end_ticks),
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::event::TrackEvent;
    use crate::seq::TrackLoop;

    fn note(offset: u32, timestamp: u32, key: u16, duration: i32) -> TrackEvent {
        TrackEvent {
            offset,
            timestamp,
            cmd: key,
            param1: 100,
            param2: duration,
            ..TrackEvent::default()
        }
    }

    fn control(offset: u32, timestamp: u32, cmd: SeqCmd, param1: i32) -> TrackEvent {
        TrackEvent {
            offset,
            timestamp,
            cmd: cmd as u16,
            param1,
            ..TrackEvent::default()
        }
    }

    fn plain_track(events: Vec<TrackEvent>) -> Track {
        let end_ticks = events.last().map(|e| e.timestamp).unwrap_or(0);
        Track {
            index: 0,
            events,
            loop_info: None,
            end_ticks,
        }
    }

    #[test]
    fn test_linear_track_finishes() {
        let track = plain_track(vec![note(0, 0, 60, 48), note(3, 48, 62, 48)]);
        let tempo = TempoMap::default();
        let mut cursor = TrackCursor::new(&track, &tempo, f64::INFINITY);
        assert_eq!(cursor.next_event().unwrap().ticks, 0);
        assert_eq!(cursor.next_event().unwrap().ticks, 48);
        assert!(cursor.next_event().is_none());
        assert!(cursor.is_finished());
    }

    #[test]
    fn test_loop_replay_offsets_timestamps() {
        // Loop body between ticks 100 and 500; an event at tick 150 on the
        // second iteration reports 150 + 1*(500-100) = 550.
        let mut track = plain_track(vec![
            note(0, 0, 60, 10),
            note(3, 100, 62, 10),
            note(6, 150, 64, 10),
            note(9, 500, 65, 10),
        ]);
        track.loop_info = Some(TrackLoop {
            start_ticks: 100,
            end_ticks: 500,
            start_index: 1,
            end_index: 3,
        });
        let tempo = TempoMap::default();
        let mut cursor = TrackCursor::new(&track, &tempo, f64::INFINITY);
        let mut ticks = Vec::new();
        for _ in 0..7 {
            ticks.push(cursor.next_event().unwrap().ticks);
        }
        assert_eq!(ticks, vec![0, 100, 150, 500, 500, 550, 900]);
    }

    #[test]
    fn test_max_timestamp_cuts_infinite_loop() {
        let mut track = plain_track(vec![note(0, 0, 60, 10), note(3, 100, 62, 10)]);
        track.loop_info = Some(TrackLoop {
            start_ticks: 0,
            end_ticks: 100,
            start_index: 0,
            end_index: 1,
        });
        let tempo = TempoMap::default();
        let cutoff = tempo.ticks_to_seconds(250);
        let mut cursor = TrackCursor::new(&track, &tempo, cutoff);
        let mut count = 0;
        while cursor.next_event().is_some() {
            count += 1;
        }
        // Ticks 0, 100, 100, 200, 200 are inside the cutoff; 300 is not.
        assert_eq!(count, 5);
    }

    #[test]
    fn test_nested_loop_stack() {
        // LoopStart(2) around one note: the body plays 1 + 2 times.
        let track = plain_track(vec![
            control(0, 0, SeqCmd::LoopStart, 2),
            note(2, 0, 60, 0),
            control(5, 0, SeqCmd::LoopEnd, 0),
            note(6, 0, 62, 0),
        ]);
        let tempo = TempoMap::default();
        let mut cursor = TrackCursor::new(&track, &tempo, f64::INFINITY);
        let mut keys = Vec::new();
        while let Some(timed) = cursor.next_event() {
            keys.push(timed.event.cmd);
        }
        assert_eq!(keys, vec![60, 60, 60, 62]);
    }

    #[test]
    fn test_goto_jump_within_events() {
        // Goto jumps over a note to the final event.
        let track = plain_track(vec![
            control(0, 0, SeqCmd::Goto, 7),
            note(4, 0, 60, 0),
            note(7, 0, 62, 0),
        ]);
        let tempo = TempoMap::default();
        let mut cursor = TrackCursor::new(&track, &tempo, f64::INFINITY);
        assert_eq!(cursor.next_event().unwrap().event.cmd, 62);
        assert!(cursor.next_event().is_none());
    }

    #[test]
    fn test_unresolved_goto_warns_and_finishes() {
        let track = plain_track(vec![control(0, 0, SeqCmd::Goto, 0x999)]);
        let tempo = TempoMap::default();
        let mut cursor = TrackCursor::new(&track, &tempo, f64::INFINITY);
        assert!(cursor.next_event().is_none());
        assert!(cursor.warnings()[0].contains("unresolved jump"));
    }
}
