//! Decoded sequence events.

use std::fmt;

use super::cmd::SeqCmd;

/// Origin offset used for rests synthesized to align spawned tracks.
pub const SYNTHETIC_OFFSET: u32 = 0xFFFF;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Symbolic name of a MIDI note number.
pub fn note_symbol(note: u16) -> String {
    let index = (note % 12) as usize;
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[index], octave)
}

/// A prefix opcode attached to the event it wraps.
///
/// Prefixes are decoded with their operand shapes and carried as metadata;
/// their runtime semantics are not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPrefix {
    /// The prefix command byte (0xA0..=0xA5).
    pub cmd: u8,
    /// First prefix operand.
    pub param1: i16,
    /// Second prefix operand.
    pub param2: i16,
}

/// One decoded bytecode instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackEvent {
    /// Byte offset the event was decoded from (jump target resolution).
    pub offset: u32,
    /// Tick position at decode time.
    pub timestamp: u32,
    /// Raw command word (note number below 0x80, opcode otherwise).
    pub cmd: u16,
    /// Prefixes wrapping this event, outermost first.
    pub prefixes: Vec<EventPrefix>,
    /// First parameter (note velocity, or the opcode's main operand).
    pub param1: i32,
    /// Second parameter (note duration in ticks, or a second operand).
    pub param2: i32,
    /// Third parameter (extended opcodes only).
    pub param3: i32,
}

impl TrackEvent {
    /// Whether this is a note event.
    pub fn is_note(&self) -> bool {
        self.cmd < 0x80
    }

    /// How many ticks this event occupies on the timeline.
    pub fn duration(&self) -> u32 {
        if self.is_note() {
            self.param2.max(0) as u32
        } else if self.cmd == SeqCmd::Rest as u16 {
            self.param1.max(0) as u32
        } else {
            0
        }
    }

    /// Whether this event was synthesized rather than decoded.
    pub fn is_synthetic(&self) -> bool {
        self.offset == SYNTHETIC_OFFSET
    }
}

impl fmt::Display for TrackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for prefix in &self.prefixes {
            write!(f, "[{}(", SeqCmd::name(prefix.cmd as u16))?;
            if prefix.cmd != SeqCmd::PrefixIf as u8 {
                write!(f, "{}", prefix.param1)?;
            }
            if prefix.cmd == SeqCmd::PrefixRand as u8
                || prefix.cmd == SeqCmd::PrefixTimeRand as u8
            {
                write!(f, ",{}", prefix.param2)?;
            }
            write!(f, ")] ")?;
        }

        if self.is_note() {
            write!(f, "{}", note_symbol(self.cmd))?;
        } else {
            write!(f, "{}", SeqCmd::name(self.cmd))?;
        }

        let count = SeqCmd::param_count(self.cmd);
        if count == 0 {
            return Ok(());
        }
        write!(f, "(")?;
        if count >= 1 {
            if self.cmd == SeqCmd::Goto as u16 || self.cmd == SeqCmd::Gosub as u16 {
                write!(f, "0x{:04x}", self.param1)?;
            } else {
                write!(f, "{}", self.param1)?;
            }
        }
        if count >= 2 {
            if self.cmd == SeqCmd::AddTrack as u16 {
                write!(f, ",0x{:04x}", self.param2)?;
            } else {
                write!(f, ",{}", self.param2)?;
            }
        }
        if count >= 3 {
            write!(f, ",{}", self.param3)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_symbol() {
        assert_eq!(note_symbol(60), "C4");
        assert_eq!(note_symbol(69), "A4");
        assert_eq!(note_symbol(0), "C-1");
    }

    #[test]
    fn test_display_note() {
        let event = TrackEvent {
            cmd: 60,
            param1: 100,
            param2: 48,
            ..TrackEvent::default()
        };
        assert_eq!(event.to_string(), "C4(100,48)");
    }

    #[test]
    fn test_display_jump_in_hex() {
        let event = TrackEvent {
            cmd: SeqCmd::Goto as u16,
            param1: 0x123,
            ..TrackEvent::default()
        };
        assert_eq!(event.to_string(), "Goto(0x0123)");
    }

    #[test]
    fn test_display_prefixed() {
        let event = TrackEvent {
            cmd: SeqCmd::Volume as u16,
            param1: 90,
            prefixes: vec![EventPrefix {
                cmd: SeqCmd::PrefixRand as u8,
                param1: 10,
                param2: 20,
            }],
            ..TrackEvent::default()
        };
        assert_eq!(event.to_string(), "[PrefixRand(10,20)] Volume(90)");
    }

    #[test]
    fn test_durations() {
        let note = TrackEvent {
            cmd: 10,
            param2: 24,
            ..TrackEvent::default()
        };
        let rest = TrackEvent {
            cmd: SeqCmd::Rest as u16,
            param1: 96,
            ..TrackEvent::default()
        };
        let volume = TrackEvent {
            cmd: SeqCmd::Volume as u16,
            param1: 127,
            ..TrackEvent::default()
        };
        assert_eq!(note.duration(), 24);
        assert_eq!(rest.duration(), 96);
        assert_eq!(volume.duration(), 0);
    }
}
