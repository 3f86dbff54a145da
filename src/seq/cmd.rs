//! Sequence bytecode opcodes.
//!
//! Command bytes below 0x80 are note events (the byte is the note number).
//! Everything else is a control opcode; the `Extended` escape introduces a
//! second opcode byte mapped into the 0x100+ range.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

/// Control opcodes of the sequence bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum SeqCmd {
    Rest = 0x80,
    ProgramChange = 0x81,
    AddTrack = 0x88,
    Goto = 0x89,
    Gosub = 0x8A,

    PrefixRand = 0xA0,
    PrefixVar = 0xA1,
    PrefixIf = 0xA2,
    PrefixTime = 0xA3,
    PrefixTimeRand = 0xA4,
    PrefixTimeVar = 0xA5,

    Ppqn = 0xB0,
    Hold = 0xB1,
    Mono = 0xB2,
    VelocityRange = 0xB3,

    Pan = 0xC0,
    Volume = 0xC1,
    MainVolume = 0xC2,
    Transpose = 0xC3,
    Bend = 0xC4,
    BendRange = 0xC5,
    Priority = 0xC6,
    WaitEnable = 0xC7,
    Tie = 0xC8,
    Portamento = 0xC9,
    ModDepth = 0xCA,
    ModSpeed = 0xCB,
    ModType = 0xCC,
    ModRange = 0xCD,
    PortaSpeed = 0xCE,
    PortaTime = 0xCF,
    Attack = 0xD0,
    Decay = 0xD1,
    Sustain = 0xD2,
    Release = 0xD3,
    LoopStart = 0xD4,
    Expression = 0xD5,
    DebugPrint = 0xD6,
    Surround = 0xD7,
    Cutoff = 0xD8,
    SendA = 0xD9,
    SendB = 0xDA,
    MainSend = 0xDB,
    InitialPan = 0xDC,
    Mute = 0xDD,
    SendC = 0xDE,
    Damper = 0xDF,

    ModDelay = 0xE0,
    Tempo = 0xE1,
    Sweep = 0xE2,

    Extended = 0xF0,
    LoopEnd = 0xFC,
    Return = 0xFD,
    AllocTracks = 0xFE,
    TrackEnd = 0xFF,

    // Extended opcodes (escape byte + sub-opcode).
    VarSet = 0x180,
    VarAdd = 0x181,
    VarSub = 0x182,
    VarMul = 0x183,
    VarDiv = 0x184,
    VarShift = 0x185,
    VarRand = 0x186,
    VarAnd = 0x187,
    VarOr = 0x188,
    VarXor = 0x189,
    VarSetInverse = 0x18A,
    VarMod = 0x18B,
    VarEq = 0x190,
    VarGe = 0x191,
    VarGt = 0x192,
    VarLe = 0x193,
    VarLt = 0x194,
    VarNe = 0x195,
}

/// Base of the extended opcode range.
pub const EXTENDED_BASE: u16 = 0x100;

impl SeqCmd {
    /// Decode a raw command word.
    pub fn from_raw(raw: u16) -> Option<SeqCmd> {
        SeqCmd::from_u16(raw)
    }

    /// Name used when formatting events; unrecognized commands print in
    /// hex.
    pub fn name(raw: u16) -> String {
        match SeqCmd::from_raw(raw) {
            Some(cmd) => format!("{cmd:?}"),
            None => format!("Unknown{raw:X}"),
        }
    }

    /// Whether this opcode is a prefix wrapping the following event.
    pub fn is_prefix(raw: u16) -> bool {
        (SeqCmd::PrefixRand as u16..=SeqCmd::PrefixTimeVar as u16).contains(&raw)
    }

    /// How many parameters an event with this command carries, for display.
    pub fn param_count(raw: u16) -> usize {
        if raw < 0x80 {
            return 2;
        }
        if raw > EXTENDED_BASE {
            return 3;
        }
        match SeqCmd::from_raw(raw) {
            Some(SeqCmd::AddTrack) => 2,
            Some(SeqCmd::LoopEnd) | Some(SeqCmd::Return) | Some(SeqCmd::TrackEnd) => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        assert_eq!(SeqCmd::from_raw(0x80), Some(SeqCmd::Rest));
        assert_eq!(SeqCmd::from_raw(0xE1), Some(SeqCmd::Tempo));
        assert_eq!(SeqCmd::from_raw(0x195), Some(SeqCmd::VarNe));
        assert_eq!(SeqCmd::from_raw(0x8F), None);
    }

    #[test]
    fn test_prefix_range() {
        assert!(SeqCmd::is_prefix(0xA0));
        assert!(SeqCmd::is_prefix(0xA5));
        assert!(!SeqCmd::is_prefix(0xA6));
        assert!(!SeqCmd::is_prefix(0x9F));
    }

    #[test]
    fn test_param_counts() {
        assert_eq!(SeqCmd::param_count(0x3C), 2); // note
        assert_eq!(SeqCmd::param_count(SeqCmd::AddTrack as u16), 2);
        assert_eq!(SeqCmd::param_count(SeqCmd::TrackEnd as u16), 0);
        assert_eq!(SeqCmd::param_count(SeqCmd::Volume as u16), 1);
        assert_eq!(SeqCmd::param_count(SeqCmd::VarAdd as u16), 3);
    }
}
