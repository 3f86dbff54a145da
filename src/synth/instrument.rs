//! Per-track instrument state and note-event construction.
//!
//! Sequence control events accumulate state here (program, pitch bend,
//! transpose, articulation overrides, tie mode); note events resolve
//! through the bank's key/velocity regions and the wave archive into
//! synthesis events carrying a decoded sample, a pitch ratio and an
//! envelope specification.

use super::envelope::{DiscreteEnvelope, EnvelopeStep};
use super::{EnvelopeSpec, NoteOn, NoteUpdate, SynthEvent};
use crate::bank::BankFile;
use crate::context::ArchiveContext;
use crate::wave::WaveArchive;

/// Seconds per envelope hardware tick.
pub const ENVELOPE_TICK: f64 = 64.0 * 2728.0 / 33_513_982.0;
/// Full-scale magnitude of the logarithmic envelope level axis.
pub const ENVELOPE_SCALE: f64 = 723.0 * 128.0;
/// Slack added after a note before tie mode stops extending it.
const TIE_SLACK: f64 = 0.001;

/// Convert a semitone offset to a frequency ratio.
pub fn semitones_to_ratio(semitones: f64) -> f64 {
    (semitones / 12.0).exp2()
}

/// Map an envelope level (`-ENVELOPE_SCALE..=0`) to a linear gain.
pub fn scale_volume(level: f64) -> f64 {
    if level <= -ENVELOPE_SCALE {
        return 0.0;
    }
    let base = 4096f64.ln() / ENVELOPE_SCALE;
    (base * level).exp()
}

/// Convert a 7-bit attack code to the per-tick attack multiplier.
pub fn attack_value(code: i8) -> f64 {
    const LUT: [u8; 19] = [
        0x00, 0x01, 0x05, 0x0E, 0x1A, 0x26, 0x33, 0x3F, 0x49, 0x54, 0x5C, 0x64, 0x6D, 0x74, 0x7B,
        0x7F, 0x84, 0x89, 0x8F,
    ];
    let code = code as i32;
    if code > 0x6D {
        LUT[(0x7F - code) as usize] as f64
    } else {
        (0xFF - code) as f64
    }
}

/// Convert a 7-bit hold code to seconds (linear mapping).
pub fn hold_value(code: i8) -> f64 {
    code as f64 * ENVELOPE_TICK
}

/// Convert a 7-bit decay code to the per-tick level decrement.
pub fn decay_value(code: i8) -> f64 {
    match code {
        127 => 65535.0,
        126 => 15360.0,
        code if code >= 50 => 7680.0 / (126 - code as i32) as f64,
        code => (code as i32 * 2 + 1) as f64,
    }
}

/// Convert a 7-bit sustain code to the logarithmic target level.
pub fn sustain_value(code: i8) -> f64 {
    match code {
        0 => -32768.0,
        1 => -722.0,
        code => (173.7255 * (code as f64).ln() - 842.0).trunc(),
    }
}

/// Convert a 7-bit release code to the per-tick level decrement.
pub fn release_value(code: i8) -> f64 {
    decay_value(code)
}

/// Attack phase: the level approaches zero geometrically from the bottom
/// of the scale.
pub fn attack_step(attack: f64, carry: f64) -> EnvelopeStep {
    let level = -((-(carry as i64) * attack as i64) >> 8) as f64;
    EnvelopeStep {
        next_level: scale_volume(level),
        next_time: ENVELOPE_TICK,
        finished: level == 0.0,
        carry: level,
    }
}

/// Hold phase: keep the previous level for a fixed duration.
pub fn hold_step(hold: f64, last: f64, carry: f64) -> EnvelopeStep {
    EnvelopeStep {
        next_level: last,
        next_time: hold,
        finished: true,
        carry,
    }
}

/// Decay/release phase: walk the logarithmic level down to a target.
pub fn decay_step(decay: f64, target: f64, carry: f64) -> EnvelopeStep {
    let mut next = carry - decay;
    let finished = next <= target;
    if finished {
        next = target;
    }
    EnvelopeStep {
        next_level: scale_volume(next),
        next_time: ENVELOPE_TICK,
        finished,
        carry: next,
    }
}

/// Sustain phase: hold indefinitely until released.
pub fn sustain_step(last: f64, carry: f64) -> EnvelopeStep {
    EnvelopeStep {
        next_level: last,
        next_time: f64::INFINITY,
        finished: false,
        carry,
    }
}

/// Build the phase list for a note's envelope specification.
pub fn build_envelope(spec: &EnvelopeSpec) -> DiscreteEnvelope {
    let start = attack_step(spec.attack, -ENVELOPE_SCALE);
    let mut env = DiscreteEnvelope::new(start.next_level, start.carry);

    if spec.attack < 127.0 {
        let attack = spec.attack;
        env.add_phase(Box::new(move |_, carry| attack_step(attack, carry)));
    }
    if spec.hold > 0.0 {
        let hold = spec.hold;
        env.add_phase(Box::new(move |last, carry| hold_step(hold, last, carry)));
    }
    if spec.sustain < 127.0 {
        let decay = spec.decay;
        let sustain = spec.sustain;
        env.add_phase(Box::new(move |_, carry| decay_step(decay, sustain, carry)));
    }
    env.add_phase(Box::new(sustain_step));

    if !spec.ignore_release {
        let release = spec.release;
        env.set_release_phase(Box::new(move |_, carry| {
            decay_step(release, -ENVELOPE_SCALE, carry)
        }));
    }
    env
}

/// Mutable per-track synthesis state.
pub struct Instrument {
    /// Selected bank program.
    pub program: usize,
    /// Pitch bend position, -1..=1.
    pub bend: f64,
    /// Bend range in semitones.
    pub bend_range: f64,
    /// Key transpose in semitones.
    pub transpose: i32,
    /// Attack override code; falls back to the bank value when unset.
    pub attack: Option<i8>,
    /// Hold override code.
    pub hold: Option<i8>,
    /// Decay override code.
    pub decay: Option<i8>,
    /// Sustain override code.
    pub sustain: Option<i8>,
    /// Release override code.
    pub release: Option<i8>,
    /// Legato mode: extend the previous note instead of retriggering.
    pub tie: bool,
    last_playback_id: Option<u64>,
    last_playback_end: f64,
}

impl Default for Instrument {
    fn default() -> Self {
        Instrument {
            program: 0,
            bend: 0.0,
            bend_range: 2.0,
            transpose: 0,
            attack: None,
            hold: None,
            decay: None,
            sustain: None,
            release: None,
            tie: false,
            last_playback_id: None,
            last_playback_end: -1.0,
        }
    }
}

impl Instrument {
    /// Current bend ratio from the bend position and range.
    pub fn bend_ratio(&self) -> f64 {
        semitones_to_ratio(self.bend * self.bend_range)
    }

    /// Resolve a note through the bank and wave archive into a synthesis
    /// event.
    ///
    /// Returns `None` when no region covers the note or the wave cannot be
    /// decoded; such notes are dropped silently. In tie mode, while the
    /// previous note is still sounding, an update event is produced
    /// instead of a new note.
    #[allow(clippy::too_many_arguments)]
    pub fn make_event(
        &mut self,
        bank: &BankFile,
        waves: &WaveArchive,
        ctx: &ArchiveContext,
        track: usize,
        seconds: f64,
        note: i32,
        velocity: u8,
        duration: f64,
        next_playback_id: &mut u64,
    ) -> Option<SynthEvent> {
        let key = (note + self.transpose).clamp(0, 127) as u8;
        let info = bank.sample(self.program, key, velocity)?;
        let wave_index = info.wave.pointer as usize;
        let sample = waves.sample(wave_index, ctx).ok()?;

        let pitch = semitones_to_ratio((key as i32 - info.base_note as i32) as f64);
        let gain = velocity as f64 / 127.0;

        if self.tie && self.last_playback_end >= seconds {
            let playback_id = self.last_playback_id?;
            self.last_playback_end = seconds + duration + TIE_SLACK;
            return Some(SynthEvent::NoteUpdate(NoteUpdate {
                playback_id,
                seconds,
                pitch,
                gain,
                duration,
            }));
        }

        let envelope = EnvelopeSpec {
            attack: attack_value(self.attack.unwrap_or(info.attack)),
            hold: hold_value(self.hold.unwrap_or(info.hold)),
            decay: decay_value(self.decay.unwrap_or(info.decay)),
            sustain: sustain_value(self.sustain.unwrap_or(info.sustain)),
            release: release_value(self.release.unwrap_or(info.release)),
            ignore_release: info.ignore_release,
        };

        let playback_id = *next_playback_id;
        *next_playback_id += 1;
        if velocity > 0 {
            self.last_playback_id = Some(playback_id);
            self.last_playback_end = if duration > 0.0 {
                seconds + duration + TIE_SLACK
            } else {
                f64::INFINITY
            };
        }

        Some(SynthEvent::NoteOn(NoteOn {
            playback_id,
            track,
            seconds,
            duration,
            sample,
            pitch,
            bend: self.bend_ratio(),
            gain,
            envelope,
        }))
    }

    /// Playback ID of the most recent note, used by tie updates.
    pub fn last_playback_id(&self) -> Option<u64> {
        self.last_playback_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_attack_codes() {
        assert_relative_eq!(attack_value(0), 255.0);
        assert_relative_eq!(attack_value(0x6D), 0x92 as f64);
        assert_relative_eq!(attack_value(127), 0.0);
        assert_relative_eq!(attack_value(126), 1.0);
    }

    #[test]
    fn test_decay_codes() {
        assert_relative_eq!(decay_value(127), 65535.0);
        assert_relative_eq!(decay_value(126), 15360.0);
        assert_relative_eq!(decay_value(50), 7680.0 / 76.0);
        assert_relative_eq!(decay_value(49), 99.0);
        assert_relative_eq!(decay_value(0), 1.0);
    }

    #[test]
    fn test_sustain_codes() {
        assert_relative_eq!(sustain_value(0), -32768.0);
        assert_relative_eq!(sustain_value(1), -722.0);
        assert_relative_eq!(sustain_value(127), (173.7255 * 127f64.ln() - 842.0).trunc());
        // Full sustain is near the top of the scale.
        assert!(sustain_value(127) > -2.0);
    }

    #[test]
    fn test_scale_volume_range() {
        assert_relative_eq!(scale_volume(0.0), 1.0);
        assert_relative_eq!(scale_volume(-ENVELOPE_SCALE), 0.0);
        let mid = scale_volume(-ENVELOPE_SCALE / 2.0);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_semitone_ratios() {
        assert_relative_eq!(semitones_to_ratio(12.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(semitones_to_ratio(-12.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(semitones_to_ratio(0.0), 1.0);
    }

    #[test]
    fn test_attack_envelope_rises_to_full() {
        // Instant attack (code 127) starts at full level.
        let spec = EnvelopeSpec {
            attack: attack_value(127),
            hold: 0.0,
            decay: decay_value(60),
            sustain: sustain_value(127),
            release: release_value(127),
            ignore_release: false,
        };
        let mut env = build_envelope(&spec);
        assert!(env.level(0.0) > 0.99);

        // A slow attack starts silent and rises.
        let slow = EnvelopeSpec {
            attack: attack_value(0),
            ..spec
        };
        let mut env = build_envelope(&slow);
        let early = env.level(0.0);
        let later = env.level(0.2);
        assert!(early < later);
    }

    #[test]
    fn test_envelope_release_fades_out() {
        let spec = EnvelopeSpec {
            attack: attack_value(127),
            hold: 0.0,
            decay: decay_value(0),
            sustain: sustain_value(127),
            release: release_value(127),
            ignore_release: false,
        };
        let mut env = build_envelope(&spec);
        assert!(env.level(0.01) > 0.5);
        env.trigger_release(0.02);
        // Release code 127 empties the scale within a couple of ticks.
        let after = env.level(0.02 + 4.0 * ENVELOPE_TICK);
        assert!(after < 0.01);
    }
}
