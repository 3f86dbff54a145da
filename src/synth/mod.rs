//! Synthesis events, the external mix-graph seam and the built-in
//! renderer.
//!
//! The sequence player walks each track's playback cursor, folds control
//! events into per-track [`Instrument`] state and emits synthesis events to
//! an [`EventSink`]. The built-in [`SequenceRenderer`] implements the sink
//! with sampler voices shaped by discrete envelopes and mixes them into an
//! interleaved sample stream; hosts with their own mix graph implement
//! `EventSink` instead.

pub mod envelope;
pub mod instrument;
pub mod sampler;

pub use envelope::{DiscreteEnvelope, EnvelopeStep, PhaseFn};
pub use instrument::Instrument;
pub use sampler::Sampler;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::bank::BankFile;
use crate::codec::SampleData;
use crate::context::ArchiveContext;
use crate::error::Result;
use crate::seq::{SeqCmd, SequenceFile};
use crate::wave::WaveArchive;

/// Channel-level parameter targeted by a control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelParam {
    /// Channel gain (0..=1).
    Gain,
    /// Channel pan (0..=1, 0.5 is center).
    Pan,
}

/// Raw envelope parameters carried on a note event.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeSpec {
    /// Attack multiplier (converted code).
    pub attack: f64,
    /// Hold duration in seconds.
    pub hold: f64,
    /// Decay decrement per envelope tick.
    pub decay: f64,
    /// Sustain target level on the logarithmic axis.
    pub sustain: f64,
    /// Release decrement per envelope tick.
    pub release: f64,
    /// Whether the note skips its release phase.
    pub ignore_release: bool,
}

/// A new note to start.
#[derive(Clone)]
pub struct NoteOn {
    /// Identity for later tie updates.
    pub playback_id: u64,
    /// Originating track.
    pub track: usize,
    /// Start time in seconds.
    pub seconds: f64,
    /// Nominal duration in seconds (0 = run to the end of the sample).
    pub duration: f64,
    /// Decoded sample to play.
    pub sample: Arc<SampleData>,
    /// Note pitch ratio relative to the sample's base key.
    pub pitch: f64,
    /// Pitch-bend ratio active at note start.
    pub bend: f64,
    /// Velocity-derived gain (0..=1).
    pub gain: f64,
    /// Envelope parameters.
    pub envelope: EnvelopeSpec,
}

/// An update to an already-sounding note (tie/legato path).
#[derive(Debug, Clone, Copy)]
pub struct NoteUpdate {
    /// Identity of the note to update.
    pub playback_id: u64,
    /// Time of the update in seconds.
    pub seconds: f64,
    /// New pitch ratio.
    pub pitch: f64,
    /// New gain.
    pub gain: f64,
    /// New remaining duration from `seconds`.
    pub duration: f64,
}

/// One synthesis-layer event handed to the mix graph.
#[derive(Clone)]
pub enum SynthEvent {
    /// Set a channel parameter from a point in time onwards.
    Channel {
        /// Originating track.
        track: usize,
        /// Effective time in seconds.
        seconds: f64,
        /// Which parameter changes.
        param: ChannelParam,
        /// New value.
        value: f64,
    },
    /// Change the pitch-bend ratio of a track's sounding notes.
    PitchBend {
        /// Originating track.
        track: usize,
        /// Effective time in seconds.
        seconds: f64,
        /// New bend ratio.
        ratio: f64,
    },
    /// Start a note.
    NoteOn(NoteOn),
    /// Update a sounding note.
    NoteUpdate(NoteUpdate),
}

impl SynthEvent {
    /// The event's effective time in seconds.
    pub fn seconds(&self) -> f64 {
        match self {
            SynthEvent::Channel { seconds, .. }
            | SynthEvent::PitchBend { seconds, .. } => *seconds,
            SynthEvent::NoteOn(note) => note.seconds,
            SynthEvent::NoteUpdate(update) => update.seconds,
        }
    }
}

/// Receiver for translated synthesis events; implemented by the built-in
/// renderer and by host mix graphs.
pub trait EventSink {
    /// Announce a track/channel before its events arrive.
    fn add_channel(&mut self, track: usize);
    /// Deliver one event.
    fn add_event(&mut self, event: SynthEvent);
}

/// Translates decoded sequence tracks into synthesis events.
pub struct SequencePlayer<'a> {
    seq: &'a SequenceFile,
    bank: &'a BankFile,
    waves: &'a WaveArchive,
    ctx: &'a ArchiveContext,
    max_seconds: f64,
    next_playback_id: u64,
    dropped_notes: usize,
    /// Diagnostics collected during translation.
    pub warnings: Vec<String>,
}

impl<'a> SequencePlayer<'a> {
    /// Create a player over a parsed sequence, bank and wave archive.
    pub fn new(
        seq: &'a SequenceFile,
        bank: &'a BankFile,
        waves: &'a WaveArchive,
        ctx: &'a ArchiveContext,
    ) -> Self {
        SequencePlayer {
            seq,
            bank,
            waves,
            ctx,
            max_seconds: seq.max_length(),
            next_playback_id: 1,
            dropped_notes: 0,
            warnings: Vec::new(),
        }
    }

    /// Override the playback cutoff in seconds.
    pub fn set_max_seconds(&mut self, max_seconds: f64) {
        self.max_seconds = max_seconds;
    }

    /// Notes dropped because no sample could be resolved for them.
    pub fn dropped_notes(&self) -> usize {
        self.dropped_notes
    }

    /// Walk every track and deliver its events to `sink`.
    pub fn translate_into(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        let verbose = self.ctx.options.verbose;
        for track in &self.seq.tracks {
            if track.is_empty() {
                continue;
            }
            sink.add_channel(track.index);
            let mut inst = Instrument::default();
            let mut cursor =
                crate::seq::TrackCursor::new(track, &self.seq.tempo, self.max_seconds);

            while let Some(timed) = cursor.next_event() {
                let event = timed.event;
                let seconds = timed.seconds;
                let track_index = track.index;

                if event.is_note() {
                    let duration = timed.end_seconds - timed.seconds;
                    let velocity = event.param1.clamp(0, 127) as u8;
                    match inst.make_event(
                        self.bank,
                        self.waves,
                        self.ctx,
                        track_index,
                        seconds,
                        event.cmd as i32,
                        velocity,
                        duration,
                        &mut self.next_playback_id,
                    ) {
                        Some(synth_event) => sink.add_event(synth_event),
                        None => self.dropped_notes += 1,
                    }
                    continue;
                }

                match SeqCmd::from_raw(event.cmd) {
                    Some(SeqCmd::Volume) => sink.add_event(SynthEvent::Channel {
                        track: track_index,
                        seconds,
                        param: ChannelParam::Gain,
                        value: event.param1 as f64 / 127.0,
                    }),
                    Some(SeqCmd::Pan) => sink.add_event(SynthEvent::Channel {
                        track: track_index,
                        seconds,
                        param: ChannelParam::Pan,
                        value: event.param1 as f64 / 128.0,
                    }),
                    Some(SeqCmd::Bend) => {
                        inst.bend = (event.param1 as u8 as i8) as f64 / 127.0;
                        sink.add_event(SynthEvent::PitchBend {
                            track: track_index,
                            seconds,
                            ratio: inst.bend_ratio(),
                        });
                    }
                    Some(SeqCmd::BendRange) => {
                        inst.bend_range = event.param1 as f64;
                    }
                    Some(SeqCmd::Transpose) => {
                        inst.transpose = (event.param1 as u8 as i8) as i32;
                    }
                    Some(SeqCmd::ProgramChange) => {
                        inst.program = event.param1.max(0) as usize;
                    }
                    Some(SeqCmd::Tie) => {
                        inst.tie = event.param1 != 0;
                    }
                    Some(SeqCmd::Attack) => inst.attack = Some(event.param1 as i8),
                    Some(SeqCmd::Hold) => inst.hold = Some(event.param1 as i8),
                    Some(SeqCmd::Decay) => inst.decay = Some(event.param1 as i8),
                    Some(SeqCmd::Sustain) => inst.sustain = Some(event.param1 as i8),
                    Some(SeqCmd::Release) => inst.release = Some(event.param1 as i8),
                    // Timing and bookkeeping opcodes were consumed by the
                    // parse pass or carry no synthesis effect.
                    Some(SeqCmd::Rest)
                    | Some(SeqCmd::WaitEnable)
                    | Some(SeqCmd::Goto)
                    | Some(SeqCmd::Gosub)
                    | Some(SeqCmd::Return)
                    | Some(SeqCmd::AddTrack)
                    | Some(SeqCmd::AllocTracks)
                    | Some(SeqCmd::TrackEnd)
                    | Some(SeqCmd::Tempo)
                    | Some(SeqCmd::Ppqn) => {}
                    _ => {
                        if verbose {
                            self.warnings.push(format!(
                                "track {}: opcode without synthesis effect: {}",
                                track_index, event
                            ));
                        }
                    }
                }
            }
            self.warnings.extend(cursor.warnings().iter().cloned());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Built-in renderer

/// Output parameters of the built-in renderer.
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    /// Output rate in Hz.
    pub sample_rate: u32,
    /// Output channel count (1 or 2).
    pub channels: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

#[derive(Default)]
struct ChannelState {
    gain: Vec<(f64, f64)>,
    pan: Vec<(f64, f64)>,
}

fn value_at(points: &[(f64, f64)], time: f64, default: f64) -> f64 {
    points
        .iter()
        .take_while(|(t, _)| *t <= time)
        .last()
        .map(|(_, v)| *v)
        .unwrap_or(default)
}

struct Voice {
    playback_id: u64,
    track: usize,
    sampler: Sampler,
    envelope: DiscreteEnvelope,
    gain: f64,
    end: f64,
    released: bool,
}

/// Mixes synthesis events into an interleaved sample stream.
///
/// Voices are samplers shaped by discrete envelopes; channel gain and pan
/// apply as step automation per track.
pub struct SequenceRenderer {
    config: RenderConfig,
    channels: HashMap<usize, ChannelState>,
    pending: Vec<SynthEvent>,
    queue: VecDeque<SynthEvent>,
    voices: Vec<Voice>,
    frame: u64,
    end_time: f64,
    prepared: bool,
}

/// Longest release tail rendered past the last note end.
const RELEASE_TAIL_CAP: f64 = 10.0;

impl EventSink for SequenceRenderer {
    fn add_channel(&mut self, track: usize) {
        self.channels.entry(track).or_default();
    }

    fn add_event(&mut self, event: SynthEvent) {
        self.pending.push(event);
    }
}

impl SequenceRenderer {
    /// Create an empty renderer.
    pub fn new(config: RenderConfig) -> Self {
        SequenceRenderer {
            config,
            channels: HashMap::new(),
            pending: Vec::new(),
            queue: VecDeque::new(),
            voices: Vec::new(),
            frame: 0,
            end_time: 0.0,
            prepared: false,
        }
    }

    /// The renderer's output configuration.
    pub fn config(&self) -> RenderConfig {
        self.config
    }

    /// Time of the last scheduled note end, in seconds.
    pub fn end_time(&mut self) -> f64 {
        self.prepare();
        self.end_time
    }

    fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        self.prepared = true;
        self.pending
            .sort_by(|a, b| a.seconds().total_cmp(&b.seconds()));
        for event in self.pending.drain(..) {
            match event {
                SynthEvent::Channel {
                    track,
                    seconds,
                    param,
                    value,
                } => {
                    let state = self.channels.entry(track).or_default();
                    match param {
                        ChannelParam::Gain => state.gain.push((seconds, value)),
                        ChannelParam::Pan => state.pan.push((seconds, value)),
                    }
                }
                SynthEvent::NoteOn(ref note) => {
                    let end = if note.duration > 0.0 {
                        note.seconds + note.duration
                    } else {
                        note.seconds + note.sample.duration()
                    };
                    self.end_time = self.end_time.max(end);
                    self.queue.push_back(event);
                }
                other => self.queue.push_back(other),
            }
        }
    }

    /// Whether every voice has finished and no events remain.
    pub fn finished(&self) -> bool {
        if !self.prepared {
            return false;
        }
        let time = self.frame as f64 / self.config.sample_rate as f64;
        (self.queue.is_empty() && self.voices.is_empty() && time >= self.end_time)
            || time > self.end_time + RELEASE_TAIL_CAP
    }

    fn start_due_events(&mut self, time: f64) {
        while self
            .queue
            .front()
            .is_some_and(|event| event.seconds() <= time)
        {
            let Some(event) = self.queue.pop_front() else {
                break;
            };
            match event {
                SynthEvent::NoteOn(note) => {
                    let end = if note.duration > 0.0 {
                        note.seconds + note.duration
                    } else {
                        note.seconds + note.sample.duration()
                    };
                    self.voices.push(Voice {
                        playback_id: note.playback_id,
                        track: note.track,
                        sampler: Sampler::new(note.sample, note.pitch, note.bend),
                        envelope: instrument::build_envelope(&note.envelope),
                        gain: note.gain,
                        end,
                        released: false,
                    });
                }
                SynthEvent::NoteUpdate(update) => {
                    if let Some(voice) = self
                        .voices
                        .iter_mut()
                        .find(|v| v.playback_id == update.playback_id)
                    {
                        voice.sampler.set_pitch(update.pitch);
                        voice.gain = update.gain;
                        voice.end = update.seconds + update.duration;
                        self.end_time = self.end_time.max(voice.end);
                    }
                }
                SynthEvent::PitchBend { track, ratio, .. } => {
                    for voice in self.voices.iter_mut().filter(|v| v.track == track) {
                        voice.sampler.set_bend(ratio);
                    }
                }
                SynthEvent::Channel { .. } => {}
            }
        }
    }

    /// Fill `buffer` with interleaved samples, advancing the renderer.
    pub fn generate_samples_into(&mut self, buffer: &mut [f32]) {
        self.prepare();
        buffer.fill(0.0);
        let channels = self.config.channels.max(1) as usize;
        let rate = self.config.sample_rate as f64;

        for frame_out in buffer.chunks_mut(channels) {
            let time = self.frame as f64 / rate;
            self.start_due_events(time);

            let mut left = 0.0f64;
            let mut right = 0.0f64;
            let channel_states = &self.channels;
            self.voices.retain_mut(|voice| {
                if !voice.released && time >= voice.end {
                    voice.envelope.trigger_release(time);
                    voice.released = true;
                }
                let level = voice.envelope.level(time);
                if !voice.envelope.is_active() || voice.sampler.is_exhausted() {
                    return false;
                }
                let (l, r) = voice.sampler.next_frame(rate);
                let state = channel_states.get(&voice.track);
                let channel_gain =
                    state.map_or(1.0, |s| value_at(&s.gain, time, 1.0));
                let pan = state.map_or(0.5, |s| value_at(&s.pan, time, 0.5));
                let gain = level * voice.gain * channel_gain;
                left += l * gain * (1.0 - pan).sqrt();
                right += r * gain * pan.sqrt();
                true
            });

            let left = left.clamp(-1.0, 1.0) as f32;
            let right = right.clamp(-1.0, 1.0) as f32;
            if channels == 1 {
                frame_out[0] = ((left + right) / 2.0).clamp(-1.0, 1.0);
            } else {
                frame_out[0] = left;
                frame_out[1] = right;
                for extra in frame_out.iter_mut().skip(2) {
                    *extra = 0.0;
                }
            }
            self.frame += 1;
        }
    }

    /// Render until every voice finishes; returns the interleaved stream.
    pub fn render_all(&mut self) -> Vec<f32> {
        self.prepare();
        let channels = self.config.channels.max(1) as usize;
        let mut out = Vec::new();
        let mut chunk = vec![0.0f32; 4096 * channels];
        while !self.finished() {
            self.generate_samples_into(&mut chunk);
            out.extend_from_slice(&chunk);
        }
        // Trim whole frames of trailing silence introduced by chunking.
        let frame_len = channels;
        while out.len() >= frame_len
            && out[out.len() - frame_len..].iter().all(|s| *s == 0.0)
            && out.len() as u64 / frame_len as u64
                > (self.end_time * self.config.sample_rate as f64) as u64
        {
            out.truncate(out.len() - frame_len);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_sample(frames: usize) -> Arc<SampleData> {
        let mut data = SampleData::new(9, 32000);
        data.channels.push(vec![16384; frames]);
        Arc::new(data)
    }

    fn quick_note(seconds: f64, duration: f64) -> SynthEvent {
        SynthEvent::NoteOn(NoteOn {
            playback_id: 1,
            track: 0,
            seconds,
            duration,
            sample: flat_sample(64000),
            pitch: 1.0,
            bend: 1.0,
            gain: 1.0,
            envelope: EnvelopeSpec {
                attack: instrument::attack_value(127),
                hold: 0.0,
                decay: instrument::decay_value(60),
                sustain: instrument::sustain_value(127),
                release: instrument::release_value(127),
                ignore_release: false,
            },
        })
    }

    #[test]
    fn test_note_renders_audio() {
        let mut renderer = SequenceRenderer::new(RenderConfig {
            sample_rate: 32000,
            channels: 2,
        });
        renderer.add_channel(0);
        renderer.add_event(quick_note(0.0, 0.25));

        let audio = renderer.render_all();
        assert!(!audio.is_empty());
        // Audible at the start, near-silent at the very end.
        assert!(audio[0].abs() > 0.1);
        let tail = &audio[audio.len() - 8..];
        assert!(tail.iter().all(|s| s.abs() < 0.05));
    }

    #[test]
    fn test_channel_gain_applies() {
        let mut loud = SequenceRenderer::new(RenderConfig {
            sample_rate: 32000,
            channels: 1,
        });
        loud.add_channel(0);
        loud.add_event(quick_note(0.0, 0.1));

        let mut quiet = SequenceRenderer::new(RenderConfig {
            sample_rate: 32000,
            channels: 1,
        });
        quiet.add_channel(0);
        quiet.add_event(SynthEvent::Channel {
            track: 0,
            seconds: 0.0,
            param: ChannelParam::Gain,
            value: 0.25,
        });
        quiet.add_event(quick_note(0.0, 0.1));

        let loud_audio = loud.render_all();
        let quiet_audio = quiet.render_all();
        assert!(loud_audio[100].abs() > quiet_audio[100].abs() * 2.0);
    }

    #[test]
    fn test_note_update_extends_voice() {
        let mut renderer = SequenceRenderer::new(RenderConfig {
            sample_rate: 32000,
            channels: 1,
        });
        renderer.add_channel(0);
        renderer.add_event(quick_note(0.0, 0.1));
        renderer.add_event(SynthEvent::NoteUpdate(NoteUpdate {
            playback_id: 1,
            seconds: 0.05,
            pitch: 1.5,
            gain: 1.0,
            duration: 0.3,
        }));
        let audio = renderer.render_all();
        // Still sounding well past the original end.
        let at = (0.2 * 32000.0) as usize;
        assert!(audio[at].abs() > 0.1);
    }
}
