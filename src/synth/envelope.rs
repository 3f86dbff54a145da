//! Discretized multi-phase volume envelopes.
//!
//! An envelope is an ordered list of phase functions (attack, hold, decay,
//! sustain) plus a distinguished release phase. Each phase is pure: given
//! the previous level and an opaque carry value it produces the next level,
//! the time until that level is reached, whether the phase has finished,
//! and the new carry. The driver interpolates between steps and advances
//! strictly forward in time.

/// One step produced by a phase function.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeStep {
    /// Level reached after `next_time` elapses.
    pub next_level: f64,
    /// Seconds until the next step.
    pub next_time: f64,
    /// Whether the phase is complete once this step elapses.
    pub finished: bool,
    /// Opaque state handed back to the phase on the next step.
    pub carry: f64,
}

/// A pure step transform: `(previous level, carry) -> step`.
pub type PhaseFn = Box<dyn Fn(f64, f64) -> EnvelopeStep + Send + Sync>;

const RELEASE_PHASE: i32 = -1;
// A phase that reports zero duration without finishing would stall the
// driver; force progress after this many same-time steps.
const MAX_STEPS_PER_QUERY: usize = 256;

/// Discrete envelope driver.
pub struct DiscreteEnvelope {
    last_level: f64,
    step_at: f64,
    step_level: f64,
    current: EnvelopeStep,
    phase: i32,
    phases: Vec<PhaseFn>,
    release: Option<PhaseFn>,
    release_pending: bool,
    release_at: f64,
    done: bool,
}

impl DiscreteEnvelope {
    /// Create an envelope at the given starting level and carry state.
    pub fn new(start_level: f64, start_carry: f64) -> Self {
        DiscreteEnvelope {
            last_level: start_level,
            step_at: 0.0,
            step_level: start_level,
            current: EnvelopeStep {
                next_level: start_level,
                next_time: 0.0,
                finished: false,
                carry: start_carry,
            },
            phase: 0,
            phases: Vec::new(),
            release: None,
            release_pending: false,
            release_at: 0.0,
            done: false,
        }
    }

    /// Append a phase to the ordered list.
    pub fn add_phase(&mut self, phase: PhaseFn) {
        self.phases.push(phase);
    }

    /// Install the release phase.
    pub fn set_release_phase(&mut self, phase: PhaseFn) {
        self.release = Some(phase);
    }

    /// Whether the envelope can still produce output.
    pub fn is_active(&self) -> bool {
        !self.done
    }

    /// Request the switch to the release phase at `time`.
    ///
    /// The switch happens once the first phase has completed; a request
    /// during the initial phase stays pending until then.
    pub fn trigger_release(&mut self, time: f64) {
        if !self.release_pending {
            self.release_pending = true;
            self.release_at = time;
        }
    }

    fn enter_release(&mut self) {
        self.step_at = self.release_at;
        self.phase = RELEASE_PHASE;
        self.current = EnvelopeStep {
            next_level: self.last_level,
            next_time: 0.0,
            finished: false,
            carry: self.current.carry,
        };
    }

    /// Envelope level at `time`. Times must not decrease between calls.
    /// Returns 0 once the envelope is exhausted.
    pub fn level(&mut self, time: f64) -> f64 {
        if self.done {
            return 0.0;
        }
        if self.release_pending && self.phase > 0 && time >= self.release_at {
            self.release_pending = false;
            self.enter_release();
        }

        let mut steps = 0usize;
        loop {
            let dt = time - self.step_at;
            let mut should_step = dt >= self.current.next_time;
            if steps > MAX_STEPS_PER_QUERY {
                // Zero-duration phase refusing to finish: force it closed so
                // time always advances.
                self.current.finished = true;
                should_step = true;
            }
            if should_step && self.current.finished {
                self.phase += 1;
            }
            // Coming out of release the phase wraps to 0, which doubles as
            // the exhausted marker.
            if (self.phase == 0 && should_step && self.current.finished)
                || self.phase >= self.phases.len() as i32
            {
                self.done = true;
                return 0.0;
            }
            let phase_fn = if self.phase == RELEASE_PHASE {
                match self.release.as_ref() {
                    Some(f) => f,
                    None => {
                        self.done = true;
                        return 0.0;
                    }
                }
            } else {
                &self.phases[self.phase as usize]
            };
            if should_step {
                self.step_at += self.current.next_time;
                self.step_level = self.current.next_level;
                self.current = phase_fn(self.step_level, self.current.carry);
                steps += 1;
                continue;
            }
            let t = if self.current.next_time > 0.0 {
                dt / self.current.next_time
            } else {
                1.0
            };
            self.last_level =
                self.step_level + (self.current.next_level - self.step_level) * t.clamp(0.0, 1.0);
            return self.last_level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_phase(target: f64, step: f64, dt: f64) -> PhaseFn {
        Box::new(move |last, carry| {
            let next = (last + step).min(target);
            EnvelopeStep {
                next_level: next,
                next_time: dt,
                finished: next >= target,
                carry,
            }
        })
    }

    fn hold_phase(duration: f64) -> PhaseFn {
        Box::new(move |last, carry| EnvelopeStep {
            next_level: last,
            next_time: duration,
            finished: true,
            carry,
        })
    }

    fn fade_phase(step: f64, dt: f64) -> PhaseFn {
        Box::new(move |last, carry| {
            let next = (last - step).max(0.0);
            EnvelopeStep {
                next_level: next,
                next_time: dt,
                finished: next <= 0.0,
                carry,
            }
        })
    }

    #[test]
    fn test_phases_advance_in_order() {
        let mut env = DiscreteEnvelope::new(0.0, 0.0);
        env.add_phase(ramp_phase(1.0, 0.5, 0.1)); // reaches 1.0 at t=0.2
        env.add_phase(hold_phase(0.3));
        env.add_phase(Box::new(|last, carry| EnvelopeStep {
            next_level: last,
            next_time: f64::INFINITY,
            finished: false,
            carry,
        }));
        assert_relative_eq!(env.level(0.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(env.level(0.05), 0.25, epsilon = 1e-9);
        assert_relative_eq!(env.level(0.2), 1.0, epsilon = 1e-9);
        // Held through the hold phase and the sustain.
        assert_relative_eq!(env.level(0.4), 1.0, epsilon = 1e-9);
        assert_relative_eq!(env.level(10.0), 1.0, epsilon = 1e-9);
        assert!(env.is_active());
    }

    #[test]
    fn test_release_interrupts_sustain() {
        let mut env = DiscreteEnvelope::new(1.0, 0.0);
        env.add_phase(hold_phase(0.1));
        env.add_phase(Box::new(|last, carry| EnvelopeStep {
            next_level: last,
            next_time: f64::INFINITY,
            finished: false,
            carry,
        }));
        env.set_release_phase(fade_phase(0.5, 0.1));
        assert!(env.level(0.2) > 0.9);
        env.trigger_release(0.3);
        // Fades over 0.2 seconds from the release point.
        assert!(env.level(0.4) < 0.6);
        let _ = env.level(0.55);
        let end = env.level(0.6);
        assert_relative_eq!(end, 0.0, epsilon = 1e-9);
        assert!(!env.is_active());
    }

    #[test]
    fn test_missing_phase_deactivates() {
        let mut env = DiscreteEnvelope::new(1.0, 0.0);
        env.add_phase(hold_phase(0.1));
        // No sustain; after the hold the phase list is exhausted.
        assert!(env.level(0.05) > 0.0);
        assert_eq!(env.level(0.5), 0.0);
        assert!(!env.is_active());
    }

    #[test]
    fn test_zero_duration_phase_makes_progress() {
        let mut env = DiscreteEnvelope::new(0.0, 0.0);
        // Pathological phase: zero dt, never finishes.
        env.add_phase(Box::new(|_, carry| EnvelopeStep {
            next_level: 0.5,
            next_time: 0.0,
            finished: false,
            carry,
        }));
        // Must terminate rather than loop forever.
        let _ = env.level(0.1);
        let _ = env.level(0.2);
    }
}
