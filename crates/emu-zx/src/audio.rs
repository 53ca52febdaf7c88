//! Audio mixer: beeper edges + AY + tape EAR → mono i16 samples.
//!
//! The beeper is an edge-timestamped queue: the bus records the clock
//! T-state of every speaker-bit toggle, and between edges the level is
//! constant. At each sample boundary the mixer consumes due edges, reads
//! the tape EAR level at that exact clock, steps the AY to its chip-tick
//! position (one tick per 16 T-states), and pushes the clamped sum into
//! a queue shared with the host audio callback.
//!
//! Sample spacing uses integer Bresenham stepping (3,500,000 T-states per
//! 44,100 samples), so the pipeline stays free of floating point. When the
//! host falls behind, the oldest samples are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use gi_ay_3_8912::Ay3_8912;

use crate::tape::TapeDeck;

/// Output sample rate.
pub const SAMPLE_RATE: u32 = 44_100;

/// CPU T-states per second.
const CPU_FREQUENCY: u64 = 3_500_000;

/// Whole T-states per sample, and the Bresenham remainder per sample.
const TSTATES_PER_SAMPLE: u64 = CPU_FREQUENCY / SAMPLE_RATE as u64;
const SAMPLE_REMAINDER: u64 = CPU_FREQUENCY % SAMPLE_RATE as u64;

/// T-states per AY chip tick.
const AY_DIVIDER: u64 = 16;

/// Beeper output levels.
const BEEPER_HIGH: i32 = 8000;
const BEEPER_LOW: i32 = -8000;

/// Tape EAR mix level.
const TAPE_LEVEL: i32 = 2000;

/// Maximum buffered samples (≈0.37 s) before the oldest are dropped.
const QUEUE_CAP: usize = 16_384;

/// The shared sample queue pulled by the host audio callback.
pub type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

/// Mixer for the three audio sources.
pub struct AudioMixer {
    queue: SampleQueue,
    /// Pending beeper edges: (clock, level after the toggle).
    edges: VecDeque<(u64, bool)>,
    beeper_level: bool,
    /// Clock of the next sample boundary.
    next_sample: u64,
    /// Bresenham error accumulator.
    remainder: u64,
    /// Chip ticks issued to the AY so far.
    ay_ticks: u64,
}

impl AudioMixer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(QUEUE_CAP))),
            edges: VecDeque::new(),
            beeper_level: false,
            next_sample: 0,
            remainder: 0,
            ay_ticks: 0,
        }
    }

    /// A handle to the sample queue for the audio callback thread.
    #[must_use]
    pub fn queue_handle(&self) -> SampleQueue {
        Arc::clone(&self.queue)
    }

    /// Record a speaker-bit toggle at the given clock.
    pub fn push_beeper_edge(&mut self, clock: u64, level: bool) {
        self.edges.push_back((clock, level));
    }

    /// Current beeper level as seen by the mixer.
    #[must_use]
    pub fn beeper_level(&self) -> bool {
        self.beeper_level
    }

    /// Emit every sample whose boundary has passed.
    pub fn catch_up(&mut self, now: u64, mut ay: Option<&mut Ay3_8912>, tape: &mut TapeDeck) {
        while self.next_sample <= now {
            let t = self.next_sample;

            // AY chip ticks due by this sample
            if let Some(ay) = ay.as_deref_mut() {
                let target = t / AY_DIVIDER;
                while self.ay_ticks < target {
                    ay.tick();
                    self.ay_ticks += 1;
                }
            }

            // Beeper edges due by this sample
            while let Some(&(edge_clock, level)) = self.edges.front() {
                if edge_clock > t {
                    break;
                }
                self.beeper_level = level;
                self.edges.pop_front();
            }

            let mut sum: i32 = if self.beeper_level {
                BEEPER_HIGH
            } else {
                BEEPER_LOW
            };
            if tape.is_playing() {
                sum += if tape.ear_level_at(t) {
                    TAPE_LEVEL
                } else {
                    -TAPE_LEVEL
                };
            }
            if let Some(ay) = ay.as_deref_mut() {
                sum += i32::from(ay.output_level());
            }

            let sample = sum.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
            self.push_sample(sample);

            // Next boundary via integer Bresenham
            self.next_sample += TSTATES_PER_SAMPLE;
            self.remainder += SAMPLE_REMAINDER;
            if self.remainder >= u64::from(SAMPLE_RATE) {
                self.remainder -= u64::from(SAMPLE_RATE);
                self.next_sample += 1;
            }
        }
    }

    /// Shift all scheduled times down at a frame boundary.
    pub fn rebase(&mut self, frame_len: u64) {
        self.next_sample = self.next_sample.saturating_sub(frame_len);
        self.ay_ticks = self.ay_ticks.saturating_sub(frame_len / AY_DIVIDER);
        for edge in &mut self.edges {
            edge.0 = edge.0.saturating_sub(frame_len);
        }
    }

    fn push_sample(&mut self, sample: i16) {
        let Ok(mut queue) = self.queue.lock() else {
            return;
        };
        while queue.len() >= QUEUE_CAP {
            queue.pop_front();
        }
        queue.push_back(sample);
    }

    /// Drain up to `max` samples (headless/test consumption).
    #[must_use]
    pub fn drain(&mut self, max: usize) -> Vec<i16> {
        let Ok(mut queue) = self.queue.lock() else {
            return Vec::new();
        };
        let take = queue.len().min(max);
        queue.drain(..take).collect()
    }

    /// Samples currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}
