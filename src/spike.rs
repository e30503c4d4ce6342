// POWERTIDE SPIKE BURST TRACKER
// A BURST IS A RUN OF BACK-TO-BACK SPIKE SAMPLES:
//
//      ...||..||||...|...|||.....
//
// THREE BURSTS ABOVE (2, 4 AND 3 SPIKES), THE LONE SPIKE IS NOT ONE.
// BURST COUNT AND SPIKE INTENSITY SEPARATE RANDOM NOISE (NO PERFORMANCE
// NEEDED) FROM A BURSTY WORKLOAD (NEEDS PERFORMANCE).
//
//   SPIKE RATE     = TOTAL_SPIKE_TIME * 100 / MAX_TRACKED_SPIKE_TIME
//   RESET WINDOW   = HOW LONG ONE "MINUTE" OF BURST HISTORY LASTS.
//                    STRONGER BURSTS ARE REMEMBERED LONGER.

use log::debug;

use crate::clock::{Clock, MonotonicClock};
use crate::platform::BurstContext;

pub const MAX_TRACKED_SPIKE_TIME: u32 = 1000;
pub const MAX_BURST_COUNT: u32 = 1000;
pub const BURST_COUNT_THRESHOLD: u32 = 3;
pub const INITIAL_RESET_WINDOW_MIN: f32 = 90.0;

// SHORTEN THE WINDOW BY 50% AT AVG RATE 0, NO CHANGE AT AVG RATE 100
fn spike_time_bias(avg_rate: u32, window: f32) -> f32 {
    (100 - avg_rate.min(100)) as f32 * window / 200.0
}

pub struct SpikeBurstTracker {
    clock: Box<dyn Clock>,
    total_spike_time: u32,
    burst_count: u32,
    burst_rate_per_min: u32,
    reset_window_min: f32,
    burst_flag: bool,
    once_flag: bool,
    spike_rate_sum: u32,
    spike_rate_samples: u32,
    last_event_s: Option<u64>,
    strike_count: u32,
}

impl Default for SpikeBurstTracker {
    fn default() -> Self {
        Self::new(Box::new(MonotonicClock))
    }
}

impl SpikeBurstTracker {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            total_spike_time: 0,
            burst_count: 0,
            burst_rate_per_min: 0,
            reset_window_min: INITIAL_RESET_WINDOW_MIN,
            burst_flag: false,
            once_flag: false,
            spike_rate_sum: 0,
            spike_rate_samples: 0,
            last_event_s: None,
            strike_count: 0,
        }
    }

    pub fn total_spike_time(&self) -> u32 {
        self.total_spike_time
    }

    pub fn burst_count(&self) -> u32 {
        self.burst_count
    }

    pub fn burst_rate_per_min(&self) -> u32 {
        self.burst_rate_per_min
    }

    pub fn reset_window_min(&self) -> f32 {
        self.reset_window_min
    }

    pub fn in_burst(&self) -> bool {
        self.burst_flag
    }

    // SPIKE TIME AS A PERCENTAGE OF THE TRACKED MAXIMUM, CAPPED AT 100
    pub fn spike_rate(&self) -> u32 {
        (self.total_spike_time * 100 / MAX_TRACKED_SPIKE_TIME).min(100)
    }

    fn fold_spike_rate(&mut self, rate: u32) {
        self.spike_rate_sum += rate;
        self.spike_rate_samples += 1;
    }

    fn clear_spike_rate_avg(&mut self) {
        self.spike_rate_sum = 0;
        self.spike_rate_samples = 0;
    }

    pub fn add_spike_time(&mut self, duration: u32, ctx: &dyn BurstContext) {
        self.total_spike_time = self.total_spike_time
            .saturating_add(duration)
            .min(MAX_TRACKED_SPIKE_TIME);

        if !self.burst_flag {
            // RISING EDGE
            self.burst_flag = true;
        } else if ctx.should_demote() && !self.once_flag {
            self.register_burst_occurrence(true, ctx);
            self.once_flag = true;
        }

        let rate = self.spike_rate();
        self.fold_spike_rate(rate);
    }

    pub fn add_non_spike_time(&mut self, duration: u32, ctx: &dyn BurstContext) {
        self.total_spike_time = self.total_spike_time.saturating_sub(duration);

        if self.spike_rate() == 0 && self.burst_flag {
            // FALLING EDGE
            self.burst_flag = false;
            let avg = if self.spike_rate_samples > 0 {
                self.spike_rate_sum / self.spike_rate_samples
            } else {
                0
            };

            if !self.once_flag {
                self.register_burst_occurrence(true, ctx);
            }

            self.reset_window_min = 60.0 - spike_time_bias(avg, self.reset_window_min).trunc();
            debug!("burst ended: avg spike rate {}%, reset window {:.0}", avg, self.reset_window_min);
            self.clear_spike_rate_avg();
            self.once_flag = false;
        } else {
            self.register_burst_occurrence(false, ctx);
            self.once_flag = false;
        }
    }

    // BURST COUNT OVER THE RECENT PAST. is_real: A BURST ACTUALLY HAPPENED,
    // OTHERWISE JUST A DECAY REFRESH. RETURNS THE BURST RATE PER MINUTE.
    pub fn register_burst_occurrence(&mut self, is_real: bool, ctx: &dyn BurstContext) -> u32 {
        let now = self.clock.now_secs();
        let Some(anchor) = self.last_event_s else {
            self.last_event_s = Some(now);
            return self.burst_rate_per_min;
        };

        let minutes = now.saturating_sub(anchor) as f32 / self.reset_window_min;

        if is_real && ctx.mode_counts_bursts() {
            self.burst_count = (self.burst_count + 1).min(MAX_BURST_COUNT);
            self.last_event_s = Some(now);
        } else if minutes > 1.0 || self.burst_count >= MAX_BURST_COUNT {
            self.burst_count = 0;
            self.last_event_s = Some(now);
        }

        self.burst_rate_per_min = if minutes < 1.0 {
            self.burst_count
        } else {
            (self.burst_count as f32 / minutes) as u32
        };

        self.burst_rate_per_min
    }

    // DOES A RECLASSIFICATION DESERVE AN IMMEDIATE PERFORMANCE RESPONSE?
    pub fn fresh_burst_response(&self, initial_burst_rate: u32) -> bool {
        if initial_burst_rate == 0 {
            return false;
        }
        initial_burst_rate >= BURST_COUNT_THRESHOLD
            || self.burst_rate_per_min > initial_burst_rate
    }

    pub fn burst_rate_breach(&self) -> bool {
        self.burst_rate_per_min >= BURST_COUNT_THRESHOLD
    }

    // N CONSECUTIVE CONFIRMATIONS: SEED AT n, COUNT DOWN, FLOOR AT 0
    pub fn strikeout_once(&mut self, n: u32) -> u32 {
        if self.strike_count == 0 {
            self.strike_count = n;
        } else {
            self.strike_count -= 1;
        }
        self.strike_count
    }
}
