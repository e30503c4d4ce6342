// POWERTIDE HYSTERESIS GATE
// DECAYED DWELL-TIME AVERAGES DECIDE WHETHER A FRESH IDLE/OVERLOAD
// VERDICT IS ACTED ON. A TRANSITION IS APPROVED ONLY WHEN:
//   a. THE OPPOSING AVERAGE HAS REACHED ITS HYSTERESIS THRESHOLD, AND
//   b. THE CURRENT DWELL HAS REACHED HALF THAT THRESHOLD.
// A REJECTION INFLATES THE OPPOSING AVERAGE BY 6/5 (ANTI-FLAP).
// BOTH THRESHOLDS ZERO: GATE DISABLED, EVERYTHING PASSES.

use log::info;

const DECAY_PERIOD: u64 = 5;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SysStatus {
    Idle,
    Normal,
    Overload,
    Unknown,
}

impl SysStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Normal => "NORMAL",
            Self::Overload => "OVERLOAD",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// ALL VALUES IN MILLISECONDS
#[derive(Clone, Debug, Default)]
pub struct HysteresisGate {
    pub avg_in: u64,
    pub avg_out: u64,
    pub last_in_ms: u64,
    pub last_out_ms: u64,
    pub threshold_in: u64,
    pub threshold_out: u64,
    pub min_in: u64,
    pub min_out: u64,
}

// SATURATING: A LONG RUN OF REJECTIONS PINS THE AVERAGE AT u64::MAX
fn decay(avg: u64, sample: u64) -> u64 {
    (avg.saturating_mul(DECAY_PERIOD - 1) / DECAY_PERIOD).saturating_add(sample / DECAY_PERIOD)
}

fn inflate(avg: u64) -> u64 {
    avg.saturating_mul(DECAY_PERIOD + 1) / DECAY_PERIOD
}

impl HysteresisGate {
    pub fn new(now_ms: u64, threshold_in: u64, threshold_out: u64) -> Self {
        Self {
            avg_in: threshold_in,
            avg_out: threshold_out,
            last_in_ms: now_ms,
            last_out_ms: now_ms,
            threshold_in,
            threshold_out,
            min_in: threshold_in / 2,
            min_out: threshold_out / 2,
        }
    }

    pub fn disabled(&self) -> bool {
        self.threshold_in == 0 && self.threshold_out == 0
    }

    pub fn should_proceed(&mut self, status: SysStatus, now_ms: u64) -> bool {
        if self.disabled() {
            return true;
        }

        match status {
            SysStatus::Idle => {
                let cur_out = now_ms.saturating_sub(self.last_out_ms);
                self.avg_out = decay(self.avg_out, cur_out);
                if self.avg_in >= self.threshold_in && cur_out >= self.min_out {
                    return true;
                }
                info!("IGNORE IDLE: avg_in {}, avg_out {}, cur_out {}",
                      self.avg_in, self.avg_out, cur_out);
                self.avg_in = inflate(self.avg_in);
                false
            }
            SysStatus::Overload => {
                let cur_in = now_ms.saturating_sub(self.last_in_ms);
                self.avg_in = decay(self.avg_in, cur_in);
                if self.avg_out >= self.threshold_out && cur_in >= self.min_in {
                    return true;
                }
                info!("IGNORE OVERLOAD: avg_in {}, avg_out {}, cur_in {}",
                      self.avg_in, self.avg_out, cur_in);
                self.avg_out = inflate(self.avg_out);
                false
            }
            SysStatus::Normal | SysStatus::Unknown => false,
        }
    }

    // LOW-POWER MODE WAS ENTERED
    pub fn mark_entered(&mut self, now_ms: u64) {
        self.last_in_ms = now_ms;
    }

    // LOW-POWER MODE WAS LEFT
    pub fn mark_exited(&mut self, now_ms: u64) {
        self.last_out_ms = now_ms;
    }
}
