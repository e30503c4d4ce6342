// POWERTIDE -- UTILIZATION-DRIVEN POWER-MODE CONTROL
// DECISION CORE: SAMPLE CPU/SYSTEM/GRAPHICS BUSY, PICK A POLICY STATE OR
// TOGGLE LOW-POWER MODE, AND RETURN THE NEXT POLL INTERVAL.
// HARDWARE ACCESS LIVES BEHIND THE TRAITS IN platform.

pub mod basis;
pub mod clock;
pub mod cpumask;
pub mod engine;
pub mod event;
pub mod gfx;
pub mod hysteresis;
pub mod matcher;
pub mod platform;
pub mod sampler;
pub mod spike;
pub mod state;
pub mod sysfs;
