//! Flat data records shared between a profile's `ChannelInterface` and the
//! application using this crate. Each record is wrapped in an `Arc<Mutex<_>>`
//! by the caller — fields are plain, not `Option`-heavy wrappers, to keep the
//! lock's critical section a simple field copy (spec Design Note 2).

use serde::{Deserialize, Serialize};

/// Shared state for an ANT+ heart rate monitor channel, master or slave.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateData {
    pub heart_rate: u8,
    /// `1/1024`s event time and event count, when driven by an external
    /// heart-beat source rather than derived from `heart_rate` alone.
    pub heart_rate_event_time: Option<f64>,
    pub heart_rate_event_count: Option<u32>,
}

impl Default for HeartRateData {
    fn default() -> Self {
        Self {
            heart_rate: 0xFF,
            heart_rate_event_time: None,
            heart_rate_event_count: None,
        }
    }
}

/// Shared state for an ANT+ speed-and-cadence sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeedCadenceData {
    pub speed_kmh: f64,
    pub speed_event_time: Option<u32>,
    pub speed_revolution_count: Option<u32>,
    pub cadence_rpm: f64,
    pub cadence_event_time: Option<u32>,
    pub cadence_revolution_count: Option<u32>,
    pub wheel_circumference_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainerTargetMode {
    Resistance,
    Power,
    Simulation,
}

/// Shared state for an ANT+ FE-C fitness-equipment (trainer) channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainerData {
    pub elapsed_time_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub speed_kmh: f64,
    pub wheel_circumference_m: f64,
    pub heart_rate: u8,
    pub power_w: f64,
    pub accumulated_power: Option<u32>,
    pub power_event_count: Option<u32>,
    pub cadence_rpm: f64,
    pub resistance_percent: f64,
    pub maximum_resistance_percent: Option<f64>,
    pub basic_supported: bool,
    pub power_supported: bool,
    pub simulation_supported: bool,
    pub mode: TrainerTargetMode,
    pub target: f64,
}

impl Default for TrainerData {
    fn default() -> Self {
        Self {
            elapsed_time_s: None,
            distance_m: None,
            speed_kmh: 0.0,
            wheel_circumference_m: 2.070,
            heart_rate: 0xFF,
            power_w: 0.0,
            accumulated_power: None,
            power_event_count: None,
            cadence_rpm: 0.0,
            resistance_percent: 0.0,
            maximum_resistance_percent: None,
            basic_supported: true,
            power_supported: true,
            simulation_supported: true,
            mode: TrainerTargetMode::Resistance,
            target: 0.0,
        }
    }
}
