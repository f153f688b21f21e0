//! Hardware boundary for the pump
//!
//! The agent only talks to the physical pump through [`HardwareActuator`]:
//! - Motor control (start, stop, pause, resume)
//! - Sensor reads (line pressure, fluid temperature, battery level)
//!
//! Every operation is fallible. Callers commit a state transition only after
//! the matching actuator call succeeded.

mod simulated;

pub use simulated::{ActuatorCall, SimulatedPump};

use crate::commands::InfusionPlan;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorOp {
    Start,
    Stop,
    Pause,
    Resume,
}

impl fmt::Display for ActuatorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActuatorOp::Start => "start",
            ActuatorOp::Stop => "stop",
            ActuatorOp::Pause => "pause",
            ActuatorOp::Resume => "resume",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    Pressure,
    Temperature,
    Battery,
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sensor::Pressure => "pressure",
            Sensor::Temperature => "temperature",
            Sensor::Battery => "battery",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareError {
    #[error("actuator {operation} failed: {reason}")]
    Actuator { operation: ActuatorOp, reason: String },
    #[error("{sensor} sensor unavailable: {reason}")]
    Sensor { sensor: Sensor, reason: String },
}

pub trait HardwareActuator {
    fn start(&mut self, plan: &InfusionPlan) -> Result<(), HardwareError>;
    fn stop(&mut self) -> Result<(), HardwareError>;
    fn pause(&mut self) -> Result<(), HardwareError>;
    fn resume(&mut self) -> Result<(), HardwareError>;

    fn read_pressure(&mut self) -> Result<f64, HardwareError>;
    fn read_temperature(&mut self) -> Result<f64, HardwareError>;
    /// Remaining charge, percent.
    fn read_battery(&mut self) -> Result<f64, HardwareError>;
}

/// One telemetry cycle's worth of sensor data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReadings {
    pub pressure: Option<f64>,
    pub temperature: Option<f64>,
    pub battery_pct: Option<f64>,
}

impl SensorReadings {
    /// Read every sensor. Failed reads leave the field empty and are
    /// returned alongside so the caller can report them.
    pub fn collect<H: HardwareActuator + ?Sized>(hardware: &mut H) -> (Self, Vec<HardwareError>) {
        let mut faults = Vec::new();
        let mut keep = |read: Result<f64, HardwareError>| match read {
            Ok(value) => Some(value),
            Err(e) => {
                faults.push(e);
                None
            }
        };

        let pressure = keep(hardware.read_pressure());
        let temperature = keep(hardware.read_temperature());
        let battery_pct = keep(hardware.read_battery());

        (
            SensorReadings {
                pressure,
                temperature,
                battery_pct,
            },
            faults,
        )
    }
}
