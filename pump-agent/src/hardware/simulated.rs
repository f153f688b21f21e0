//! In-memory pump used by the binary when no driver is wired in, and by tests.
//!
//! Records recent actuator calls and supports one-shot actuator faults and
//! sticky sensor faults.

use super::{ActuatorOp, HardwareActuator, HardwareError, Sensor};
use crate::commands::InfusionPlan;
use std::collections::HashMap;
use tracing::debug;

/// Actuator calls kept in the log; the oldest half is dropped once full.
pub const CALL_LOG_LIMIT: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Start { flow_rate: f64 },
    Stop,
    Pause,
    Resume,
}

#[derive(Debug, Clone)]
pub struct SimulatedPump {
    calls: Vec<ActuatorCall>,
    motor_on: bool,
    pending_faults: HashMap<ActuatorOp, String>,
    sensor_faults: HashMap<Sensor, String>,
    pressure: f64,
    temperature: f64,
    battery_pct: f64,
}

impl SimulatedPump {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            motor_on: false,
            pending_faults: HashMap::new(),
            sensor_faults: HashMap::new(),
            pressure: 0.0,
            temperature: 25.0,
            battery_pct: 85.0,
        }
    }

    pub fn calls(&self) -> &[ActuatorCall] {
        &self.calls
    }

    pub fn last_call(&self) -> Option<&ActuatorCall> {
        self.calls.last()
    }

    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    /// Make the next `operation` call fail once.
    pub fn fail_next(&mut self, operation: ActuatorOp, reason: impl Into<String>) {
        self.pending_faults.insert(operation, reason.into());
    }

    /// Make every read of `sensor` fail until [`Self::clear_sensor_fault`].
    pub fn fail_sensor(&mut self, sensor: Sensor, reason: impl Into<String>) {
        self.sensor_faults.insert(sensor, reason.into());
    }

    pub fn clear_sensor_fault(&mut self, sensor: Sensor) {
        self.sensor_faults.remove(&sensor);
    }

    pub fn set_readings(&mut self, pressure: f64, temperature: f64, battery_pct: f64) {
        self.pressure = pressure;
        self.temperature = temperature;
        self.battery_pct = battery_pct;
    }

    fn actuate(&mut self, operation: ActuatorOp, call: ActuatorCall, motor_on: bool) -> Result<(), HardwareError> {
        if let Some(reason) = self.pending_faults.remove(&operation) {
            return Err(HardwareError::Actuator { operation, reason });
        }
        debug!("Simulated pump: {:?}", call);
        if self.calls.len() >= CALL_LOG_LIMIT {
            self.calls.drain(..CALL_LOG_LIMIT / 2);
        }
        self.calls.push(call);
        self.motor_on = motor_on;
        Ok(())
    }

    fn read(&self, sensor: Sensor, value: f64) -> Result<f64, HardwareError> {
        match self.sensor_faults.get(&sensor) {
            Some(reason) => Err(HardwareError::Sensor {
                sensor,
                reason: reason.clone(),
            }),
            None => Ok(value),
        }
    }
}

impl Default for SimulatedPump {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareActuator for SimulatedPump {
    fn start(&mut self, plan: &InfusionPlan) -> Result<(), HardwareError> {
        self.actuate(
            ActuatorOp::Start,
            ActuatorCall::Start {
                flow_rate: plan.flow_rate,
            },
            true,
        )
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.actuate(ActuatorOp::Stop, ActuatorCall::Stop, false)
    }

    fn pause(&mut self) -> Result<(), HardwareError> {
        self.actuate(ActuatorOp::Pause, ActuatorCall::Pause, false)
    }

    fn resume(&mut self) -> Result<(), HardwareError> {
        self.actuate(ActuatorOp::Resume, ActuatorCall::Resume, true)
    }

    fn read_pressure(&mut self) -> Result<f64, HardwareError> {
        self.read(Sensor::Pressure, self.pressure)
    }

    fn read_temperature(&mut self) -> Result<f64, HardwareError> {
        self.read(Sensor::Temperature, self.temperature)
    }

    fn read_battery(&mut self) -> Result<f64, HardwareError> {
        self.read(Sensor::Battery, self.battery_pct)
    }
}
