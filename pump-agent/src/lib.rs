//! Pump Agent - networked control agent for an infusion pump
//!
//! The agent sits between the MQTT broker and the pump hardware:
//! - Decodes START/STOP/PAUSE/RESUME_INFUSION commands and drives the pump state machine
//! - Publishes a correlated response for every command it acts on
//! - Emits telemetry on a fixed cadence and stops the pump once the target volume is reached
//! - Sends a heartbeat status and re-announces itself as `healthy` after every (re)connection
//!
//! Everything below [`agent::Agent`] is synchronous and driven by an injectable
//! [`clock::Clock`], so the whole state machine can be exercised without a broker.

pub mod agent;
pub mod clock;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod hardware;
pub mod mqtt;
pub mod processor;
pub mod reports;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod telemetry;
pub mod topics;

pub use agent::{Agent, AgentEvent, Gateway};
pub use clock::{Clock, ManualClock, Moment, TokioClock};
pub use commands::{Command, CommandAction, CommandKind, InfusionPlan, StopRequest};
pub use config::AgentConfig;
pub use hardware::{HardwareActuator, SimulatedPump};
pub use reports::Report;
pub use state::{Priority, PumpState, PumpStatus};
pub use topics::{Channel, DeviceTopics};
