//! # EPS Interface Application
//!
//! Command and telemetry front end for a spacecraft Electrical Power System
//! board. Ground commands and housekeeping requests arrive on a software bus,
//! are validated and dispatched one at a time, drive the board through a
//! framed serial protocol, and produce housekeeping and device-data
//! telemetry.
//!
//! ## Quick Start
//!
//! ```rust
//! use eps_app::bus::LocalBus;
//! use eps_app::config::AppConfig;
//! use eps_app::device::{SerialGateway, SimulatedEps};
//! use eps_app::events::EventLog;
//! use eps_app::protocol::Message;
//! use eps_app::EpsApp;
//!
//! let config = AppConfig::default();
//! let gateway = SerialGateway::new(SimulatedEps::new(), config.device.clone());
//! let mut app = EpsApp::new(config, gateway, LocalBus::new(), EventLog::new());
//! app.init().unwrap();
//!
//! // Enable the board, then ask for housekeeping
//! let ids = app.config().message_ids;
//! app.bus_mut().send(Message::new(ids.cmd, 2)).unwrap();
//! app.bus_mut().send(Message::new(ids.req_hk, 0)).unwrap();
//! app.run_once().unwrap();
//! app.run_once().unwrap();
//!
//! let hk = app.bus().published()[0].housekeeping().copied().unwrap();
//! assert_eq!(hk.command_count, 2);
//! assert!(hk.device_enabled.is_enabled());
//! ```
//!
//! ## Architecture
//!
//! - [`app`] - Driver loop and public entry point
//! - [`dispatcher`] - Routing, command execution and the device state machine
//! - [`validator`] - Message length checks and argument decoding
//! - [`telemetry`] - Housekeeping and device-data packet assembly
//! - [`device`] - Board gateway, frame codec and simulated board
//! - [`bus`] - Software bus seam with in-process and channel-backed buses
//! - [`events`] - Event ids, sink trait and bounded history
//! - [`executive`] - Run-loop lifecycle control
//! - [`protocol`] - Message model, command codes and telemetry records
//! - [`config`] - Application configuration

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod bus;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executive;
pub mod protocol;
pub mod state;
pub mod telemetry;
pub mod validator;

// Re-export main public types for convenience
pub use app::EpsApp;
pub use config::AppConfig;
pub use dispatcher::{Action, CommandDispatcher};
pub use error::{AppError, CommandError};
pub use protocol::{Message, OutboundPacket};
pub use state::{ApplicationState, Counters};
