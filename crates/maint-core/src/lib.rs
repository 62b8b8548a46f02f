pub mod action;
pub mod api;
pub mod clock;
pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod poller;
pub mod scripts;
pub mod session;
pub mod severity;
pub mod target;
pub mod types;

pub use error::{MaintError, Result};
