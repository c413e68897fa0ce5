//! Push-to-talk voice conversation client core.
//!
//! A session is bootstrapped once (security check, microphone probe,
//! stage creation, persona selection, welcome clip); after that the
//! orchestrator runs one record → upload → poll → play → remove turn per
//! press of the talk control.

pub mod audio;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod input;
pub mod ipc;
pub mod logger;
pub mod model;
pub mod orchestrator;
pub mod presenter;
pub mod service;
pub mod session;

#[cfg(test)]
mod testing;
