#![cfg_attr(not(test), no_std)]
//! Synchronization core of a GPS disciplined E1 trunk interface.
//!
//! The VCXO that clocks the board is steered so that the PPS input of a GPS receiver is captured
//! exactly [hardware::design_parameters::NOMINAL_INTERVAL] ticks apart. The E1 serial interface
//! is clocked from the same VCXO, and its frame phase is nudged until the received double-frames
//! carry the G.704 alignment pattern.

pub mod alignment;
pub mod hardware;
pub mod ring;
pub mod settings;
pub mod statistics;
pub mod steering;
pub mod system;
pub mod telemetry;

pub use g704;
