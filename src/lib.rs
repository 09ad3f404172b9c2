//! Core library for the scale_reader application.
//!
//! Reads weight values from mechanical weighing scales over a serial line.
//! Raw bytes are reassembled into frames, decoded according to the framing
//! convention of the scale firmware, normalized to a decimal weight and
//! published only when the value actually changes.
//!
//! The [`app_actor::ScaleManager`] is the control surface: it starts and
//! stops sessions, runs the diagnostic command sequence and hands out
//! subscriptions to [`core::WeightEvent`]s. Everything below it is usable on
//! its own, e.g. [`pipeline::DecodePipeline`] for decoding captured bytes.

pub mod adapters;
pub mod app_actor;
pub mod config;
pub mod core;
pub mod error;
pub mod framing;
pub mod logging;
pub mod measurement;
pub mod messages;
pub mod pipeline;
pub mod session;
