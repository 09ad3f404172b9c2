//! Turning decoded readings into published weights.
//!
//! [`normalizer`] converts a [`DecodedReading`](crate::core::DecodedReading)
//! into a signed `f64`; [`change_filter`] decides whether that value is
//! different enough from the last one to be worth emitting.

pub mod change_filter;
pub mod normalizer;

pub use change_filter::ChangeFilter;
pub use normalizer::{infer_decimal_places, normalize};
