//! Cyclical calendar encodings.
//!
//! Hour 23 and hour 0 are adjacent on the circle, which a raw integer
//! feature cannot express.

use std::f64::consts::TAU;

use crate::domain::Candle;

/// `(sin, cos)` of the UTC hour on a 24-hour circle.
pub fn hour_encoding(candle: &Candle) -> (f64, f64) {
    let angle = TAU * candle.hour() as f64 / 24.0;
    (angle.sin(), angle.cos())
}

/// `(sin, cos)` of the weekday (Monday = 0) on a 7-day circle.
pub fn day_of_week_encoding(candle: &Candle) -> (f64, f64) {
    let angle = TAU * candle.day_of_week() as f64 / 7.0;
    (angle.sin(), angle.cos())
}
