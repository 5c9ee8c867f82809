//! Trendline fitting.
//!
//! A resistance line lies on or above every point of the window and touches
//! it at a pivot; a support line lies on or below. Among such lines through
//! the pivot, the fitter looks for the slope that minimises the squared
//! distance to the window.
//!
//! Fitting is pure: the same window always yields the same coefficients.

use thiserror::Error;

use crate::domain::Trendline;

/// Allowed violation of the on-or-above (on-or-below) constraint.
const FEASIBILITY_TOLERANCE: f64 = 1e-5;
const INITIAL_STEP: f64 = 1.0;
const MIN_STEP: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrendlineError {
    #[error("trendline window needs at least 2 points, got {len}")]
    WindowTooShort { len: usize },
    #[error("trendline window contains a non-finite value at offset {offset}")]
    NonFinite { offset: usize },
}

/// Which side of the data a line bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSide {
    Support,
    Resistance,
}

/// Fits a bounding line to a window of (log) prices.
///
/// Coefficients are expressed with `x = 0` at the first point of the window,
/// so the line's value one step past the window is `intercept + len * slope`.
pub trait TrendlineFitter: Send + Sync {
    fn fit_resistance(&self, window: &[f64]) -> Result<Trendline, TrendlineError>;

    fn fit_support(&self, window: &[f64]) -> Result<Trendline, TrendlineError>;
}

/// Pivot-anchored slope search seeded from an ordinary least-squares fit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PivotTrendlineFitter;

impl TrendlineFitter for PivotTrendlineFitter {
    fn fit_resistance(&self, window: &[f64]) -> Result<Trendline, TrendlineError> {
        fit_bounding_line(window, LineSide::Resistance)
    }

    fn fit_support(&self, window: &[f64]) -> Result<Trendline, TrendlineError> {
        fit_bounding_line(window, LineSide::Support)
    }
}

/// Least-squares line through `(0..len, y)`.
pub fn ols(y: &[f64]) -> Trendline {
    let n = y.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &v) in y.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (v - mean_y);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    Trendline::new(slope, mean_y - slope * mean_x)
}

pub fn fit_bounding_line(window: &[f64], side: LineSide) -> Result<Trendline, TrendlineError> {
    if window.len() < 2 {
        return Err(TrendlineError::WindowTooShort { len: window.len() });
    }
    if let Some(offset) = window.iter().position(|v| !v.is_finite()) {
        return Err(TrendlineError::NonFinite { offset });
    }

    let base = ols(window);
    let residual = |i: usize| window[i] - base.value_at(i as f64);
    let pick_pivot = |better: fn(f64, f64) -> bool| {
        (1..window.len()).fold(0, |best, i| if better(residual(i), residual(best)) { i } else { best })
    };
    let pivot = match side {
        LineSide::Resistance => pick_pivot(|a, b| a > b),
        LineSide::Support => pick_pivot(|a, b| a < b),
    };

    let slope = optimize_slope(window, pivot, base.slope, side);
    Ok(line_through(window, pivot, slope))
}

fn line_through(y: &[f64], pivot: usize, slope: f64) -> Trendline {
    Trendline::new(slope, y[pivot] - slope * pivot as f64)
}

/// Squared error of the line through `pivot` with `slope`, or `None` when the
/// line crosses the data on the wrong side.
fn line_error(y: &[f64], pivot: usize, slope: f64, side: LineSide) -> Option<f64> {
    let line = line_through(y, pivot, slope);
    let mut err = 0.0;
    for (i, &v) in y.iter().enumerate() {
        let diff = line.value_at(i as f64) - v;
        let violated = match side {
            LineSide::Resistance => diff < -FEASIBILITY_TOLERANCE,
            LineSide::Support => diff > FEASIBILITY_TOLERANCE,
        };
        if violated {
            return None;
        }
        err += diff * diff;
    }
    Some(err)
}

fn optimize_slope(y: &[f64], pivot: usize, initial: f64, side: LineSide) -> f64 {
    let (max, min) = y
        .iter()
        .fold((f64::MIN, f64::MAX), |(hi, lo), &v| (hi.max(v), lo.min(v)));
    let unit = (max - min) / y.len() as f64;

    let mut best_slope = initial;
    let Some(mut best_err) = line_error(y, pivot, initial, side) else {
        return initial;
    };

    let mut step = INITIAL_STEP;
    let mut derivative: Option<f64> = None;
    while step > MIN_STEP {
        let d = match derivative {
            Some(d) => d,
            None => {
                // Probe a tiny move up; if that breaks feasibility probe down.
                let probed = line_error(y, pivot, best_slope + unit * MIN_STEP, side)
                    .map(|e| e - best_err)
                    .or_else(|| {
                        line_error(y, pivot, best_slope - unit * MIN_STEP, side).map(|e| best_err - e)
                    });
                match probed {
                    Some(d) => {
                        derivative = Some(d);
                        d
                    }
                    // Neither direction is feasible: the current line is final.
                    None => return best_slope,
                }
            }
        };

        let candidate = if d > 0.0 {
            best_slope - unit * step
        } else {
            best_slope + unit * step
        };
        match line_error(y, pivot, candidate, side) {
            Some(err) if err < best_err => {
                best_err = err;
                best_slope = candidate;
                derivative = None;
            }
            _ => step *= 0.5,
        }
    }
    best_slope
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounds(window: &[f64], line: Trendline, side: LineSide) {
        for (i, &v) in window.iter().enumerate() {
            let diff = line.value_at(i as f64) - v;
            match side {
                LineSide::Resistance => assert!(diff >= -FEASIBILITY_TOLERANCE, "point {i} above line"),
                LineSide::Support => assert!(diff <= FEASIBILITY_TOLERANCE, "point {i} below line"),
            }
        }
    }

    #[test]
    fn ols_recovers_exact_line() {
        let y: Vec<f64> = (0..10).map(|i| 2.0 + 0.5 * i as f64).collect();
        let line = ols(&y);
        assert!((line.slope - 0.5).abs() < 1e-12);
        assert!((line.intercept - 2.0).abs() < 1e-12);
    }

    #[test]
    fn straight_line_is_its_own_resistance() {
        let y: Vec<f64> = (0..20).map(|i| 1.0 + 0.01 * i as f64).collect();
        let line = PivotTrendlineFitter.fit_resistance(&y).unwrap();
        assert!((line.slope - 0.01).abs() < 1e-6);
        assert!((line.value_at(20.0) - 1.2).abs() < 1e-4);
    }

    #[test]
    fn resistance_stays_above_noisy_window() {
        let y: Vec<f64> = (0..50)
            .map(|i| 4.6 + 0.002 * i as f64 + 0.01 * ((i * 7 % 11) as f64 / 11.0 - 0.5))
            .collect();
        let line = PivotTrendlineFitter.fit_resistance(&y).unwrap();
        assert_bounds(&y, line, LineSide::Resistance);
    }

    #[test]
    fn support_stays_below_noisy_window() {
        let y: Vec<f64> = (0..50)
            .map(|i| 4.6 - 0.001 * i as f64 + 0.02 * ((i as f64) * 0.7).sin())
            .collect();
        let line = PivotTrendlineFitter.fit_support(&y).unwrap();
        assert_bounds(&y, line, LineSide::Support);
    }

    #[test]
    fn flat_window_is_flat_line() {
        let y = vec![3.0; 12];
        let line = PivotTrendlineFitter.fit_resistance(&y).unwrap();
        assert!(line.slope.abs() < 1e-12);
        assert!((line.intercept - 3.0).abs() < 1e-12);
    }

    #[test]
    fn resistance_no_worse_than_ols_shifted() {
        let y: Vec<f64> = (0..30).map(|i| ((i as f64) * 0.9).cos() * 0.05 + 0.001 * i as f64).collect();
        let fitted = PivotTrendlineFitter.fit_resistance(&y).unwrap();
        let base = ols(&y);
        let pivot = (0..y.len())
            .max_by(|&a, &b| {
                let ra = y[a] - base.value_at(a as f64);
                let rb = y[b] - base.value_at(b as f64);
                ra.total_cmp(&rb)
            })
            .unwrap();
        let start = line_error(&y, pivot, base.slope, LineSide::Resistance).unwrap();
        let end = line_error(&y, pivot, fitted.slope, LineSide::Resistance).unwrap();
        assert!(end <= start + 1e-12);
    }

    #[test]
    fn short_window_is_an_error() {
        assert_eq!(
            PivotTrendlineFitter.fit_resistance(&[1.0]),
            Err(TrendlineError::WindowTooShort { len: 1 })
        );
    }

    #[test]
    fn non_finite_is_an_error() {
        assert_eq!(
            PivotTrendlineFitter.fit_support(&[1.0, f64::NAN, 2.0]),
            Err(TrendlineError::NonFinite { offset: 1 })
        );
    }
}
