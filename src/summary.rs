//! This module is in charge of reporting what an ensemble contains

use crate::{event::Event, numeric::Float};
use std::fmt::{self, Display, Write};

/// Number of significant digits in the report, as with printf's %g
const SIG_DIGITS: usize = 6;

/// Aggregated contents of an ensemble
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnsembleSummary {
    /// Identifier of the ensemble
    pub id: String,

    /// Total number of events
    pub events: usize,

    /// Number of committed events
    pub committed: usize,

    /// Number of events waiting for the next commit
    pub pending: usize,

    /// Total number of particles
    pub particles: usize,

    /// Sum of event weights
    pub sum_of_weights: Float,

    /// Sum of squared event weights
    pub sum_of_squared_weights: Float,

    /// Number of events which have no weight
    pub unweighted: usize,
}
//
impl EnsembleSummary {
    /// Integrate an event into the summary
    pub fn record(&mut self, event: &Event) {
        self.events += 1;
        self.particles += event.len();
        match event.weight() {
            Ok(weight) => {
                self.sum_of_weights += weight;
                self.sum_of_squared_weights += weight * weight;
            }
            Err(_) => self.unweighted += 1,
        }
    }

    /// Mean number of particles per event
    pub fn mean_particles(&self) -> Option<Float> {
        (self.events > 0).then(|| self.particles as Float / self.events as Float)
    }

    /// Effective number of weighted events, (Σw)² / Σw²
    pub fn effective_events(&self) -> Option<Float> {
        (self.sum_of_squared_weights > 0.)
            .then(|| self.sum_of_weights * self.sum_of_weights / self.sum_of_squared_weights)
    }
}

impl Display for EnsembleSummary {
    /// Key-value report that uses fixed-size columns for readability
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, "Ensemble", &self.id)?;
        write_line(f, "Events", self.events)?;
        write_line(f, "... committed", self.committed)?;
        write_line(f, "... pending", self.pending)?;
        write_line(f, "Particles", self.particles)?;
        if let Some(mean) = self.mean_particles() {
            write_line(f, "Particles per event", Engineering(mean))?;
        }
        write_line(f, "Sum of weights", Engineering(self.sum_of_weights))?;
        if let Some(effective) = self.effective_events() {
            write_line(f, "Effective weighted events", Engineering(effective))?;
        }
        write_line(f, "Unweighted events", self.unweighted)
    }
}

/// Write one line of the report
fn write_line(f: &mut fmt::Formatter<'_>, key: &str, value: impl Display) -> fmt::Result {
    writeln!(f, " {:<31}: {}", key, value)
}

/// Floating-point number displayed with `write_engineering`
struct Engineering(Float);

impl Display for Engineering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_engineering(f, self.0, SIG_DIGITS)
    }
}

/// Write a floating-point number using "engineering" notation
///
/// Analogous to the %g format of the C printf function, this method switches
/// between naive and scientific notation for floating-point numbers when the
/// number being printed becomes so small that printing leading zeroes could end
/// up larger than the scientific notation, or so large that we would be forced
/// to print more significant digits than requested.
///
fn write_engineering(writer: &mut impl Write, x: Float, sig_digits: usize) -> fmt::Result {
    let precision = sig_digits - 1;
    if x == 0. || !x.is_finite() {
        // Zero is special because you can't take its log
        return write!(writer, "{}", x);
    }

    // Otherwise, use log to evaluate order of magnitude
    let log_x = x.abs().log10();
    if log_x >= -3. && log_x < (sig_digits as Float) {
        // Rust's precision controls the number of digits after the decimal
        // point, adjust it to get a constant number of significant digits.
        // Numbers smaller than 1 get one extra digit since the leading zero
        // does not count as a significant digit.
        let magnitude = log_x.floor() as isize;
        let decimals = (precision as isize - magnitude).max(0) as usize;

        // People don't normally expect trailing zeros or decimal point in
        // naive notation, but be careful with integer numbers...
        let str_with_zeros = format!("{:.1$}", x, decimals);
        if str_with_zeros.contains('.') {
            write!(
                writer,
                "{}",
                str_with_zeros.trim_end_matches('0').trim_end_matches('.')
            )
        } else {
            write!(writer, "{}", str_with_zeros)
        }
    } else {
        // Print using scientific notation
        write!(writer, "{:.1$e}", x, precision)
    }
}
