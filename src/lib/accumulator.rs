use crate::parser::Reading;

/// Running consumption totals of a single session.
///
/// Totals only ever grow: a pair of readings contributes when the quantity did
/// not increase and time moved forward. Any other pair (refuel, clock jitter,
/// out-of-order samples) is dropped, but the newest reading always becomes the
/// baseline for the next one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Accumulator {
    previous_reading: Option<Reading>,
    total_consumed: f64,
    total_elapsed_minutes: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FoldOutcome {
    /// First reading of the session, nothing to compare against yet
    Baseline,
    Accumulated { consumed: f64, elapsed_minutes: f64 },
    Discarded { consumed: f64, elapsed_minutes: f64 },
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, reading: Reading) -> FoldOutcome {
        let Some(previous) = self.previous_reading.replace(reading) else {
            return FoldOutcome::Baseline;
        };

        let consumed = previous.quantity_remaining - reading.quantity_remaining;
        let elapsed_minutes = elapsed_minutes(&previous, &reading);

        if consumed >= 0.0 && elapsed_minutes > 0.0 {
            self.total_consumed += consumed;
            self.total_elapsed_minutes += elapsed_minutes;
            FoldOutcome::Accumulated {
                consumed,
                elapsed_minutes,
            }
        } else {
            FoldOutcome::Discarded {
                consumed,
                elapsed_minutes,
            }
        }
    }

    /// Average consumption per minute, zero while no time has been accumulated
    pub fn average(&self) -> f64 {
        if self.total_elapsed_minutes > 0.0 {
            self.total_consumed / self.total_elapsed_minutes
        } else {
            0.0
        }
    }

    pub fn previous_reading(&self) -> Option<&Reading> {
        self.previous_reading.as_ref()
    }

    pub fn total_consumed(&self) -> f64 {
        self.total_consumed
    }

    pub fn total_elapsed_minutes(&self) -> f64 {
        self.total_elapsed_minutes
    }
}

fn elapsed_minutes(previous: &Reading, current: &Reading) -> f64 {
    (current.timestamp - previous.timestamp).num_milliseconds() as f64 / 60_000.0
}
