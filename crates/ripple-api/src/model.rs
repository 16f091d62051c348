//! JSON payloads shared by the streaming routes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One element of a counting sequence: `{"value": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
}

impl Counter {
    pub fn new(value: i64) -> Self {
        Self { value }
    }
}

/// A doubled counter: `{"double": 2n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doubled {
    pub double: i64,
}

/// Doubling would leave the `i64` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot double {0}: result overflows i64")]
pub struct DoublingOverflow(pub i64);

impl TryFrom<Counter> for Doubled {
    type Error = DoublingOverflow;

    fn try_from(counter: Counter) -> Result<Self, Self::Error> {
        counter
            .value
            .checked_mul(2)
            .map(|double| Self { double })
            .ok_or(DoublingOverflow(counter.value))
    }
}
