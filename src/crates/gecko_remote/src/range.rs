//! Resolution of user-facing time ranges into absolute simulation windows.
//!
//! Scope statistics are only meaningful inside the region the engine actually
//! recorded: the first sample after the pre-simulation is skipped, and the last
//! two steps are excluded the same way the engine's own analysis does.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::SimulationEngine;
use crate::error::{RemoteError, RemoteResult};

/// Timing values that bound the recorded scope data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationBounds {
    /// Step of the pre-simulation phase.
    pub pre_timestep: f64,
    /// Duration of the pre-simulation phase.
    pub pre_end: f64,
    /// Duration of the main run, not including the pre-simulation.
    pub run_end: f64,
    /// Step of the main run.
    pub timestep: f64,
}

impl SimulationBounds {
    /// Read the current bounds from the engine.
    pub fn read<E: SimulationEngine + ?Sized>(engine: &mut E) -> RemoteResult<Self> {
        Ok(Self {
            pre_timestep: engine.get_dt_pre()?,
            pre_end: engine.get_tend_pre()?,
            run_end: engine.get_tend()?,
            timestep: engine.get_dt()?,
        })
    }

    pub fn data_start(&self) -> f64 {
        self.pre_end + self.timestep
    }

    pub fn data_end(&self) -> f64 {
        self.pre_end + self.run_end - 2.0 * self.timestep
    }

    /// The full valid data region.
    pub fn full_window(&self) -> TimeWindow {
        TimeWindow {
            start: self.data_start(),
            end: self.data_end(),
        }
    }
}

/// Absolute `[start, end]` window in simulation seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// One element of a loosely typed range list such as `[0.01, "end"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeValue {
    Time(f64),
    Tag(String),
}

impl From<f64> for RangeValue {
    fn from(value: f64) -> Self {
        RangeValue::Time(value)
    }
}

impl From<&str> for RangeValue {
    fn from(value: &str) -> Self {
        RangeValue::Tag(value.to_string())
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeValue::Time(value) => write!(f, "{value}"),
            RangeValue::Tag(tag) => write!(f, "{tag:?}"),
        }
    }
}

/// Requested time range, before it is checked against the recorded data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeSpec {
    /// Literal `[start, end]` in absolute simulation time.
    Absolute { start: f64, end: f64 },
    /// `[length, "start"]`: the first `|length|` seconds of recorded data.
    First(f64),
    /// `[length, "end"]`: the last `|length|` seconds of recorded data.
    Last(f64),
}

impl RangeSpec {
    pub fn absolute(start: f64, end: f64) -> Self {
        RangeSpec::Absolute { start, end }
    }

    pub fn first(length: f64) -> Self {
        RangeSpec::First(length)
    }

    pub fn last(length: f64) -> Self {
        RangeSpec::Last(length)
    }

    /// Build a spec from a loose two-element list.
    ///
    /// Only the second position may hold a tag, and the only tags are
    /// `"start"` and `"end"`. Shape errors carry no bounds yet, so the
    /// reported data region is NaN.
    pub fn from_values(values: &[RangeValue]) -> RemoteResult<Self> {
        let shown = format_values(values);
        let invalid = |reason: &str| RemoteError::InvalidRange {
            data_start: f64::NAN,
            data_end: f64::NAN,
            spec: shown.clone(),
            reason: reason.to_string(),
        };

        if values.len() > 2 {
            return Err(invalid("more than two elements"));
        }
        let (first, second) = match values {
            [first, second] => (first, second),
            _ => return Err(invalid("expected two elements")),
        };
        let length = match first {
            RangeValue::Time(value) if value.is_finite() => *value,
            RangeValue::Time(_) => return Err(invalid("time must be finite")),
            RangeValue::Tag(_) => return Err(invalid("first element must be a time")),
        };

        match second {
            RangeValue::Time(end) if end.is_finite() => Ok(RangeSpec::absolute(length, *end)),
            RangeValue::Time(_) => Err(invalid("time must be finite")),
            RangeValue::Tag(tag) if tag == "end" => Ok(RangeSpec::last(length)),
            RangeValue::Tag(tag) if tag == "start" => Ok(RangeSpec::first(length)),
            RangeValue::Tag(tag) => Err(invalid(&format!("invalid string key: {tag}"))),
        }
    }

    /// Magnitude of the first element, checked against the data end.
    fn leading(&self) -> f64 {
        match self {
            RangeSpec::Absolute { start, .. } => *start,
            RangeSpec::First(length) | RangeSpec::Last(length) => *length,
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeSpec::Absolute { start, end } => write!(f, "[{start}, {end}]"),
            RangeSpec::First(length) => write!(f, "[{length}, \"start\"]"),
            RangeSpec::Last(length) => write!(f, "[{length}, \"end\"]"),
        }
    }
}

fn format_values(values: &[RangeValue]) -> String {
    let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Resolve `spec` against `bounds`; `None` selects the whole data region.
///
/// Literal windows are never adjusted. The shorthand forms are clamped to the
/// data region and the result must still be a non-empty window.
pub fn resolve(spec: Option<&RangeSpec>, bounds: &SimulationBounds) -> RemoteResult<TimeWindow> {
    let data_start = bounds.data_start();
    let data_end = bounds.data_end();

    let Some(spec) = spec else {
        return Ok(bounds.full_window());
    };

    let invalid = |reason: String| RemoteError::InvalidRange {
        data_start,
        data_end,
        spec: spec.to_string(),
        reason,
    };

    let leading = spec.leading();
    if !leading.is_finite() {
        return Err(invalid("time must be finite".to_string()));
    }
    if leading.abs() > data_end {
        return Err(invalid(format!(
            "|{leading}| exceeds the data end {data_end}"
        )));
    }

    let window = match *spec {
        RangeSpec::Absolute { start, end } => {
            if !end.is_finite() {
                return Err(invalid("time must be finite".to_string()));
            }
            if start < data_start || start > end || start == end || end < data_start {
                return Err(invalid(format!(
                    "start ({start}) should be between start_time ({data_start}) and end_time \
                     ({data_end}) and before end ({end})"
                )));
            }
            if end > data_end {
                return Err(invalid(format!(
                    "end ({end}) exceeds the data end {data_end}"
                )));
            }
            TimeWindow { start, end }
        }
        RangeSpec::Last(length) => TimeWindow {
            start: (data_end - length.abs()).max(data_start),
            end: data_end,
        },
        RangeSpec::First(length) => TimeWindow {
            start: data_start,
            end: (data_start + length.abs()).min(data_end),
        },
    };

    if window.start >= window.end {
        return Err(invalid(format!(
            "resolved window [{}, {}] is empty",
            window.start, window.end
        )));
    }

    Ok(window)
}
