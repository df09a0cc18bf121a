//! Scope statistics over a resolved time window.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::SimulationEngine;
use crate::error::{RemoteError, RemoteResult};
use crate::range::TimeWindow;

/// Statistic the engine can compute over a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Mean,
    Rms,
    Max,
    Min,
    Thd,
    Ripple,
    Shape,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Mean,
        Operation::Rms,
        Operation::Max,
        Operation::Min,
        Operation::Thd,
        Operation::Ripple,
        Operation::Shape,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Mean => "mean",
            Operation::Rms => "rms",
            Operation::Max => "max",
            Operation::Min => "min",
            Operation::Thd => "thd",
            Operation::Ripple => "ripple",
            Operation::Shape => "shape",
        }
    }

    pub fn supported() -> Vec<&'static str> {
        Self::ALL.iter().map(|op| op.name()).collect()
    }

    /// Issue the single engine call backing this statistic.
    pub fn query<E: SimulationEngine + ?Sized>(
        self,
        engine: &mut E,
        node: &str,
        window: &TimeWindow,
    ) -> RemoteResult<f64> {
        let TimeWindow { start, end } = *window;
        match self {
            Operation::Mean => engine.signal_avg(node, start, end),
            Operation::Rms => engine.signal_rms(node, start, end),
            Operation::Max => engine.signal_max(node, start, end),
            Operation::Min => engine.signal_min(node, start, end),
            Operation::Thd => engine.signal_thd(node, start, end),
            Operation::Ripple => engine.signal_ripple(node, start, end),
            Operation::Shape => engine.signal_shape(node, start, end),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.name() == lower)
            .ok_or_else(|| RemoteError::UnknownOperation {
                received: s.to_string(),
                supported: Self::supported(),
            })
    }
}

/// Parse every name up front so a typo fails before any engine traffic.
///
/// Repeated operations are kept once, at their first position.
pub fn parse_operations<S: AsRef<str>>(names: &[S]) -> RemoteResult<Vec<Operation>> {
    let mut operations = Vec::with_capacity(names.len());
    for name in names {
        let operation: Operation = name.as_ref().parse()?;
        if !operations.contains(&operation) {
            operations.push(operation);
        }
    }
    Ok(operations)
}

/// A (operation, signal) pair the engine refused to compute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFailure {
    pub operation: Operation,
    pub signal: String,
    pub message: String,
}

/// Statistics keyed by operation, then signal, in request order.
///
/// A signal missing from an operation's map has a matching entry in
/// `failures`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsReport {
    pub values: IndexMap<Operation, IndexMap<String, f64>>,
    pub failures: Vec<QueryFailure>,
}

impl StatsReport {
    pub fn get(&self, operation: Operation, signal: &str) -> Option<f64> {
        self.values.get(&operation)?.get(signal).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Query every (operation, signal) pair over `window`.
///
/// Calls the engine refuses are recorded in [`StatsReport::failures`] and the
/// rest of the request continues. Errors that take the connection down are
/// returned immediately.
pub fn aggregate<E, S>(
    engine: &mut E,
    signals: &[S],
    operations: &[Operation],
    window: &TimeWindow,
) -> RemoteResult<StatsReport>
where
    E: SimulationEngine + ?Sized,
    S: AsRef<str>,
{
    let mut report = StatsReport::default();

    for &operation in operations {
        report.values.entry(operation).or_default();
        for signal in signals {
            let signal = signal.as_ref();
            match operation.query(engine, signal, window) {
                Ok(value) => {
                    debug!(%operation, signal, value, "signal statistic");
                    if let Some(row) = report.values.get_mut(&operation) {
                        row.insert(signal.to_string(), value);
                    }
                }
                Err(err) if err.is_engine_rejection() => {
                    warn!(%operation, signal, error = %err, "statistic unavailable");
                    report.failures.push(QueryFailure {
                        operation,
                        signal: signal.to_string(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    fn window() -> TimeWindow {
        TimeWindow {
            start: 0.110,
            end: 0.120,
        }
    }

    fn engine() -> MockEngine {
        MockEngine::buck_converter()
    }

    #[test]
    fn operation_names_are_case_insensitive() {
        assert_eq!("RMS".parse::<Operation>().unwrap(), Operation::Rms);
        assert_eq!("Mean".parse::<Operation>().unwrap(), Operation::Mean);
        assert_eq!("thd".parse::<Operation>().unwrap(), Operation::Thd);
    }

    #[test]
    fn unknown_operation_names_the_vocabulary() {
        match "variance".parse::<Operation>().unwrap_err() {
            RemoteError::UnknownOperation {
                received,
                supported,
            } => {
                assert_eq!(received, "variance");
                assert_eq!(supported.len(), 7);
                assert!(supported.contains(&"ripple"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn repeated_operations_are_parsed_once() {
        let operations = parse_operations(&["max", "MAX", "rms", "Max"]).unwrap();
        assert_eq!(operations, vec![Operation::Max, Operation::Rms]);
    }

    #[test]
    fn results_follow_request_order() {
        let mut engine = engine();
        let ops = parse_operations(&["rms", "mean"]).unwrap();
        let report = aggregate(&mut engine, &["v_LS", "v_HS"], &ops, &window()).unwrap();

        let outer: Vec<_> = report.values.keys().copied().collect();
        assert_eq!(outer, vec![Operation::Rms, Operation::Mean]);
        for row in report.values.values() {
            let inner: Vec<_> = row.keys().cloned().collect();
            assert_eq!(inner, vec!["v_LS".to_string(), "v_HS".to_string()]);
        }
        assert!(report.is_complete());
        assert_eq!(engine.statistic_calls(), 4);
    }

    #[test]
    fn refused_pair_is_left_out_and_recorded() {
        let mut engine = engine();
        engine.fail_statistic(Operation::Rms, "v_LS");
        let ops = parse_operations(&["mean", "rms"]).unwrap();
        let report = aggregate(&mut engine, &["v_HS", "v_LS"], &ops, &window()).unwrap();

        assert_eq!(report.values[&Operation::Mean].len(), 2);
        let rms = &report.values[&Operation::Rms];
        assert_eq!(rms.keys().collect::<Vec<_>>(), vec!["v_HS"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, Operation::Rms);
        assert_eq!(report.failures[0].signal, "v_LS");
    }

    #[test]
    fn each_operation_hits_its_own_engine_call() {
        let mut engine = engine();
        let window = window();
        let mean = Operation::Mean.query(&mut engine, "v_HS", &window).unwrap();
        let max = Operation::Max.query(&mut engine, "v_HS", &window).unwrap();
        let min = Operation::Min.query(&mut engine, "v_HS", &window).unwrap();
        assert!(min <= mean && mean <= max);
    }

    #[test]
    fn unknown_signal_is_a_partial_result() {
        let mut engine = engine();
        let report = aggregate(&mut engine, &["v_HS", "nowhere"], &[Operation::Max], &window())
            .unwrap();
        assert_eq!(report.get(Operation::Max, "v_HS"), Some(48.0));
        assert_eq!(report.get(Operation::Max, "nowhere"), None);
        assert!(!report.is_complete());
    }

    #[test]
    fn non_finite_statistic_is_a_value() {
        let mut engine = engine();
        let report = aggregate(
            &mut engine,
            &["v_out", "v_HS"],
            &[Operation::Thd, Operation::Max],
            &window(),
        )
        .unwrap();
        assert!(report.is_complete());
        assert!(report.get(Operation::Thd, "v_out").unwrap().is_nan());
        assert_eq!(report.get(Operation::Max, "v_out"), Some(24.0));
        assert_eq!(report.get(Operation::Max, "v_HS"), Some(48.0));
    }

    #[test]
    fn lost_connection_aborts_the_request() {
        let mut engine = engine();
        engine.disconnect();
        let err = aggregate(&mut engine, &["v_HS"], &[Operation::Mean], &window()).unwrap_err();
        assert!(matches!(err, RemoteError::ConnectionClosed));
    }

    #[test]
    fn report_serializes_with_lowercase_operations() {
        let mut engine = engine();
        let report = aggregate(&mut engine, &["v_HS"], &[Operation::Mean], &window()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["values"]["mean"]["v_HS"].is_number());
    }
}
