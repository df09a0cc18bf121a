//! In-memory engine used by unit tests and the `fake_engine` bridge binary.
//!
//! Signals are analytic waveforms sampled on demand, so statistics over any
//! window are cheap and deterministic.

use std::collections::HashSet;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::engine::SimulationEngine;
use crate::error::{RemoteError, RemoteResult};
use crate::stats::Operation;

/// Points used when reducing a waveform to a statistic.
const STAT_SAMPLES: usize = 1999;

#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    Constant(f64),
    Square {
        low: f64,
        high: f64,
        period: f64,
        duty: f64,
    },
    Sine {
        offset: f64,
        amplitude: f64,
        frequency: f64,
    },
    /// Node exists in the circuit but its scope channel recorded nothing.
    Unrecorded,
}

impl Waveform {
    fn at(&self, t: f64) -> f64 {
        match *self {
            Waveform::Constant(value) => value,
            Waveform::Square {
                low,
                high,
                period,
                duty,
            } => {
                let phase = (t / period).fract();
                if phase < duty {
                    high
                } else {
                    low
                }
            }
            Waveform::Sine {
                offset,
                amplitude,
                frequency,
            } => offset + amplitude * (2.0 * PI * frequency * t).sin(),
            Waveform::Unrecorded => f64::NAN,
        }
    }

    fn thd(&self) -> f64 {
        match self {
            Waveform::Square { .. } => 0.4834,
            // No fundamental to compare against.
            Waveform::Constant(_) | Waveform::Unrecorded => f64::NAN,
            Waveform::Sine { .. } => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MockComponent {
    params: IndexMap<String, f64>,
    /// Keys whose writes are accepted but ignored.
    shadowed: HashSet<String>,
}

/// Scriptable engine with call accounting.
#[derive(Debug, Clone)]
pub struct MockEngine {
    dt: f64,
    tend: f64,
    dt_pre: f64,
    tend_pre: f64,
    /// Spacing of exported scope samples before `skip` is applied.
    scope_step: f64,
    globals: IndexMap<String, f64>,
    components: IndexMap<String, MockComponent>,
    signals: IndexMap<String, Waveform>,
    failing: HashSet<(Operation, String)>,
    calls: Vec<&'static str>,
    operations: Vec<(String, String, String)>,
    opened: Option<PathBuf>,
    saved: Vec<PathBuf>,
    runs: usize,
    connected: bool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            dt: 50e-9,
            tend: 0.05,
            dt_pre: 0.0,
            tend_pre: 0.0,
            scope_step: 1e-4,
            globals: IndexMap::new(),
            components: IndexMap::new(),
            signals: IndexMap::new(),
            failing: HashSet::new(),
            calls: Vec::new(),
            operations: Vec::new(),
            opened: None,
            saved: Vec::new(),
            runs: 0,
            connected: true,
        }
    }
}

impl MockEngine {
    /// Synchronous buck converter with a 0.1 s pre-simulation.
    pub fn buck_converter() -> Self {
        let mut engine = Self {
            dt_pre: 100e-9,
            tend_pre: 0.1,
            ..Self::default()
        };
        for (name, value) in [
            ("$V_in", 48.0),
            ("$f_s", 100e3),
            ("$duty_cycle", 0.5),
            ("$V_out", 24.0),
            ("$L", 100e-6),
        ] {
            engine.globals.insert(name.to_string(), value);
        }
        engine.add_component("L.1", &[("L", 100e-6), ("iL(0)", 0.0)]);
        engine.add_component("C.1", &[("C", 100e-6), ("uc(0)", 0.0)]);
        engine.add_component("R.1", &[("R", 10.0)]);
        let mosfet = [
            ("rON", 60e-3),
            ("rOFF", 1e6),
            ("ad_uF", 0.0),
            ("ad_rON", 1e-3),
            ("ad_rOFF", 1e6),
            ("paralleled", 1.0),
        ];
        engine.add_component("MOSFET.1", &mosfet);
        engine.add_component("MOSFET.2", &mosfet);

        engine.add_signal(
            "v_HS",
            Waveform::Square {
                low: 0.0,
                high: 48.0,
                period: 10e-6,
                duty: 0.5,
            },
        );
        engine.add_signal(
            "v_LS",
            Waveform::Square {
                low: 48.0,
                high: 0.0,
                period: 10e-6,
                duty: 0.5,
            },
        );
        engine.add_signal(
            "i_L",
            Waveform::Sine {
                offset: 2.4,
                amplitude: 0.3,
                frequency: 100e3,
            },
        );
        engine.add_signal("v_out", Waveform::Constant(24.0));
        engine.add_signal("v_sense", Waveform::Unrecorded);
        engine
    }

    pub fn add_component(&mut self, name: &str, params: &[(&str, f64)]) {
        let component = MockComponent {
            params: params
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
            shadowed: HashSet::new(),
        };
        self.components.insert(name.to_string(), component);
    }

    pub fn add_signal(&mut self, name: &str, waveform: Waveform) {
        self.signals.insert(name.to_string(), waveform);
    }

    /// Make writes to `component.key` succeed without changing the value.
    pub fn shadow_parameter(&mut self, component: &str, key: &str) {
        if let Some(entry) = self.components.get_mut(component) {
            entry.shadowed.insert(key.to_string());
        }
    }

    /// Make the engine refuse one statistic for one signal.
    pub fn fail_statistic(&mut self, operation: Operation, signal: &str) {
        self.failing.insert((operation, signal.to_string()));
    }

    /// Simulate a dropped connection: every later call fails.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.iter().filter(|call| **call == name).count()
    }

    pub fn statistic_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| call.starts_with("signal_") && **call != "signal_data")
            .count()
    }

    pub fn operations(&self) -> &[(String, String, String)] {
        &self.operations
    }

    pub fn opened(&self) -> Option<&Path> {
        self.opened.as_deref()
    }

    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    pub fn parameter(&self, component: &str, key: &str) -> Option<f64> {
        self.components.get(component)?.params.get(key).copied()
    }

    pub fn global(&self, name: &str) -> Option<f64> {
        self.globals.get(name).copied()
    }

    fn record(&mut self, call: &'static str) -> RemoteResult<()> {
        if !self.connected {
            return Err(RemoteError::ConnectionClosed);
        }
        self.calls.push(call);
        Ok(())
    }

    fn component(&self, name: &str) -> RemoteResult<&MockComponent> {
        self.components
            .get(name)
            .ok_or_else(|| RemoteError::Engine(format!("component {name} not found")))
    }

    fn waveform(&self, node: &str) -> RemoteResult<&Waveform> {
        match self.signals.get(node) {
            Some(Waveform::Unrecorded) | None => {
                Err(RemoteError::Engine(format!("signal {node} is not recorded")))
            }
            Some(waveform) => Ok(waveform),
        }
    }

    fn samples(&self, node: &str, start: f64, end: f64) -> RemoteResult<Vec<f64>> {
        if start >= end {
            return Err(RemoteError::Engine(format!("empty window [{start}, {end}]")));
        }
        let waveform = self.waveform(node)?;
        let step = (end - start) / STAT_SAMPLES as f64;
        Ok((0..=STAT_SAMPLES)
            .map(|i| waveform.at(start + step * i as f64))
            .collect())
    }

    fn statistic(
        &mut self,
        call: &'static str,
        operation: Operation,
        node: &str,
        start: f64,
        end: f64,
    ) -> RemoteResult<f64> {
        self.record(call)?;
        if self.failing.contains(&(operation, node.to_string())) {
            return Err(RemoteError::Engine(format!(
                "{operation} of {node} failed"
            )));
        }
        let samples = self.samples(node, start, end)?;
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let rms = (samples.iter().map(|v| v * v).sum::<f64>() / n).sqrt();
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);

        match operation {
            Operation::Mean => Ok(mean),
            Operation::Rms => Ok(rms),
            Operation::Max => Ok(max),
            Operation::Min => Ok(min),
            Operation::Thd => Ok(self.waveform(node)?.thd()),
            Operation::Ripple => Ok(max - min),
            Operation::Shape if mean == 0.0 => Err(RemoteError::Engine(format!(
                "shape factor of {node} is undefined for zero mean"
            ))),
            Operation::Shape => Ok(rms / mean.abs()),
        }
    }

    fn scope_times(&self, start: f64, end: f64, skip: usize) -> Vec<f64> {
        let step = self.scope_step * (skip + 1) as f64;
        let count = ((end - start) / step).floor() as usize;
        (0..=count).map(|i| start + step * i as f64).collect()
    }
}

impl SimulationEngine for MockEngine {
    fn open_file(&mut self, path: &Path) -> RemoteResult<()> {
        self.record("open_file")?;
        self.opened = Some(path.to_path_buf());
        Ok(())
    }

    fn save_file_as(&mut self, path: &Path) -> RemoteResult<()> {
        self.record("save_file_as")?;
        self.saved.push(path.to_path_buf());
        Ok(())
    }

    fn run_simulation(&mut self) -> RemoteResult<()> {
        self.record("run_simulation")?;
        self.runs += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> RemoteResult<()> {
        self.record("shutdown")?;
        self.connected = false;
        Ok(())
    }

    fn set_dt(&mut self, value: f64) -> RemoteResult<()> {
        self.record("set_dt")?;
        self.dt = value;
        Ok(())
    }

    fn set_tend(&mut self, value: f64) -> RemoteResult<()> {
        self.record("set_tend")?;
        self.tend = value;
        Ok(())
    }

    fn set_dt_pre(&mut self, value: f64) -> RemoteResult<()> {
        self.record("set_dt_pre")?;
        self.dt_pre = value;
        Ok(())
    }

    fn set_tend_pre(&mut self, value: f64) -> RemoteResult<()> {
        self.record("set_tend_pre")?;
        self.tend_pre = value;
        Ok(())
    }

    fn get_dt(&mut self) -> RemoteResult<f64> {
        self.record("get_dt")?;
        Ok(self.dt)
    }

    fn get_tend(&mut self) -> RemoteResult<f64> {
        self.record("get_tend")?;
        Ok(self.tend)
    }

    fn get_dt_pre(&mut self) -> RemoteResult<f64> {
        self.record("get_dt_pre")?;
        Ok(self.dt_pre)
    }

    fn get_tend_pre(&mut self) -> RemoteResult<f64> {
        self.record("get_tend_pre")?;
        Ok(self.tend_pre)
    }

    fn get_global_parameter(&mut self, name: &str) -> RemoteResult<f64> {
        self.record("get_global_parameter")?;
        self.globals
            .get(name)
            .copied()
            .ok_or_else(|| RemoteError::Engine(format!("global parameter {name} not found")))
    }

    fn set_global_parameter(&mut self, name: &str, value: f64) -> RemoteResult<()> {
        self.record("set_global_parameter")?;
        match self.globals.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RemoteError::Engine(format!(
                "global parameter {name} not found"
            ))),
        }
    }

    fn accessible_parameters(&mut self, component: &str) -> RemoteResult<Vec<String>> {
        self.record("accessible_parameters")?;
        Ok(self
            .component(component)?
            .params
            .keys()
            .map(|key| format!("{key}\tdouble"))
            .collect())
    }

    fn get_parameter(&mut self, component: &str, key: &str) -> RemoteResult<f64> {
        self.record("get_parameter")?;
        self.component(component)?
            .params
            .get(key)
            .copied()
            .ok_or_else(|| RemoteError::Engine(format!("{component} has no parameter {key}")))
    }

    fn set_parameters(
        &mut self,
        component: &str,
        keys: &[String],
        values: &[f64],
    ) -> RemoteResult<()> {
        self.record("set_parameters")?;
        if keys.len() != values.len() {
            return Err(RemoteError::Engine(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        let entry = self
            .components
            .get_mut(component)
            .ok_or_else(|| RemoteError::Engine(format!("component {component} not found")))?;
        for (key, value) in keys.iter().zip(values) {
            if entry.shadowed.contains(key) {
                continue;
            }
            entry.params.insert(key.clone(), *value);
        }
        Ok(())
    }

    fn circuit_elements(&mut self) -> RemoteResult<Vec<String>> {
        self.record("circuit_elements")?;
        Ok(self.components.keys().cloned().collect())
    }

    fn do_operation(
        &mut self,
        component: &str,
        operation: &str,
        argument: &str,
    ) -> RemoteResult<()> {
        self.record("do_operation")?;
        self.component(component)?;
        if operation != "setLossFile" {
            return Err(RemoteError::Engine(format!(
                "unsupported operation {operation}"
            )));
        }
        self.operations.push((
            component.to_string(),
            operation.to_string(),
            argument.to_string(),
        ));
        Ok(())
    }

    fn signal_data(
        &mut self,
        node: &str,
        start: f64,
        end: f64,
        skip: usize,
    ) -> RemoteResult<Vec<f64>> {
        self.record("signal_data")?;
        let Some(waveform) = self.signals.get(node) else {
            return Err(RemoteError::Engine(format!("signal {node} not found")));
        };
        if *waveform == Waveform::Unrecorded {
            return Ok(Vec::new());
        }
        let waveform = waveform.clone();
        Ok(self
            .scope_times(start, end, skip)
            .into_iter()
            .map(|t| waveform.at(t))
            .collect())
    }

    fn time_array(
        &mut self,
        node: &str,
        start: f64,
        end: f64,
        skip: usize,
    ) -> RemoteResult<Vec<f64>> {
        self.record("time_array")?;
        if !self.signals.contains_key(node) {
            return Err(RemoteError::Engine(format!("signal {node} not found")));
        }
        Ok(self.scope_times(start, end, skip))
    }

    fn signal_avg(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        self.statistic("signal_avg", Operation::Mean, node, start, end)
    }

    fn signal_rms(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        self.statistic("signal_rms", Operation::Rms, node, start, end)
    }

    fn signal_max(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        self.statistic("signal_max", Operation::Max, node, start, end)
    }

    fn signal_min(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        self.statistic("signal_min", Operation::Min, node, start, end)
    }

    fn signal_thd(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        self.statistic("signal_thd", Operation::Thd, node, start, end)
    }

    fn signal_ripple(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        self.statistic("signal_ripple", Operation::Ripple, node, start, end)
    }

    fn signal_shape(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        self.statistic("signal_shape", Operation::Shape, node, start, end)
    }
}
