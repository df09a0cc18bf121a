use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::engine::SimulationEngine;
use crate::error::{RemoteError, RemoteResult};
use crate::export::ScopeTable;
use crate::params::{self, ParameterSet, SwitchType, WriteReport};
use crate::range::{self, RangeSpec, SimulationBounds};
use crate::stats::{self, StatsReport};

/// Extension of GeckoCIRCUITS simulation files.
pub const SIM_FILE_EXTENSION: &str = "ipes";

/// Run settings as the client last applied or read them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationTiming {
    pub timestep: f64,
    /// Run length, not including the pre-simulation.
    pub simtime: f64,
    pub timestep_pre: f64,
    pub simtime_pre: f64,
}

impl SimulationTiming {
    pub fn new(timestep: f64, simtime: f64) -> Self {
        Self {
            timestep,
            simtime,
            timestep_pre: 0.0,
            simtime_pre: 0.0,
        }
    }

    pub fn with_pre_simulation(mut self, timestep_pre: f64, simtime_pre: f64) -> Self {
        self.timestep_pre = timestep_pre;
        self.simtime_pre = simtime_pre;
        self
    }

    /// Read the settings stored in the opened file.
    pub fn read<E: SimulationEngine + ?Sized>(engine: &mut E) -> RemoteResult<Self> {
        let timing = Self {
            simtime: engine.get_tend()?,
            timestep: engine.get_dt()?,
            simtime_pre: engine.get_tend_pre()?,
            timestep_pre: engine.get_dt_pre()?,
        };
        debug!(?timing, "simulation timing");
        Ok(timing)
    }

    fn merged(self, overrides: &RunOverrides) -> Self {
        Self {
            timestep: overrides.timestep.unwrap_or(self.timestep),
            simtime: overrides.simtime.unwrap_or(self.simtime),
            timestep_pre: overrides.timestep_pre.unwrap_or(self.timestep_pre),
            simtime_pre: overrides.simtime_pre.unwrap_or(self.simtime_pre),
        }
    }
}

/// Per-run changes to the timing; unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunOverrides {
    pub timestep: Option<f64>,
    pub simtime: Option<f64>,
    pub timestep_pre: Option<f64>,
    pub simtime_pre: Option<f64>,
    /// Save the file under its own name before running.
    pub save_file: bool,
}

/// Time span and decimation for a scope export.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScopeQuery {
    pub start: Option<f64>,
    pub stop: Option<f64>,
    /// Samples skipped between exported points.
    pub skip: usize,
}

/// An opened simulation file on an engine this session owns.
///
/// Dropping the session shuts the engine down.
pub struct GeckoSimulation<E: SimulationEngine> {
    engine: E,
    path: PathBuf,
    timing: SimulationTiming,
}

impl<E: SimulationEngine> GeckoSimulation<E> {
    /// Open `path` on `engine`.
    ///
    /// `timing` is taken from the file when not given.
    pub fn open(
        mut engine: E,
        path: impl AsRef<Path>,
        timing: Option<SimulationTiming>,
    ) -> RemoteResult<Self> {
        let path = simulation_file(path.as_ref())?;
        engine.open_file(&path)?;
        info!(file = %path.display(), "simulation file opened");

        let timing = match timing {
            Some(timing) => timing,
            None => SimulationTiming::read(&mut engine)?,
        };
        Ok(Self {
            engine,
            path,
            timing,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timing(&self) -> SimulationTiming {
        self.timing
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Save the opened file as `file_name`, adding `.ipes` if missing.
    pub fn save_file(&mut self, file_name: impl AsRef<Path>) -> RemoteResult<PathBuf> {
        let file_name = file_name.as_ref();
        let target = if has_sim_extension(file_name) {
            file_name.to_path_buf()
        } else {
            let mut name = file_name.as_os_str().to_os_string();
            name.push(".");
            name.push(SIM_FILE_EXTENSION);
            PathBuf::from(name)
        };
        self.engine.save_file_as(&target)?;
        info!(file = %target.display(), "simulation file saved");
        Ok(target)
    }

    /// Apply the timing and run the simulation to completion.
    pub fn run_simulation(&mut self, overrides: RunOverrides) -> RemoteResult<()> {
        self.timing = self.timing.merged(&overrides);
        let timing = self.timing;

        self.engine.set_dt_pre(timing.timestep_pre)?;
        self.engine.set_tend_pre(timing.simtime_pre)?;
        self.engine.set_dt(timing.timestep)?;
        self.engine.set_tend(timing.simtime)?;
        info!(
            simtime = timing.simtime,
            timestep = timing.timestep,
            "running simulation"
        );

        if overrides.save_file {
            let path = self.path.clone();
            self.save_file(&path)?;
        }
        self.engine.run_simulation()
    }

    /// Read the timing stored in the engine.
    pub fn sim_time(&mut self) -> RemoteResult<SimulationTiming> {
        SimulationTiming::read(&mut self.engine)
    }

    /// Update the client-side timing used by the next run.
    pub fn set_sim_time(
        &mut self,
        simtime: f64,
        timestep: Option<f64>,
        simtime_pre: Option<f64>,
        timestep_pre: Option<f64>,
    ) {
        self.timing = self.timing.merged(&RunOverrides {
            timestep,
            simtime: Some(simtime),
            timestep_pre,
            simtime_pre,
            save_file: false,
        });
    }

    pub fn set_global_parameters(
        &mut self,
        values: &ParameterSet,
        save_file: bool,
    ) -> RemoteResult<()> {
        params::set_global_parameters(&mut self.engine, values)?;
        if save_file {
            let path = self.path.clone();
            self.save_file(&path)?;
        }
        Ok(())
    }

    pub fn get_global_parameters<S: AsRef<str>>(
        &mut self,
        names: &[S],
    ) -> RemoteResult<ParameterSet> {
        params::get_global_parameters(&mut self.engine, names)
    }

    pub fn get_component_keys(&mut self, component: &str) -> RemoteResult<Vec<String>> {
        params::component_keys(&mut self.engine, component)
    }

    pub fn get_component_values(&mut self, component: &str) -> RemoteResult<ParameterSet> {
        params::component_values(&mut self.engine, component)
    }

    pub fn set_component_values(
        &mut self,
        component: &str,
        values: &ParameterSet,
    ) -> RemoteResult<WriteReport> {
        params::set_component_values(&mut self.engine, component, values)
    }

    pub fn set_switch_values(
        &mut self,
        switch_type: &str,
        component: &str,
        values: &ParameterSet,
    ) -> RemoteResult<()> {
        let switch_type: SwitchType = switch_type.parse()?;
        params::set_switch_values(&mut self.engine, switch_type, component, values)
    }

    /// Attach a loss characteristic file to each named switch.
    pub fn set_loss_file<S: AsRef<str>>(
        &mut self,
        components: &[S],
        loss_file: impl AsRef<Path>,
    ) -> RemoteResult<()> {
        let loss_file = loss_file.as_ref();
        if !loss_file.exists() {
            return Err(RemoteError::MissingLossFile(loss_file.to_path_buf()));
        }
        let loss_file = std::path::absolute(loss_file)?;

        let available = self.engine.circuit_elements()?;
        let missing: Vec<String> = components
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !available.iter().any(|element| element == name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(RemoteError::UnknownComponents { missing });
        }

        let argument = loss_file.display().to_string();
        for name in components {
            self.engine
                .do_operation(name.as_ref(), "setLossFile", &argument)?;
        }
        Ok(())
    }

    /// Current bounds of the recorded data.
    pub fn bounds(&mut self) -> RemoteResult<SimulationBounds> {
        SimulationBounds::read(&mut self.engine)
    }

    /// Statistics for each node and operation over `range`.
    ///
    /// Operation names are checked before the engine is contacted.
    pub fn get_values<N, O>(
        &mut self,
        nodes: &[N],
        operations: &[O],
        range: Option<&RangeSpec>,
    ) -> RemoteResult<StatsReport>
    where
        N: AsRef<str>,
        O: AsRef<str>,
    {
        let operations = stats::parse_operations(operations)?;
        let bounds = self.bounds()?;
        let window = range::resolve(range, &bounds)?;
        debug!(
            start = window.start,
            end = window.end,
            duration = window.duration(),
            "statistics window"
        );
        stats::aggregate(&mut self.engine, nodes, &operations, &window)
    }

    /// Fetch scope data for `nodes` into a table.
    ///
    /// Returns `None` when no node produced any samples.
    pub fn scope_table<S: AsRef<str>>(
        &mut self,
        nodes: &[S],
        query: ScopeQuery,
    ) -> RemoteResult<Option<ScopeTable>> {
        let stop = match query.stop {
            Some(stop) if stop > 0.0 => stop,
            _ => self.engine.get_tend()?,
        };
        let start = match query.start {
            Some(start) if start < stop => start,
            _ => 0.0,
        };

        let mut columns = IndexMap::new();
        for node in nodes {
            let node = node.as_ref();
            let data = self.engine.signal_data(node, start, stop, query.skip)?;
            if data.is_empty() {
                warn!(node, "no scope data recorded");
                continue;
            }
            columns.insert(node.to_string(), data);
        }

        let Some(first) = columns.keys().next().cloned() else {
            return Ok(None);
        };
        let time = self.engine.time_array(&first, start, stop, query.skip)?;
        ScopeTable::new(time, columns).map(Some)
    }

    /// Export scope data for `nodes` to `<file_name>.csv`.
    pub fn get_scope_data<S: AsRef<str>>(
        &mut self,
        nodes: &[S],
        file_name: impl AsRef<Path>,
        query: ScopeQuery,
    ) -> RemoteResult<Option<PathBuf>> {
        match self.scope_table(nodes, query)? {
            Some(table) => {
                let path = table.save(file_name)?;
                info!(
                    file = %path.display(),
                    rows = table.rows(),
                    signals = ?table.signals().collect::<Vec<_>>(),
                    "scope data exported"
                );
                Ok(Some(path))
            }
            None => {
                info!("nothing to be saved");
                Ok(None)
            }
        }
    }
}

impl<E: SimulationEngine> Drop for GeckoSimulation<E> {
    fn drop(&mut self) {
        info!("shutting down engine");
        if let Err(err) = self.engine.shutdown() {
            warn!(error = %err, "engine shutdown failed");
        }
    }
}

fn has_sim_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SIM_FILE_EXTENSION))
}

/// Validate a simulation file path and make it absolute.
fn simulation_file(path: &Path) -> RemoteResult<PathBuf> {
    if !has_sim_extension(path) || !path.is_file() {
        return Err(RemoteError::InvalidSimulationFile(path.to_path_buf()));
    }
    Ok(std::path::absolute(path)?)
}
