use std::path::Path;

use crate::error::RemoteResult;

/// Capability set exposed by a running simulation engine.
///
/// Every method is a single blocking call. Implementations report a call the
/// engine itself refused as [`RemoteError::Engine`](crate::RemoteError::Engine)
/// and keep the connection usable afterwards; any other error means the
/// engine can no longer be reached.
pub trait SimulationEngine {
    fn open_file(&mut self, path: &Path) -> RemoteResult<()>;
    fn save_file_as(&mut self, path: &Path) -> RemoteResult<()>;
    /// Blocks until the engine finishes the run.
    fn run_simulation(&mut self) -> RemoteResult<()>;
    fn shutdown(&mut self) -> RemoteResult<()>;

    fn set_dt(&mut self, value: f64) -> RemoteResult<()>;
    fn set_tend(&mut self, value: f64) -> RemoteResult<()>;
    fn set_dt_pre(&mut self, value: f64) -> RemoteResult<()>;
    fn set_tend_pre(&mut self, value: f64) -> RemoteResult<()>;
    fn get_dt(&mut self) -> RemoteResult<f64>;
    fn get_tend(&mut self) -> RemoteResult<f64>;
    fn get_dt_pre(&mut self) -> RemoteResult<f64>;
    fn get_tend_pre(&mut self) -> RemoteResult<f64>;

    fn get_global_parameter(&mut self, name: &str) -> RemoteResult<f64>;
    fn set_global_parameter(&mut self, name: &str, value: f64) -> RemoteResult<()>;

    /// Entries are formatted as `key\tmetadata`.
    fn accessible_parameters(&mut self, component: &str) -> RemoteResult<Vec<String>>;
    fn get_parameter(&mut self, component: &str, key: &str) -> RemoteResult<f64>;
    /// Writes all keys in one call; `keys` and `values` are index-aligned.
    fn set_parameters(
        &mut self,
        component: &str,
        keys: &[String],
        values: &[f64],
    ) -> RemoteResult<()>;
    fn circuit_elements(&mut self) -> RemoteResult<Vec<String>>;
    fn do_operation(&mut self, component: &str, operation: &str, argument: &str)
        -> RemoteResult<()>;

    fn signal_data(&mut self, node: &str, start: f64, end: f64, skip: usize)
        -> RemoteResult<Vec<f64>>;
    fn time_array(&mut self, node: &str, start: f64, end: f64, skip: usize)
        -> RemoteResult<Vec<f64>>;

    fn signal_avg(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64>;
    fn signal_rms(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64>;
    fn signal_max(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64>;
    fn signal_min(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64>;
    fn signal_thd(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64>;
    fn signal_ripple(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64>;
    fn signal_shape(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64>;
}

impl<E: SimulationEngine + ?Sized> SimulationEngine for Box<E> {
    fn open_file(&mut self, path: &Path) -> RemoteResult<()> {
        (**self).open_file(path)
    }
    fn save_file_as(&mut self, path: &Path) -> RemoteResult<()> {
        (**self).save_file_as(path)
    }
    fn run_simulation(&mut self) -> RemoteResult<()> {
        (**self).run_simulation()
    }
    fn shutdown(&mut self) -> RemoteResult<()> {
        (**self).shutdown()
    }
    fn set_dt(&mut self, value: f64) -> RemoteResult<()> {
        (**self).set_dt(value)
    }
    fn set_tend(&mut self, value: f64) -> RemoteResult<()> {
        (**self).set_tend(value)
    }
    fn set_dt_pre(&mut self, value: f64) -> RemoteResult<()> {
        (**self).set_dt_pre(value)
    }
    fn set_tend_pre(&mut self, value: f64) -> RemoteResult<()> {
        (**self).set_tend_pre(value)
    }
    fn get_dt(&mut self) -> RemoteResult<f64> {
        (**self).get_dt()
    }
    fn get_tend(&mut self) -> RemoteResult<f64> {
        (**self).get_tend()
    }
    fn get_dt_pre(&mut self) -> RemoteResult<f64> {
        (**self).get_dt_pre()
    }
    fn get_tend_pre(&mut self) -> RemoteResult<f64> {
        (**self).get_tend_pre()
    }
    fn get_global_parameter(&mut self, name: &str) -> RemoteResult<f64> {
        (**self).get_global_parameter(name)
    }
    fn set_global_parameter(&mut self, name: &str, value: f64) -> RemoteResult<()> {
        (**self).set_global_parameter(name, value)
    }
    fn accessible_parameters(&mut self, component: &str) -> RemoteResult<Vec<String>> {
        (**self).accessible_parameters(component)
    }
    fn get_parameter(&mut self, component: &str, key: &str) -> RemoteResult<f64> {
        (**self).get_parameter(component, key)
    }
    fn set_parameters(
        &mut self,
        component: &str,
        keys: &[String],
        values: &[f64],
    ) -> RemoteResult<()> {
        (**self).set_parameters(component, keys, values)
    }
    fn circuit_elements(&mut self) -> RemoteResult<Vec<String>> {
        (**self).circuit_elements()
    }
    fn do_operation(
        &mut self,
        component: &str,
        operation: &str,
        argument: &str,
    ) -> RemoteResult<()> {
        (**self).do_operation(component, operation, argument)
    }
    fn signal_data(
        &mut self,
        node: &str,
        start: f64,
        end: f64,
        skip: usize,
    ) -> RemoteResult<Vec<f64>> {
        (**self).signal_data(node, start, end, skip)
    }
    fn time_array(
        &mut self,
        node: &str,
        start: f64,
        end: f64,
        skip: usize,
    ) -> RemoteResult<Vec<f64>> {
        (**self).time_array(node, start, end, skip)
    }
    fn signal_avg(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        (**self).signal_avg(node, start, end)
    }
    fn signal_rms(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        (**self).signal_rms(node, start, end)
    }
    fn signal_max(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        (**self).signal_max(node, start, end)
    }
    fn signal_min(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        (**self).signal_min(node, start, end)
    }
    fn signal_thd(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        (**self).signal_thd(node, start, end)
    }
    fn signal_ripple(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        (**self).signal_ripple(node, start, end)
    }
    fn signal_shape(&mut self, node: &str, start: f64, end: f64) -> RemoteResult<f64> {
        (**self).signal_shape(node, start, end)
    }
}
