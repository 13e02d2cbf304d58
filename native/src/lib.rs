use common::deploy::select_mode;
use common::gpu::GpuProfile;
use common::inputs::EnvSnapshot;
use common::resolve::check;
use pyo3::prelude::*;
use std::collections::HashMap;

/// list every reason the environment would be rejected; empty when it is valid
#[pyfunction]
#[pyo3(signature = (env, gpu_name=None))]
fn validate_environment(env: HashMap<String, String>, gpu_name: Option<String>) -> Vec<String> {
    let env = EnvSnapshot::from_pairs(env);
    let gpu = GpuProfile::new(gpu_name.unwrap_or_default(), false);
    match check(&env, &gpu) {
        Ok(_) => Vec::new(),
        Err(report) => report.errors().iter().map(ToString::to_string).collect(),
    }
}

#[pyfunction]
fn normalize_deploy_mode(raw: &str) -> String {
    select_mode(raw).mode.to_string()
}

#[pymodule]
fn _native(module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(validate_environment, module)?)?;
    module.add_function(wrap_pyfunction!(normalize_deploy_mode, module)?)?;
    Ok(())
}
