use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use pullforce_core::auth::CredentialStore;
use pullforce_core::{AppendError, AppendOptions, BatchRow, append_many_with};
use std::path::PathBuf;

/// Operator mistakes become `ValueError`, everything else `RuntimeError`.
fn to_py_err(e: anyhow::Error) -> PyErr {
    if e.downcast_ref::<AppendError>().is_some() {
        PyValueError::new_err(format!("{e:#}"))
    } else {
        PyRuntimeError::new_err(format!("{e:#}"))
    }
}

fn batch(rows: Vec<(String, Vec<String>, String)>) -> Vec<BatchRow> {
    rows.into_iter()
        .map(|(date, values, owner)| BatchRow {
            date,
            values,
            owner,
        })
        .collect()
}

/// `rows` is a list of `(date, [six values], owner)`; returns `(bytes, sheet_name)`.
#[pyfunction]
#[pyo3(signature = (template, rows, sheet_name = "Data", owner_font = "Calibri", owner_font_size = 11.0))]
fn append_many<'py>(
    py: Python<'py>,
    template: &[u8],
    rows: Vec<(String, Vec<String>, String)>,
    sheet_name: &str,
    owner_font: &str,
    owner_font_size: f64,
) -> PyResult<(Bound<'py, PyBytes>, String)> {
    let opts = AppendOptions {
        sheet_name: sheet_name.to_owned(),
        owner_font_name: owner_font.to_owned(),
        owner_font_size,
    };
    let rows = batch(rows);
    let (bytes, used) = py
        .allow_threads(|| append_many_with(template, &rows, &opts))
        .map_err(to_py_err)?;
    Ok((PyBytes::new(py, &bytes), used))
}

#[pyfunction]
#[pyo3(signature = (workbook, sheet_name = "Data"))]
fn last_recorded_key(workbook: &[u8], sheet_name: &str) -> PyResult<String> {
    pullforce_core::last_recorded_key(workbook, sheet_name).map_err(to_py_err)
}

#[pyfunction]
fn needs_same_day_confirmation(rows: Vec<(String, Vec<String>, String)>) -> bool {
    pullforce_core::needs_same_day_confirmation(&batch(rows))
}

#[pyfunction]
fn scan_sheets(workbook: &[u8]) -> PyResult<Vec<String>> {
    pullforce_core::scan_bytes(workbook).map_err(to_py_err)
}

#[pyfunction]
fn output_file_name(input: &str) -> String {
    pullforce_core::output_file_name(input)
}

#[pyclass]
struct PyCredentialStore {
    store: CredentialStore,
}

#[pymethods]
impl PyCredentialStore {
    #[new]
    fn new(path: PathBuf) -> PyResult<Self> {
        let store = CredentialStore::load(&path).map_err(to_py_err)?;
        Ok(PyCredentialStore { store })
    }

    #[staticmethod]
    fn from_json(json: &str) -> PyResult<Self> {
        let store = CredentialStore::from_json(json).map_err(to_py_err)?;
        Ok(PyCredentialStore { store })
    }

    fn verify(&self, py: Python<'_>, username: &str, password: &str) -> bool {
        py.allow_threads(|| self.store.verify(username, password))
    }

    fn usernames(&self) -> Vec<String> {
        self.store.usernames().map(str::to_owned).collect()
    }
}

#[pymodule]
fn pullforce(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyCredentialStore>()?;
    m.add_function(wrap_pyfunction!(append_many, m)?)?;
    m.add_function(wrap_pyfunction!(last_recorded_key, m)?)?;
    m.add_function(wrap_pyfunction!(needs_same_day_confirmation, m)?)?;
    m.add_function(wrap_pyfunction!(scan_sheets, m)?)?;
    m.add_function(wrap_pyfunction!(output_file_name, m)?)?;
    Ok(())
}
