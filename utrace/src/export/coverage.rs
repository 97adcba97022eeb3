use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ReportError;

/// Function coverage of one trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Every function a probe was attached to
    pub funcs_traced: Vec<String>,
    /// Functions observed at least once
    pub funcs_ack: Vec<String>,
    /// `funcs_ack / funcs_traced`, 0.0 to 1.0
    pub cov_by_func: f64,
    pub exe_path: String,
}

impl CoverageReport {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(exe_path: &str, funcs_traced: Vec<String>, funcs_ack: Vec<String>) -> Self {
        let cov_by_func = if funcs_traced.is_empty() {
            0.0
        } else {
            funcs_ack.len() as f64 / funcs_traced.len() as f64
        };
        Self { funcs_traced, funcs_ack, cov_by_func, exe_path: exe_path.to_string() }
    }

    /// Serialize as one JSON document followed by a newline
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), ReportError> {
        serde_json::to_writer(&mut writer, self)?;
        writer.write_all(b"\n").map_err(serde_json::Error::io)?;
        writer.flush().map_err(serde_json::Error::io)?;
        Ok(())
    }
}

/// Write `report` to `path`, replacing any existing file
///
/// # Errors
/// Returns an error if the file can't be created or written
pub fn write_report(report: &CoverageReport, path: &Path) -> Result<(), ReportError> {
    let file = File::create(path).map_err(|source| ReportError::WriteFailed {
        path: path.display().to_string(),
        source,
    })?;
    report.write_to(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_fraction() {
        let report = CoverageReport::new(
            "/bin/app",
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec!["b".into()],
        );
        assert!((report.cov_by_func - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_trace_has_zero_coverage() {
        let report = CoverageReport::new("/bin/app", vec![], vec![]);
        assert!(report.cov_by_func.abs() < f64::EPSILON);
    }

    #[test]
    fn test_field_names() {
        let report = CoverageReport::new("/bin/app", vec!["main".into()], vec!["main".into()]);
        let mut out = Vec::new();
        report.write_to(&mut out).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["funcs_traced"], serde_json::json!(["main"]));
        assert_eq!(value["funcs_ack"], serde_json::json!(["main"]));
        assert_eq!(value["cov_by_func"], serde_json::json!(1.0));
        assert_eq!(value["exe_path"], "/bin/app");
        assert!(out.ends_with(b"\n"));
    }
}
