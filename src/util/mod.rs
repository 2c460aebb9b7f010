use log::warn;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;

use crate::camera::{CalibrationError, ProjectionModel};
use crate::optimization::{CalibrationResult, Correspondences};

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("No finite error to summarize")]
    ZeroErrorSamples,
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Failed to export report: {0}")]
    ExportError(String),
}

impl From<std::io::Error> for UtilError {
    fn from(err: std::io::Error) -> Self {
        UtilError::ExportError(err.to_string())
    }
}

impl From<serde_json::Error> for UtilError {
    fn from(err: serde_json::Error) -> Self {
        UtilError::ExportError(err.to_string())
    }
}

impl From<csv::Error> for UtilError {
    fn from(err: csv::Error) -> Self {
        UtilError::ExportError(err.to_string())
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ErrorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error Stats [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// Summarizes a list of distances.
///
/// # Errors
///
/// * [`UtilError::ZeroErrorSamples`] if `errors` is empty.
pub fn compute_error_stats(errors: &[f64]) -> Result<ErrorStats, UtilError> {
    if errors.is_empty() {
        return Err(UtilError::ZeroErrorSamples);
    }

    let n = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / n;

    let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let sum_squared: f64 = errors.iter().map(|x| x.powi(2)).sum::<f64>();
    let rmse = (sum_squared / n).sqrt();

    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    let mut sorted_errors = errors.to_vec();
    sorted_errors.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted_errors.len() % 2 == 0 {
        let mid = sorted_errors.len() / 2;
        (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
    } else {
        sorted_errors[sorted_errors.len() / 2]
    };

    Ok(ErrorStats {
        rmse,
        min,
        max,
        mean,
        stddev,
        median,
    })
}

/// One correspondence in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub index: usize,
    pub real: [f64; 3],
    pub pixel: [f64; 2],
    /// Ground position estimated from the pixel; `None` if the model could not
    /// map it
    pub predicted: Option<[f64; 3]>,
    /// Distance in meters between `predicted` and `real`
    pub error: Option<f64>,
}

/// Rows of one correspondence set plus their statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetReport {
    pub rows: Vec<ReportRow>,
    /// `None` when the set is empty or no row could be mapped
    pub stats: Option<ErrorStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParam {
    pub name: String,
    pub value: f64,
}

/// Result of a calibration run, evaluated on the training and held-out sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub model: String,
    pub params: Vec<NamedParam>,
    /// Absent when the parameters were reused from a file
    pub calibration: Option<CalibrationResult>,
    pub training: SetReport,
    pub test: SetReport,
}

fn evaluate_set<M: ProjectionModel>(model: &M, set: &Correspondences) -> Result<SetReport, UtilError> {
    let rows: Vec<ReportRow> = set
        .iter()
        .enumerate()
        .map(|(index, (real, pixel))| {
            let predicted = match model.pixel_to_real(pixel) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Correspondence {index}: {e}");
                    None
                }
            };
            ReportRow {
                index,
                real: [real.x, real.y, real.z],
                pixel: [pixel.x, pixel.y],
                predicted: predicted.map(|p| [p.x, p.y, p.z]),
                error: predicted.map(|p| (p - real).norm()),
            }
        })
        .collect();

    let errors: Vec<f64> = rows.iter().filter_map(|row| row.error).collect();
    let stats = match compute_error_stats(&errors) {
        Ok(stats) => Some(stats),
        Err(UtilError::ZeroErrorSamples) => None,
        Err(e) => return Err(e),
    };
    Ok(SetReport { rows, stats })
}

/// Maps every training and test pixel to the ground and compares with the known
/// real positions. Unmappable rows are kept with no prediction.
pub fn build_report<M: ProjectionModel>(
    model: &M,
    calibration: Option<CalibrationResult>,
    training: &Correspondences,
    test: &Correspondences,
) -> Result<CalibrationReport, UtilError> {
    let params = model
        .param_specs()
        .iter()
        .zip(model.params())
        .map(|(spec, value)| NamedParam {
            name: spec.name.to_string(),
            value,
        })
        .collect();
    Ok(CalibrationReport {
        model: model.model_name().to_string(),
        params,
        calibration,
        training: evaluate_set(model, training)?,
        test: evaluate_set(model, test)?,
    })
}

fn format_vector3(v: &Vector3<f64>) -> String {
    format!("({:8.3}, {:8.3}, {:8.3})", v.x, v.y, v.z)
}

fn display_set(title: &str, set: &SetReport) {
    println!("\n{title}:");
    if set.rows.is_empty() {
        println!("  (none)");
        return;
    }
    println!(
        "  {:>3} | {:<30} | {:<18} | {:<30} | {:>10}",
        "#", "Real (m)", "Pixel (px)", "Estimated (m)", "Error (m)"
    );
    println!("  {:-<3}-+-{:-<30}-+-{:-<18}-+-{:-<30}-+-{:-<10}", "", "", "", "", "");
    for row in &set.rows {
        let real = Vector3::from(row.real);
        let pixel = Vector2::from(row.pixel);
        let (estimated, error) = match (row.predicted, row.error) {
            (Some(p), Some(e)) => (format_vector3(&Vector3::from(p)), format!("{e:10.4}")),
            _ => ("degenerate".to_string(), format!("{:>10}", "-")),
        };
        println!(
            "  {:>3} | {:<30} | ({:7.1}, {:7.1}) | {:<30} | {}",
            row.index,
            format_vector3(&real),
            pixel.x,
            pixel.y,
            estimated,
            error
        );
    }
    if let Some(stats) = &set.stats {
        println!(
            "  Mean: {:.4} m, RMSE: {:.4} m, Median: {:.4} m, Min: {:.4} m, Max: {:.4} m, Std Dev: {:.4} m",
            stats.mean, stats.rmse, stats.median, stats.min, stats.max, stats.stddev
        );
    }
}

/// Prints the report as console tables.
pub fn display_report(report: &CalibrationReport) {
    println!("\n📊 {} model parameters:", report.model);
    for param in &report.params {
        println!("  {:<8} {:>14.6}", param.name, param.value);
    }
    match &report.calibration {
        Some(result) => println!(
            "  calibrated in {} generations ({}), error {:.6}",
            result.generations, result.termination, result.error
        ),
        None => println!("  reused from parameter file"),
    }

    display_set("🎯 Training correspondences", &report.training);
    display_set("🧪 Held-out correspondences", &report.test);
}

/// Writes the report as pretty-printed JSON.
pub fn export_report_json(report: &CalibrationReport, path: &str) -> Result<(), UtilError> {
    let mut file = File::create(path)?;
    let json = serde_json::to_string_pretty(report)?;
    file.write_all(json.as_bytes())?;
    writeln!(file)?;
    Ok(())
}

#[derive(Serialize)]
struct CsvRow<'a> {
    set: &'a str,
    index: usize,
    real_x: f64,
    real_y: f64,
    real_z: f64,
    pixel_x: f64,
    pixel_y: f64,
    predicted_x: Option<f64>,
    predicted_y: Option<f64>,
    predicted_z: Option<f64>,
    error: Option<f64>,
}

/// Writes one CSV line per correspondence, training rows first.
pub fn export_report_csv(report: &CalibrationReport, path: &str) -> Result<(), UtilError> {
    let mut writer = csv::Writer::from_path(path)?;
    for (set, rows) in [("training", &report.training.rows), ("test", &report.test.rows)] {
        for row in rows {
            writer.serialize(CsvRow {
                set,
                index: row.index,
                real_x: row.real[0],
                real_y: row.real[1],
                real_z: row.real[2],
                pixel_x: row.pixel[0],
                pixel_y: row.pixel[1],
                predicted_x: row.predicted.map(|p| p[0]),
                predicted_y: row.predicted.map(|p| p[1]),
                predicted_z: row.predicted.map(|p| p[2]),
                error: row.error,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraConfig, RayModel, Resolution};
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn model() -> RayModel {
        let camera = CameraConfig::new(
            Vector3::new(2.75, 14.13, -49.8),
            Resolution {
                width: 1280,
                height: 720,
            },
        )
        .unwrap();
        let mut model = RayModel::new(camera, Default::default());
        model
            .set_params(&[
                1.891078, 9.284310, 0.0, 0.868436, -0.488767, -0.005342, 0.973494, 0.204840,
            ])
            .unwrap();
        model
    }

    fn sets() -> (Correspondences, Correspondences) {
        let training = Correspondences::try_new(
            vec![Vector3::zeros()],
            vec![Vector2::new(614.0, 492.0)],
        )
        .unwrap();
        let test = Correspondences::held_out(
            vec![Vector3::new(-25.0, 0.0, -10.0)],
            vec![Vector2::new(170.0, 538.0)],
        )
        .unwrap();
        (training, test)
    }

    #[test]
    fn test_compute_error_stats() {
        let stats = compute_error_stats(&[1.0, 3.0, 2.0, 6.0]).unwrap();
        assert_relative_eq!(stats.mean, 3.0);
        assert_relative_eq!(stats.median, 2.5);
        assert_relative_eq!(stats.min, 1.0);
        assert_relative_eq!(stats.max, 6.0);
        assert_relative_eq!(stats.rmse, (50.0f64 / 4.0).sqrt());
        assert_relative_eq!(stats.stddev, (14.0f64 / 4.0).sqrt());
        assert!(matches!(
            compute_error_stats(&[]),
            Err(UtilError::ZeroErrorSamples)
        ));
    }

    #[test]
    fn test_build_report() {
        let model = model();
        let (training, test) = sets();
        let report = build_report(&model, None, &training, &test).unwrap();
        assert_eq!(report.model, "ray");
        assert_eq!(report.params.len(), 8);
        assert_eq!(report.params[3].name, "sx");

        let home = &report.training.rows[0];
        assert!(home.error.unwrap() < 0.5);
        assert_eq!(report.training.stats.as_ref().unwrap().mean, home.error.unwrap());
        assert!(report.test.rows[0].error.unwrap().is_finite());
    }

    #[test]
    fn test_degenerate_row_is_kept_without_prediction() {
        let mut model = model();
        // Up vector along the view direction: every pixel is unmappable.
        let cp = (Vector3::new(1.891078, 9.284310, 0.0) - Vector3::new(2.75, 14.13, -49.8))
            .normalize();
        let mut params = model.params();
        params[5..8].copy_from_slice(cp.as_slice());
        model.set_params(&params).unwrap();

        let (training, test) = sets();
        let report = build_report(&model, None, &training, &test).unwrap();
        assert_eq!(report.training.rows.len(), 1);
        assert!(report.training.rows[0].predicted.is_none());
        assert!(report.training.stats.is_none());
    }

    #[test]
    fn test_exports() {
        let dir = TempDir::new().unwrap();
        let (training, test) = sets();
        let report = build_report(&model(), None, &training, &test).unwrap();

        let json_path = dir.path().join("report.json");
        export_report_json(&report, json_path.to_str().unwrap()).unwrap();
        let parsed: CalibrationReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.params, report.params);

        let csv_path = dir.path().join("report.csv");
        export_report_csv(&report, csv_path.to_str().unwrap()).unwrap();
        let contents = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("set,index,real_x"));
        assert!(lines[2].starts_with("test,0,"));
    }
}
