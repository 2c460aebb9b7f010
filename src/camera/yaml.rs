//! `cam0` model-file layout shared by the projection models.
//!
//! ```yaml
//! cam0:
//!   camera_model: ray
//!   camera_position: [2.75, 14.13, -49.8]
//!   resolution: [1280, 720]
//!   parameters: [...]
//! ```
//!
//! Models may add their own keys next to `parameters`.

use std::fs;
use std::io::Write;

use nalgebra::Vector3;
use yaml_rust::{Yaml, YamlLoader};

use super::{CalibrationError, CameraConfig, Resolution};

/// Writes a `cam0` document with the common keys followed by `extra`.
pub(crate) fn write_cam0(
    path: &str,
    model_name: &str,
    camera: &CameraConfig,
    parameters: &[f64],
    extra: Vec<(&str, Vec<f64>)>,
) -> Result<(), CalibrationError> {
    let to_value = |values: Vec<f64>| {
        serde_yaml::to_value(values).map_err(|e| CalibrationError::YamlError(e.to_string()))
    };
    let position = camera.position();
    let resolution = camera.resolution();

    let mut cam0 = serde_yaml::Mapping::new();
    cam0.insert(
        serde_yaml::Value::String("camera_model".to_string()),
        serde_yaml::Value::String(model_name.to_string()),
    );
    cam0.insert(
        serde_yaml::Value::String("camera_position".to_string()),
        to_value(vec![position.x, position.y, position.z])?,
    );
    cam0.insert(
        serde_yaml::Value::String("resolution".to_string()),
        serde_yaml::to_value(vec![resolution.width, resolution.height])
            .map_err(|e| CalibrationError::YamlError(e.to_string()))?,
    );
    cam0.insert(
        serde_yaml::Value::String("parameters".to_string()),
        to_value(parameters.to_vec())?,
    );
    for (key, values) in extra {
        cam0.insert(serde_yaml::Value::String(key.to_string()), to_value(values)?);
    }

    let yaml = serde_yaml::Value::Mapping(serde_yaml::Mapping::from_iter([(
        serde_yaml::Value::String("cam0".to_string()),
        serde_yaml::Value::Mapping(cam0),
    )]));
    let yaml_string =
        serde_yaml::to_string(&yaml).map_err(|e| CalibrationError::YamlError(e.to_string()))?;

    let mut file = fs::File::create(path)?;
    file.write_all(yaml_string.as_bytes())?;
    Ok(())
}

/// Parsed `cam0` document.
pub(crate) struct Cam0Document {
    pub camera: CameraConfig,
    pub parameters: Vec<f64>,
    node: Yaml,
}

impl Cam0Document {
    /// Reads `path` and checks that `camera_model` equals `model_name`.
    pub fn load(path: &str, model_name: &str) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CalibrationError::YamlError(format!("'{path}' is empty")))?;
        let node = doc["cam0"].clone();

        let found = node["camera_model"].as_str().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'camera_model'".to_string())
        })?;
        if found != model_name {
            return Err(CalibrationError::InvalidParams(format!(
                "expected a '{model_name}' model, found '{found}'"
            )));
        }

        let position = float_list(&node, "camera_position", Some(3))?;
        let resolution_yaml = node["resolution"].as_vec().ok_or_else(|| {
            CalibrationError::InvalidParams("YAML missing 'resolution' or not an array".to_string())
        })?;
        if resolution_yaml.len() != 2 {
            return Err(CalibrationError::InvalidParams(
                "'resolution' must hold width and height".to_string(),
            ));
        }
        let resolution = Resolution {
            width: pixel_count(&resolution_yaml[0], "width")?,
            height: pixel_count(&resolution_yaml[1], "height")?,
        };
        let camera = CameraConfig::new(
            Vector3::new(position[0], position[1], position[2]),
            resolution,
        )?;
        let parameters = float_list(&node, "parameters", None)?;

        Ok(Self {
            camera,
            parameters,
            node,
        })
    }

    /// Reads an additional 3-vector written through `extra` in [`write_cam0`].
    pub fn vector3(&self, key: &str) -> Result<Vector3<f64>, CalibrationError> {
        let values = float_list(&self.node, key, Some(3))?;
        Ok(Vector3::new(values[0], values[1], values[2]))
    }
}

fn float_list(
    node: &Yaml,
    key: &str,
    expected: Option<usize>,
) -> Result<Vec<f64>, CalibrationError> {
    let items = node[key].as_vec().ok_or_else(|| {
        CalibrationError::InvalidParams(format!("YAML missing '{key}' or not an array"))
    })?;
    if let Some(expected) = expected {
        if items.len() != expected {
            return Err(CalibrationError::InvalidParams(format!(
                "'{key}' must hold {expected} values, found {}",
                items.len()
            )));
        }
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            // Integral values are scanned as integers by yaml-rust.
            item.as_f64()
                .or_else(|| item.as_i64().map(|v| v as f64))
                .ok_or_else(|| {
                    CalibrationError::InvalidParams(format!("Invalid {key}[{i}]: not a float"))
                })
        })
        .collect()
}

fn pixel_count(item: &Yaml, what: &str) -> Result<u32, CalibrationError> {
    let value = item.as_i64().ok_or_else(|| {
        CalibrationError::InvalidParams(format!("Invalid {what}: not an integer"))
    })?;
    u32::try_from(value).map_err(|_| {
        CalibrationError::InvalidParams(format!("Invalid {what}: {value} is out of range"))
    })
}
