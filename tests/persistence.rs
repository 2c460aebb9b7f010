use approx::assert_relative_eq;
use ground_plane_tools::camera::{
    CalibrationError, CameraConfig, PolarModel, PovBox, ProjectionModel, RayModel, Resolution,
};
use ground_plane_tools::io::params::{load_params, save_params};
use ground_plane_tools::io::CalibrationInput;
use ground_plane_tools::optimization::CalibrationConfig;
use nalgebra::{Vector2, Vector3};
use std::fs;
use tempfile::TempDir;

fn camera() -> CameraConfig {
    CameraConfig::new(
        Vector3::new(2.75, 14.13, -49.8),
        Resolution {
            width: 1280,
            height: 720,
        },
    )
    .unwrap()
}

#[test]
fn test_ray_model_yaml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ray.yaml");
    let path = path.to_str().unwrap();

    let pov_box = PovBox::new(Vector3::new(-5.0, 0.0, 0.0), Vector3::new(5.0, 15.0, 2.0)).unwrap();
    let mut model = RayModel::new(camera(), pov_box);
    model
        .set_params(&[1.5, 9.0, 1.0, 0.87, -0.49, -0.01, 0.97, 0.2])
        .unwrap();
    model.save_to_yaml(path).unwrap();

    let loaded = RayModel::load_from_yaml(path).unwrap();
    assert_eq!(loaded.pov_box(), &pov_box);
    assert_eq!(loaded.camera(), model.camera());
    for (a, b) in loaded.params().iter().zip(model.params()) {
        assert_relative_eq!(*a, b, epsilon = 1e-12);
    }

    let contents = fs::read_to_string(path).unwrap();
    assert!(contents.contains("cam0"));
    assert!(contents.contains("camera_model: ray"));
}

#[test]
fn test_polar_model_yaml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("polar.yaml");
    let path = path.to_str().unwrap();

    let mut model = PolarModel::new(camera(), Vector3::new(1.416883, 0.0, 19.396646)).unwrap();
    model
        .set_params(&[0.785406, 80.543961, 10.155653, 6.049213, 624.139771, 1233.761353])
        .unwrap();
    model.save_to_yaml(path).unwrap();

    let loaded = PolarModel::load_from_yaml(path).unwrap();
    assert_relative_eq!(*loaded.reference_pov(), *model.reference_pov(), epsilon = 1e-12);
    let real = Vector3::new(-5.0, 0.0, -20.0);
    assert_relative_eq!(
        loaded.real_to_pixel(&real).unwrap(),
        model.real_to_pixel(&real).unwrap(),
        epsilon = 1e-9
    );
}

#[test]
fn test_yaml_of_another_model_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ray.yaml");
    let path = path.to_str().unwrap();
    RayModel::new(camera(), PovBox::default())
        .save_to_yaml(path)
        .unwrap();

    assert!(matches!(
        PolarModel::load_from_yaml(path),
        Err(CalibrationError::InvalidParams(_))
    ));
}

#[test]
fn test_params_reuse_cycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("field.ray.params");
    assert!(!path.exists());

    let values = [1.891078, 9.28431, 0.0, 0.868436, -0.488767, -0.005342, 0.973494, 0.20484];
    save_params(&path, &values).unwrap();
    let loaded = load_params(&path, values.len()).unwrap();
    assert_eq!(loaded, values.to_vec());

    let mut model = RayModel::new(camera(), PovBox::default());
    model.set_params(&loaded).unwrap();
    let home = model.pixel_to_real(&Vector2::new(614.0, 492.0)).unwrap();
    assert!(home.norm() < 0.5);

    // A file written for the polar model cannot be reused for the ray model.
    save_params(&path, &[0.78, 80.5, 10.2, 6.0, 624.1, 1233.8]).unwrap();
    assert!(matches!(
        load_params(&path, 8),
        Err(CalibrationError::PersistenceFailure(_))
    ));
}

#[test]
fn test_input_file_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("baseball.txt");
    fs::write(
        &path,
        "# baseball field, bases 27.431 m apart\n\
         3 2.75 14.13 -49.8\n\
         2 1280 720\n\
         4\n\
         3 0 0 0                 2 614 492\n\
         3 19.396 0 19.396       2 824 438\n\
         3 0 0 38.793            2 631 405\n\
         3 -19.396 0 19.396      2 427 436\n\
         4\n\
         3 -5 0 -20              2 473 620\n\
         3 -25 0 -10             2 170 538\n\
         3 35 0 50               2 884 394\n\
         3 -5 0 12               2 550 455\n",
    )
    .unwrap();

    let input = CalibrationInput::load(path.to_str().unwrap()).unwrap();
    assert_eq!(input.camera, camera());
    assert_eq!(input.training.len(), 4);
    assert_eq!(input.test.len(), 4);
    assert_eq!(input.test.real()[2], Vector3::new(35.0, 0.0, 50.0));
}

#[test]
fn test_missing_input_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.txt");
    assert!(matches!(
        CalibrationInput::load(path.to_str().unwrap()),
        Err(CalibrationError::IOError(_))
    ));
}

#[test]
fn test_config_from_yaml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "population_size: 60\nelite_count: 10\nparallel: false\n").unwrap();
    let config = CalibrationConfig::load_from_yaml(path.to_str().unwrap()).unwrap();
    assert_eq!(config.population_size, 60);
    assert_eq!(config.max_generations, 100_000);
    assert!(!config.parallel);

    fs::write(&path, "population_size: 10\nelite_count: 10\n").unwrap();
    assert!(matches!(
        CalibrationConfig::load_from_yaml(path.to_str().unwrap()),
        Err(CalibrationError::InvalidParams(_))
    ));
}
