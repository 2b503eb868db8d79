use std::path::Path;

use tempfile::TempDir;

use live_detect::device::DeviceConfig;
use live_detect::error::StartupError;
use live_detect::model::{
    AccelerationState, CommandExporter, DefaultLoader, Degradation, ModelArtifacts, ModelPreparer,
};

const SCRIPT: &str = r#"{"frames": [[{"class": "cup", "confidence": 0.9, "bbox": [1, 1, 5, 5]}]]}"#;

fn write_model(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("best.json");
    std::fs::write(&path, SCRIPT).expect("write model");
    path
}

#[test]
fn failed_export_falls_back_to_the_original_with_one_notice() {
    let dir = TempDir::new().expect("temp dir");
    let model = write_model(dir.path());
    let mut preparer = ModelPreparer::new(
        ModelArtifacts::for_model(model.clone()),
        CommandExporter::new("false {input} {output}"),
        DefaultLoader::default(),
    );

    let gpu = DeviceConfig::gpu(Some("Test GPU".to_string()));
    let prepared = preparer.prepare(&gpu).expect("fallback succeeds");
    assert_eq!(prepared.artifact, model);
    assert!(!prepared.accelerated);
    assert_eq!(prepared.degraded.len(), 1);
    assert!(matches!(prepared.degraded[0], Degradation::ExportFailed { .. }));
    assert_eq!(preparer.state(), &AccelerationState::Failed);

    let again = preparer.prepare(&gpu).expect("second prepare");
    assert!(again.degraded.is_empty());
}

#[test]
fn exported_engine_that_cannot_load_is_reported_and_skipped() {
    let dir = TempDir::new().expect("temp dir");
    let model = write_model(dir.path());
    let mut preparer = ModelPreparer::new(
        ModelArtifacts::for_model(model.clone()),
        CommandExporter::new("cp {input} {output}"),
        DefaultLoader::default(),
    );

    let prepared = preparer
        .prepare(&DeviceConfig::gpu(None))
        .expect("fallback succeeds");
    let engine = dir.path().join("best.engine");
    assert!(engine.is_file());
    assert_eq!(preparer.state(), &AccelerationState::Ready(engine.clone()));
    assert_eq!(prepared.artifact, model);
    assert_eq!(prepared.degraded.len(), 1);
    match &prepared.degraded[0] {
        Degradation::AcceleratedLoadFailed { path, .. } => assert_eq!(path, &engine),
        other => panic!("unexpected notice: {other}"),
    }
}

#[test]
fn cpu_runs_never_touch_the_exporter() {
    let dir = TempDir::new().expect("temp dir");
    let model = write_model(dir.path());
    let mut preparer = ModelPreparer::new(
        ModelArtifacts::for_model(model),
        CommandExporter::new("cp {input} {output}"),
        DefaultLoader::default(),
    );

    let prepared = preparer.prepare(&DeviceConfig::cpu()).expect("cpu load");
    assert!(prepared.degraded.is_empty());
    assert!(!dir.path().join("best.engine").exists());
    assert_eq!(preparer.state(), &AccelerationState::NotAttempted);
}

#[test]
fn missing_original_is_reported_before_export() {
    let dir = TempDir::new().expect("temp dir");
    let mut preparer = ModelPreparer::new(
        ModelArtifacts::for_model(dir.path().join("absent.onnx")),
        CommandExporter::new("cp {input} {output}"),
        DefaultLoader::default(),
    );

    let err = preparer.prepare(&DeviceConfig::gpu(None)).unwrap_err();
    assert!(matches!(err, StartupError::ModelMissing { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(!dir.path().join("absent.engine").exists());
}
