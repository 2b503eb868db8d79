use anyhow::Result;

use live_detect::detect::{BoundingBox, DetectionFilterPipeline, OutputDetail, RawDetection, StubBackend};
use live_detect::device::{DeviceConfig, InferenceDevice};
use live_detect::ingest::{CameraSource, FrameSource};
use live_detect::platform::{self, CameraDescriptor, Codec, OsClass, OsProbe, SourceId};
use live_detect::runner::{Runner, StopFlag, StopReason};
use live_detect::sink::ConsoleSink;

struct FakeHost {
    os: &'static str,
    release: Option<&'static str>,
}

impl OsProbe for FakeHost {
    fn os_name(&self) -> &str {
        self.os
    }

    fn kernel_release(&self) -> Option<String> {
        self.release.map(str::to_string)
    }
}

fn stub_camera(uri: &str) -> CameraDescriptor {
    platform::resolve(&FakeHost {
        os: "macos",
        release: None,
    })
    .with_source(SourceId::parse(uri))
}

fn cup_pipeline(detail: OutputDetail) -> Result<DetectionFilterPipeline> {
    let cup = RawDetection::new(41, "cup", 0.82, BoundingBox::new(10.0, 10.0, 50.0, 50.0));
    let faint = RawDetection::new(0, "person", 0.40, BoundingBox::new(0.0, 0.0, 20.0, 80.0));
    DetectionFilterPipeline::new(
        Box::new(StubBackend::scripted(vec![vec![cup, faint], vec![]])),
        0.6,
        detail,
    )
}

#[test]
fn cup_scenario_reports_one_detection_per_scripted_frame() -> Result<()> {
    let mut camera = CameraSource::open(&stub_camera("stub://desk?frames=4&width=100&height=100"))?;
    assert_eq!(camera.effective().width, 100);

    let mut pipeline = cup_pipeline(OutputDetail::Full)?;
    let mut sink = ConsoleSink::new(Vec::new(), OutputDetail::Full).with_status_interval(2);
    let summary = Runner::new(StopFlag::new()).run(
        &mut camera,
        &mut pipeline,
        &mut sink,
    )?;

    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.detections, 2);
    assert_eq!(camera.stats().frames_captured, 4);

    let out = String::from_utf8(sink.into_inner())?;
    let expected_first = "Frame 1: 1 object(s) detected\n  [1] cup (confidence: 82.00%)\n      position: (10.0, 10.0) -> (50.0, 50.0)\n      center: (30.0, 30.0)\n      size: 40.0 x 40.0 px\n";
    assert!(out.starts_with(expected_first), "unexpected output:\n{out}");
    assert!(out.contains("Frame 2: no detections"));
    assert!(out.contains("Frame 3: 1 object(s) detected"));
    assert!(out.contains("Frame 4: no detections"));
    assert!(!out.contains("person"));
    Ok(())
}

#[test]
fn minimal_detail_skips_derived_metrics() -> Result<()> {
    let mut camera = CameraSource::open(&stub_camera("stub://desk?frames=1&width=64&height=64"))?;
    let mut pipeline =
        cup_pipeline(OutputDetail::Minimal)?.on_device(DeviceConfig::gpu(Some("Test GPU".to_string())));
    let frame = camera.read_frame()?.expect("one frame");

    let detections = pipeline.step(&frame)?;
    assert_eq!(detections.len(), 1);
    assert!(detections[0].metrics.is_none());
    assert_eq!(detections[0].class_name(), "cup");
    assert_eq!(pipeline.device().device, InferenceDevice::Gpu);
    Ok(())
}

#[test]
fn confidence_equal_to_threshold_is_kept() -> Result<()> {
    let at = RawDetection::new(2, "car", 0.5, BoundingBox::new(0.0, 0.0, 4.0, 4.0));
    let below = RawDetection::new(2, "car", 0.499, BoundingBox::new(0.0, 0.0, 4.0, 4.0));
    let mut pipeline = DetectionFilterPipeline::new(
        Box::new(StubBackend::scripted(vec![vec![below, at.clone()]])),
        0.5,
        OutputDetail::Full,
    )?;
    let mut camera = CameraSource::open(&stub_camera("stub://desk?frames=1&width=8&height=8"))?;
    let frame = camera.read_frame()?.expect("one frame");

    let kept = pipeline.step(&frame)?;
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].raw, at);
    Ok(())
}

#[test]
fn resolver_is_deterministic_per_host() {
    let linux = FakeHost {
        os: "linux",
        release: Some("6.8.0-45-generic"),
    };
    let first = platform::resolve(&linux);
    assert_eq!(first, platform::resolve(&linux));
    assert_eq!(first.os_class(), OsClass::Linux);
    assert_eq!(first.request().codec, Some(Codec::Mjpeg));

    let wsl = platform::resolve(&FakeHost {
        os: "linux",
        release: Some("5.15.153.1-microsoft-standard-WSL2"),
    });
    assert_eq!(wsl.os_class(), OsClass::Wsl);
    assert_eq!(wsl.source(), first.source());

    let windows = platform::resolve(&FakeHost {
        os: "windows",
        release: None,
    });
    assert_eq!(windows.source(), &SourceId::Index(0));
    assert!(windows.request().is_empty());
}

#[test]
fn unavailable_camera_fails_to_open() {
    let err = CameraSource::open(&stub_camera("stub://unavailable")).err().expect("open fails");
    assert!(err.to_string().contains("unavailable"));
}
