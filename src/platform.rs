//! Host platform detection and default camera resolution.
//!
//! The resolver maps the running operating system to a camera source and the
//! capture hints that go with it:
//!
//! | OS class        | source          | hints                    |
//! |-----------------|-----------------|--------------------------|
//! | Windows, macOS  | index `0`       | none                     |
//! | Linux, WSL      | `/dev/video0`   | MJPEG, 1280x720 @ 30 fps |
//!
//! Hints are requests. The capture backend may settle on other values and the
//! caller must report what the device actually accepted.

use std::fmt;

/// Default V4L2 node used on Linux and WSL hosts.
pub const LINUX_CAMERA_PATH: &str = "/dev/video0";

/// Default enumerated camera on Windows and macOS hosts.
pub const DEFAULT_CAMERA_INDEX: i32 = 0;

const V4L2_PATH_PREFIX: &str = "/dev/video";
const KERNEL_RELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OsClass {
    Windows,
    MacOs,
    Linux,
    Wsl,
}

impl OsClass {
    pub fn as_str(self) -> &'static str {
        match self {
            OsClass::Windows => "windows",
            OsClass::MacOs => "macos",
            OsClass::Linux => "linux",
            OsClass::Wsl => "wsl",
        }
    }
}

impl fmt::Display for OsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where frames come from: an enumerated device or a path-like identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceId {
    Index(i32),
    Path(String),
}

impl SourceId {
    /// Parse a user-supplied source. Bare integers are device indices.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i32>() {
            Ok(index) => SourceId::Index(index),
            Err(_) => SourceId::Path(trimmed.to_string()),
        }
    }

    /// True for `/dev/videoN` style nodes.
    pub fn is_v4l2_path(&self) -> bool {
        matches!(self, SourceId::Path(path) if path.starts_with(V4L2_PATH_PREFIX))
    }

    /// A camera rather than a recording. An empty read from a live device is
    /// a capture failure, not the end of the stream.
    pub fn is_live_device(&self) -> bool {
        matches!(self, SourceId::Index(_)) || self.is_v4l2_path()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Index(index) => write!(f, "{index}"),
            SourceId::Path(path) => f.write_str(path),
        }
    }
}

/// Four-character pixel codec requested from the capture device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    Mjpeg,
    Yuyv,
    Rgb24,
}

impl Codec {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Codec::Mjpeg => *b"MJPG",
            Codec::Yuyv => *b"YUYV",
            Codec::Rgb24 => *b"RGB3",
        }
    }

    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        match &code {
            b"MJPG" => Some(Codec::Mjpeg),
            b"YUYV" => Some(Codec::Yuyv),
            b"RGB3" => Some(Codec::Rgb24),
            _ => None,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        f.write_str(&String::from_utf8_lossy(&code))
    }
}

/// Capture configuration hint. Every field is optional because Windows and
/// macOS hosts leave the device at its defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CaptureRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub codec: Option<Codec>,
}

impl CaptureRequest {
    /// MJPEG 1280x720 @ 30 fps, requested for V4L2 nodes.
    pub fn v4l2_default() -> Self {
        Self {
            width: Some(1280),
            height: Some(720),
            fps: Some(30),
            codec: Some(Codec::Mjpeg),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.fps.is_none() && self.codec.is_none()
    }
}

/// Camera selection for one process run. Built once, read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CameraDescriptor {
    os_class: OsClass,
    source: SourceId,
    request: CaptureRequest,
}

impl CameraDescriptor {
    pub fn new(os_class: OsClass, source: SourceId, request: CaptureRequest) -> Self {
        Self {
            os_class,
            source,
            request,
        }
    }

    pub fn os_class(&self) -> OsClass {
        self.os_class
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    /// Same host, different source. Hints follow the policy for the new source.
    pub fn with_source(&self, source: SourceId) -> Self {
        let request = request_for(&source);
        Self {
            os_class: self.os_class,
            source,
            request,
        }
    }
}

/// Read access to the facts the resolver depends on.
pub trait OsProbe {
    /// Value in the style of `std::env::consts::OS` ("linux", "windows", "macos").
    fn os_name(&self) -> &str;

    /// Kernel release string, if the platform exposes one.
    fn kernel_release(&self) -> Option<String>;
}

/// Probe for the running host.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostProbe;

impl OsProbe for HostProbe {
    fn os_name(&self) -> &str {
        std::env::consts::OS
    }

    fn kernel_release(&self) -> Option<String> {
        std::fs::read_to_string(KERNEL_RELEASE_PATH)
            .ok()
            .map(|release| release.trim().to_string())
    }
}

/// Classify the host. Non-Windows, non-macOS systems are treated as Linux,
/// with WSL recognised by a "microsoft" kernel release.
pub fn detect_os_class(probe: &dyn OsProbe) -> OsClass {
    match probe.os_name() {
        "windows" => OsClass::Windows,
        "macos" => OsClass::MacOs,
        _ => {
            let is_wsl = probe
                .kernel_release()
                .map(|release| release.to_lowercase().contains("microsoft"))
                .unwrap_or(false);
            if is_wsl {
                OsClass::Wsl
            } else {
                OsClass::Linux
            }
        }
    }
}

/// Default source for an OS class.
pub fn default_source(os_class: OsClass) -> SourceId {
    match os_class {
        OsClass::Windows | OsClass::MacOs => SourceId::Index(DEFAULT_CAMERA_INDEX),
        OsClass::Linux | OsClass::Wsl => SourceId::Path(LINUX_CAMERA_PATH.to_string()),
    }
}

fn request_for(source: &SourceId) -> CaptureRequest {
    if source.is_v4l2_path() {
        CaptureRequest::v4l2_default()
    } else {
        CaptureRequest::default()
    }
}

/// Resolve the camera for the probed host.
pub fn resolve(probe: &dyn OsProbe) -> CameraDescriptor {
    let os_class = detect_os_class(probe);
    let source = default_source(os_class);
    let request = request_for(&source);
    CameraDescriptor::new(os_class, source, request)
}

/// Resolve the camera for the running host.
pub fn resolve_host() -> CameraDescriptor {
    resolve(&HostProbe)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        os: &'static str,
        release: Option<&'static str>,
    }

    impl OsProbe for FixedProbe {
        fn os_name(&self) -> &str {
            self.os
        }

        fn kernel_release(&self) -> Option<String> {
            self.release.map(str::to_string)
        }
    }

    #[test]
    fn windows_and_macos_use_first_index_without_hints() {
        for os in ["windows", "macos"] {
            let descriptor = resolve(&FixedProbe { os, release: None });
            assert_eq!(descriptor.source(), &SourceId::Index(0));
            assert!(descriptor.request().is_empty());
        }
    }

    #[test]
    fn linux_uses_v4l2_path_with_mjpeg_hints() {
        let descriptor = resolve(&FixedProbe {
            os: "linux",
            release: Some("6.5.0-generic"),
        });
        assert_eq!(descriptor.os_class(), OsClass::Linux);
        assert_eq!(
            descriptor.source(),
            &SourceId::Path("/dev/video0".to_string())
        );
        let request = descriptor.request();
        assert_eq!(request.codec, Some(Codec::Mjpeg));
        assert_eq!((request.width, request.height), (Some(1280), Some(720)));
        assert_eq!(request.fps, Some(30));
    }

    #[test]
    fn wsl_detected_from_kernel_release_case_insensitively() {
        let probe = FixedProbe {
            os: "linux",
            release: Some("5.15.90.1-Microsoft-standard-WSL2"),
        };
        assert_eq!(detect_os_class(&probe), OsClass::Wsl);
        assert!(resolve(&probe).source().is_v4l2_path());
    }

    #[test]
    fn missing_kernel_release_means_plain_linux() {
        let probe = FixedProbe {
            os: "freebsd",
            release: None,
        };
        assert_eq!(detect_os_class(&probe), OsClass::Linux);
    }

    #[test]
    fn resolution_is_deterministic() {
        let probe = FixedProbe {
            os: "linux",
            release: Some("microsoft"),
        };
        assert_eq!(resolve(&probe), resolve(&probe));
        assert_eq!(resolve_host(), resolve_host());
    }

    #[test]
    fn source_override_follows_policy_hints() {
        let base = resolve(&FixedProbe {
            os: "linux",
            release: None,
        });
        let file = base.with_source(SourceId::parse("clip.mp4"));
        assert!(file.request().is_empty());
        let node = base.with_source(SourceId::parse("/dev/video2"));
        assert_eq!(node.request(), &CaptureRequest::v4l2_default());
        assert_eq!(SourceId::parse(" 1 "), SourceId::Index(1));
    }

    #[test]
    fn fourcc_round_trips_known_codecs() {
        assert_eq!(Codec::from_fourcc(*b"MJPG"), Some(Codec::Mjpeg));
        assert_eq!(Codec::from_fourcc(*b"H264"), None);
        assert_eq!(Codec::Mjpeg.to_string(), "MJPG");
    }

    #[test]
    fn only_cameras_count_as_live_devices() {
        assert!(SourceId::Index(0).is_live_device());
        assert!(SourceId::parse("/dev/video0").is_live_device());
        assert!(!SourceId::parse("clip.mp4").is_live_device());
        assert!(!SourceId::parse("stub://cam").is_live_device());
    }
}
