use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::CaptureError;

/// Conditions that stop the process before the frame loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("model artifact not found at {}", path.display())]
    ModelMissing { path: PathBuf },
    #[error("camera {camera} could not be opened")]
    CameraUnavailable {
        camera: String,
        #[source]
        cause: CaptureError,
    },
    #[error("failed to load model {}", path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        cause: anyhow::Error,
    },
    #[error("invalid configuration")]
    Config(#[source] anyhow::Error),
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::ModelMissing { .. } => 2,
            StartupError::CameraUnavailable { .. } => 3,
            StartupError::ModelLoad { .. } | StartupError::Config(_) => 1,
        }
    }

    /// Remediation hint shown under the error.
    pub fn hint(&self) -> &'static str {
        match self {
            StartupError::ModelMissing { .. } => {
                "place the exported model at that path or pass --model <path>"
            }
            StartupError::CameraUnavailable { .. } => {
                "check that the camera is connected and not in use, or pass --source <index|path>"
            }
            StartupError::ModelLoad { .. } => {
                "make sure the file is a valid ONNX export and the matching backend feature is enabled"
            }
            StartupError::Config(_) => "fix the flag or config value named above",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_missing_model_and_camera() {
        let missing = StartupError::ModelMissing {
            path: PathBuf::from("weights/best.onnx"),
        };
        let camera = StartupError::CameraUnavailable {
            camera: "/dev/video0".to_string(),
            cause: CaptureError::Unavailable {
                uri: "/dev/video0".to_string(),
                reason: "no such device".to_string(),
            },
        };
        assert_eq!(missing.exit_code(), 2);
        assert_eq!(camera.exit_code(), 3);
        assert_ne!(missing.hint(), camera.hint());
        assert_eq!(
            missing.to_string(),
            "model artifact not found at weights/best.onnx"
        );
    }
}
