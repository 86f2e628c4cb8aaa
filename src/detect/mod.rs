mod backend;
mod backends;
mod postprocess;
mod result;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::DetectorBackend;
pub use backends::{ScriptedBackend, StubBackend};
pub use postprocess::{postprocess, DetectParams};
pub use result::{BoundingBox, ClassId, Detection, PERSON_CLASS_ID};

#[cfg(feature = "backend-tract")]
pub use backends::{decode_yolov8, TractBackend};

/// Backend names accepted by [`build_backend`].
pub const BACKEND_NAMES: &[&str] = &["stub", "scripted", "tract"];

/// Construct the configured detector backend.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new())),
        "scripted" => {
            let path = settings
                .script_path
                .as_ref()
                .ok_or_else(|| anyhow!("detector backend 'scripted' requires script_path"))?;
            Ok(Box::new(ScriptedBackend::from_json_path(path)?))
        }
        "tract" => build_tract(settings),
        other => Err(anyhow!(
            "unknown detector backend '{}': expected one of {}",
            other,
            BACKEND_NAMES.join(", ")
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
    let backend = TractBackend::new(path, settings.input_width, settings.input_height)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' requires the 'backend-tract' feature"
    ))
}
