use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::RawFrame;

/// Replays a fixed per-frame detection script.
///
/// Each call to `detect` pops the next entry. Once the script runs out the
/// backend reports empty frames.
pub struct ScriptedBackend {
    script: VecDeque<Vec<Detection>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Load a JSON fixture: an array of frames, each an array of detections.
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let script: Vec<Vec<Detection>> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse detection script {}", path.display()))?;
        Ok(Self::new(script))
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &RawFrame) -> Result<Vec<Detection>> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replays_then_runs_dry() {
        let mut backend = ScriptedBackend::new(vec![vec![Detection::person(
            0.0, 0.0, 10.0, 10.0, 0.9,
        )]]);
        let frame = RawFrame::new(Vec::new(), 16, 16, 1);
        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.remaining(), 0);
    }

    #[test]
    fn loads_json_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[[{{"bbox":{{"x1":1,"y1":2,"x2":30,"y2":40}},"class_id":0,"confidence":0.7}}],[]]"#
        )
        .unwrap();
        let backend = ScriptedBackend::from_json_path(file.path()).unwrap();
        assert_eq!(backend.remaining(), 2);
    }
}
