//! Scripted media tool for tests.
//!
//! "Videos" are small JSON files, `{"duration": 25.0}`. Probing reads them,
//! cutting and rendering write new ones. Renders can be told to fail for
//! sources whose name contains a given string.

use std::path::Path;
use std::sync::Mutex;

use khive_shared::{KhiveError, Result};

use crate::{CutRequest, MediaTool, VerticalRequest};

const TOOL: &str = "scripted-media";

#[derive(Debug, Default)]
pub struct ScriptedMedia {
    fail_renders: Vec<String>,
    renders: Mutex<Vec<VerticalRequest>>,
    cuts: Mutex<Vec<CutRequest>>,
}

impl ScriptedMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every render whose source file name contains `fragment`.
    pub fn fail_render_of(mut self, fragment: impl Into<String>) -> Self {
        self.fail_renders.push(fragment.into());
        self
    }

    /// Write a scripted video of `duration` seconds.
    pub fn write_video(path: &Path, duration: f64) -> std::io::Result<()> {
        std::fs::write(path, serde_json::json!({ "duration": duration }).to_string())
    }

    pub fn renders(&self) -> Vec<VerticalRequest> {
        self.renders.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn cuts(&self) -> Vec<CutRequest> {
        self.cuts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn read(path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path).map_err(|e| KhiveError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| KhiveError::tool(TOOL, format!("{}: not a video ({e})", path.display())))
    }
}

impl MediaTool for ScriptedMedia {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        Self::read(path)?["duration"]
            .as_f64()
            .ok_or_else(|| KhiveError::tool(TOOL, format!("{}: no duration", path.display())))
    }

    fn probe_video_stream(&self, path: &Path) -> Result<bool> {
        let value = Self::read(path)?;
        Ok(value["video"].as_bool().unwrap_or(true))
    }

    fn cut(&self, request: &CutRequest) -> Result<()> {
        Self::read(&request.source)?;
        Self::write_video(&request.output, request.duration)
            .map_err(|e| KhiveError::io(&request.output, e))?;
        if let Ok(mut cuts) = self.cuts.lock() {
            cuts.push(request.clone());
        }
        Ok(())
    }

    fn render_vertical(&self, request: &VerticalRequest) -> Result<()> {
        let name = request
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.fail_renders.iter().any(|f| name.contains(f.as_str())) {
            return Err(KhiveError::tool(TOOL, format!("scripted render failure for {name}")));
        }

        Self::read(&request.source)?;
        Self::write_video(&request.output, request.duration)
            .map_err(|e| KhiveError::io(&request.output, e))?;
        if let Ok(mut renders) = self.renders.lock() {
            renders.push(request.clone());
        }
        Ok(())
    }
}
