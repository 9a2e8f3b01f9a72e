//! Report generation for file probe results

use serde::Serialize;
use std::path::Path;

use crate::probe::ProbeInfo;
use crate::types::FileFormat;

/// Probe summary printed by the `check_length` mode.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub ts_time: String,
    pub filename: String,
    pub format: &'static str,
    pub packet_size: usize,
    pub file_size: u64,
    pub packets: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_ms: Option<u32>,
}

impl ProbeReport {
    pub fn new(path: &Path, info: &ProbeInfo) -> Self {
        let m2ts = info.format == FileFormat::M2ts;
        Self {
            ts_time: chrono::Utc::now().to_rfc3339(),
            filename: path.display().to_string(),
            format: info.format.name(),
            packet_size: info.format.packet_size(),
            file_size: info.file_size,
            packets: info.file_size / info.format.packet_size() as u64,
            start_time_ms: m2ts.then_some(info.start_time_ms),
            length_ms: m2ts.then_some(info.length_ms),
        }
    }

    /// Pretty-printed JSON for CLI output.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }
}
