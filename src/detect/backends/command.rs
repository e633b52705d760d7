use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::detect::{PlateDetector, PlateReading};
use crate::process::run_with_timeout;

/// Output expected from an external recognizer.
#[derive(Debug, Deserialize)]
struct CommandOutput {
    #[serde(default)]
    plate: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Runs an external recognizer program per frame.
///
/// The JPEG is written to the program's stdin. It answers on stdout with
/// `{"plate": "...", "confidence": 0.0..1.0}`; empty output, `null` or an empty plate
/// mean no detection. The program is killed once the detection timeout elapses.
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }
}

impl PlateDetector for CommandDetector {
    fn name(&self) -> &'static str {
        "command"
    }

    fn detect(&mut self, image: &[u8]) -> Result<Option<PlateReading>> {
        let stdout = run_with_timeout(&self.program, &self.args, Some(image), self.timeout)?;
        parse_output(&stdout)
    }
}

fn parse_output(stdout: &[u8]) -> Result<Option<PlateReading>> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() || text == "null" {
        return Ok(None);
    }
    let output: CommandOutput = serde_json::from_str(text)
        .map_err(|e| anyhow!("unparseable recognizer output '{}': {}", text, e))?;
    Ok(output
        .plate
        .and_then(|plate| PlateReading::new(plate, output.confidence.unwrap_or(0.0))))
}
