//! Stub oracles for tests and camera-free demo runs.

use video_ingest::Frame;

use crate::{DetectionOracle, DetectionSet, OracleError};

/// Returns the same detection set for every frame. `StaticOracle::empty()`
/// stands in when no model is wired up.
pub struct StaticOracle {
    detections: DetectionSet,
}

impl StaticOracle {
    pub fn new(detections: DetectionSet) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectionOracle for StaticOracle {
    fn detect(&mut self, _frame: &Frame) -> Result<DetectionSet, OracleError> {
        Ok(self.detections.clone())
    }
}

/// Cycles through a scripted sequence of detection sets, one per frame.
pub struct ScriptedOracle {
    script: Vec<DetectionSet>,
    cursor: usize,
}

impl ScriptedOracle {
    pub fn cycling(script: Vec<DetectionSet>) -> Self {
        Self { script, cursor: 0 }
    }
}

impl DetectionOracle for ScriptedOracle {
    fn detect(&mut self, _frame: &Frame) -> Result<DetectionSet, OracleError> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let set = self.script[self.cursor % self.script.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Ok(set)
    }
}
