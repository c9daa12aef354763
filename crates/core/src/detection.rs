//! Detection results produced for each processed unit.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp, UnitIndex};

/// One object found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub score: f64,
    /// Bounding box as `[x1, y1, x2, y2]` in pixels.
    #[serde(rename = "box")]
    pub bbox: [f64; 4],
}

/// The durably stored output of one unit. Its presence in the result store
/// is what marks the unit as done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub job_id: JobId,
    pub unit_index: UnitIndex,
    /// Storage key of the frame the detections were computed from.
    pub unit_key: String,
    pub detections: Vec<Detection>,
    pub produced_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_uses_detector_field_names() {
        let json = r#"{"class":"person","score":0.91,"box":[1.0,2.0,30.5,40.0]}"#;
        let d: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(d.class_name, "person");
        assert_eq!(d.bbox[2], 30.5);

        let back = serde_json::to_value(&d).unwrap();
        assert_eq!(back["class"], "person");
        assert!(back.get("class_name").is_none());
    }
}
