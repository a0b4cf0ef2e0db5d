//! On-disk record formats

use serde::{Deserialize, Serialize};

/// One entry of a session's `videos.json` clip log
///
/// `start` and `end` are absolute times in seconds, on the same clock as
/// the recording's reference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipLogEntry {
    /// File name of the clip inside the session directory
    pub name: String,
    pub start: f64,
    pub end: f64,
}

impl ClipLogEntry {
    pub fn new(name: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_log_entry_json_shape() {
        let entry = ClipLogEntry::new("3000-5000.mp4", 3.0, 5.0);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["name"], "3000-5000.mp4");
        assert_eq!(json["start"], 3.0);
        assert_eq!(json["end"], 5.0);
        assert_eq!(entry.duration(), 2.0);
    }
}
