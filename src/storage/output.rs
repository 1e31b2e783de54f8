//! Extracted records of one session

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Single or double play, supplied by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlayStyle {
    Sp,
    Dp,
}

impl PlayStyle {
    /// Code stored in output records
    pub fn code(&self) -> u8 {
        match self {
            PlayStyle::Sp => 0,
            PlayStyle::Dp => 1,
        }
    }
}

impl fmt::Display for PlayStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayStyle::Sp => write!(f, "SP"),
            PlayStyle::Dp => write!(f, "DP"),
        }
    }
}

impl FromStr for PlayStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sp" => Ok(PlayStyle::Sp),
            "dp" => Ok(PlayStyle::Dp),
            _ => Err(format!("unknown play style '{s}' (expected sp or dp)")),
        }
    }
}

/// One chart's radar values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub music_id: u32,
    /// Difficulty code, 0 (beginner) to 4 (leggendaria)
    pub difficulty: u8,
    /// 0 = SP, 1 = DP
    pub play_style: u8,
    pub notes: f64,
    pub chord: f64,
    pub peak: f64,
    pub charge: f64,
    pub scratch: f64,
    pub soflan: f64,
}

#[derive(Serialize)]
struct OutputDocument<'a> {
    data: &'a [OutputRecord],
}

/// Records ordered by music id, unique on (music id, difficulty)
#[derive(Debug, Default)]
pub struct OutputStore {
    records: Vec<OutputRecord>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, keeping the order; an existing key leaves the store untouched
    pub fn commit(&mut self, record: OutputRecord) -> PipelineResult<()> {
        if self.contains(record.music_id, record.difficulty) {
            warn!(
                "Rejected duplicate record for music {} difficulty {}",
                record.music_id, record.difficulty
            );
            return Err(PipelineError::DuplicateKey {
                music_id: record.music_id,
                difficulty: record.difficulty,
            });
        }

        // After every record with an id <= ours, so equal ids keep commit order
        let at = self.records.partition_point(|r| r.music_id <= record.music_id);
        info!(
            "Committed record for music {} difficulty {} ({} total)",
            record.music_id,
            record.difficulty,
            self.records.len() + 1
        );
        self.records.insert(at, record);
        Ok(())
    }

    pub fn contains(&self, music_id: u32, difficulty: u8) -> bool {
        self.records
            .iter()
            .any(|r| r.music_id == music_id && r.difficulty == difficulty)
    }

    /// Ordered snapshot
    pub fn records(&self) -> Vec<OutputRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `{"data": [...]}` document
    pub fn to_json(&self) -> PipelineResult<String> {
        let document = OutputDocument { data: &self.records };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Write the JSON document to `path`
    pub fn save_json(&self, path: &Path) -> PipelineResult<()> {
        std::fs::write(path, self.to_json()?)?;
        info!("Saved {} records to {}", self.records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(music_id: u32, difficulty: u8) -> OutputRecord {
        OutputRecord {
            music_id,
            difficulty,
            play_style: 0,
            notes: 100.0,
            chord: 50.25,
            peak: 80.5,
            charge: 10.0,
            scratch: 0.0,
            soflan: 199.99,
        }
    }

    #[test]
    fn test_play_style_codes() {
        assert_eq!("SP".parse::<PlayStyle>(), Ok(PlayStyle::Sp));
        assert_eq!("dp".parse::<PlayStyle>().map(|p| p.code()), Ok(1));
        assert!("xp".parse::<PlayStyle>().is_err());
    }

    #[test]
    fn test_duplicate_commit_is_rejected() {
        let mut store = OutputStore::new();
        store.commit(record(5, 1)).unwrap();

        let mut changed = record(5, 1);
        changed.notes = 1.0;
        let err = store.commit(changed).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { music_id: 5, difficulty: 1 }));
        assert_eq!(store.len(), 1);
        assert!((store.records()[0].notes - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_same_song_other_difficulty_is_accepted() {
        let mut store = OutputStore::new();
        store.commit(record(5, 1)).unwrap();
        store.commit(record(5, 3)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_records_sorted_by_music_id_stably() {
        let mut store = OutputStore::new();
        store.commit(record(30, 0)).unwrap();
        store.commit(record(10, 2)).unwrap();
        store.commit(record(20, 0)).unwrap();
        store.commit(record(10, 1)).unwrap();

        let keys: Vec<(u32, u8)> = store.records().iter().map(|r| (r.music_id, r.difficulty)).collect();
        assert_eq!(keys, vec![(10, 2), (10, 1), (20, 0), (30, 0)]);
    }

    #[test]
    fn test_json_shape() {
        let mut store = OutputStore::new();
        store.commit(record(7, 4)).unwrap();

        let value: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        let first = &value["data"][0];
        assert_eq!(first["musicId"], 7);
        assert_eq!(first["difficulty"], 4);
        assert_eq!(first["playStyle"], 0);
        assert_eq!(first["soflan"], 199.99);
    }

    #[test]
    fn test_save_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let mut store = OutputStore::new();
        store.commit(record(1, 0)).unwrap();
        store.save_json(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"musicId\": 1"));
    }
}
