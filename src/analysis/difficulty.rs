//! Chart difficulty read from the color of the difficulty badge

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::vision::preprocess::rgb_to_hsv;

/// Chart difficulty, in palette order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Normal,
    Hyper,
    Another,
    Leggendaria,
}

impl Difficulty {
    pub const PALETTE: [Difficulty; 5] = [
        Difficulty::Beginner,
        Difficulty::Normal,
        Difficulty::Hyper,
        Difficulty::Another,
        Difficulty::Leggendaria,
    ];

    /// Badge hue on the 0–180 scale
    pub fn hue(&self) -> u8 {
        match self {
            Difficulty::Beginner => 60,
            Difficulty::Normal => 102,
            Difficulty::Hyper => 25,
            Difficulty::Another => 0,
            Difficulty::Leggendaria => 150,
        }
    }

    /// Code stored in output records
    pub fn code(&self) -> u8 {
        match self {
            Difficulty::Beginner => 0,
            Difficulty::Normal => 1,
            Difficulty::Hyper => 2,
            Difficulty::Another => 3,
            Difficulty::Leggendaria => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Normal => "normal",
            Difficulty::Hyper => "hyper",
            Difficulty::Another => "another",
            Difficulty::Leggendaria => "leggendaria",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::PALETTE
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown difficulty '{s}'"))
    }
}

/// Distance between two hues on the 180-step color wheel
pub fn hue_distance(a: u8, b: u8) -> u8 {
    let d = a.abs_diff(b);
    d.min(180u8.saturating_sub(d))
}

/// Palette entry closest in hue; earlier entries win ties
fn nearest(hue: u8) -> usize {
    let mut best = 0;
    for (i, difficulty) in Difficulty::PALETTE.iter().enumerate() {
        if hue_distance(hue, difficulty.hue()) < hue_distance(hue, Difficulty::PALETTE[best].hue()) {
            best = i;
        }
    }
    best
}

/// Let every foreground pixel vote for its nearest palette hue.
///
/// Black pixels are masked-out background. Returns `None` when nothing is left.
pub fn classify(image: &RgbImage) -> Option<Difficulty> {
    let mut votes = [0usize; 5];
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        if r.max(g).max(b) == 0 {
            continue;
        }
        let (hue, _, _) = rgb_to_hsv(r, g, b);
        votes[nearest(hue)] += 1;
    }

    let mut winner: Option<usize> = None;
    for (i, &count) in votes.iter().enumerate() {
        if count == 0 {
            continue;
        }
        match winner {
            Some(w) if votes[w] >= count => {}
            _ => winner = Some(i),
        }
    }

    debug!("Difficulty votes {:?}", votes);
    winner.map(|i| Difficulty::PALETTE[i])
}

/// Classify a categorical candidate bitmap
pub fn classify_candidate(image: &DynamicImage) -> Option<Difficulty> {
    match image.as_rgb8() {
        Some(rgb) => classify(rgb),
        None => classify(&image.to_rgb8()),
    }
}
