//! Reduction of variant results to one text per region part and language

use std::collections::BTreeMap;
use tracing::debug;

use crate::vision::ocr::{Language, RecognitionResult};
use crate::vision::preprocess::Part;

/// What a consensus text was read for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadingKey {
    pub region: usize,
    pub part: Part,
    pub language: Language,
}

impl ReadingKey {
    pub fn new(region: usize, part: Part, language: Language) -> Self {
        Self { region, part, language }
    }
}

/// Consensus text per reading key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consensus {
    texts: BTreeMap<ReadingKey, String>,
}

impl Consensus {
    pub fn get(&self, region: usize, part: Part, language: Language) -> Option<&str> {
        self.texts
            .get(&ReadingKey::new(region, part, language))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReadingKey, &str)> {
        self.texts.iter().map(|(k, v)| (k, v.as_str()))
    }
}

/// Most frequent string; ties go to the one seen first
pub fn majority_vote<'a, I>(texts: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for text in texts {
        match tally.iter_mut().find(|(seen, _)| *seen == text) {
            Some((_, count)) => *count += 1,
            None => tally.push((text, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (text, count) in tally {
        match best {
            Some((_, top)) if count <= top => {}
            _ => best = Some((text, count)),
        }
    }
    best.map(|(text, _)| text.to_string())
}

/// Group results by (region, part, language) and vote within each group.
///
/// Input order decides ties, so results should arrive in job order.
pub fn aggregate(results: &[RecognitionResult]) -> Consensus {
    let mut groups: BTreeMap<ReadingKey, Vec<&str>> = BTreeMap::new();
    for result in results {
        groups
            .entry(ReadingKey::new(result.key.region, result.key.part, result.language))
            .or_default()
            .push(result.text.as_str());
    }

    let texts: BTreeMap<ReadingKey, String> = groups
        .into_iter()
        .filter_map(|(key, votes)| {
            let winner = majority_vote(votes.iter().copied())?;
            debug!(
                "Region {} {:?}/{}: {:?} from {} variants",
                key.region,
                key.part,
                key.language,
                winner,
                votes.len()
            );
            Some((key, winner))
        })
        .collect();

    Consensus { texts }
}
