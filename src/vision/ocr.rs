//! OCR session
//!
//! Sends every candidate bitmap to every engine its region needs, all at
//! once, and waits for the whole batch. A session either returns every
//! result or fails as a unit; engines are terminated on every exit path.

use async_trait::async_trait;
use futures_util::future::join_all;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{RegionKind, RegionRole, SelectionRegion};
use crate::error::EngineError;
use crate::vision::preprocess::{CandidateImage, CandidateKey};

/// Script an engine is trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Latin,
    Cjk,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Latin => write!(f, "latin"),
            Language::Cjk => write!(f, "cjk"),
        }
    }
}

/// Page layout hint passed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    /// Let the engine segment the page
    SingleBlock,
    /// The bitmap holds exactly one line of text
    SingleLine,
}

/// A recognition engine bound to one language
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    fn language(&self) -> Language;

    /// Recognize the text in `image`; many calls may be in flight at once
    async fn recognize(&self, image: &DynamicImage, mode: RecognitionMode) -> Result<String, EngineError>;

    /// Release the engine's resources
    async fn terminate(&self);
}

/// Hands out engines at session start
#[async_trait]
pub trait EngineProvider: Send + Sync {
    async fn acquire(&self, language: Language) -> Result<Box<dyn RecognitionEngine>, EngineError>;
}

/// Raw text of one candidate from one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub key: CandidateKey,
    pub language: Language,
    pub text: String,
}

/// One candidate routed to its engines
#[derive(Debug, Clone)]
pub struct OcrJob<'a> {
    pub candidate: &'a CandidateImage,
    pub languages: &'static [Language],
    pub mode: RecognitionMode,
    /// Title/artist text: full-width spacing artifacts are removed
    pub free_form: bool,
}

const LATIN_ONLY: &[Language] = &[Language::Latin];
const LATIN_AND_CJK: &[Language] = &[Language::Latin, Language::Cjk];

/// Languages a region's candidates are sent to; empty for color-classified regions
pub fn required_languages(region: &SelectionRegion) -> &'static [Language] {
    match (region.kind, region.role()) {
        (RegionKind::Categorical, _) => &[],
        (_, RegionRole::Title | RegionRole::Artist) => LATIN_AND_CJK,
        _ => LATIN_ONLY,
    }
}

/// Route candidates to engines; candidates of categorical regions are left out
pub fn plan_jobs<'a>(candidates: &'a [CandidateImage], regions: &[SelectionRegion]) -> Vec<OcrJob<'a>> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let region = regions.get(candidate.key.region)?;
            let languages = required_languages(region);
            if languages.is_empty() {
                return None;
            }
            let role = region.role();
            let mode = match role {
                RegionRole::Radar(_) => RecognitionMode::SingleLine,
                _ if matches!(region.kind, RegionKind::SplitNumeric { .. }) => RecognitionMode::SingleLine,
                _ => RecognitionMode::SingleBlock,
            };
            Some(OcrJob {
                candidate,
                languages,
                mode,
                free_form: matches!(role, RegionRole::Title | RegionRole::Artist),
            })
        })
        .collect()
}

/// Engines acquired for one batch
pub struct OcrSession {
    engines: Vec<Box<dyn RecognitionEngine>>,
}

impl OcrSession {
    /// Acquire one engine per language; already acquired engines are released on failure
    pub async fn open(provider: &dyn EngineProvider, languages: &[Language]) -> Result<Self, EngineError> {
        let mut engines: Vec<Box<dyn RecognitionEngine>> = Vec::with_capacity(languages.len());
        for &language in languages {
            match provider.acquire(language).await {
                Ok(engine) => engines.push(engine),
                Err(err) => {
                    warn!("Could not acquire {} engine: {}", language, err);
                    for engine in &engines {
                        engine.terminate().await;
                    }
                    return Err(err);
                }
            }
        }
        debug!("OCR session opened with {} engines", engines.len());
        Ok(Self { engines })
    }

    fn engine(&self, language: Language) -> Option<&dyn RecognitionEngine> {
        self.engines
            .iter()
            .find(|e| e.language() == language)
            .map(|e| e.as_ref())
    }

    /// Run every job on every engine it needs, concurrently; the first rejection fails the batch
    pub async fn recognize_batch(&self, jobs: &[OcrJob<'_>]) -> Result<Vec<RecognitionResult>, EngineError> {
        let mut pending = Vec::new();
        for job in jobs {
            for &language in job.languages {
                let Some(engine) = self.engine(language) else {
                    return Err(EngineError::Startup {
                        language: language.to_string(),
                        reason: "engine not acquired for this session".to_string(),
                    });
                };
                pending.push(async move {
                    let raw = engine.recognize(&job.candidate.image, job.mode).await?;
                    Ok::<_, EngineError>(RecognitionResult {
                        key: job.candidate.key,
                        language,
                        text: normalize_text(&raw, job.free_form),
                    })
                });
            }
        }

        let count = pending.len();
        let results: Result<Vec<_>, _> = join_all(pending).await.into_iter().collect();
        if results.is_ok() {
            debug!("OCR batch of {} jobs complete", count);
        }
        results
    }

    /// Terminate every engine
    pub async fn close(self) {
        for engine in &self.engines {
            engine.terminate().await;
        }
        debug!("OCR session closed");
    }
}

/// Open a session for `jobs`, run them, and release the engines whatever the outcome
pub async fn run_session(
    provider: &dyn EngineProvider,
    jobs: &[OcrJob<'_>],
) -> Result<Vec<RecognitionResult>, EngineError> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    let languages: Vec<Language> = jobs
        .iter()
        .flat_map(|job| job.languages.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let session = OcrSession::open(provider, &languages).await?;
    let outcome = session.recognize_batch(jobs).await;
    session.close().await;

    match &outcome {
        Ok(results) => info!("OCR session produced {} results", results.len()),
        Err(err) => warn!("OCR session failed: {}", err),
    }
    outcome
}

/// Trim the text; for free-form text also drop spacing between full-width characters
pub fn normalize_text(raw: &str, free_form: bool) -> String {
    let trimmed = raw.trim();
    if !free_form {
        return trimmed.to_string();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut out = String::with_capacity(trimmed.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if !c.is_whitespace() {
            out.push(c);
            i += 1;
            continue;
        }

        let run_end = chars[i..]
            .iter()
            .position(|ch| !ch.is_whitespace())
            .map_or(chars.len(), |offset| i + offset);
        let before = out.chars().last();
        let after = chars.get(run_end).copied();
        let between_full_width = before.is_some_and(is_full_width) && after.is_some_and(is_full_width);
        if !between_full_width {
            out.extend(&chars[i..run_end]);
        }
        i = run_end;
    }
    out
}

/// CJK punctuation, kana, ideographs and the full-width forms block
fn is_full_width(c: char) -> bool {
    matches!(
        c,
        '\u{3000}'..='\u{303F}'
            | '\u{3040}'..='\u{30FF}'
            | '\u{31F0}'..='\u{31FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{F900}'..='\u{FAFF}'
            | '\u{FF00}'..='\u{FFEF}'
    ) && !c.is_whitespace()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Rect;
    use crate::vision::preprocess::Part;
    use image::GrayImage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Script = dyn Fn(Language, &DynamicImage) -> Result<String, String> + Send + Sync;

    /// Engine answering from a closure, counting lifecycle calls
    pub(crate) struct ScriptedEngine {
        language: Language,
        script: Arc<Script>,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedEngine {
        fn language(&self) -> Language {
            self.language
        }

        async fn recognize(&self, image: &DynamicImage, _mode: RecognitionMode) -> Result<String, EngineError> {
            tokio::task::yield_now().await;
            (self.script)(self.language, image).map_err(|reason| EngineError::Rejected {
                language: self.language.to_string(),
                reason,
            })
        }

        async fn terminate(&self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Provider of scripted engines
    pub(crate) struct ScriptedProvider {
        script: Arc<Script>,
        pub acquired: Mutex<Vec<Language>>,
        pub terminated: Arc<AtomicUsize>,
        pub fail_language: Option<Language>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(
            script: impl Fn(Language, &DynamicImage) -> Result<String, String> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Arc::new(script),
                acquired: Mutex::new(Vec::new()),
                terminated: Arc::new(AtomicUsize::new(0)),
                fail_language: None,
            }
        }

        pub(crate) fn terminated(&self) -> usize {
            self.terminated.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EngineProvider for ScriptedProvider {
        async fn acquire(&self, language: Language) -> Result<Box<dyn RecognitionEngine>, EngineError> {
            if self.fail_language == Some(language) {
                return Err(EngineError::Startup {
                    language: language.to_string(),
                    reason: "not installed".to_string(),
                });
            }
            self.acquired.lock().unwrap().push(language);
            Ok(Box::new(ScriptedEngine {
                language,
                script: Arc::clone(&self.script),
                terminated: Arc::clone(&self.terminated),
            }))
        }
    }

    /// Candidate whose image width encodes an id the script can read back
    pub(crate) fn tagged_candidate(region: usize, part: Part, variant: usize, tag: u32) -> CandidateImage {
        CandidateImage {
            key: CandidateKey { region, part, variant },
            threshold: 150,
            image: DynamicImage::ImageLuma8(GrayImage::new(tag, 1)),
        }
    }

    fn regions() -> Vec<SelectionRegion> {
        vec![
            SelectionRegion::new("TITLE", Rect::new(0, 0, 10, 10)),
            SelectionRegion::new("NOTES", Rect::new(0, 0, 10, 10)),
            SelectionRegion::new("DIFFICULTY", Rect::new(0, 0, 10, 10)).with_kind(RegionKind::Categorical),
        ]
    }

    #[test]
    fn test_routing_by_region() {
        let regions = regions();
        assert_eq!(required_languages(&regions[0]), &[Language::Latin, Language::Cjk]);
        assert_eq!(required_languages(&regions[1]), &[Language::Latin]);
        assert!(required_languages(&regions[2]).is_empty());
    }

    #[test]
    fn test_plan_skips_categorical() {
        let candidates = vec![
            tagged_candidate(0, Part::Integer, 0, 1),
            tagged_candidate(1, Part::Integer, 0, 2),
            tagged_candidate(2, Part::Integer, 0, 3),
        ];
        let jobs = plan_jobs(&candidates, &regions());
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].free_form);
        assert_eq!(jobs[0].mode, RecognitionMode::SingleBlock);
        assert!(!jobs[1].free_form);
        assert_eq!(jobs[1].mode, RecognitionMode::SingleLine);
    }

    #[test]
    fn test_normalize_trims() {
        assert_eq!(normalize_text("  123.45 \n", false), "123.45");
    }

    #[test]
    fn test_normalize_collapses_full_width_spacing() {
        assert_eq!(normalize_text(" 恋 す る 気 持 ち \n", true), "恋する気持ち");
        assert_eq!(normalize_text("A 恋 B", true), "A 恋 B");
        assert_eq!(normalize_text("Hello  World", true), "Hello  World");
        // Only free-form text is collapsed
        assert_eq!(normalize_text("恋 す る", false), "恋 す る");
    }

    #[test]
    fn test_normalize_keeps_spacing_between_accented_latin() {
        assert_eq!(normalize_text("Café Ñu", true), "Café Ñu");
        assert_eq!(normalize_text("ü ö", true), "ü ö");
        assert_eq!(normalize_text("Ａ Ｂ ア", true), "ＡＢア");
    }

    #[tokio::test]
    async fn test_session_runs_every_job_on_every_engine() {
        let provider = ScriptedProvider::new(|language, image| {
            Ok(format!(" {}-{} ", language, image.width()))
        });
        let candidates = vec![
            tagged_candidate(0, Part::Integer, 0, 7),
            tagged_candidate(1, Part::Integer, 0, 9),
            tagged_candidate(1, Part::Integer, 1, 11),
        ];
        let jobs = plan_jobs(&candidates, &regions());

        let results = run_session(&provider, &jobs).await.unwrap();

        assert_eq!(results.len(), 4);
        let by_key: HashMap<(usize, usize, Language), &str> = results
            .iter()
            .map(|r| ((r.key.region, r.key.variant, r.language), r.text.as_str()))
            .collect();
        assert_eq!(by_key[&(0, 0, Language::Latin)], "latin-7");
        assert_eq!(by_key[&(0, 0, Language::Cjk)], "cjk-7");
        assert_eq!(by_key[&(1, 1, Language::Latin)], "latin-11");

        assert_eq!(*provider.acquired.lock().unwrap(), vec![Language::Latin, Language::Cjk]);
        assert_eq!(provider.terminated(), 2);
    }

    #[tokio::test]
    async fn test_session_fails_as_a_unit_and_still_releases() {
        let provider = ScriptedProvider::new(|_, image| {
            if image.width() == 9 {
                Err("engine crashed".to_string())
            } else {
                Ok("ok".to_string())
            }
        });
        let candidates = vec![
            tagged_candidate(1, Part::Integer, 0, 5),
            tagged_candidate(1, Part::Integer, 1, 9),
        ];
        let jobs = plan_jobs(&candidates, &regions());

        let result = run_session(&provider, &jobs).await;

        assert!(matches!(result, Err(EngineError::Rejected { .. })));
        assert_eq!(provider.terminated(), 1);
    }

    #[tokio::test]
    async fn test_failed_acquire_releases_earlier_engines() {
        let mut provider = ScriptedProvider::new(|_, _| Ok(String::new()));
        provider.fail_language = Some(Language::Cjk);
        let candidates = vec![tagged_candidate(0, Part::Integer, 0, 5)];
        let jobs = plan_jobs(&candidates, &regions());

        let result = run_session(&provider, &jobs).await;

        assert!(matches!(result, Err(EngineError::Startup { .. })));
        assert_eq!(*provider.acquired.lock().unwrap(), vec![Language::Latin]);
        assert_eq!(provider.terminated(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_acquires_nothing() {
        let provider = ScriptedProvider::new(|_, _| Ok(String::new()));
        let results = run_session(&provider, &[]).await.unwrap();
        assert!(results.is_empty());
        assert!(provider.acquired.lock().unwrap().is_empty());
    }
}
