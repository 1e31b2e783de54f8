//! Application Coordinator
//!
//! Runs one captured result screen through preprocessing, recognition,
//! voting and correction, and drives the change-detection loop of a scan.

use image::RgbaImage;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{
    aggregate, classify_candidate, correct_numeric, correct_split_numeric, find_by_title,
    rank_catalog, validate_numeric, Consensus, CorrectionSuggestion, Difficulty,
};
use crate::capture::{CapturedFrame, FrameSource};
use crate::config::{AppConfig, RadarField, RegionKind, RegionRole, SelectionRegion, Settings};
use crate::error::{FieldError, PipelineError, PipelineResult};
use crate::shared::SessionState;
use crate::storage::{MasterCatalogEntry, OutputRecord, PlayStyle};
use crate::vision::change::{ChangeDetector, SeekOutcome};
use crate::vision::ocr::{plan_jobs, required_languages, run_session, EngineProvider, Language};
use crate::vision::preprocess::{build_candidates, CandidateImage, Part, VariantConfig};
use crate::vision::rectify::rectify;

/// What one region read as
#[derive(Debug, Clone, PartialEq)]
pub enum RegionReading {
    PlainText(String),
    /// Title/artist text, one reading per script
    BilingualText {
        latin: Option<String>,
        cjk: Option<String>,
    },
    SplitNumeric { integer: String, decimal: String },
    /// Color-classified difficulty; `None` when no foreground was found
    Category(Option<Difficulty>),
    Error(String),
}

/// Reading of one configured region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionOutcome {
    pub label: String,
    pub role: RegionRole,
    pub reading: RegionReading,
}

/// Catalog entry chosen for a draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSelection {
    pub music_id: u32,
    pub title: String,
}

/// Editable record before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDraft {
    pub selection: Option<CatalogSelection>,
    pub difficulty: Option<Difficulty>,
    pub play_style: Option<PlayStyle>,
    /// Corrected radar strings, validated on commit
    pub radar: BTreeMap<RadarField, String>,
}

impl RecordDraft {
    /// Draft pre-filled from region readings and the best catalog suggestion
    pub fn from_readings(readings: &[RegionOutcome], best: Option<&CorrectionSuggestion>) -> Self {
        let mut draft = RecordDraft {
            selection: best.map(|s| CatalogSelection {
                music_id: s.catalog_id,
                title: s.title.clone(),
            }),
            ..RecordDraft::default()
        };

        for outcome in readings {
            match (&outcome.reading, outcome.role) {
                (RegionReading::Category(Some(difficulty)), _) if draft.difficulty.is_none() => {
                    draft.difficulty = Some(*difficulty);
                }
                (RegionReading::PlainText(text), RegionRole::Radar(field)) => {
                    draft.radar.insert(field, correct_numeric(text));
                }
                (RegionReading::SplitNumeric { integer, decimal }, RegionRole::Radar(field)) => {
                    draft.radar.insert(field, correct_split_numeric(integer, decimal));
                }
                _ => {}
            }
        }
        draft
    }

    /// Select the catalog entry titled exactly `title`; false when there is none
    pub fn override_title(&mut self, catalog: &[MasterCatalogEntry], title: &str) -> bool {
        match find_by_title(catalog, title) {
            Some(entry) => {
                self.selection = Some(CatalogSelection {
                    music_id: entry.id,
                    title: entry.title.clone(),
                });
                true
            }
            None => false,
        }
    }

    /// Operator-supplied values: play style always wins, difficulty only fills a gap
    pub fn apply(&mut self, options: ScanOptions) {
        if options.play_style.is_some() {
            self.play_style = options.play_style;
        }
        if self.difficulty.is_none() {
            self.difficulty = options.difficulty;
        }
    }

    /// Check every field and build the record, reporting all failures at once
    pub fn validate(&self) -> PipelineResult<OutputRecord> {
        let mut errors = Vec::new();

        if self.selection.is_none() {
            errors.push(FieldError::new("title", "no catalog entry selected"));
        }
        if self.difficulty.is_none() {
            errors.push(FieldError::new("difficulty", "not available"));
        }
        if self.play_style.is_none() {
            errors.push(FieldError::new("playStyle", "not set"));
        }

        let mut values = [0.0f64; 6];
        for (slot, field) in values.iter_mut().zip(RadarField::ALL) {
            match self.radar.get(&field) {
                Some(text) => match validate_numeric(field.name(), text) {
                    Ok(value) => *slot = value,
                    Err(err) => errors.push(err),
                },
                None => errors.push(FieldError::new(field.name(), "not recognized")),
            }
        }

        match (&self.selection, self.difficulty, self.play_style) {
            (Some(selection), Some(difficulty), Some(play_style)) if errors.is_empty() => {
                let [notes, chord, peak, charge, scratch, soflan] = values;
                Ok(OutputRecord {
                    music_id: selection.music_id,
                    difficulty: difficulty.code(),
                    play_style: play_style.code(),
                    notes,
                    chord,
                    peak,
                    charge,
                    scratch,
                    soflan,
                })
            }
            _ => Err(PipelineError::Validation(errors)),
        }
    }
}

/// Everything read from one captured frame
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    /// Position of the frame in the recording, in seconds
    pub position: f64,
    pub readings: Vec<RegionOutcome>,
    pub suggestions: Vec<CorrectionSuggestion>,
    pub draft: RecordDraft,
}

impl ExtractionReport {
    /// Whether any region failed to read
    pub fn has_errors(&self) -> bool {
        self.readings
            .iter()
            .any(|o| matches!(o.reading, RegionReading::Error(_)))
    }
}

/// Operator-supplied values for every record of a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub play_style: Option<PlayStyle>,
    /// Used when no categorical region yields a difficulty
    pub difficulty: Option<Difficulty>,
}

/// How a scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    Exhausted,
    Cancelled,
}

/// Per-frame extraction: candidates, one OCR session, voting and correction
pub struct Extractor<'a> {
    provider: &'a dyn EngineProvider,
    variants: VariantConfig,
    max_suggestions: usize,
}

impl<'a> Extractor<'a> {
    pub fn new(provider: &'a dyn EngineProvider, config: &AppConfig) -> Self {
        Self {
            provider,
            variants: VariantConfig {
                count: config.ocr.variant_count,
                step: config.ocr.variant_step,
            },
            max_suggestions: config.correction.max_suggestions,
        }
    }

    /// Read every region of a rectified frame
    pub async fn extract(
        &self,
        frame: &CapturedFrame,
        regions: &[SelectionRegion],
        catalog: &[MasterCatalogEntry],
    ) -> ExtractionReport {
        let candidates: Vec<CandidateImage> = regions
            .iter()
            .enumerate()
            .flat_map(|(index, region)| build_candidates(&frame.image, index, region, self.variants))
            .collect();

        let jobs = plan_jobs(&candidates, regions);
        let consensus = match run_session(self.provider, &jobs).await {
            Ok(results) => Ok(aggregate(&results)),
            Err(err) => Err(err.to_string()),
        };

        let readings: Vec<RegionOutcome> = regions
            .iter()
            .enumerate()
            .map(|(index, region)| RegionOutcome {
                label: region.label.clone(),
                role: region.role(),
                reading: read_region(index, region, &candidates, &consensus),
            })
            .collect();

        for outcome in &readings {
            debug!("{}: {:?}", outcome.label, outcome.reading);
        }

        let suggestions = suggest(&readings, catalog, self.max_suggestions);
        let draft = RecordDraft::from_readings(&readings, suggestions.first());

        ExtractionReport {
            position: frame.position,
            readings,
            suggestions,
            draft,
        }
    }
}

fn read_region(
    index: usize,
    region: &SelectionRegion,
    candidates: &[CandidateImage],
    consensus: &Result<Consensus, String>,
) -> RegionReading {
    if matches!(region.kind, RegionKind::Categorical) {
        let difficulty = candidates
            .iter()
            .find(|c| c.key.region == index)
            .and_then(|c| classify_candidate(&c.image));
        return RegionReading::Category(difficulty);
    }

    let consensus = match consensus {
        Ok(consensus) => consensus,
        Err(message) => return RegionReading::Error(message.clone()),
    };
    let text = |part: Part, language: Language| consensus.get(index, part, language).map(str::to_string);
    let unreadable = || RegionReading::Error(format!("no readable candidate for '{}'", region.label));

    match region.kind {
        RegionKind::SplitNumeric { .. } => {
            match (text(Part::Integer, Language::Latin), text(Part::Decimal, Language::Latin)) {
                (Some(integer), Some(decimal)) => RegionReading::SplitNumeric { integer, decimal },
                _ => unreadable(),
            }
        }
        _ if required_languages(region).contains(&Language::Cjk) => {
            let latin = text(Part::Integer, Language::Latin);
            let cjk = text(Part::Integer, Language::Cjk);
            if latin.is_none() && cjk.is_none() {
                unreadable()
            } else {
                RegionReading::BilingualText { latin, cjk }
            }
        }
        _ => match text(Part::Integer, Language::Latin) {
            Some(text) => RegionReading::PlainText(text),
            None => unreadable(),
        },
    }
}

/// Rank the catalog against title/artist readings; nothing to rank without them
fn suggest(
    readings: &[RegionOutcome],
    catalog: &[MasterCatalogEntry],
    max_suggestions: usize,
) -> Vec<CorrectionSuggestion> {
    let mut titles: Vec<&str> = Vec::new();
    let mut artists: Vec<&str> = Vec::new();

    for outcome in readings {
        let target = match outcome.role {
            RegionRole::Title => &mut titles,
            RegionRole::Artist => &mut artists,
            _ => continue,
        };
        match &outcome.reading {
            RegionReading::BilingualText { latin, cjk } => {
                target.extend([latin, cjk].into_iter().flatten().map(String::as_str));
            }
            RegionReading::PlainText(text) => target.push(text.as_str()),
            _ => {}
        }
    }

    titles.retain(|t| !t.is_empty());
    artists.retain(|a| !a.is_empty());
    if titles.is_empty() && artists.is_empty() {
        return Vec::new();
    }
    rank_catalog(catalog, &titles, &artists, max_suggestions)
}

/// Validate the draft and commit it; failures are counted and logged, never fatal
fn commit_draft(state: &mut SessionState, draft: &RecordDraft) {
    match draft.validate().and_then(|record| state.store.commit(record)) {
        Ok(()) => {
            state.runtime.committed += 1;
            state.runtime.clear_error();
        }
        Err(err) => {
            match &err {
                PipelineError::DuplicateKey { .. } => state.runtime.duplicates += 1,
                PipelineError::Validation(_) => state.runtime.invalid += 1,
                _ => {}
            }
            warn!("Record not committed: {}", err);
            state.runtime.set_error(err.to_string());
        }
    }
}

fn record_frame_error(state: &mut SessionState, err: &PipelineError) {
    warn!("Skipped unreadable frame: {}", err);
    state.runtime.frame_errors += 1;
    state.runtime.set_error(err.to_string());
}

/// Seek, extract and commit until the source ends or `cancel` is set.
///
/// Unreadable frames are counted and skipped. Only a failure that leaves the
/// source where it was (such as no usable region) ends the scan with an error.
pub async fn run_scan<S>(
    state: &mut SessionState,
    source: &mut S,
    provider: &dyn EngineProvider,
    options: ScanOptions,
    cancel: &CancellationToken,
) -> PipelineResult<ScanEnd>
where
    S: FrameSource + ?Sized,
{
    let detector = ChangeDetector::new(
        state.settings.perspective_points.clone(),
        state.settings.detection_settings.clone(),
        state.config.detection.frame_rate,
    );
    let extractor = Extractor::new(provider, &state.config);

    info!(
        "Scanning with {} regions against {} catalog entries",
        state.settings.selections.len(),
        state.catalog.len()
    );

    loop {
        let started_at = source.position();
        let outcome = match detector
            .seek_next_change(source, &state.settings.selections, cancel)
            .await
        {
            Ok(outcome) => outcome,
            // Without progress the same failure would repeat forever
            Err(err) if source.position() <= started_at => return Err(err),
            Err(err) => {
                record_frame_error(state, &err);
                continue;
            }
        };
        let frame = match outcome {
            SeekOutcome::ChangeFound {
                frame, settle_error, ..
            } => {
                if let Some(err) = settle_error {
                    record_frame_error(state, &err);
                }
                frame
            }
            SeekOutcome::ExhaustedSource => return Ok(ScanEnd::Exhausted),
            SeekOutcome::Cancelled => return Ok(ScanEnd::Cancelled),
        };
        state.runtime.changes_found += 1;

        let mut report = extractor
            .extract(&frame, &state.settings.selections, &state.catalog)
            .await;
        if report.has_errors() {
            state.runtime.recognition_failures += 1;
        }
        report.draft.apply(options);

        commit_draft(state, &report.draft);
        state.last_report = Some(report);
    }
}

/// Write the rectified frame and every candidate bitmap to `out_dir`.
///
/// Returns the number of images written.
pub fn write_preview(
    frame: &RgbaImage,
    settings: &Settings,
    variants: VariantConfig,
    out_dir: &Path,
) -> PipelineResult<usize> {
    std::fs::create_dir_all(out_dir)?;

    let rectified = rectify(frame, &settings.perspective_points);
    rectified.save(out_dir.join("rectified.png"))?;
    let mut written = 1;

    for (index, region) in settings.selections.iter().enumerate() {
        for candidate in build_candidates(&rectified, index, region, variants) {
            let name = format!(
                "{:02}_{}_{:?}_{}.png",
                index,
                file_stem(&region.label),
                candidate.key.part,
                candidate.key.variant
            )
            .to_lowercase();
            candidate.image.save(out_dir.join(name))?;
            written += 1;
        }
    }

    info!("Wrote {} preview images to {}", written, out_dir.display());
    Ok(written)
}

fn file_stem(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageSequenceSource;
    use crate::config::Rect;
    use crate::vision::change::tests::VecSource;
    use crate::vision::ocr::tests::ScriptedProvider;
    use image::{DynamicImage, Rgba};
    use tempfile::TempDir;

    const BLUE: Rgba<u8> = Rgba([0, 153, 255, 255]);

    fn region(label: &str, rect: Rect) -> SelectionRegion {
        SelectionRegion::new(label, rect).with_scale(1.0, 1.0)
    }

    /// Every region has a distinct width so the script can tell them apart
    fn regions() -> Vec<SelectionRegion> {
        vec![
            region("TITLE", Rect::new(0, 0, 20, 4)),
            region("NOTES", Rect::new(0, 4, 11, 4)),
            region("CHORD", Rect::new(11, 4, 12, 4)),
            region("PEAK", Rect::new(23, 4, 13, 4)),
            region("CHARGE", Rect::new(36, 4, 14, 4)),
            region("SCRATCH", Rect::new(50, 4, 15, 4)),
            region("SOF-LAN", Rect::new(0, 8, 16, 4)).with_kind(RegionKind::SplitNumeric {
                decimal: Rect::new(16, 8, 17, 4),
            }),
            region("DIFFICULTY", Rect::new(40, 10, 10, 10))
                .with_kind(RegionKind::Categorical)
                .with_threshold(0),
        ]
    }

    fn script(language: Language, image: &DynamicImage) -> Result<String, String> {
        let text = match (language, image.width()) {
            (Language::Latin, 20) => "ABC",
            (Language::Cjk, 20) => "Ａ Ｂ Ｃ",
            (_, 11) => "l23.45",
            (_, 12) => "50.OO",
            (_, 13) => "8O.5O",
            (_, 14) => " 10.00 ",
            (_, 15) => "0.00",
            (_, 16) => "l9",
            (_, 17) => "99",
            (_, width) => return Err(format!("unexpected width {width}")),
        };
        Ok(text.to_string())
    }

    fn catalog() -> Vec<MasterCatalogEntry> {
        vec![
            MasterCatalogEntry::new(1, "XYZ", "Someone"),
            MasterCatalogEntry::new(2, "ABC", "Someone"),
        ]
    }

    fn result_screen() -> RgbaImage {
        RgbaImage::from_fn(80, 20, |x, y| {
            if (40..50).contains(&x) && y >= 10 {
                BLUE
            } else {
                Rgba([200, 200, 200, 255])
            }
        })
    }

    fn black() -> RgbaImage {
        RgbaImage::from_pixel(80, 20, Rgba([0, 0, 0, 255]))
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.ocr.variant_count = 3;
        config.ocr.variant_step = 10;
        config
    }

    #[tokio::test]
    async fn test_extract_reads_every_region() {
        let provider = ScriptedProvider::new(script);
        let config = config();
        let extractor = Extractor::new(&provider, &config);
        let frame = CapturedFrame::new(result_screen(), 1.5);

        let report = extractor.extract(&frame, &regions(), &catalog()).await;

        assert!(!report.has_errors());
        assert_eq!(report.position, 1.5);
        assert_eq!(
            report.readings[0].reading,
            RegionReading::BilingualText {
                latin: Some("ABC".to_string()),
                cjk: Some("ＡＢＣ".to_string()),
            }
        );
        assert_eq!(report.readings[1].reading, RegionReading::PlainText("l23.45".to_string()));
        assert_eq!(
            report.readings[6].reading,
            RegionReading::SplitNumeric {
                integer: "l9".to_string(),
                decimal: "99".to_string(),
            }
        );
        assert_eq!(report.readings[7].reading, RegionReading::Category(Some(Difficulty::Normal)));

        assert_eq!(report.suggestions[0].catalog_id, 2);
        assert_eq!(report.suggestions[0].distance, 0);

        let draft = &report.draft;
        assert_eq!(draft.selection.as_ref().map(|s| s.music_id), Some(2));
        assert_eq!(draft.difficulty, Some(Difficulty::Normal));
        assert_eq!(draft.radar[&RadarField::Notes], "123.45");
        assert_eq!(draft.radar[&RadarField::Chord], "50.00");
        assert_eq!(draft.radar[&RadarField::Peak], "80.50");
        assert_eq!(draft.radar[&RadarField::Soflan], "19.99");

        // Engines were released after the batch
        assert_eq!(provider.terminated(), 2);
    }

    #[tokio::test]
    async fn test_session_failure_marks_ocr_regions_as_errors() {
        let provider = ScriptedProvider::new(|language, image| {
            if image.width() == 13 {
                Err("engine crashed".to_string())
            } else {
                script(language, image)
            }
        });
        let config = config();
        let extractor = Extractor::new(&provider, &config);
        let frame = CapturedFrame::new(result_screen(), 0.0);

        let report = extractor.extract(&frame, &regions(), &catalog()).await;

        assert!(report.has_errors());
        for outcome in &report.readings[..7] {
            assert!(matches!(outcome.reading, RegionReading::Error(_)), "{}", outcome.label);
        }
        assert_eq!(report.readings[7].reading, RegionReading::Category(Some(Difficulty::Normal)));
        assert!(report.suggestions.is_empty());
        assert!(report.draft.radar.is_empty());
        assert_eq!(provider.terminated(), 2);
    }

    #[tokio::test]
    async fn test_acquire_failure_marks_ocr_regions_as_errors() {
        let mut provider = ScriptedProvider::new(script);
        provider.fail_language = Some(Language::Cjk);
        let config = config();
        let extractor = Extractor::new(&provider, &config);
        let frame = CapturedFrame::new(result_screen(), 0.0);

        let report = extractor.extract(&frame, &regions(), &catalog()).await;

        assert!(matches!(report.readings[0].reading, RegionReading::Error(_)));
        assert_eq!(provider.terminated(), 1);
    }

    #[test]
    fn test_draft_validation_reports_every_field() {
        let draft = RecordDraft::default();
        let Err(PipelineError::Validation(errors)) = draft.validate() else {
            panic!("expected validation failure");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["title", "difficulty", "playStyle", "notes", "chord", "peak", "charge", "scratch", "soflan"]
        );
    }

    #[test]
    fn test_draft_validation_rejects_out_of_range() {
        let mut draft = RecordDraft {
            selection: Some(CatalogSelection {
                music_id: 9,
                title: "T".to_string(),
            }),
            difficulty: Some(Difficulty::Hyper),
            play_style: Some(PlayStyle::Dp),
            radar: BTreeMap::new(),
        };
        for field in RadarField::ALL {
            draft.radar.insert(field, "100.00".to_string());
        }

        let record = draft.validate().unwrap();
        assert_eq!(record.music_id, 9);
        assert_eq!(record.difficulty, 2);
        assert_eq!(record.play_style, 1);

        draft.radar.insert(RadarField::Peak, "201.00".to_string());
        let Err(PipelineError::Validation(errors)) = draft.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "peak");
    }

    #[test]
    fn test_manual_title_override() {
        let mut draft = RecordDraft::default();
        assert!(draft.override_title(&catalog(), "XYZ"));
        assert_eq!(draft.selection.as_ref().map(|s| s.music_id), Some(1));

        assert!(!draft.override_title(&catalog(), "Unknown"));
        assert_eq!(draft.selection.as_ref().map(|s| s.music_id), Some(1));
    }

    #[test]
    fn test_options_fill_gaps() {
        let mut draft = RecordDraft {
            difficulty: Some(Difficulty::Another),
            ..RecordDraft::default()
        };
        draft.apply(ScanOptions {
            play_style: Some(PlayStyle::Sp),
            difficulty: Some(Difficulty::Beginner),
        });
        assert_eq!(draft.play_style, Some(PlayStyle::Sp));
        assert_eq!(draft.difficulty, Some(Difficulty::Another));
    }

    fn session() -> SessionState {
        let settings = Settings {
            selections: regions(),
            ..Settings::default()
        };
        SessionState::new(config(), settings, catalog())
    }

    #[tokio::test]
    async fn test_scan_commits_result_screen() {
        let provider = ScriptedProvider::new(script);
        let mut state = session();
        let mut source = VecSource::new(vec![black(), black(), result_screen(), result_screen()]);
        let options = ScanOptions {
            play_style: Some(PlayStyle::Sp),
            difficulty: None,
        };

        let end = run_scan(&mut state, &mut source, &provider, options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(end, ScanEnd::Exhausted);
        assert_eq!(state.runtime.changes_found, 1);
        assert_eq!(state.runtime.committed, 1);

        let records = state.store.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.music_id, 2);
        assert_eq!(record.difficulty, Difficulty::Normal.code());
        assert_eq!(record.play_style, 0);
        assert!((record.notes - 123.45).abs() < 1e-9);
        assert!((record.charge - 10.0).abs() < 1e-9);
        assert!((record.soflan - 19.99).abs() < 1e-9);
        assert!(state.last_report.is_some());
    }

    #[tokio::test]
    async fn test_scan_rejects_repeated_screen() {
        let provider = ScriptedProvider::new(script);
        let mut state = session();
        // Every change reads the same song, so only the first commit lands
        let mut source = VecSource::new(vec![black(), result_screen(), black(), result_screen()]);
        let options = ScanOptions {
            play_style: Some(PlayStyle::Sp),
            difficulty: Some(Difficulty::Normal),
        };

        run_scan(&mut state, &mut source, &provider, options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.runtime.changes_found, 3);
        assert_eq!(state.runtime.committed, 1);
        assert_eq!(state.runtime.duplicates, 2);
        assert_eq!(state.store.len(), 1);
        assert!(state.runtime.last_error.is_some());
    }

    #[tokio::test]
    async fn test_scan_survives_unreadable_frames() {
        let provider = ScriptedProvider::new(script);
        let mut state = session();
        // One bad frame while searching after the first screen, one while settling on the last
        let mut source = VecSource::new(vec![
            black(),
            result_screen(),
            result_screen(),
            black(),
            black(),
            black(),
            result_screen(),
            result_screen(),
        ]);
        source.unreadable.extend([3, 7]);
        state.settings.detection_settings.skip_frames_after_change = 1;
        let options = ScanOptions {
            play_style: Some(PlayStyle::Sp),
            difficulty: None,
        };

        let end = run_scan(&mut state, &mut source, &provider, options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(end, ScanEnd::Exhausted);
        assert_eq!(state.runtime.frame_errors, 2);
        // Result screen, black screen, result screen again
        assert_eq!(state.runtime.changes_found, 3);
        assert_eq!(state.runtime.committed, 1);
        assert_eq!(state.runtime.duplicates, 1);
        assert_eq!(state.store.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_reads_past_corrupt_frame_file() {
        let dir = TempDir::new().unwrap();
        let frames = [black(), result_screen(), result_screen(), black(), black()];
        for (i, frame) in frames.iter().enumerate() {
            frame.save(dir.path().join(format!("frame_{i:04}.png"))).unwrap();
        }
        std::fs::write(dir.path().join("frame_0003.png"), b"truncated").unwrap();

        let provider = ScriptedProvider::new(script);
        let mut state = session();
        let mut source = ImageSequenceSource::open(dir.path(), state.config.detection.frame_rate)
            .await
            .unwrap();
        let options = ScanOptions {
            play_style: Some(PlayStyle::Sp),
            difficulty: None,
        };

        let end = run_scan(&mut state, &mut source, &provider, options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(end, ScanEnd::Exhausted);
        assert_eq!(state.runtime.frame_errors, 1);
        assert_eq!(state.runtime.committed, 1);
        assert_eq!(state.store.len(), 1);
        assert!(source.at_end());
    }

    #[tokio::test]
    async fn test_scan_without_usable_region_is_an_error() {
        let provider = ScriptedProvider::new(script);
        let mut state = session();
        state.settings.selections = vec![SelectionRegion::new("TITLE", Rect::new(5000, 5000, 4, 4))];
        let mut source = VecSource::new(vec![black(), result_screen()]);

        let result = run_scan(&mut state, &mut source, &provider, ScanOptions::default(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(PipelineError::Configuration(_))));
        assert_eq!(state.runtime.frame_errors, 0);
    }

    #[tokio::test]
    async fn test_scan_counts_invalid_drafts() {
        let provider = ScriptedProvider::new(script);
        let mut state = session();
        let mut source = VecSource::new(vec![black(), result_screen()]);

        run_scan(&mut state, &mut source, &provider, ScanOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.runtime.invalid, 1);
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_scan_stops_when_cancelled() {
        let provider = ScriptedProvider::new(script);
        let mut state = session();
        let mut source = VecSource::new(vec![black(), result_screen()]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let end = run_scan(&mut state, &mut source, &provider, ScanOptions::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(end, ScanEnd::Cancelled);
        assert_eq!(state.runtime.changes_found, 0);
    }

    #[test]
    fn test_write_preview() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            selections: regions(),
            ..Settings::default()
        };

        let written = write_preview(&result_screen(), &settings, VariantConfig { count: 2, step: 5 }, dir.path()).unwrap();

        // rectified + 6 text regions x2 + split number 2 parts x2 + difficulty x1
        assert_eq!(written, 1 + 12 + 4 + 1);
        assert!(dir.path().join("rectified.png").exists());
        assert!(dir.path().join("06_sof_lan_decimal_1.png").exists());
    }
}
