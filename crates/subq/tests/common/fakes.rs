//! Scripted stand-ins for the external tools.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use secrecy::ExposeSecret;
use subq::jobs::{CancellationToken, SyncOptions};
use subq::settings::{Provider, SubtitleProviderConfig};
use subq::tools::{
    OcrConverter, OcrRequest, PublishRequest, SubtitleAligner, SubtitleCandidate,
    SubtitleExtractor, SubtitlePublisher, SubtitleSearcher, ToolError, TranslationRequest,
    Translator,
};

/// One observed translation call.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationCall {
    pub provider: Provider,
    pub key: String,
    pub vpn_config: Option<PathBuf>,
}

/// Plays back a scripted sequence of outcomes; succeeds once the script is
/// exhausted. Successful calls write the output file.
#[derive(Default)]
pub struct ScriptedTranslator {
    script: Mutex<VecDeque<Result<(), String>>>,
    calls: Mutex<Vec<TranslationCall>>,
}

impl ScriptedTranslator {
    pub fn new(script: impl IntoIterator<Item = Result<(), String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(times: usize, message: &str) -> Self {
        Self::new((0..times).map(|_| Err(message.to_string())))
    }

    pub fn calls(&self) -> Vec<TranslationCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Translator for ScriptedTranslator {
    fn translate(
        &self,
        request: &TranslationRequest<'_>,
        _cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(TranslationCall {
            provider: request.provider,
            key: request.api_key.expose_secret().to_string(),
            vpn_config: request.vpn_config.clone(),
        });

        match self.script.lock().unwrap().pop_front() {
            Some(Err(message)) => Err(ToolError::CommandFailed {
                program: "translator".to_string(),
                message,
            }),
            Some(Ok(())) | None => {
                std::fs::write(request.output, "1\n00:00:01,000 --> 00:00:02,000\nHallo\n")
                    .map_err(|source| ToolError::Io {
                        path: request.output.to_path_buf(),
                        source,
                    })
            }
        }
    }
}

/// Aligner that copies the subtitle, or blocks until cancelled when
/// `block_until_cancelled` is set.
#[derive(Default)]
pub struct FakeAligner {
    pub block_until_cancelled: bool,
    pub saw_cancel: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeAligner {
    pub fn blocking() -> Self {
        Self {
            block_until_cancelled: true,
            ..Self::default()
        }
    }
}

impl SubtitleAligner for FakeAligner {
    fn align(
        &self,
        _video: &Path,
        subtitle: &Path,
        output: &Path,
        _options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.block_until_cancelled {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            self.saw_cancel.store(true, Ordering::SeqCst);
            return Err(ToolError::Cancelled);
        }
        std::fs::copy(subtitle, output)
            .map(|_| ())
            .map_err(|source| ToolError::Io {
                path: output.to_path_buf(),
                source,
            })
    }
}

/// Publisher that holds each call open until released, tracking how many
/// calls overlap.
pub struct GatedPublisher {
    open: AtomicBool,
    hold: Duration,
    current: AtomicUsize,
    pub peak: AtomicUsize,
    pub order: Mutex<Vec<String>>,
}

impl GatedPublisher {
    /// Calls return immediately.
    pub fn open() -> Self {
        Self::new(true, Duration::ZERO)
    }

    /// Calls block until [`release`](Self::release).
    pub fn closed() -> Self {
        Self::new(false, Duration::ZERO)
    }

    /// Calls take `hold` each.
    pub fn slow(hold: Duration) -> Self {
        Self::new(true, hold)
    }

    fn new(open: bool, hold: Duration) -> Self {
        Self {
            open: AtomicBool::new(open),
            hold,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

impl SubtitlePublisher for GatedPublisher {
    fn publish(&self, request: &PublishRequest<'_>) -> Result<serde_json::Value, ToolError> {
        let name = request
            .subtitle
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.order.lock().unwrap().push(name.clone());

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(self.hold);

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "uploaded": name }))
    }
}

/// Extractor that reports a fixed list of written files, or fails.
pub struct ScriptedExtractor {
    outcome: Result<Vec<String>, String>,
    pub languages: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn writes(files: &[&str]) -> Self {
        Self {
            outcome: Ok(files.iter().map(|f| f.to_string()).collect()),
            languages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            languages: Mutex::new(Vec::new()),
        }
    }

    pub fn languages(&self) -> Vec<String> {
        self.languages.lock().unwrap().clone()
    }
}

impl SubtitleExtractor for ScriptedExtractor {
    fn extract(
        &self,
        _video: &Path,
        language: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, ToolError> {
        self.languages.lock().unwrap().push(language.to_string());
        self.outcome.clone().map_err(ToolError::Failed)
    }
}

/// OCR stand-in; writes the SRT unless built with [`FakeOcr::silent`].
#[derive(Default)]
pub struct FakeOcr {
    skip_output: bool,
    pub languages: Mutex<Vec<String>>,
}

impl FakeOcr {
    /// Exits successfully without writing anything.
    pub fn silent() -> Self {
        Self {
            skip_output: true,
            ..Self::default()
        }
    }

    pub fn languages(&self) -> Vec<String> {
        self.languages.lock().unwrap().clone()
    }
}

impl OcrConverter for FakeOcr {
    fn convert(
        &self,
        request: &OcrRequest<'_>,
        _cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        self.languages
            .lock()
            .unwrap()
            .push(request.language.to_string());
        if self.skip_output {
            return Ok(());
        }
        std::fs::write(request.output, "1\n00:00:01,000 --> 00:00:02,000\nOCR\n").map_err(
            |source| ToolError::Io {
                path: request.output.to_path_buf(),
                source,
            },
        )
    }
}

/// Per-language search results. Languages without an entry find nothing;
/// downloads of ids listed in `broken` fail.
#[derive(Default)]
pub struct ScriptedSearcher {
    results: HashMap<String, Result<Vec<SubtitleCandidate>, String>>,
    broken: Vec<String>,
    pub searched: Mutex<Vec<String>>,
    pub providers_seen: Mutex<Vec<String>>,
}

pub fn candidate(language: &str, id: &str) -> SubtitleCandidate {
    SubtitleCandidate {
        provider: "opensubtitles".to_string(),
        id: id.to_string(),
        language: language.to_string(),
        release: None,
        score: None,
    }
}

impl ScriptedSearcher {
    pub fn finds(mut self, language: &str, ids: &[&str]) -> Self {
        let found = ids.iter().map(|id| candidate(language, id)).collect();
        self.results.insert(language.to_string(), Ok(found));
        self
    }

    pub fn errors(mut self, language: &str, message: &str) -> Self {
        self.results
            .insert(language.to_string(), Err(message.to_string()));
        self
    }

    pub fn broken_download(mut self, id: &str) -> Self {
        self.broken.push(id.to_string());
        self
    }

    pub fn searched(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }
}

impl SubtitleSearcher for ScriptedSearcher {
    fn search(
        &self,
        _video: &Path,
        language: &str,
        providers: &[(&str, &SubtitleProviderConfig)],
    ) -> Result<Vec<SubtitleCandidate>, ToolError> {
        self.searched.lock().unwrap().push(language.to_string());
        let mut seen = self.providers_seen.lock().unwrap();
        seen.clear();
        seen.extend(providers.iter().map(|(name, _)| name.to_string()));

        match self.results.get(language) {
            Some(Ok(found)) => Ok(found.clone()),
            Some(Err(message)) => Err(ToolError::Failed(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn download(
        &self,
        candidate: &SubtitleCandidate,
        video: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ToolError> {
        if self.broken.contains(&candidate.id) {
            return Err(ToolError::Failed(format!("download of {} failed", candidate.id)));
        }
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = output_dir.join(format!("{}.{}.{}.srt", stem, candidate.language, candidate.id));
        std::fs::write(&path, "1\n00:00:01,000 --> 00:00:02,000\nHi\n").map_err(|source| {
            ToolError::Io {
                path: path.clone(),
                source,
            }
        })?;
        Ok(path)
    }
}
