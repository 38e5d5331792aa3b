//! External collaborators invoked by job handlers.
//!
//! Each operation sits behind a narrow trait so the executor can be driven
//! with the subprocess-backed implementations in production and scripted
//! fakes in tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::jobs::{CancellationToken, SyncOptions};
use crate::settings::{Provider, SubtitleProviderConfig};

pub mod align;
pub mod command;
mod error;
pub mod ffmpeg;
pub mod translator;

pub use align::FfsubsyncAligner;
pub use error::ToolError;
pub use ffmpeg::FfmpegExtractor;
pub use translator::DockerTranslator;

/// Pulls subtitle streams out of a video container.
pub trait SubtitleExtractor: Send + Sync {
    /// Extracts every stream tagged `language`. Returns the written file
    /// names (relative to the video's directory).
    fn extract(
        &self,
        video: &Path,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ToolError>;
}

/// Input to a bitmap subtitle OCR run.
#[derive(Debug, Clone)]
pub struct OcrRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub language: &'a str,
    pub debug: bool,
    pub debug_subtitle_index: Option<u32>,
}

/// Converts PGS (`.sup`) or VobSub (`.sub` + `.idx`) subtitles to SRT.
pub trait OcrConverter: Send + Sync {
    fn convert(&self, request: &OcrRequest<'_>, cancel: &CancellationToken)
        -> Result<(), ToolError>;
}

/// One translation call against a single provider and key.
#[derive(Debug)]
pub struct TranslationRequest<'a> {
    /// Library root the input lives under.
    pub root: &'a Path,
    pub input: &'a Path,
    pub output: &'a Path,
    pub target_lang: &'a str,
    pub provider: Provider,
    pub api_key: SecretString,
    pub wait_ms: u64,
    pub azure_endpoint: &'a str,
    pub azure_region: &'a str,
    /// Host path of a WireGuard config to tunnel this call through.
    pub vpn_config: Option<PathBuf>,
}

/// Translates an SRT file.
pub trait Translator: Send + Sync {
    fn translate(
        &self,
        request: &TranslationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError>;
}

/// A subtitle offered by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCandidate {
    pub provider: String,
    pub id: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Searches online providers and downloads subtitles next to a video.
pub trait SubtitleSearcher: Send + Sync {
    fn search(
        &self,
        video: &Path,
        language: &str,
        providers: &[(&str, &SubtitleProviderConfig)],
    ) -> Result<Vec<SubtitleCandidate>, ToolError>;

    /// Downloads one candidate into `output_dir` and returns the file written.
    fn download(
        &self,
        candidate: &SubtitleCandidate,
        video: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ToolError>;
}

/// Shifts a subtitle so it lines up with a video's audio.
pub trait SubtitleAligner: Send + Sync {
    fn align(
        &self,
        video: &Path,
        subtitle: &Path,
        output: &Path,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError>;
}

#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub subtitle: &'a Path,
    pub provider: &'a str,
    pub credentials: Option<&'a SubtitleProviderConfig>,
    pub language: Option<&'a str>,
    pub title: Option<&'a str>,
    pub comment: Option<&'a str>,
}

/// Uploads a subtitle to a publishing provider.
pub trait SubtitlePublisher: Send + Sync {
    fn publish(&self, request: &PublishRequest<'_>) -> Result<serde_json::Value, ToolError>;
}

/// Placeholder for collaborators that are not wired in this deployment.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable(pub &'static str);

impl SubtitleExtractor for Unavailable {
    fn extract(&self, _: &Path, _: &str, _: &CancellationToken) -> Result<Vec<String>, ToolError> {
        Err(ToolError::Unavailable(self.0))
    }
}

impl OcrConverter for Unavailable {
    fn convert(&self, _: &OcrRequest<'_>, _: &CancellationToken) -> Result<(), ToolError> {
        Err(ToolError::Unavailable(self.0))
    }
}

impl Translator for Unavailable {
    fn translate(&self, _: &TranslationRequest<'_>, _: &CancellationToken) -> Result<(), ToolError> {
        Err(ToolError::Unavailable(self.0))
    }
}

impl SubtitleSearcher for Unavailable {
    fn search(
        &self,
        _: &Path,
        _: &str,
        _: &[(&str, &SubtitleProviderConfig)],
    ) -> Result<Vec<SubtitleCandidate>, ToolError> {
        Err(ToolError::Unavailable(self.0))
    }

    fn download(&self, _: &SubtitleCandidate, _: &Path, _: &Path) -> Result<PathBuf, ToolError> {
        Err(ToolError::Unavailable(self.0))
    }
}

impl SubtitleAligner for Unavailable {
    fn align(
        &self,
        _: &Path,
        _: &Path,
        _: &Path,
        _: &SyncOptions,
        _: &CancellationToken,
    ) -> Result<(), ToolError> {
        Err(ToolError::Unavailable(self.0))
    }
}

impl SubtitlePublisher for Unavailable {
    fn publish(&self, _: &PublishRequest<'_>) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::Unavailable(self.0))
    }
}

/// The set of collaborators handed to the executor.
#[derive(Clone)]
pub struct Toolbox {
    pub extractor: Arc<dyn SubtitleExtractor>,
    pub ocr: Arc<dyn OcrConverter>,
    pub translator: Arc<dyn Translator>,
    pub searcher: Arc<dyn SubtitleSearcher>,
    pub aligner: Arc<dyn SubtitleAligner>,
    pub publisher: Arc<dyn SubtitlePublisher>,
}

impl Toolbox {
    /// Every collaborator reports itself as unavailable.
    pub fn unavailable() -> Self {
        Self {
            extractor: Arc::new(Unavailable("Subtitle extraction")),
            ocr: Arc::new(Unavailable("OCR conversion")),
            translator: Arc::new(Unavailable("Translation")),
            searcher: Arc::new(Unavailable("Subtitle search")),
            aligner: Arc::new(Unavailable("Subtitle alignment")),
            publisher: Arc::new(Unavailable("Subtitle publishing")),
        }
    }

    /// Subprocess-backed extraction, alignment and translation. OCR, search
    /// and publishing stay unavailable until an implementation is plugged in.
    pub fn system() -> Self {
        Self {
            extractor: Arc::new(FfmpegExtractor::default()),
            aligner: Arc::new(FfsubsyncAligner::default()),
            translator: Arc::new(DockerTranslator::default()),
            ..Self::unavailable()
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn SubtitleExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrConverter>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_searcher(mut self, searcher: Arc<dyn SubtitleSearcher>) -> Self {
        self.searcher = searcher;
        self
    }

    pub fn with_aligner(mut self, aligner: Arc<dyn SubtitleAligner>) -> Self {
        self.aligner = aligner;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn SubtitlePublisher>) -> Self {
        self.publisher = publisher;
        self
    }
}
