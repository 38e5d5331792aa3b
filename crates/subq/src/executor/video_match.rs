//! Locating the video a subtitle belongs to by file name similarity.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

static RE_DECORATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[._ -](?:track\d+|synced|forced|sdh|cc)$").unwrap());
static RE_LANGUAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[._ -][a-z]{2,3}(?:-[a-z]{2})?$").unwrap());
static RE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[._\s-]+").unwrap());

/// Best candidate found for a subtitle.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMatch {
    pub path: PathBuf,
    pub score: f64,
}

fn strip_decorations(mut stem: &str) -> &str {
    while let Some(m) = RE_DECORATION.find(stem) {
        stem = &stem[..m.start()];
    }
    stem
}

fn collapse(stem: &str) -> String {
    RE_SEPARATORS
        .replace_all(&stem.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Lower-cased subtitle stem without track, language or flag suffixes.
///
/// `Show.S01E02.track3.en.forced.srt` → `show s01e02`
pub fn normalize_subtitle_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut stem = strip_decorations(&stem);
    if let Some(m) = RE_LANGUAGE.find(stem) {
        if m.start() > 0 {
            stem = &stem[..m.start()];
        }
    }
    collapse(strip_decorations(stem))
}

/// Lower-cased video stem with separators collapsed.
pub fn normalize_video_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    collapse(&stem)
}

pub fn similarity(subtitle_name: &str, video_name: &str) -> f64 {
    strsim::jaro_winkler(
        &normalize_subtitle_name(subtitle_name),
        &normalize_video_name(video_name),
    )
}

fn is_video(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first_raw()
        .is_some_and(|mime| mime.starts_with("video/"))
}

/// Scans `dir` (not recursively) for the video whose name best matches
/// `subtitle_name`. Candidates scoring below `threshold` are ignored.
pub fn find_matching_video(dir: &Path, subtitle_name: &str, threshold: f64) -> Option<VideoMatch> {
    let mut best: Option<VideoMatch> = None;

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_video(path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let score = similarity(subtitle_name, &name);
        log::debug!("Video candidate {} scored {:.3}", name, score);

        if score >= threshold && best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(VideoMatch {
                path: path.to_path_buf(),
                score,
            });
        }
    }

    best
}
