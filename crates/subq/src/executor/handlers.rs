//! One handler per job type.

use std::path::{Path, PathBuf};

use crate::error::JobError;
use crate::failover::{run_translation_with_failover, TranslationTarget};
use crate::jobs::{
    CancellationToken, ExtractOutput, ExtractParams, Job, JobOutput, JobParams,
    PublishSubtitlesOutput, PublishSubtitlesParams, SearchAttempt, SearchSubtitlesOutput,
    SearchSubtitlesParams, SupToSrtOutput, SupToSrtParams, SyncSubtitlesOutput,
    SyncSubtitlesParams, TranslateOutput, TranslateParams,
};
use crate::settings::{Settings, SettingsStore};
use crate::tools::{OcrRequest, PublishRequest, Toolbox};

use super::video_match::find_matching_video;

/// Everything a handler may touch.
pub(crate) struct HandlerContext<'a> {
    pub settings: &'a Settings,
    pub settings_store: &'a dyn SettingsStore,
    pub tools: &'a Toolbox,
    pub max_translation_attempts: u32,
    pub cancel: &'a CancellationToken,
}

pub(crate) fn dispatch(ctx: &HandlerContext<'_>, job: &Job) -> Result<JobOutput, JobError> {
    let base_dir = resolve_base_dir(job.params.base_dir(), ctx.settings)?;
    let file = Path::new(&job.file_path);

    match &job.params {
        JobParams::Extract(p) => extract(ctx, &base_dir, file, p).map(JobOutput::Extract),
        JobParams::SupToSrt(p) => sup_to_srt(ctx, &base_dir, file, p).map(JobOutput::SupToSrt),
        JobParams::Translate(p) => translate(ctx, &base_dir, file, p).map(JobOutput::Translate),
        JobParams::SearchSubtitles(p) => {
            search_subtitles(ctx, &base_dir, file, p).map(JobOutput::SearchSubtitles)
        }
        JobParams::SyncSubtitles(p) => {
            sync_subtitles(ctx, &base_dir, file, p).map(JobOutput::SyncSubtitles)
        }
        JobParams::PublishSubtitles(p) => {
            publish_subtitles(ctx, &base_dir, file, p).map(JobOutput::PublishSubtitles)
        }
    }
}

/// The job's own base directory wins over the configured library root.
fn resolve_base_dir(from_params: Option<&Path>, settings: &Settings) -> Result<PathBuf, JobError> {
    from_params
        .or(settings.root_dir.as_deref())
        .map(Path::to_path_buf)
        .ok_or_else(|| JobError::Configuration("Missing required parameter: base_dir".to_string()))
}

fn require_file(path: PathBuf) -> Result<PathBuf, JobError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(JobError::MissingInput(path))
    }
}

/// `dir/name.ext` → `dir/name.<tag>.ext`
fn with_tag(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}.{}", stem, tag),
    };
    path.with_file_name(name)
}

/// Path relative to the base directory, for results.
fn relative(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn first_non_empty<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn extract(
    ctx: &HandlerContext<'_>,
    base: &Path,
    file: &Path,
    params: &ExtractParams,
) -> Result<ExtractOutput, JobError> {
    let video = require_file(base.join(file))?;
    let language = first_non_empty(&[
        params.source_language.as_deref(),
        Some(ctx.settings.extraction_source_language.as_str()),
    ])
    .unwrap_or("eng");

    let output_files = ctx.tools.extractor.extract(&video, language, ctx.cancel)?;
    let message = format!(
        "Extracted {} subtitle(s): {}",
        output_files.len(),
        output_files.join(", ")
    );
    Ok(ExtractOutput {
        output_files,
        message,
    })
}

fn sup_to_srt(
    ctx: &HandlerContext<'_>,
    base: &Path,
    file: &Path,
    params: &SupToSrtParams,
) -> Result<SupToSrtOutput, JobError> {
    let input = require_file(base.join(file))?;

    let ext = file
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext != "sup" && ext != "sub" {
        return Err(JobError::InvalidParams(format!(
            "Unsupported file type: .{}. Expected .sup or .sub",
            ext
        )));
    }

    let output_rel = file.with_extension("srt");
    let output = base.join(&output_rel);
    let language = first_non_empty(&[
        params.ocr_language.as_deref(),
        Some(ctx.settings.ocr_source_language.as_str()),
    ])
    .unwrap_or("eng");

    ctx.tools.ocr.convert(
        &OcrRequest {
            input: &input,
            output: &output,
            language,
            debug: params.debug,
            debug_subtitle_index: params.debug_subtitle_index,
        },
        ctx.cancel,
    )?;

    if !output.exists() {
        return Err(JobError::Failed("Output file was not created".to_string()));
    }

    Ok(SupToSrtOutput {
        output_file: output_rel.to_string_lossy().into_owned(),
        message: "Conversion successful".to_string(),
    })
}

fn translate(
    ctx: &HandlerContext<'_>,
    base: &Path,
    file: &Path,
    params: &TranslateParams,
) -> Result<TranslateOutput, JobError> {
    let input = require_file(base.join(file))?;
    let target_lang = first_non_empty(&[
        params.target_lang.as_deref(),
        Some(ctx.settings.translation_target_language.as_str()),
    ])
    .ok_or_else(|| JobError::Configuration("No target language configured".to_string()))?;

    let output_rel = with_tag(file, target_lang);
    let output = base.join(&output_rel);

    let outcome = run_translation_with_failover(
        ctx.settings_store,
        ctx.tools.translator.as_ref(),
        &TranslationTarget {
            root: base,
            input: &input,
            output: &output,
            target_lang,
        },
        ctx.max_translation_attempts,
        ctx.cancel,
    )?;

    if !outcome.success {
        return Err(JobError::Translation(outcome.message));
    }

    Ok(TranslateOutput {
        output_file: output_rel.to_string_lossy().into_owned(),
        message: outcome.message,
    })
}

fn search_subtitles(
    ctx: &HandlerContext<'_>,
    base: &Path,
    file: &Path,
    params: &SearchSubtitlesParams,
) -> Result<SearchSubtitlesOutput, JobError> {
    let video = require_file(base.join(file))?;

    let providers = ctx.settings.usable_subtitle_providers();
    if providers.is_empty() {
        return Err(JobError::Configuration(
            "No subtitle providers are configured. Enable and configure OpenSubtitles or Addic7ed in settings."
                .to_string(),
        ));
    }

    let languages = if params.languages.is_empty() {
        &ctx.settings.subtitle_search_languages
    } else {
        &params.languages
    };
    let max_downloads = params
        .max_downloads
        .unwrap_or(ctx.settings.subtitle_max_downloads)
        .max(1) as usize;
    let output_dir = video.parent().unwrap_or(base);

    let mut downloaded_files = Vec::new();
    let mut attempts = Vec::new();
    let mut subtitles = Vec::new();

    for language in languages {
        if ctx.cancel.is_cancelled() {
            return Err(JobError::Failed("Search cancelled".to_string()));
        }

        let candidates = match ctx.tools.searcher.search(&video, language, &providers) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Subtitle search for language {} failed: {}", language, e);
                attempts.push(SearchAttempt {
                    language: language.clone(),
                    found: 0,
                    downloaded: 0,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        let mut downloaded = 0;
        for candidate in candidates.iter().take(max_downloads) {
            match ctx.tools.searcher.download(candidate, &video, output_dir) {
                Ok(path) => {
                    downloaded_files.push(relative(base, &path));
                    downloaded += 1;
                }
                Err(e) => log::warn!(
                    "Downloading subtitle {} from {} failed: {}",
                    candidate.id,
                    candidate.provider,
                    e
                ),
            }
        }

        attempts.push(SearchAttempt {
            language: language.clone(),
            found: candidates.len(),
            downloaded,
            error: None,
        });
        subtitles.extend(candidates);

        if downloaded > 0 {
            break;
        }
    }

    Ok(SearchSubtitlesOutput {
        downloaded_files,
        attempts,
        subtitles,
    })
}

fn sync_subtitles(
    ctx: &HandlerContext<'_>,
    base: &Path,
    file: &Path,
    params: &SyncSubtitlesParams,
) -> Result<SyncSubtitlesOutput, JobError> {
    let subtitle = require_file(base.join(file))?;

    let video = match params.video.as_deref().filter(|v| !v.trim().is_empty()) {
        Some(explicit) => require_file(base.join(explicit))?,
        None => {
            let dir = subtitle.parent().unwrap_or(base);
            let name = subtitle
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            find_matching_video(dir, &name, ctx.settings.sync_similarity_threshold)
                .map(|m| m.path)
                .ok_or_else(|| {
                    JobError::Failed(format!(
                        "No matching video file found for {}",
                        file.display()
                    ))
                })?
        }
    };

    let output_rel = with_tag(file, "synced");
    let output = base.join(&output_rel);
    ctx.tools
        .aligner
        .align(&video, &subtitle, &output, &params.options, ctx.cancel)?;

    Ok(SyncSubtitlesOutput {
        output_file: output_rel.to_string_lossy().into_owned(),
        video: relative(base, &video),
        options: params.options.clone(),
    })
}

fn publish_subtitles(
    ctx: &HandlerContext<'_>,
    base: &Path,
    file: &Path,
    params: &PublishSubtitlesParams,
) -> Result<PublishSubtitlesOutput, JobError> {
    let subtitle = require_file(base.join(file))?;
    let provider = first_non_empty(&[
        params.provider.as_deref(),
        Some(ctx.settings.publish_provider.as_str()),
    ])
    .ok_or_else(|| JobError::Configuration("No publish provider configured".to_string()))?;

    let result = ctx.tools.publisher.publish(&PublishRequest {
        subtitle: &subtitle,
        provider,
        credentials: ctx.settings.subtitle_providers.get(provider),
        language: params.language.as_deref(),
        title: params.title.as_deref(),
        comment: params.comment.as_deref(),
    })?;

    Ok(PublishSubtitlesOutput {
        provider: provider.to_string(),
        result,
    })
}
