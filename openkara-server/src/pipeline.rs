//! Six-stage track processing pipeline
//!
//! METADATA → DOWNLOADING → SPLITTING → LYRICS → PROCESSING → COMPLETE
//!
//! Every stage is idempotent: when its output artifact already exists
//! (non-empty) it publishes the stage's completion progress and returns
//! without side effects, which makes the whole pipeline resumable from any
//! point by simply re-running it. A stage failure records a
//! `processing_failures` row and an `error_log` entry, marks the track ERROR
//! and stops; artifacts stay on disk for a later reprocess.

use crate::align::{check_asr_health, correct_with_reference, flatten_text, split_karaoke};
use crate::context::Context;
use crate::models::{
    LyricsDoc, RawLyrics, RawSegment, RawWord, ReferenceLyrics, TrackMetadata, DEFAULT_SPEAKER,
};
use crate::services::AlignerOptions;
use crate::store::TrackFile;
use chrono::Utc;
use openkara_common::db::{log_event, log_pipeline_error, record_failure};
use openkara_common::{Error, ProcessingStage, Result, TrackEvent};
use std::sync::Arc;

/// Bitrate the vocal and instrumental stems are re-encoded to.
const STEM_BITRATE_KBPS: u32 = 128;
/// Fresh aligner calls after an unhealthy transcript.
const MAX_ASR_RETRIES: usize = 2;

pub struct Pipeline {
    ctx: Arc<Context>,
}

impl Pipeline {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run the pipeline for one track to completion or first failure.
    pub async fn run(&self, track_id: &str) {
        tracing::info!(track_id, "pipeline started");

        let result: std::result::Result<(), (&'static str, Error)> = async {
            self.stage_metadata(track_id).await.map_err(|e| ("metadata", e))?;
            self.stage_download(track_id).await.map_err(|e| ("download", e))?;
            self.stage_split(track_id).await.map_err(|e| ("splitting", e))?;
            self.stage_lyrics(track_id).await.map_err(|e| ("lyrics", e))?;
            self.stage_process(track_id).await.map_err(|e| ("processing", e))?;
            self.stage_complete(track_id).await.map_err(|e| ("complete", e))?;
            Ok(())
        }
        .await;

        if let Err((stage, error)) = result {
            self.fail(track_id, stage, error).await;
        }
    }

    /// Publish a status transition to the registry and the event bus.
    fn publish(&self, track_id: &str, stage: ProcessingStage, progress: u8, detail: &str) {
        self.ctx.registry.set(track_id, stage, progress, detail);
        if let Some(status) = self.ctx.registry.get(track_id) {
            self.ctx
                .event_bus
                .emit_lossy(TrackEvent::progress(track_id, &status));
        }
    }

    async fn fail(&self, track_id: &str, stage: &'static str, error: Error) {
        let message = error.to_string();
        tracing::error!(track_id, stage, "pipeline failed: {}", message);

        record_failure(&self.ctx.db, track_id, stage, &message)
            .await
            .unwrap_or_else(|e| tracing::warn!("could not record failure: {}", e));
        let backtrace = std::backtrace::Backtrace::force_capture().to_string();
        log_pipeline_error(&self.ctx.db, track_id, stage, &message, Some(&backtrace)).await;

        self.ctx
            .registry
            .set(track_id, ProcessingStage::Error, 0, &message);
        self.ctx.event_bus.emit_lossy(TrackEvent::TrackFailed {
            track_id: track_id.to_string(),
            stage: stage_enum(stage),
            error: message,
            timestamp: Utc::now(),
        });
    }

    /// Stage 1: fetch track metadata from the audio source.
    async fn stage_metadata(&self, track_id: &str) -> Result<()> {
        let floor = ProcessingStage::Metadata.progress_floor();
        if self.ctx.store.exists(track_id, TrackFile::Metadata) {
            self.publish(track_id, ProcessingStage::Metadata, floor, "Song info ready");
            return Ok(());
        }

        self.publish(track_id, ProcessingStage::Metadata, 2, "Getting song info...");

        let info = self.ctx.audio_source.get_info(track_id).await?;
        let metadata = TrackMetadata {
            id: track_id.to_string(),
            title: info.title,
            artist: info.artist,
            album: info.album,
            duration: info.duration,
            img_url: info.img_url,
            source_data: Some(info.media),
        };
        self.ctx
            .store
            .save_json(track_id, TrackFile::Metadata, &metadata)?;

        self.publish(track_id, ProcessingStage::Metadata, floor, "Song info ready");
        Ok(())
    }

    /// Stage 2: download the full audio file.
    async fn stage_download(&self, track_id: &str) -> Result<()> {
        let floor = ProcessingStage::Downloading.progress_floor();
        if self.ctx.store.exists(track_id, TrackFile::Song) {
            self.publish(track_id, ProcessingStage::Downloading, floor, "Song downloaded");
            return Ok(());
        }

        self.publish(track_id, ProcessingStage::Downloading, 12, "Downloading song...");

        let metadata = self.load_metadata(track_id)?;
        let media = metadata.source_data.unwrap_or(serde_json::Value::Null);
        self.ctx
            .audio_source
            .download(&media, &self.ctx.store, track_id)
            .await?;

        self.publish(track_id, ProcessingStage::Downloading, floor, "Song downloaded");
        Ok(())
    }

    /// Stage 3: separate vocals from the instrumental and re-encode both.
    async fn stage_split(&self, track_id: &str) -> Result<()> {
        let floor = ProcessingStage::Splitting.progress_floor();
        // The vocal stem is the only separation artifact downstream stages
        // need, so its presence alone marks this stage done.
        if self.ctx.store.exists(track_id, TrackFile::Vocals) {
            self.publish(track_id, ProcessingStage::Splitting, floor, "Vocals separated");
            return Ok(());
        }

        self.publish(track_id, ProcessingStage::Splitting, 25, "Preparing audio...");
        let song_path = self.ctx.store.path(track_id, TrackFile::Song);
        let audio_url = self.ctx.model_host.upload(&song_path).await?;

        self.publish(track_id, ProcessingStage::Splitting, 30, "Separating vocals...");
        let output = self.ctx.model_host.run_separator(&audio_url).await?;

        self.publish(track_id, ProcessingStage::Splitting, 45, "Saving vocal tracks...");
        self.ctx
            .model_host
            .download_output(output.vocals_url(), &self.ctx.store, track_id, TrackFile::Vocals)
            .await?;

        match output.no_vocals_url() {
            Some(url) => {
                self.ctx
                    .model_host
                    .download_output(url, &self.ctx.store, track_id, TrackFile::NoVocals)
                    .await?;
            }
            None => {
                // Downstream stages only need the vocal stem.
                tracing::warn!(track_id, "separator returned no instrumental stem");
            }
        }

        self.publish(track_id, ProcessingStage::Splitting, 48, "Compressing audio...");
        for file in [TrackFile::Vocals, TrackFile::NoVocals] {
            if self.ctx.store.exists(track_id, file) {
                let path = self.ctx.store.path(track_id, file);
                if let Err(e) = self.ctx.store.compress_audio(&path, STEM_BITRATE_KBPS).await {
                    tracing::warn!(track_id, "could not compress {}: {}", file.key(), e);
                }
            }
        }

        self.publish(track_id, ProcessingStage::Splitting, floor, "Vocals separated");
        Ok(())
    }

    /// Stage 4: word-level ASR over the vocal stem, with a speculative
    /// reference-lyrics fetch, a transcript health gate and a generative
    /// voice-to-text fallback.
    async fn stage_lyrics(&self, track_id: &str) -> Result<()> {
        let floor = ProcessingStage::Lyrics.progress_floor();
        if self.ctx.store.exists(track_id, TrackFile::LyricsRaw) {
            self.publish(track_id, ProcessingStage::Lyrics, floor, "Lyrics extracted");
            return Ok(());
        }

        self.publish(track_id, ProcessingStage::Lyrics, 55, "Fetching reference lyrics...");

        let metadata = self.ctx.store.load_json::<TrackMetadata>(track_id, TrackFile::Metadata)?;
        let mut ref_lines: Option<Vec<String>> = None;
        if let Some(meta) = &metadata {
            if !meta.title.is_empty() && !meta.artist.is_empty() {
                ref_lines = self.ctx.lyrics.fetch(&meta.title, &meta.artist).await;
                if let Some(lines) = &ref_lines {
                    self.ctx.store.save_json(
                        track_id,
                        TrackFile::ReferenceLyrics,
                        &ReferenceLyrics { lines: lines.clone() },
                    )?;
                }
            }
        }

        self.publish(track_id, ProcessingStage::Lyrics, 58, "Analyzing vocals...");
        let vocals_path = self.ctx.store.path(track_id, TrackFile::Vocals);
        let audio_url = self.ctx.model_host.upload(&vocals_path).await?;

        self.publish(track_id, ProcessingStage::Lyrics, 60, "Extracting lyrics...");
        let options = AlignerOptions {
            diarize: true,
            initial_prompt: ref_lines.as_ref().map(|lines| lines.join("\n")),
        };
        let mut raw = self.ctx.model_host.run_aligner(&audio_url, &options).await?;

        let mut verdict = check_asr_health(&raw, ref_lines.as_deref());
        let mut retries = 0;
        while !verdict.is_healthy() && retries < MAX_ASR_RETRIES {
            retries += 1;
            tracing::warn!(track_id, retries, "unhealthy transcript ({:?}); retrying", verdict);
            self.publish(track_id, ProcessingStage::Lyrics, 60, "Re-extracting lyrics...");
            match self.ctx.model_host.run_aligner(&audio_url, &options).await {
                Ok(fresh) => {
                    raw = fresh;
                    verdict = check_asr_health(&raw, ref_lines.as_deref());
                }
                Err(e) => {
                    tracing::warn!(track_id, "aligner retry failed: {}", e);
                    break;
                }
            }
        }

        if !verdict.is_healthy() {
            if let Some(meta) = &metadata {
                self.publish(
                    track_id,
                    ProcessingStage::Lyrics,
                    62,
                    "Transcribing with generative fallback...",
                );
                if let Some(lines) = self
                    .ctx
                    .lyrics
                    .fetch_generative(&meta.title, &meta.artist, None, Some(&vocals_path))
                    .await
                {
                    raw = raw_lyrics_from_lines(&lines);
                } else {
                    tracing::warn!(track_id, "generative transcription unavailable; keeping transcript");
                }
            }
        }

        self.ctx.store.save_json(track_id, TrackFile::LyricsRaw, &raw)?;
        self.publish(track_id, ProcessingStage::Lyrics, floor, "Lyrics extracted");
        Ok(())
    }

    /// Stage 5: correct the transcript against reference lyrics and split it
    /// into karaoke lines.
    async fn stage_process(&self, track_id: &str) -> Result<()> {
        let floor = ProcessingStage::Processing.progress_floor();
        if self.ctx.store.exists(track_id, TrackFile::Lyrics) {
            self.publish(track_id, ProcessingStage::Processing, floor, "Lyrics synced");
            return Ok(());
        }

        self.publish(track_id, ProcessingStage::Processing, 86, "Fetching reference lyrics...");

        let mut raw: RawLyrics = self
            .ctx
            .store
            .load_json(track_id, TrackFile::LyricsRaw)?
            .ok_or_else(|| Error::Internal(format!("lyrics_raw.json missing for track {}", track_id)))?;

        let mut ref_lines: Option<Vec<String>> = self
            .ctx
            .store
            .load_json::<ReferenceLyrics>(track_id, TrackFile::ReferenceLyrics)?
            .map(|r| r.lines)
            .filter(|lines| !lines.is_empty());

        // Second chance: the speculative fetch in the lyrics stage may have
        // come up empty; retry with the generative text-only fallback,
        // prompting with the flattened transcript.
        if ref_lines.is_none() {
            if let Some(meta) = self.ctx.store.load_json::<TrackMetadata>(track_id, TrackFile::Metadata)? {
                if !meta.title.is_empty() && !meta.artist.is_empty() {
                    let mut fetched = self.ctx.lyrics.fetch(&meta.title, &meta.artist).await;
                    if fetched.is_none() {
                        self.publish(
                            track_id,
                            ProcessingStage::Processing,
                            87,
                            "Fetching reference lyrics (generative fallback)...",
                        );
                        let raw_text = flatten_text(&raw);
                        let prompt = (!raw_text.is_empty()).then_some(raw_text);
                        fetched = self
                            .ctx
                            .lyrics
                            .fetch_generative(&meta.title, &meta.artist, prompt.as_deref(), None)
                            .await;
                    }
                    if let Some(lines) = &fetched {
                        self.ctx.store.save_json(
                            track_id,
                            TrackFile::ReferenceLyrics,
                            &ReferenceLyrics { lines: lines.clone() },
                        )?;
                    }
                    ref_lines = fetched.filter(|lines| !lines.is_empty());
                }
            }
        }

        if !raw.has_words() {
            // No timing to work with. With reference lyrics the track still
            // completes, as an untimed document.
            return match ref_lines {
                Some(lines) => {
                    self.publish(
                        track_id,
                        ProcessingStage::Processing,
                        89,
                        "Using external lyrics (untimed)...",
                    );
                    self.ctx
                        .store
                        .save_json(track_id, TrackFile::Lyrics, &LyricsDoc::untimed(lines))?;
                    self.publish(track_id, ProcessingStage::Processing, floor, "Lyrics synced (untimed)");
                    Ok(())
                }
                None => Err(Error::ReferenceLyricsUnavailable(track_id.to_string())),
            };
        }

        let (line_breaks, ref_stats) = match &ref_lines {
            Some(lines) => {
                let correction = correct_with_reference(&mut raw, lines);
                // Persist the corrected transcript for the lyric editor.
                self.ctx.store.save_json(track_id, TrackFile::LyricsRaw, &raw)?;
                (correction.line_breaks, Some(correction.stats))
            }
            None => (Vec::new(), None),
        };

        self.publish(track_id, ProcessingStage::Processing, 89, "Processing lyrics...");
        let doc = split_karaoke(&raw, &line_breaks, ref_stats);
        self.ctx.store.save_json(track_id, TrackFile::Lyrics, &doc)?;

        self.publish(track_id, ProcessingStage::Processing, floor, "Lyrics synced");
        Ok(())
    }

    /// Stage 6: strip the media blob from metadata and mark complete.
    async fn stage_complete(&self, track_id: &str) -> Result<()> {
        if let Some(mut metadata) = self
            .ctx
            .store
            .load_json::<TrackMetadata>(track_id, TrackFile::Metadata)?
        {
            if metadata.source_data.is_some() {
                metadata.source_data = None;
                self.ctx
                    .store
                    .save_json(track_id, TrackFile::Metadata, &metadata)?;
            }
        }

        log_event(
            &self.ctx.db,
            "info",
            "pipeline",
            &format!("Processing complete for track {}", track_id),
            None,
            Some(track_id),
            None,
            None,
        )
        .await;

        self.publish(track_id, ProcessingStage::Complete, 100, "Ready to play!");
        self.ctx.event_bus.emit_lossy(TrackEvent::TrackReady {
            track_id: track_id.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(track_id, "pipeline complete");
        Ok(())
    }

    fn load_metadata(&self, track_id: &str) -> Result<TrackMetadata> {
        self.ctx
            .store
            .load_json(track_id, TrackFile::Metadata)?
            .ok_or_else(|| Error::Internal(format!("metadata.json missing for track {}", track_id)))
    }
}

fn stage_enum(stage: &str) -> ProcessingStage {
    match stage {
        "metadata" => ProcessingStage::Metadata,
        "download" => ProcessingStage::Downloading,
        "splitting" => ProcessingStage::Splitting,
        "lyrics" => ProcessingStage::Lyrics,
        "processing" => ProcessingStage::Processing,
        _ => ProcessingStage::Error,
    }
}

/// Remap generative plain-text output to the raw transcript schema: one
/// segment per line, no timing (the splitter inherits defaults).
fn raw_lyrics_from_lines(lines: &[String]) -> RawLyrics {
    RawLyrics {
        segments: lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| RawSegment {
                start: None,
                end: None,
                speaker: Some(DEFAULT_SPEAKER.to_string()),
                text: Some(line.clone()),
                words: line
                    .split_whitespace()
                    .map(|w| RawWord {
                        word: w.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            })
            .collect(),
    }
}
