//! ffprobe/ffmpeg integration
//!
//! Probing uses ffprobe's JSON output to read dimensions, duration and size of
//! a local file or remote stream. Audio extraction and HLS downloads shell out
//! to ffmpeg with stream copy into a Matroska container.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::download::TransferError;

/// Probe result for a file or URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaProbe {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Seconds
    pub duration: Option<f64>,
    /// Bytes
    pub size: Option<u64>,
}

impl MediaProbe {
    /// Width, height and a positive duration are all known.
    pub fn is_complete(&self) -> bool {
        matches!((self.width, self.height), (Some(w), Some(h)) if w > 0 && h > 0)
            && self.duration.is_some_and(|d| d > 0.0)
    }
}

/// Media probing seam
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// `None` when the target cannot be probed.
    async fn probe(&self, url_or_path: &str) -> Option<MediaProbe>;
}

/// Audio track tagging for extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub language: String,
    pub original_language: bool,
    pub audio_description: bool,
}

mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub duration: Option<String>,
    }
}

/// Upper bound for one ffprobe run against a remote stream
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Wraps the ffprobe and ffmpeg executables
#[derive(Debug, Clone)]
pub struct FfmpegService {
    ffprobe_path: String,
    ffmpeg_path: String,
    probe_timeout: Duration,
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegService {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Check if ffprobe is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Pull the audio track of a remote video into a Matroska audio file.
    pub async fn extract_audio(
        &self,
        url: &str,
        output: &Path,
        track: &AudioTrackInfo,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        info!(url = %url, output = %output.display(), language = %track.language, "Extracting audio");
        self.run_ffmpeg(audio_extraction_args(url, output, track), cancel).await
    }

    /// Download an HLS manifest into a single Matroska file.
    pub async fn download_segmented(
        &self,
        url: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        info!(url = %url, output = %output.display(), "Downloading segmented stream");
        self.run_ffmpeg(segmented_download_args(url, output), cancel).await
    }

    async fn run_ffmpeg(
        &self,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransferError::Process(format!("failed to start ffmpeg: {}", e)))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(TransferError::Cancelled);
            }
        };

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(TransferError::Process(format!(
                "ffmpeg exited with {}: {}",
                status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
                tail
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl MediaProber for FfmpegService {
    async fn probe(&self, url_or_path: &str) -> Option<MediaProbe> {
        let target = resolve_probe_target(url_or_path).await?;
        debug!(target = %target, "Probing media with ffprobe");

        let run = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args([
                "-show_entries",
                "stream=width,height,duration,codec_type:format=duration,size",
            ])
            .args(["-of", "json"])
            .arg(&target)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.probe_timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to execute ffprobe");
                return None;
            }
            Err(_) => {
                warn!(target = %target, timeout_secs = self.probe_timeout.as_secs(), "ffprobe timed out");
                return None;
            }
        };

        if !output.status.success() {
            warn!(
                target = %target,
                exit_code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ffprobe failed"
            );
            return None;
        }

        match parse_probe_output(&output.stdout) {
            Some(probe) => Some(probe),
            None => {
                warn!(target = %target, "Could not parse ffprobe output");
                None
            }
        }
    }
}

/// `.strm` files are probed through the URL they contain.
async fn resolve_probe_target(url_or_path: &str) -> Option<String> {
    let trimmed = url_or_path.trim();
    if trimmed.is_empty() {
        return None;
    }

    let path = Path::new(trimmed);
    let is_strm = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("strm"));

    if is_strm && path.is_file() {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let url = content.lines().map(str::trim).find(|l| !l.is_empty())?;
        return Some(url.to_string());
    }

    Some(trimmed.to_string())
}

fn parse_probe_output(stdout: &[u8]) -> Option<MediaProbe> {
    let probe: ffprobe::FfprobeOutput = serde_json::from_slice(stdout).ok()?;
    let streams = probe.streams.unwrap_or_default();

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video") || (s.codec_type.is_none() && s.width.is_some()));

    let format_duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());
    let stream_duration = video
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());
    let size = probe
        .format
        .as_ref()
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<u64>().ok());

    Some(MediaProbe {
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        duration: format_duration.or(stream_duration),
        size,
    })
}

fn audio_extraction_args(url: &str, output: &Path, track: &AudioTrackInfo) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-i".into(),
        url.into(),
        "-vn".into(),
        "-acodec".into(),
        "copy".into(),
        "-metadata:s:a:0".into(),
        format!("language={}", track.language),
    ];

    let mut dispositions = Vec::new();
    if track.original_language {
        dispositions.push("original");
    }
    if track.audio_description {
        dispositions.push("visual_impaired");
    }
    if !dispositions.is_empty() {
        args.push("-disposition:a:0".into());
        args.push(dispositions.join("+"));
    }

    args.extend([
        "-f".into(),
        "matroska".into(),
        "-y".into(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

fn segmented_download_args(url: &str, output: &Path) -> Vec<String> {
    vec![
        "-protocol_whitelist".into(),
        "file,http,https,tcp,tls".into(),
        "-i".into(),
        url.into(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "matroska".into(),
        "-y".into(),
        output.to_string_lossy().into_owned(),
    ]
}
