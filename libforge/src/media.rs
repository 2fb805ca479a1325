//! Media assembly
//!
//! Voiceover synthesis (an edge-tts compatible binary producing audio plus
//! word-boundary subtitles), still-image video assembly via ffmpeg, and the
//! store that turns produced bytes into files served under
//! `{app_url}/media/`. Subprocess inputs and outputs live in scratch
//! directories that are dropped with the call.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::{Config, MediaConfig};
use crate::error::{ForgeError, Result};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// ffmpeg can emit a valid container with no frames; anything under this is
/// treated as a failed encode.
const MIN_VIDEO_BYTES: u64 = 1000;

pub struct VideoSynthesizer {
    ffmpeg_path: String,
    client: reqwest::Client,
}

impl VideoSynthesizer {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| ForgeError::Validation(format!("download failed for {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ForgeError::Validation(format!(
                "download failed for {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ForgeError::Validation(format!("download failed for {}: {}", url, e)))?;
        std::fs::write(dest, &bytes)
            .map_err(|e| ForgeError::Validation(format!("cannot write {}: {}", dest.display(), e)))?;
        Ok(())
    }

    /// Produce an mp4 from one still image looped under the audio track. The
    /// output runs as long as the audio.
    pub async fn create_video_from_image_and_audio(
        &self,
        image_url: &str,
        audio_url: &str,
    ) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir()
            .map_err(|e| ForgeError::Validation(format!("cannot create scratch dir: {}", e)))?;
        let image_path = scratch.path().join("cover.png");
        let audio_path = scratch.path().join("voiceover.mp3");
        let output_path = scratch.path().join("out.mp4");

        self.download(image_url, &image_path).await?;
        self.download(audio_url, &audio_path).await?;

        let status = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .args(["-loop", "1"])
            .arg("-i")
            .arg(&image_path)
            .arg("-i")
            .arg(&audio_path)
            .args(["-c:v", "libx264"])
            .args(["-tune", "stillimage"])
            .args(["-c:a", "aac"])
            .args(["-b:a", "192k"])
            .args(["-pix_fmt", "yuv420p"])
            // Even dimensions required by yuv420p.
            .args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
            .arg("-shortest")
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| {
                ForgeError::Validation(format!("cannot run {}: {}", self.ffmpeg_path, e))
            })?;

        if !status.status.success() {
            let stderr = String::from_utf8_lossy(&status.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ForgeError::Validation(format!("ffmpeg failed: {}", tail)));
        }

        let size = std::fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);
        if size < MIN_VIDEO_BYTES {
            return Err(ForgeError::Validation(format!(
                "ffmpeg produced a degenerate file ({} bytes)",
                size
            )));
        }

        std::fs::read(&output_path)
            .map_err(|e| ForgeError::Validation(format!("cannot read output: {}", e)))
    }
}

/// TTS output under this size carries no audible audio.
const MIN_AUDIO_BYTES: usize = 100;

/// Rough mp3 bitrate divisor for estimating duration when the subtitle file
/// is missing.
const FALLBACK_BYTES_PER_SECOND: f64 = 2000.0;

const WORDS_PER_LINE: usize = 6;

pub const DEFAULT_VOICE: &str = "es-MX-DaliaNeural";

#[derive(Debug, Clone)]
pub struct VoiceoverTrack {
    pub audio: Vec<u8>,
    pub duration_seconds: f64,
    pub subtitles_srt: String,
    pub subtitles_vtt: String,
    pub voice: String,
}

/// Drives an edge-tts compatible binary: text in, mp3 plus a word-boundary
/// subtitle file out. The word cues are regrouped into six-word lines for
/// both SRT and VTT.
pub struct VoiceSynthesizer {
    tts_path: String,
}

impl VoiceSynthesizer {
    pub fn new(tts_path: &str) -> Self {
        Self {
            tts_path: shellexpand::tilde(tts_path).to_string(),
        }
    }

    /// None when no TTS binary is configured; voiceover is optional.
    pub fn from_config(config: &MediaConfig) -> Option<Self> {
        config.tts_path.as_deref().map(Self::new)
    }

    pub async fn synthesize(&self, script: &str, voice: Option<&str>) -> Result<VoiceoverTrack> {
        let voice = voice.unwrap_or(DEFAULT_VOICE);
        let text = strip_timestamps(script);
        if text.is_empty() {
            return Err(ForgeError::Validation(
                "script is empty after timestamp cleanup".to_string(),
            ));
        }

        let scratch = tempfile::tempdir()
            .map_err(|e| ForgeError::Validation(format!("cannot create scratch dir: {}", e)))?;
        let audio_path = scratch.path().join("voiceover.mp3");
        let subs_path = scratch.path().join("voiceover.srt");

        let output = Command::new(&self.tts_path)
            .args(["--voice", voice])
            .args(["--text", &text])
            .arg("--write-media")
            .arg(&audio_path)
            .arg("--write-subtitles")
            .arg(&subs_path)
            .output()
            .await
            .map_err(|e| ForgeError::Validation(format!("cannot run {}: {}", self.tts_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::Validation(format!(
                "tts failed: {}",
                stderr.lines().last().unwrap_or("no output")
            )));
        }

        let audio = std::fs::read(&audio_path)
            .map_err(|e| ForgeError::Validation(format!("cannot read tts audio: {}", e)))?;
        if audio.len() < MIN_AUDIO_BYTES {
            return Err(ForgeError::Validation(format!(
                "tts returned empty audio ({} bytes)",
                audio.len()
            )));
        }

        let words = std::fs::read_to_string(&subs_path)
            .map(|raw| parse_cue_words(&raw))
            .unwrap_or_default();

        let (subtitles_srt, subtitles_vtt, duration_seconds) = if words.is_empty() {
            // No boundary file; estimate from the audio size.
            (
                String::new(),
                "WEBVTT\n\n".to_string(),
                audio.len() as f64 / FALLBACK_BYTES_PER_SECOND,
            )
        } else {
            build_subtitle_tracks(&words)
        };

        Ok(VoiceoverTrack {
            audio,
            duration_seconds: (duration_seconds * 10.0).round() / 10.0,
            subtitles_srt,
            subtitles_vtt,
            voice: voice.to_string(),
        })
    }
}

/// Remove script timing markers like `[0:00-0:03]` so they are not read
/// aloud. Anything else in brackets stays.
fn strip_timestamps(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let (head, tail) = rest.split_at(open);
        out.push_str(head);
        match tail[1..].find(']') {
            Some(close) if is_timestamp_marker(&tail[1..1 + close]) => {
                rest = tail[2 + close..].trim_start_matches([' ', '\t']);
            }
            _ => {
                out.push('[');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    collapse_blank_runs(&out).trim().to_string()
}

fn is_timestamp_marker(inner: &str) -> bool {
    let Some((start, end)) = inner.split_once(['-', '\u{2013}']) else {
        return false;
    };
    is_clock(start) && is_clock(end)
}

fn is_clock(s: &str) -> bool {
    let Some((minutes, seconds)) = s.split_once(':') else {
        return false;
    };
    (1..=2).contains(&minutes.len())
        && minutes.chars().all(|c| c.is_ascii_digit())
        && seconds.len() == 2
        && seconds.chars().all(|c| c.is_ascii_digit())
}

/// Three or more consecutive newlines become a single blank line.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}

struct WordSpan {
    text: String,
    start_ms: i64,
    end_ms: i64,
}

/// Parse the per-word cues the TTS writes. Index lines and headers carry no
/// `-->` and are skipped; both SRT and VTT time separators are accepted.
fn parse_cue_words(raw: &str) -> Vec<WordSpan> {
    let mut words = Vec::new();
    let mut lines = raw.lines().peekable();
    while let Some(line) = lines.next() {
        let Some((start, end)) = line.split_once("-->") else {
            continue;
        };
        let (Some(start_ms), Some(end_ms)) = (parse_cue_time(start), parse_cue_time(end)) else {
            continue;
        };
        let mut text = String::new();
        while let Some(next) = lines.peek() {
            if next.trim().is_empty() || next.contains("-->") {
                break;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(next.trim());
            lines.next();
        }
        if !text.is_empty() {
            words.push(WordSpan {
                text,
                start_ms,
                end_ms,
            });
        }
    }
    words
}

fn parse_cue_time(s: &str) -> Option<i64> {
    let (clock, millis) = s.trim().split_once([',', '.'])?;
    let mut parts = clock.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    let millis: i64 = millis.parse().ok()?;
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// Regroup word cues into six-word subtitle lines. Returns the SRT text, the
/// VTT text, and the duration taken from the last word's end.
fn build_subtitle_tracks(words: &[WordSpan]) -> (String, String, f64) {
    let mut srt = String::new();
    let mut vtt = String::from("WEBVTT\n\n");
    let mut duration_ms = 0;

    for (index, group) in words.chunks(WORDS_PER_LINE).enumerate() {
        let first = &group[0];
        let last = &group[group.len() - 1];
        let line = group
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        srt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(first.start_ms),
            format_srt_time(last.end_ms),
            line
        ));
        vtt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_vtt_time(first.start_ms),
            format_vtt_time(last.end_ms),
            line
        ));
        duration_ms = last.end_ms;
    }

    (srt, vtt, duration_ms as f64 / 1000.0)
}

fn format_srt_time(ms: i64) -> String {
    format!(
        "{:02}:{:02}:{:02},{:03}",
        ms / 3_600_000,
        ms % 3_600_000 / 60_000,
        ms % 60_000 / 1000,
        ms % 1000
    )
}

fn format_vtt_time(ms: i64) -> String {
    format_srt_time(ms).replace(',', ".")
}

/// Filesystem-backed store for synthesized media. Files land in one flat
/// directory and are addressed as `{app_url}/media/{name}`.
pub struct MediaStore {
    dir: PathBuf,
    app_url: String,
}

impl MediaStore {
    pub fn new(dir: PathBuf, app_url: &str) -> Self {
        Self {
            dir,
            app_url: app_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let dir = config
            .media
            .media_dir
            .as_deref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).to_string()))
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("socialforge")
                    .join("media")
            });
        Self::new(dir, &config.app_url)
    }

    pub fn store(&self, bytes: &[u8], extension: &str) -> Result<String> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ForgeError::Validation(format!("cannot create media dir: {}", e)))?;
        let name = format!("{}.{}", Uuid::new_v4(), extension);
        std::fs::write(self.dir.join(&name), bytes)
            .map_err(|e| ForgeError::Validation(format!("cannot write media file: {}", e)))?;
        Ok(format!("{}/media/{}", self.app_url, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_timestamps_removes_markers_only() {
        let script = "[0:00-0:03] Hook line\n\n\n\n[0:03–0:15] Body text [not a marker]";
        let cleaned = strip_timestamps(script);
        assert_eq!(cleaned, "Hook line\n\nBody text [not a marker]");
    }

    #[test]
    fn test_cue_times_parse_both_separators() {
        assert_eq!(parse_cue_time(" 00:00:01,250 "), Some(1250));
        assert_eq!(parse_cue_time("01:02:03.004"), Some(3_723_004));
        assert_eq!(parse_cue_time("no clock"), None);
    }

    #[test]
    fn test_word_cues_group_into_six_word_lines() {
        let raw = (0..8)
            .map(|i| {
                format!(
                    "{}\n00:00:0{},000 --> 00:00:0{},500\nword{}\n\n",
                    i + 1,
                    i,
                    i,
                    i
                )
            })
            .collect::<String>();
        let words = parse_cue_words(&raw);
        assert_eq!(words.len(), 8);

        let (srt, vtt, duration) = build_subtitle_tracks(&words);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:05,500\n"));
        assert!(srt.contains("word0 word1 word2 word3 word4 word5"));
        assert!(srt.contains("2\n00:00:06,000 --> 00:00:07,500\nword6 word7"));
        assert!(vtt.starts_with("WEBVTT\n\n1\n00:00:00.000 --> 00:00:05.500\n"));
        // Duration comes from the last word's end.
        assert!((duration - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_media_store_serves_under_app_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().join("media"), "http://localhost:3000/");
        let url = store.store(b"payload", "mp3").unwrap();
        assert!(url.starts_with("http://localhost:3000/media/"));
        assert!(url.ends_with(".mp3"));

        let name = url.rsplit('/').next().unwrap();
        let stored = std::fs::read(dir.path().join("media").join(name)).unwrap();
        assert_eq!(stored, b"payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_synthesize_reads_audio_and_regroups_subtitles() {
        use std::os::unix::fs::PermissionsExt;

        // Stand-in for the TTS binary: emits fixed audio and two word cues
        // at the paths given by --write-media / --write-subtitles.
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-tts");
        std::fs::write(
            &fake,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 --write-media) media=\"$2\"; shift 2 ;;\n\
                 --write-subtitles) subs=\"$2\"; shift 2 ;;\n\
                 *) shift ;;\n\
               esac\n\
             done\n\
             head -c 4000 /dev/zero > \"$media\"\n\
             printf '1\\n00:00:00,000 --> 00:00:00,400\\nhola\\n\\n2\\n00:00:00,400 --> 00:00:01,200\\nmundo\\n\\n' > \"$subs\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let synth = VoiceSynthesizer::new(fake.to_str().unwrap());
        let track = synth
            .synthesize("[0:00-0:03] hola mundo", None)
            .await
            .unwrap();

        assert_eq!(track.audio.len(), 4000);
        assert_eq!(track.voice, DEFAULT_VOICE);
        assert!((track.duration_seconds - 1.2).abs() < f64::EPSILON);
        assert!(track.subtitles_srt.contains("hola mundo"));
        assert!(track.subtitles_vtt.starts_with("WEBVTT"));
    }

    #[tokio::test]
    async fn test_synthesize_fails_on_missing_binary() {
        let synth = VoiceSynthesizer::new("/nonexistent/fake-tts");
        let err = synth.synthesize("some script", None).await.unwrap_err();
        assert!(err.to_string().contains("cannot run"));
    }
}
