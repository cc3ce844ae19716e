use std::path::PathBuf;

use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use tokio::{fs, process};

use crate::{
    config::{AudioFormat, Config},
    errors::{BotError, BotResult},
    temp_file::TempJob,
};

/// Audio extracted from a video, sitting in the job's scratch space
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub title: String,
    pub performer: Option<String>,
    pub duration: Option<u32>,
}

/// Anything that can turn a YouTube URL into a local audio file.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str, job: &TempJob) -> BotResult<FetchedAudio>;
}

#[derive(Debug, Deserialize)]
struct YtDlpOutput {
    filepath: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
}

/// Downloads through the `yt-dlp` binary (needs `ffmpeg` for transcoding).
pub struct YtDlp {
    format: AudioFormat,
    quality: String,
    cookies: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(format: AudioFormat, quality: impl Into<String>) -> Self {
        Self {
            format,
            quality: quality.into(),
            cookies: None,
        }
    }

    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies = Some(path.into());
        self
    }

    /// Writes the cookie jar from the config (if any) and builds the fetcher.
    pub async fn from_config(config: &Config) -> BotResult<Self> {
        let fetcher = Self::new(config.audio_format, config.audio_quality.clone());

        match &config.cookies {
            Some(cookies) => {
                let path = config.cookies_path();
                fs::write(&path, cookies).await?;
                info!("yt-dlp cookies written to {:?}", path);
                Ok(fetcher.with_cookies(path))
            }
            None => Ok(fetcher),
        }
    }

    fn build_command(&self, url: &str, job: &TempJob) -> process::Command {
        let output = job.dir().join(format!("{}.%(ext)s", job.stem()));

        let mut cmd = process::Command::new("yt-dlp");
        cmd.arg("--no-playlist")
            .args(["--socket-timeout", "5", "--retries", "3"])
            // Download fragments concurrently
            .args(["-N", "4"])
            .args(["-f", "bestaudio/best"])
            .args(["-x", "--audio-format", &self.format.to_string()])
            .args(["--audio-quality", &self.quality])
            .arg("--no-simulate")
            .arg("-o")
            .arg(output)
            .args(["--print", "after_move:%(.{filepath,title,uploader,duration})j"]);

        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd.arg("--").arg(url);
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AudioFetcher for YtDlp {
    async fn fetch(&self, url: &str, job: &TempJob) -> BotResult<FetchedAudio> {
        fs::create_dir_all(job.dir()).await?;

        info!("Starting download: {} (format: {}, job: {})", url, self.format, job.stem());

        let output = self
            .build_command(url, job)
            .output()
            .await
            .map_err(|e| BotError::external_command_error("yt-dlp", e.to_string()))?;

        info!("yt-dlp exit code: {:?}", output.status.code());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            log::error!("yt-dlp failed: {}", stderr);
            return Err(BotError::download(stderr));
        }

        parse_print_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses the JSON line printed by `--print after_move:...j`
fn parse_print_output(stdout: &str) -> BotResult<FetchedAudio> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| BotError::download("yt-dlp printed nothing"))?;

    let parsed: YtDlpOutput = serde_json::from_str(line.trim())
        .map_err(|e| BotError::download(format!("unreadable yt-dlp output: {}", e)))?;

    let path = parsed
        .filepath
        .filter(|p| !p.is_empty())
        .ok_or_else(|| BotError::download("yt-dlp did not report an output file"))?;

    Ok(FetchedAudio {
        path: PathBuf::from(path),
        title: parsed
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "audio".to_string()),
        performer: parsed.uploader,
        duration: parsed.duration.map(|d| d as u32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_file::WorkDir;

    #[test]
    fn parses_last_json_line() {
        let stdout = "[warning] something\n{\"filepath\": \"downloads/abc.mp3\", \"title\": \"Song: Live\", \"uploader\": \"Band\", \"duration\": 215.4}\n";
        let audio = parse_print_output(stdout).unwrap();

        assert_eq!(audio.path, PathBuf::from("downloads/abc.mp3"));
        assert_eq!(audio.title, "Song: Live");
        assert_eq!(audio.performer.as_deref(), Some("Band"));
        assert_eq!(audio.duration, Some(215));
    }

    #[test]
    fn missing_title_falls_back() {
        let audio =
            parse_print_output("{\"filepath\": \"a.mp3\", \"title\": null, \"uploader\": null, \"duration\": null}")
                .unwrap();
        assert_eq!(audio.title, "audio");
        assert!(audio.performer.is_none());
    }

    #[test]
    fn empty_or_pathless_output_is_a_download_error() {
        assert!(matches!(parse_print_output(""), Err(BotError::Download(_))));
        assert!(matches!(
            parse_print_output("{\"filepath\": null}"),
            Err(BotError::Download(_))
        ));
        assert!(matches!(parse_print_output("not json"), Err(BotError::Download(_))));
    }

    #[test]
    fn command_targets_the_job_stem() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::new(dir.path());
        let job = work_dir.job();
        let fetcher = YtDlp::new(AudioFormat::Mp3, "192K").with_cookies("cookies.txt");

        let cmd = fetcher.build_command("https://youtu.be/dQw4w9WgXcQ", &job);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let template = dir.path().join(format!("{}.%(ext)s", job.stem()));
        assert!(args.contains(&template.to_string_lossy().into_owned()));
        assert!(args.windows(2).any(|w| w == ["--audio-format", "mp3"]));
        assert!(args.windows(2).any(|w| w == ["--audio-quality", "192K"]));
        assert!(args.windows(2).any(|w| w == ["--cookies", "cookies.txt"]));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/dQw4w9WgXcQ"));
    }
}
