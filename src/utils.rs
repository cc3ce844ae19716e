use std::{
    fmt,
    path::Path,
    sync::LazyLock,
};

use regex::Regex;
use tokio::{fs, io};

const MAX_DISPLAY_NAME_CHARS: usize = 100;

/// Suffixes yt-dlp and ffmpeg leave behind while a download is in progress.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".frag"];

/// Length of a simple-formatted uuid v4, used as the job file stem.
const JOB_STEM_LEN: usize = 32;

static YOUTUBE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?i:https?)://)?(?i:(?:www|m|music)\.)?(?i:(youtube\.com|youtube-nocookie\.com|youtu\.be))(/\S*)$",
    )
    .expect("valid host regex")
});

static SHORT_LINK_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([A-Za-z0-9_-]{11})(?:[/?#&]|$)").expect("valid short link regex")
});

static EMBED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:embed|v|shorts|live)/([A-Za-z0-9_-]{11})(?:[/?#&]|$)")
        .expect("valid embed regex")
});

static WATCH_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/watch/?\?(?:[^#]*&)?v=([A-Za-z0-9_-]{11})(?:[&#]|$)")
        .expect("valid watch regex")
});

/// Normalized 11-character YouTube video identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extracts the video id from a watch, short, embed or shorts link.
/// The whole text has to be the link; anything else yields `None`.
pub fn extract_video_id(text: &str) -> Option<VideoId> {
    let caps = YOUTUBE_HOST.captures(text.trim())?;
    let host = caps.get(1)?.as_str().to_ascii_lowercase();
    let rest = caps.get(2)?.as_str();

    let id = match host.as_str() {
        "youtu.be" => SHORT_LINK_PATH.captures(rest),
        "youtube-nocookie.com" => EMBED_PATH.captures(rest),
        _ => WATCH_QUERY
            .captures(rest)
            .or_else(|| EMBED_PATH.captures(rest)),
    }?;

    Some(VideoId(id.get(1)?.as_str().to_string()))
}

pub fn is_youtube_video_link(text: &str) -> bool {
    extract_video_id(text).is_some()
}

/// Replaces characters that are illegal in file names on common file systems.
pub fn sanitize_filename(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    let truncated: String = trimmed.chars().take(MAX_DISPLAY_NAME_CHARS).collect();
    let truncated = truncated.trim_end();

    if truncated.is_empty() {
        "audio".to_string()
    } else {
        truncated.to_string()
    }
}

pub fn is_partial_artifact(file_name: &str) -> bool {
    PARTIAL_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
        || file_name.contains(".part-Frag")
        || file_name.contains(".temp.")
}

/// Files named after a download job stem (32 hex digits), finished or not.
pub fn is_job_artifact(file_name: &str) -> bool {
    file_name.len() > JOB_STEM_LEN
        && file_name.as_bytes()[JOB_STEM_LEN] == b'.'
        && file_name.as_bytes()[..JOB_STEM_LEN]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

pub fn is_orphaned_download(file_name: &str) -> bool {
    is_partial_artifact(file_name) || is_job_artifact(file_name)
}

/// Removes download leftovers from the working directory. Only safe while no
/// job is running. Returns how many files were deleted.
pub async fn sweep_orphaned_downloads(dir: impl AsRef<Path>) -> io::Result<usize> {
    let dir = dir.as_ref();
    if !fs::try_exists(dir).await? {
        return Ok(0);
    }

    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !is_orphaned_download(&name.to_string_lossy()) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {:?}: {}", entry.path(), e),
        }
    }

    Ok(removed)
}
