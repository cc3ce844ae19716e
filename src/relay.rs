//! Lookup-or-fetch workflow: serve a link from the cache, or download the
//! audio, post it to the channel and remember where it went.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{info, warn};
use tokio::{fs, time::timeout};

use crate::{
    channel::{AudioPublisher, AudioUpload},
    config::{DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_UPLOAD_TIMEOUT_SECS},
    db::{AudioCache, CacheLookup, CachedAudio},
    errors::{BotError, BotResult},
    inflight::{Claim, InFlight},
    temp_file::WorkDir,
    utils::{VideoId, extract_video_id, sanitize_filename},
    youtube::AudioFetcher,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Served {
    /// Already in the channel, nothing was downloaded
    Cached(CachedAudio),
    /// Downloaded and posted by this request
    Uploaded(CachedAudio),
}

impl Served {
    pub fn audio(&self) -> &CachedAudio {
        match self {
            Served::Cached(audio) | Served::Uploaded(audio) => audio,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Served::Cached(_))
    }
}

pub struct AudioRelay {
    cache: AudioCache,
    fetcher: Arc<dyn AudioFetcher>,
    publisher: Arc<dyn AudioPublisher>,
    in_flight: InFlight<CachedAudio>,
    work_dir: WorkDir,
    download_timeout: Duration,
    upload_timeout: Duration,
}

impl AudioRelay {
    pub fn new(
        cache: AudioCache,
        fetcher: Arc<dyn AudioFetcher>,
        publisher: Arc<dyn AudioPublisher>,
        work_dir: WorkDir,
    ) -> Self {
        Self {
            cache,
            fetcher,
            publisher,
            in_flight: InFlight::new(),
            work_dir,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
        }
    }

    pub fn with_timeouts(mut self, download: Duration, upload: Duration) -> Self {
        self.download_timeout = download;
        self.upload_timeout = upload;
        self
    }

    /// Handle one submitted message. The trimmed text is the cache key.
    pub async fn process(&self, text: &str) -> BotResult<Served> {
        let source_url = text.trim();
        let video_id =
            extract_video_id(source_url).ok_or_else(|| BotError::invalid_link(source_url))?;

        match self.cache.lookup(source_url).await {
            CacheLookup::Hit(audio) => {
                info!("Cache hit for {} ({})", source_url, video_id);
                return Ok(Served::Cached(audio));
            }
            CacheLookup::Miss => {}
            CacheLookup::Unavailable(e) => {
                warn!("Cache unavailable for {}, fetching anyway: {}", source_url, e);
            }
        }

        let guard = match self.in_flight.claim(source_url) {
            Claim::Leader(guard) => guard,
            Claim::Follower(follower) => {
                info!("{} is already being processed, waiting", source_url);
                return follower.wait().await.map(Served::Cached).ok_or_else(|| {
                    BotError::general(format!("concurrent job for {} failed", source_url))
                });
            }
        };

        // A previous leader may have finished between the lookup and the claim
        if let Ok(Some(audio)) = self.cache.get(source_url).await {
            guard.complete(Some(audio.clone()));
            return Ok(Served::Cached(audio));
        }

        let result = self.fetch_and_deliver(source_url, &video_id).await;
        guard.complete(result.as_ref().ok().cloned());
        result.map(Served::Uploaded)
    }

    async fn fetch_and_deliver(&self, source_url: &str, video_id: &VideoId) -> BotResult<CachedAudio> {
        // Removes the job's files on every return path
        let job = self.work_dir.job();

        let fetched = timeout(self.download_timeout, self.fetcher.fetch(source_url, &job))
            .await
            .map_err(|_| {
                BotError::download(format!(
                    "{} timed out after {}s",
                    video_id,
                    self.download_timeout.as_secs()
                ))
            })??;

        if !fs::try_exists(&fetched.path).await.unwrap_or(false) {
            return Err(BotError::output_missing(fetched.path.display().to_string()));
        }

        let display_name = sanitize_filename(&fetched.title);
        let extension = fetched
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp3");

        let upload = AudioUpload {
            path: &fetched.path,
            title: &fetched.title,
            performer: fetched.performer.as_deref(),
            file_name: format!("{}.{}", display_name, extension),
            duration: fetched.duration,
        };

        let delivery = timeout(self.upload_timeout, self.publisher.publish(&upload))
            .await
            .map_err(|_| {
                BotError::upload(format!(
                    "{} timed out after {}s",
                    video_id,
                    self.upload_timeout.as_secs()
                ))
            })??;

        info!("Uploaded {} as {}", video_id, delivery.handle);

        let audio = CachedAudio {
            source_url: source_url.to_string(),
            delivery_handle: delivery.handle,
            delivery_link: delivery.link,
            display_name,
            created_at: Some(Utc::now()),
        };

        // The file is already in the channel, so a storage failure only costs a re-upload later
        match self.cache.insert_if_absent(&audio).await {
            Ok(true) => {}
            Ok(false) => warn!("{} was cached by someone else, keeping the stored row", source_url),
            Err(e) => log::error!("Failed to cache {}: {}", source_url, e),
        }

        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        path::{Path, PathBuf},
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        channel::Delivery,
        config::Config,
        db::tests::memory_cache,
        temp_file::TempJob,
        utils::is_partial_artifact,
        youtube::FetchedAudio,
    };

    #[derive(Default)]
    struct StubFetcher {
        calls: AtomicUsize,
        titles: HashMap<String, String>,
        delay: Duration,
        fail: bool,
        skip_write: bool,
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl AudioFetcher for StubFetcher {
        async fn fetch(&self, url: &str, job: &TempJob) -> BotResult<FetchedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(job.dir())?;

            let partial = job.dir().join(format!("{}.webm.part", job.stem()));
            std::fs::write(&partial, b"partial")?;
            tokio::time::sleep(self.delay).await;

            if self.fail {
                return Err(BotError::download("Video unavailable"));
            }

            std::fs::remove_file(&partial)?;
            let path = job.dir().join(format!("{}.mp3", job.stem()));
            if !self.skip_write {
                std::fs::write(&path, b"ID3")?;
            }
            self.seen.lock().unwrap().push(path.clone());

            Ok(FetchedAudio {
                path,
                title: self
                    .titles
                    .get(url)
                    .cloned()
                    .unwrap_or_else(|| "My:Video/Title*?".to_string()),
                performer: Some("Uploader".to_string()),
                duration: Some(212),
            })
        }
    }

    #[derive(Default)]
    struct StubPublisher {
        calls: AtomicUsize,
        fail: bool,
        file_names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AudioPublisher for StubPublisher {
        async fn publish(&self, upload: &AudioUpload<'_>) -> BotResult<Delivery> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(upload.path.exists(), "file must exist while uploading");
            self.file_names.lock().unwrap().push(upload.file_name.clone());

            if self.fail {
                return Err(BotError::upload("Request Entity Too Large"));
            }
            Ok(Delivery {
                handle: format!("H{}", n),
                link: Some(format!("L{}", n)),
            })
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn build_relay(
        dir: &Path,
        fetcher: Arc<StubFetcher>,
        publisher: Arc<StubPublisher>,
    ) -> (AudioRelay, AudioCache, Arc<sqlx::SqlitePool>) {
        let (cache, pool) = memory_cache().await;
        let relay = AudioRelay::new(cache.clone(), fetcher, publisher, WorkDir::new(dir));
        (relay, cache, pool)
    }

    #[tokio::test]
    async fn default_timeouts_match_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (relay, _cache, _pool) = build_relay(dir.path(), Arc::default(), Arc::default()).await;
        let config = Config::from_lookup(|key| match key {
            "TELOXIDE_TOKEN" => Some("123:abc".to_string()),
            "TELEGRAM_CHANNEL_ID" => Some("-100123".to_string()),
            "DATABASE_URL" => Some("sqlite::memory:".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(relay.download_timeout, config.download_timeout);
        assert_eq!(relay.upload_timeout, config.upload_timeout);
    }

    #[tokio::test]
    async fn end_to_end_upload_is_cached_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let publisher = Arc::new(StubPublisher::default());
        let (relay, cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;

        let served = relay.process("https://youtu.be/abc12345678").await.unwrap();

        assert!(!served.is_cached());
        assert_eq!(served.audio().delivery_link.as_deref(), Some("L1"));

        let row = cache.get("https://youtu.be/abc12345678").await.unwrap().unwrap();
        assert_eq!(row.delivery_handle, "H1");
        assert_eq!(row.delivery_link.as_deref(), Some("L1"));
        assert_eq!(row.display_name, "My_Video_Title__");
        assert_eq!(
            publisher.file_names.lock().unwrap().as_slice(),
            ["My_Video_Title__.mp3".to_string()]
        );

        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn second_submission_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let publisher = Arc::new(StubPublisher::default());
        let (relay, cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;

        let first = relay.process("https://youtu.be/abc12345678").await.unwrap();
        let second = relay.process(" https://youtu.be/abc12345678 ").await.unwrap();

        assert!(second.is_cached());
        assert_eq!(second.audio().delivery_handle, first.audio().delivery_handle);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicates_upload_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let publisher = Arc::new(StubPublisher::default());
        let (relay, cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;
        let relay = Arc::new(relay);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let relay = relay.clone();
                tokio::spawn(async move { relay.process("https://youtu.be/abc12345678").await })
            })
            .collect();

        let mut uploaded = 0;
        for handle in handles {
            let served = handle.await.unwrap().unwrap();
            assert_eq!(served.audio().delivery_handle, "H1");
            if !served.is_cached() {
                uploaded += 1;
            }
        }

        assert_eq!(uploaded, 1);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.count().await.unwrap(), 1);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn invalid_link_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let publisher = Arc::new(StubPublisher::default());
        let (relay, _cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;

        let err = relay.process("https://vimeo.com/123").await.unwrap_err();

        assert!(matches!(err, BotError::InvalidLink(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn download_failure_leaves_no_row_and_no_partials() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher {
            fail: true,
            ..Default::default()
        });
        let publisher = Arc::new(StubPublisher::default());
        let (relay, cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;

        let err = relay.process("https://youtu.be/abc12345678").await.unwrap_err();

        assert!(matches!(err, BotError::Download(_)));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.count().await.unwrap(), 0);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn missing_output_file_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher {
            skip_write: true,
            ..Default::default()
        });
        let publisher = Arc::new(StubPublisher::default());
        let (relay, _cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;

        let err = relay.process("https://youtu.be/abc12345678").await.unwrap_err();

        assert!(matches!(err, BotError::OutputMissing(_)));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_failure_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let publisher = Arc::new(StubPublisher {
            fail: true,
            ..Default::default()
        });
        let (relay, cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;

        let err = relay.process("https://youtu.be/abc12345678").await.unwrap_err();

        assert!(matches!(err, BotError::Upload(_)));
        assert_eq!(cache.count().await.unwrap(), 0);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn failed_leader_fails_its_followers() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher {
            fail: true,
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let publisher = Arc::new(StubPublisher::default());
        let (relay, _cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;
        let relay = Arc::new(relay);

        let first = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.process("https://youtu.be/abc12345678").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = relay.process("https://youtu.be/abc12345678").await;

        assert!(first.await.unwrap().is_err());
        assert!(second.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_cache_does_not_block_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let publisher = Arc::new(StubPublisher::default());
        let (relay, _cache, pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;
        pool.close().await;

        let served = relay.process("https://youtu.be/abc12345678").await.unwrap();

        assert!(!served.is_cached());
        assert_eq!(served.audio().delivery_link.as_deref(), Some("L1"));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn slow_download_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let publisher = Arc::new(StubPublisher::default());
        let (relay, _cache, _pool) = build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;
        let relay = relay.with_timeouts(Duration::from_millis(50), Duration::from_secs(1));

        let err = relay.process("https://youtu.be/abc12345678").await.unwrap_err();

        assert!(matches!(err, BotError::Download(_)));
        assert!(leftovers(dir.path()).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn parallel_jobs_never_share_temp_files(titles in prop::collection::vec(".{0,40}", 2..8)) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let urls: Vec<String> = (0..titles.len())
                    .map(|i| format!("https://youtu.be/abcdefgh{:03}", i))
                    .collect();
                let fetcher = Arc::new(StubFetcher {
                    titles: urls.iter().cloned().zip(titles.iter().cloned()).collect(),
                    delay: Duration::from_millis(5),
                    ..Default::default()
                });
                let publisher = Arc::new(StubPublisher::default());
                let (relay, _cache, _pool) =
                    build_relay(dir.path(), fetcher.clone(), publisher.clone()).await;
                let relay = Arc::new(relay);

                let handles: Vec<_> = urls
                    .iter()
                    .cloned()
                    .map(|url| {
                        let relay = relay.clone();
                        tokio::spawn(async move { relay.process(&url).await })
                    })
                    .collect();

                for handle in handles {
                    let served = handle.await.unwrap().unwrap();
                    let name = &served.audio().display_name;
                    assert!(!name.chars().any(|c| "/\\:*?\"<>|".contains(c)));
                }

                let seen = fetcher.seen.lock().unwrap().clone();
                let unique: HashSet<_> = seen.iter().collect();
                assert_eq!(unique.len(), urls.len());
                assert!(leftovers(dir.path()).iter().all(|n| !is_partial_artifact(n)));
                assert!(leftovers(dir.path()).is_empty());
            });
        }
    }
}
