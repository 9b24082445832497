//! Normalization Engine (C5, spec §4.5): turns one `RawItem` into a
//! durable post + media assembly, reusing or creating the creators and
//! subscriptions it references, enriching media via the probe, and
//! invalidating the cached views the write affects.
//!
//! Grounded on `db/write.rs`'s transactional `create_post_with_media` for
//! the atomic write step (step 9) and on `download_manager.rs`'s
//! continue-past-per-item-failure loop for the batch driver.

use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::cache::Cache;
use crate::db::{CreatePostInput, Db, MediaInput, NewCreator, NewSubscription, WriteOutcome};
use crate::error::{CoreError, CoreResult};
use crate::extractors::{is_youtube_shorts, CreatorHint, RawItem, SubscriptionHint};
use crate::models::{AliasType, CategoryType, CreatorNameSource, MediaType, SubscriptionType};
use crate::probe::{DurationCache, MediaProbe};

/// Outcome of normalizing one `RawItem` (spec §4.5 step 9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    Created { post_id: i64, media_ids: Vec<i64> },
    Duplicate,
    Skipped(String),
}

/// Per-batch tally, returned to the operation body driving `process_videos`
/// (spec §4.6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub created: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl BatchReport {
    pub fn total(&self) -> u64 {
        self.created + self.duplicates + self.skipped + self.failed
    }
}

pub struct NormalizationEngine {
    db: Arc<Mutex<Db>>,
    cache: Arc<Cache>,
    probe: Arc<MediaProbe>,
    duration_cache: Arc<Mutex<DurationCache>>,
}

impl NormalizationEngine {
    pub fn new(
        db: Arc<Mutex<Db>>,
        cache: Arc<Cache>,
        probe: Arc<MediaProbe>,
        duration_cache: Arc<Mutex<DurationCache>>,
    ) -> Self {
        Self { db, cache, probe, duration_cache }
    }

    /// Normalizes a batch, continuing past per-item failures; only a
    /// transaction failure or a fatal error aborts the batch early (spec
    /// §7's propagation policy).
    pub async fn process_batch(&self, items: Vec<RawItem>) -> CoreResult<BatchReport> {
        let mut report = BatchReport::default();
        let now_unix_s = chrono::Utc::now().timestamp();

        for item in &items {
            match self.process_item(item, now_unix_s).await {
                Ok(NormalizeOutcome::Created { .. }) => report.created += 1,
                Ok(NormalizeOutcome::Duplicate) => report.duplicates += 1,
                Ok(NormalizeOutcome::Skipped(reason)) => {
                    debug!("normalize: skipped: {reason}");
                    report.skipped += 1;
                }
                Err(CoreError::ItemSkipped(reason)) => {
                    debug!("normalize: skipped: {reason}");
                    report.skipped += 1;
                }
                Err(CoreError::ItemFailed(reason)) => {
                    warn!("normalize: item failed: {reason}");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        // Flushed once per batch so a later failure doesn't lose durations
        // already discovered this batch (spec §5).
        self.duration_cache.lock().await.flush().await.map_err(CoreError::from)?;
        Ok(report)
    }

    /// Same as `process_batch`, but polls `handle` for cooperative
    /// cancel/pause and reports progress after each item — what the
    /// `process_videos`/`populate_database` operation bodies drive (spec
    /// §4.6).
    pub async fn process_batch_tracked(
        &self,
        items: Vec<RawItem>,
        handle: &crate::ops::OperationHandle,
    ) -> CoreResult<BatchReport> {
        let mut report = BatchReport::default();
        let now_unix_s = chrono::Utc::now().timestamp();

        for item in &items {
            if handle.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            handle.wait_if_paused().await;

            match self.process_item(item, now_unix_s).await {
                Ok(NormalizeOutcome::Created { .. }) => report.created += 1,
                Ok(NormalizeOutcome::Duplicate) => report.duplicates += 1,
                Ok(NormalizeOutcome::Skipped(reason)) => {
                    debug!("normalize: skipped: {reason}");
                    report.skipped += 1;
                }
                Err(CoreError::ItemSkipped(reason)) => {
                    debug!("normalize: skipped: {reason}");
                    report.skipped += 1;
                }
                Err(CoreError::ItemFailed(reason)) => {
                    warn!("normalize: item failed: {reason}");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
            handle.update(report.total(), None);
        }

        self.duration_cache.lock().await.flush().await.map_err(CoreError::from)?;
        Ok(report)
    }

    async fn process_item(&self, item: &RawItem, now_unix_s: i64) -> CoreResult<NormalizeOutcome> {
        if item.media.is_empty() {
            return Ok(NormalizeOutcome::Skipped("no media in item".to_string()));
        }

        // Step 1: pre-existence check.
        {
            let mut db = self.db.lock().await;
            for m in &item.media {
                if db.lookup_by_path(&m.file_path)?.is_some() {
                    return Ok(NormalizeOutcome::Duplicate);
                }
            }
        }

        // Step 2: platform id; unknown platform names are fatal for this item.
        let platform_id = {
            let mut db = self.db.lock().await;
            db.platform_id_by_name(&item.platform)?
                .ok_or_else(|| CoreError::ItemFailed(format!("unknown platform: {}", item.platform)))?
        };

        // Step 3: creator resolution.
        let creator_id = match &item.creator {
            Some(hint) => Some(self.resolve_creator(platform_id, hint, item).await?),
            None => None,
        };

        // Step 4: subscription resolution.
        let subscription_id = match &item.subscription {
            Some(hint) => Some(self.resolve_subscription(platform_id, hint, creator_id).await?),
            None => None,
        };

        // Step 5: title policy.
        let (title_post, use_filename) = match item.title.as_deref() {
            Some(t) if !t.trim().is_empty() => (Some(t.to_string()), item.title_is_filename_derived),
            _ => {
                let derived = item
                    .media
                    .first()
                    .map(|m| filename_without_extension(&m.file_name))
                    .unwrap_or_default();
                (Some(derived), true)
            }
        };

        // Step 7: media enrichment. Raw values the extractor already knew
        // (e.g. the 4K apps' own duration/resolution columns) take
        // precedence; the probe only fills in what's missing.
        let mut enriched = Vec::with_capacity(item.media.len());
        for raw in &item.media {
            let ext = Path::new(&raw.file_name).extension().and_then(|e| e.to_str()).unwrap_or("");
            let Some(media_type) = MediaType::from_extension(ext) else {
                debug!("normalize: unrecognized media type for {}", raw.file_name);
                continue;
            };
            let probed = self
                .probe
                .probe(Path::new(&raw.file_path), &self.duration_cache, now_unix_s)
                .await;
            enriched.push((
                raw,
                media_type,
                probed.file_size.map(|v| v as i64),
                raw.duration_seconds.or(probed.duration_seconds),
                raw.resolution_width.or(probed.resolution_width),
                raw.resolution_height.or(probed.resolution_height),
                probed.fps,
            ));
        }
        if enriched.is_empty() {
            return Ok(NormalizeOutcome::Skipped("no recognized media after enrichment".to_string()));
        }
        enriched.sort_by_key(|(raw, ..)| raw.carousel_order);

        // Step 8: category derivation.
        let categories = self.derive_categories(item, &enriched);

        let media: Vec<MediaInput> = enriched
            .into_iter()
            .map(|(raw, media_type, file_size, duration_seconds, resolution_width, resolution_height, fps)| {
                MediaInput {
                    file_path: raw.file_path.clone(),
                    file_name: raw.file_name.clone(),
                    media_type,
                    carousel_order: raw.carousel_order,
                    file_size,
                    duration_seconds,
                    resolution_width,
                    resolution_height,
                    fps,
                    download_item_id: raw.download_item_id.clone(),
                    external_db_source: item.external_db_source,
                    is_carousel_item: raw.is_carousel_item,
                    carousel_base_id: raw.carousel_base_id.clone(),
                }
            })
            .collect();

        // Step 9/10: atomic write + downloader_mapping (written inside
        // `create_post_with_media` from each `MediaInput`).
        let input = CreatePostInput {
            platform_id,
            platform_post_id: item.platform_post_id.clone(),
            post_url: item.post_url.clone(),
            title_post,
            use_filename,
            creator_id,
            subscription_id,
            publication_date: item.publication_date,
            publication_date_source: item.publication_date_source.clone(),
            publication_date_confidence: None,
            download_date: item.download_date,
            media,
            categories,
        };

        let outcome = {
            let mut db = self.db.lock().await;
            db.create_post_with_media(input)?
        };

        match outcome {
            WriteOutcome::Created { post_id, media_ids } => {
                self.invalidate_cache(item);
                Ok(NormalizeOutcome::Created { post_id, media_ids })
            }
            WriteOutcome::Duplicate => Ok(NormalizeOutcome::Duplicate),
        }
    }

    /// Spec §4.5 step 3: platform-creator-id first, then name+url, then
    /// fall back to a secondary-creator link, then create a new primary.
    async fn resolve_creator(&self, platform_id: i64, hint: &CreatorHint, item: &RawItem) -> CoreResult<i64> {
        let mut db = self.db.lock().await;

        if let Some(pcid) = &hint.platform_creator_id {
            if let Some(existing) = db.find_creator_by_platform_creator_id(platform_id, pcid)? {
                return Ok(existing.id);
            }
        } else if let Some(existing) = db.find_creator_by_name_url(platform_id, &hint.name, hint.profile_url.as_deref())? {
            return Ok(existing.id);
        }

        let siblings = db.find_creators_by_platform_name(platform_id, &hint.name)?;
        let creator_name_source = creator_name_source_for(item);

        if let Some(primary) = siblings.into_iter().find(|c| c.is_primary) {
            let secondary = db.create_creator(NewCreator {
                name: hint.name.clone(),
                platform_id,
                parent_creator_id: Some(primary.id),
                is_primary: false,
                alias_type: AliasType::Variation,
                platform_creator_id: hint.platform_creator_id.clone(),
                profile_url: hint.profile_url.clone(),
                creator_name_source,
            })?;
            return Ok(secondary.id);
        }

        let created = db.create_creator(NewCreator {
            name: hint.name.clone(),
            platform_id,
            parent_creator_id: None,
            is_primary: true,
            alias_type: AliasType::Main,
            platform_creator_id: hint.platform_creator_id.clone(),
            profile_url: hint.profile_url.clone(),
            creator_name_source,
        })?;
        Ok(created.id)
    }

    /// Spec §4.5 step 4. Playlists never carry `creator_id` (ownership
    /// can't be inferred); account-owned lists (liked/saved/feed/...) do.
    async fn resolve_subscription(
        &self,
        platform_id: i64,
        hint: &SubscriptionHint,
        creator_id: Option<i64>,
    ) -> CoreResult<i64> {
        let mut db = self.db.lock().await;

        if let Some(existing) = db.find_subscription(platform_id, &hint.name, hint.subscription_type)? {
            return Ok(existing.id);
        }

        let owner = if hint.subscription_type == SubscriptionType::Playlist {
            None
        } else if hint.is_account {
            creator_id
        } else {
            None
        };

        let created = db.create_subscription(NewSubscription {
            name: hint.name.clone(),
            platform_id,
            subscription_type: hint.subscription_type,
            is_account: hint.is_account,
            creator_id: owner,
            subscription_url: hint.subscription_url.clone(),
            external_uuid: hint.external_uuid.clone(),
        })?;
        Ok(created.id)
    }

    /// Spec §4.5 step 8. YouTube is re-derived post-probe since the
    /// Organized-Folders extractor can't know duration/resolution up
    /// front; every other platform keeps what the extractor already
    /// determined from source-specific metadata (list-type, relative
    /// path) that the probe has no way to reconstruct.
    fn derive_categories(
        &self,
        item: &RawItem,
        enriched: &[(&crate::extractors::RawMedia, MediaType, Option<i64>, Option<f64>, Option<i64>, Option<i64>, Option<f64>)],
    ) -> Vec<CategoryType> {
        if item.platform == "youtube" {
            if let Some((_, _, _, duration, width, height, _)) = enriched.first() {
                let shorts = match (width, height) {
                    (Some(w), Some(h)) => is_youtube_shorts(*w, *h, *duration),
                    _ => false,
                };
                let category = if shorts { CategoryType::Shorts } else { CategoryType::Videos };
                return vec![category];
            }
            return vec![CategoryType::Videos];
        }

        if item.category_hints.is_empty() {
            vec![CategoryType::Videos]
        } else {
            let mut out = item.category_hints.clone();
            out.dedup();
            out
        }
    }

    fn invalidate_cache(&self, item: &RawItem) {
        self.cache.invalidate("existing_paths");
        self.cache.invalidate("global_stats");
        self.cache.invalidate("pending_videos");
        self.cache.invalidate(&format!("platform:{}", item.platform));
        if let Some(creator) = &item.creator {
            self.cache.invalidate(&format!("creator:{}", creator.name));
        }
    }
}

fn filename_without_extension(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string())
}

fn creator_name_source_for(item: &RawItem) -> CreatorNameSource {
    if item.publication_date_source.as_deref() == Some("organized_folder") {
        CreatorNameSource::Folder
    } else {
        CreatorNameSource::Db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::RawMedia;
    use crate::models::ExternalDbSource;
    use std::io::Write;

    async fn engine_with_tmp(dir: &std::path::Path) -> (NormalizationEngine, Arc<Mutex<Db>>) {
        let db = Arc::new(Mutex::new(Db::open_in_memory(100).unwrap()));
        let cache = Arc::new(Cache::new(100, 300));
        let probe = Arc::new(MediaProbe::new(None));
        let duration_cache = Arc::new(Mutex::new(DurationCache::load(dir.join("cache.json"), 0).await));
        let engine = NormalizationEngine::new(db.clone(), cache, probe, duration_cache);
        (engine, db)
    }

    fn make_file(dir: &std::path::Path, name: &str) -> String {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(b"fake").unwrap();
        path.to_string_lossy().to_string()
    }

    fn sample_item(file_path: String, file_name: &str) -> RawItem {
        RawItem {
            platform: "youtube".to_string(),
            platform_post_id: Some("p1".to_string()),
            post_url: Some("https://youtube.com/watch?v=p1".to_string()),
            title: None,
            title_is_filename_derived: false,
            creator: Some(CreatorHint {
                name: "Alice".to_string(),
                profile_url: Some("https://youtube.com/@alice".to_string()),
                platform_creator_id: Some("alice".to_string()),
            }),
            subscription: None,
            media: vec![RawMedia {
                file_path,
                file_name: file_name.to_string(),
                carousel_order: 0,
                duration_seconds: None,
                resolution_width: None,
                resolution_height: None,
                download_item_id: "d1".to_string(),
                is_carousel_item: false,
                carousel_base_id: None,
            }],
            category_hints: vec![CategoryType::Videos],
            publication_date: None,
            publication_date_source: Some("4k_video_downloader".to_string()),
            download_date: None,
            external_db_source: Some(ExternalDbSource::FourKYoutube),
        }
    }

    #[tokio::test]
    async fn creates_post_creator_and_title_from_filename() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, db) = engine_with_tmp(dir.path()).await;
        let path = make_file(dir.path(), "My Cool Clip.mp4");
        let item = sample_item(path, "My Cool Clip.mp4");

        let report = engine.process_batch(vec![item]).await.unwrap();
        assert_eq!(report.created, 1);

        let mut db = db.lock().await;
        let stats = db.statistics().unwrap();
        assert_eq!(stats.active_posts, 1);
        assert_eq!(stats.primary_creators, 1);
    }

    #[tokio::test]
    async fn duplicate_file_path_is_reported_without_writing_twice() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _db) = engine_with_tmp(dir.path()).await;
        let path = make_file(dir.path(), "clip.mp4");
        let item = sample_item(path.clone(), "clip.mp4");
        let again = sample_item(path, "clip.mp4");

        let report = engine.process_batch(vec![item, again]).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.duplicates, 1);
    }

    #[tokio::test]
    async fn second_creator_with_same_name_becomes_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, db) = engine_with_tmp(dir.path()).await;

        let path_a = make_file(dir.path(), "a.mp4");
        let mut item_a = sample_item(path_a, "a.mp4");
        item_a.creator.as_mut().unwrap().platform_creator_id = Some("alice1".to_string());

        let path_b = make_file(dir.path(), "b.mp4");
        let mut item_b = sample_item(path_b, "b.mp4");
        item_b.creator.as_mut().unwrap().platform_creator_id = Some("alice2".to_string());

        let report = engine.process_batch(vec![item_a, item_b]).await.unwrap();
        assert_eq!(report.created, 2);

        let mut db = db.lock().await;
        let stats = db.statistics().unwrap();
        assert_eq!(stats.primary_creators, 1);
        assert_eq!(stats.secondary_creators, 1);
    }

    #[tokio::test]
    async fn unknown_platform_is_counted_as_failed_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _db) = engine_with_tmp(dir.path()).await;
        let path = make_file(dir.path(), "clip.mp4");
        let mut item = sample_item(path, "clip.mp4");
        item.platform = "not_a_real_platform".to_string();

        let report = engine.process_batch(vec![item]).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 0);
    }
}
