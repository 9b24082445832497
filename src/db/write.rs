use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::models::{CategoryType, ExternalDbSource, MediaType};

use super::Db;

#[derive(Debug, Clone)]
pub struct MediaInput {
    pub file_path: String,
    pub file_name: String,
    pub media_type: MediaType,
    pub carousel_order: i64,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub resolution_width: Option<i64>,
    pub resolution_height: Option<i64>,
    pub fps: Option<f64>,
    pub download_item_id: String,
    /// `None` for media with no external downloader lineage (organized
    /// folders); no `downloader_mapping` row is written for those.
    pub external_db_source: Option<ExternalDbSource>,
    pub is_carousel_item: bool,
    pub carousel_base_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePostInput {
    pub platform_id: i64,
    pub platform_post_id: Option<String>,
    pub post_url: Option<String>,
    pub title_post: Option<String>,
    pub use_filename: bool,
    pub creator_id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub publication_date: Option<DateTime<Utc>>,
    pub publication_date_source: Option<String>,
    pub publication_date_confidence: Option<u8>,
    pub download_date: Option<DateTime<Utc>>,
    pub media: Vec<MediaInput>,
    pub categories: Vec<CategoryType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Created { post_id: i64, media_ids: Vec<i64> },
    Duplicate,
}

impl Db {
    /// At-most-once post + media assembly (spec §4.1 / §4.5 step 9).
    ///
    /// Before inserting, every media path in `input.media` is checked
    /// against active rows; if any already exists the whole item is
    /// reported as a duplicate and nothing is written.
    pub fn create_post_with_media(&mut self, input: CreatePostInput) -> CoreResult<WriteOutcome> {
        let started = Instant::now();
        let result = self.create_post_with_media_inner(input);
        self.record_sample("create_post_with_media", started, &result);
        result
    }

    fn create_post_with_media_inner(&mut self, input: CreatePostInput) -> CoreResult<WriteOutcome> {
        for m in &input.media {
            let exists: Option<i64> = self
                .conn
                .query_row(
                    "SELECT media.id FROM media JOIN posts ON posts.id = media.post_id \
                     WHERE media.file_path = ?1 AND posts.deleted_at IS NULL",
                    params![m.file_path],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Ok(WriteOutcome::Duplicate);
            }
        }
        if input.media.is_empty() {
            return Err(CoreError::ItemSkipped("no media in post".to_string()));
        }

        let tx = self.conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let carousel_count = input.media.len() as i64;
        let is_carousel = carousel_count > 1;

        tx.execute(
            "INSERT INTO posts (\
                platform_id, platform_post_id, post_url, title_post, use_filename, \
                creator_id, subscription_id, publication_date, publication_date_source, \
                publication_date_confidence, download_date, is_carousel, carousel_count, \
                created_at, updated_at \
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?14)",
            params![
                input.platform_id,
                input.platform_post_id,
                input.post_url,
                input.title_post,
                input.use_filename as i64,
                input.creator_id,
                input.subscription_id,
                input.publication_date.map(|d| d.to_rfc3339()),
                input.publication_date_source,
                input.publication_date_confidence,
                input.download_date.map(|d| d.to_rfc3339()),
                is_carousel as i64,
                carousel_count,
                now,
            ],
        )?;
        let post_id = tx.last_insert_rowid();

        let mut media_ids = Vec::with_capacity(input.media.len());
        let mut ordered = input.media.clone();
        ordered.sort_by_key(|m| m.carousel_order);

        for (idx, m) in ordered.iter().enumerate() {
            tx.execute(
                "INSERT INTO media (\
                    post_id, file_path, file_name, file_size, duration_seconds, media_type, \
                    resolution_width, resolution_height, fps, carousel_order, is_primary, \
                    detected_characters, final_characters, edit_status, processing_status, \
                    created_at \
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,'[]','[]','pendiente','pending',?12)",
                params![
                    post_id,
                    m.file_path,
                    m.file_name,
                    m.file_size,
                    m.duration_seconds,
                    m.media_type.as_str(),
                    m.resolution_width,
                    m.resolution_height,
                    m.fps,
                    m.carousel_order,
                    (idx == 0) as i64,
                    now,
                ],
            )?;
            let media_id = tx.last_insert_rowid();
            media_ids.push(media_id);

            if let Some(source) = m.external_db_source {
                tx.execute(
                    "INSERT INTO downloader_mapping (\
                        media_id, download_item_id, external_db_source, is_carousel_item, \
                        carousel_order, carousel_base_id \
                     ) VALUES (?1,?2,?3,?4,?5,?6)",
                    params![
                        media_id,
                        m.download_item_id,
                        source.as_str(),
                        m.is_carousel_item as i64,
                        m.carousel_order,
                        m.carousel_base_id,
                    ],
                )?;
            }
        }

        for category in &input.categories {
            tx.execute(
                "INSERT OR IGNORE INTO post_categories (post_id, category_type) VALUES (?1, ?2)",
                params![post_id, category.as_str()],
            )?;
        }

        tx.commit()?;

        Ok(WriteOutcome::Created { post_id, media_ids })
    }

    pub fn update_post_title(&mut self, post_id: i64, title: &str) -> CoreResult<()> {
        let started = Instant::now();
        let now = Utc::now().to_rfc3339();
        let result = self
            .conn
            .execute(
                "UPDATE posts SET title_post = ?2, updated_at = ?3 WHERE id = ?1",
                params![post_id, title, now],
            )
            .map(|_| ())
            .map_err(CoreError::from);
        self.record_sample("update_post_title", started, &result);
        result
    }

    pub fn update_media_edit_status(
        &mut self,
        media_id: i64,
        edit_status: crate::models::EditStatus,
    ) -> CoreResult<()> {
        let started = Instant::now();
        let result = self
            .conn
            .execute(
                "UPDATE media SET edit_status = ?2 WHERE id = ?1",
                params![media_id, edit_status.as_str()],
            )
            .map(|_| ())
            .map_err(CoreError::from);
        self.record_sample("update_media_edit_status", started, &result);
        result
    }

    pub fn update_media_characters(
        &mut self,
        media_id: i64,
        detected_characters: &[String],
        final_characters: &[String],
    ) -> CoreResult<()> {
        let started = Instant::now();
        let detected_json = serde_json::to_string(detected_characters)?;
        let final_json = serde_json::to_string(final_characters)?;
        let result = self
            .conn
            .execute(
                "UPDATE media SET detected_characters = ?2, final_characters = ?3 WHERE id = ?1",
                params![media_id, detected_json, final_json],
            )
            .map(|_| ())
            .map_err(CoreError::from);
        self.record_sample("update_media_characters", started, &result);
        result
    }

    /// Idempotent: returns `false` if the post was already deleted.
    pub fn soft_delete(&mut self, post_id: i64, by: &str, reason: &str) -> CoreResult<bool> {
        let started = Instant::now();
        let result = self.soft_delete_inner(post_id, by, reason);
        self.record_sample("soft_delete", started, &result);
        result
    }

    fn soft_delete_inner(&self, post_id: i64, by: &str, reason: &str) -> CoreResult<bool> {
        let already_deleted: bool = self
            .conn
            .query_row(
                "SELECT deleted_at IS NOT NULL FROM posts WHERE id = ?1",
                params![post_id],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or(true);
        if already_deleted {
            return Ok(false);
        }
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE posts SET deleted_at = ?2, deleted_by = ?3, deletion_reason = ?4, updated_at = ?2 \
             WHERE id = ?1",
            params![post_id, now, by, reason],
        )?;
        Ok(true)
    }

    pub fn restore(&mut self, post_id: i64) -> CoreResult<bool> {
        let started = Instant::now();
        let result = self.restore_inner(post_id);
        self.record_sample("restore", started, &result);
        result
    }

    fn restore_inner(&self, post_id: i64) -> CoreResult<bool> {
        let is_deleted: bool = self
            .conn
            .query_row(
                "SELECT deleted_at IS NOT NULL FROM posts WHERE id = ?1",
                params![post_id],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or(false);
        if !is_deleted {
            return Ok(false);
        }
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE posts SET deleted_at = NULL, deleted_by = NULL, deletion_reason = NULL, \
             updated_at = ?2 WHERE id = ?1",
            params![post_id, now],
        )?;
        Ok(true)
    }

    pub fn bulk_soft_delete(&mut self, post_ids: &[i64], by: &str, reason: &str) -> CoreResult<usize> {
        let mut count = 0;
        for id in post_ids {
            if self.soft_delete(*id, by, reason)? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn bulk_restore(&mut self, post_ids: &[i64]) -> CoreResult<usize> {
        let mut count = 0;
        for id in post_ids {
            if self.restore(*id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Hard-delete posts soft-deleted more than `days` ago. Cascades to
    /// media, mappings and categories via `ON DELETE CASCADE`.
    pub fn cleanup_old_deleted(&mut self, days: i64) -> CoreResult<usize> {
        let started = Instant::now();
        let result = (|| -> CoreResult<usize> {
            let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
            let affected = self.conn.execute(
                "DELETE FROM posts WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
                params![cutoff],
            )?;
            Ok(affected)
        })();
        self.record_sample("cleanup_old_deleted", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn sample_input(path: &str) -> CreatePostInput {
        CreatePostInput {
            platform_id: 1,
            platform_post_id: Some("p1".to_string()),
            post_url: Some("https://example.com/p1".to_string()),
            title_post: Some("Title".to_string()),
            use_filename: false,
            creator_id: None,
            subscription_id: None,
            publication_date: None,
            publication_date_source: None,
            publication_date_confidence: None,
            download_date: None,
            media: vec![MediaInput {
                file_path: path.to_string(),
                file_name: "file.mp4".to_string(),
                media_type: MediaType::Video,
                carousel_order: 0,
                file_size: Some(100),
                duration_seconds: Some(12.0),
                resolution_width: Some(1920),
                resolution_height: Some(1080),
                fps: Some(30.0),
                download_item_id: "d1".to_string(),
                external_db_source: Some(ExternalDbSource::FourKYoutube),
                is_carousel_item: false,
                carousel_base_id: None,
            }],
            categories: vec![CategoryType::Videos],
        }
    }

    #[test]
    fn create_then_duplicate_is_skipped() {
        let mut db = Db::open_in_memory(100).unwrap();
        let outcome = db.create_post_with_media(sample_input("/a/b.mp4")).unwrap();
        assert!(matches!(outcome, WriteOutcome::Created { .. }));
        let dup = db.create_post_with_media(sample_input("/a/b.mp4")).unwrap();
        assert_eq!(dup, WriteOutcome::Duplicate);
    }

    #[test]
    fn soft_delete_then_restore_round_trips() {
        let mut db = Db::open_in_memory(100).unwrap();
        let outcome = db.create_post_with_media(sample_input("/a/c.mp4")).unwrap();
        let post_id = match outcome {
            WriteOutcome::Created { post_id, .. } => post_id,
            _ => panic!("expected created"),
        };
        assert!(db.soft_delete(post_id, "u", "r").unwrap());
        assert!(!db.soft_delete(post_id, "u", "r").unwrap());
        assert!(db.restore(post_id).unwrap());
        assert!(!db.restore(post_id).unwrap());
    }

    #[test]
    fn single_media_post_is_not_a_carousel() {
        let mut db = Db::open_in_memory(100).unwrap();
        let outcome = db.create_post_with_media(sample_input("/a/d.mp4")).unwrap();
        let post_id = match outcome {
            WriteOutcome::Created { post_id, .. } => post_id,
            _ => panic!("expected created"),
        };
        let (count, is_carousel): (i64, i64) = db
            .conn
            .query_row(
                "SELECT carousel_count, is_carousel FROM posts WHERE id = ?1",
                params![post_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(is_carousel, 0);
    }
}
