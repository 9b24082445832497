use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, OptionalExtension};

use crate::error::CoreResult;
use crate::models::{CategoryType, EditStatus, Media, MediaType, MusicSource, ProcessingStatus};

use super::perf::{CURSOR_SWITCH_OFFSET_THRESHOLD, CURSOR_SWITCH_TOTAL_THRESHOLD};
use super::Db;

#[derive(Debug, Clone, Default)]
pub struct FindPostFilters {
    pub creator_name: Option<String>,
    pub platform: Option<String>,
    pub edit_status: Option<EditStatus>,
    pub processing_status: Option<ProcessingStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FindPostOrder {
    #[default]
    CreatedAtDesc,
}

/// Either an offset page or a cursor (keyset on `media.created_at DESC`).
/// `smart(total_hint)` picks the representation spec §9 mandates.
#[derive(Debug, Clone)]
pub enum PaginationRequest {
    Offset { offset: u64, limit: u64 },
    Cursor { after_created_at: Option<DateTime<Utc>>, limit: u64 },
}

impl PaginationRequest {
    /// Chooses cursor pagination once `offset` or the known `total` crosses
    /// the thresholds named in SPEC_FULL §B, offset otherwise.
    pub fn smart(offset: u64, limit: u64, total_hint: Option<u64>) -> Self {
        let use_cursor = offset > CURSOR_SWITCH_OFFSET_THRESHOLD
            || total_hint.map(|t| t > CURSOR_SWITCH_TOTAL_THRESHOLD).unwrap_or(false);
        if use_cursor {
            PaginationRequest::Cursor {
                after_created_at: None,
                limit,
            }
        } else {
            PaginationRequest::Offset { offset, limit }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<MediaRow>,
    pub total: u64,
    pub next_cursor: Option<DateTime<Utc>>,
}

/// A media row joined with its post/creator/platform/subscription context
/// and categories, as `find_post` returns (spec §4.1).
#[derive(Debug, Clone)]
pub struct MediaRow {
    pub media: Media,
    pub post_id: i64,
    pub post_title: Option<String>,
    pub creator_name: Option<String>,
    pub platform_name: String,
    pub subscription_name: Option<String>,
    pub categories: Vec<CategoryType>,
    pub created_at: DateTime<Utc>,
}

impl Db {
    pub fn find_post(
        &mut self,
        filters: &FindPostFilters,
        _order: FindPostOrder,
        pagination: &PaginationRequest,
    ) -> CoreResult<Page> {
        let started = Instant::now();
        let result = self.find_post_inner(filters, pagination);
        self.record_sample("find_post", started, &result);
        result
    }

    fn find_post_inner(
        &self,
        filters: &FindPostFilters,
        pagination: &PaginationRequest,
    ) -> CoreResult<Page> {
        let mut where_clauses = vec!["posts.deleted_at IS NULL".to_string()];
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &filters.creator_name {
            where_clauses.push("creators.name = ?".to_string());
            args.push(Box::new(name.clone()));
        }
        if let Some(platform) = &filters.platform {
            where_clauses.push("platforms.name = ?".to_string());
            args.push(Box::new(platform.clone()));
        }
        if let Some(edit_status) = filters.edit_status {
            where_clauses.push("media.edit_status = ?".to_string());
            args.push(Box::new(edit_status.as_str().to_string()));
        }
        if let Some(processing_status) = filters.processing_status {
            where_clauses.push("media.processing_status = ?".to_string());
            args.push(Box::new(processing_status.as_str().to_string()));
        }
        if let Some(search) = &filters.search {
            where_clauses.push(
                "(posts.title_post LIKE ? OR media.file_name LIKE ? OR creators.name LIKE ?)"
                    .to_string(),
            );
            let pattern = format!("%{search}%");
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern));
        }

        let (cursor_clause, limit) = match pagination {
            PaginationRequest::Offset { limit, .. } => (String::new(), *limit),
            PaginationRequest::Cursor { after_created_at, limit } => {
                if let Some(after) = after_created_at {
                    where_clauses.push("media.created_at < ?".to_string());
                    args.push(Box::new(after.to_rfc3339()));
                }
                (String::new(), *limit)
            }
        };
        let _ = &cursor_clause;

        let where_sql = where_clauses.join(" AND ");
        let offset_sql = match pagination {
            PaginationRequest::Offset { offset, .. } => format!("OFFSET {offset}"),
            PaginationRequest::Cursor { .. } => String::new(),
        };

        let sql = format!(
            r#"
            SELECT media.id, media.post_id, media.file_path, media.file_name, media.thumbnail_path,
                   media.file_size, media.duration_seconds, media.media_type,
                   media.resolution_width, media.resolution_height, media.fps,
                   media.carousel_order, media.is_primary,
                   media.detected_music, media.detected_music_artist, media.detected_music_confidence,
                   media.detected_characters, media.music_source,
                   media.final_music, media.final_music_artist, media.final_characters,
                   media.difficulty_level, media.edit_status, media.edited_video_path,
                   media.notes, media.processing_status, media.created_at,
                   posts.title_post, creators.name, platforms.name, subscriptions.name
            FROM media
            JOIN posts ON posts.id = media.post_id
            JOIN platforms ON platforms.id = posts.platform_id
            LEFT JOIN creators ON creators.id = posts.creator_id
            LEFT JOIN subscriptions ON subscriptions.id = posts.subscription_id
            WHERE {where_sql}
            ORDER BY media.created_at DESC
            LIMIT {limit} {offset_sql}
            "#
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter().map(|b| b.as_ref())), |row| {
            let detected_characters: String = row.get(16)?;
            let final_characters: String = row.get(19)?;
            let created_at: String = row.get(25)?;
            Ok(MediaRow {
                media: Media {
                    id: row.get(0)?,
                    post_id: row.get(1)?,
                    file_path: row.get(2)?,
                    file_name: row.get(3)?,
                    thumbnail_path: row.get(4)?,
                    file_size: row.get(5)?,
                    duration_seconds: row.get(6)?,
                    media_type: MediaType::from_str(&row.get::<_, String>(7)?)
                        .unwrap_or(MediaType::Video),
                    resolution_width: row.get(8)?,
                    resolution_height: row.get(9)?,
                    fps: row.get(10)?,
                    carousel_order: row.get(11)?,
                    is_primary: row.get::<_, i64>(12)? != 0,
                    detected_music: row.get(13)?,
                    detected_music_artist: row.get(14)?,
                    detected_music_confidence: row.get(15)?,
                    detected_characters: serde_json::from_str(&detected_characters)
                        .unwrap_or_default(),
                    music_source: row
                        .get::<_, Option<String>>(17)?
                        .and_then(|s| MusicSource::from_str(&s)),
                    final_music: row.get(18)?,
                    final_music_artist: row.get(20)?,
                    final_characters: serde_json::from_str(&final_characters).unwrap_or_default(),
                    difficulty_level: row
                        .get::<_, Option<String>>(21)?
                        .and_then(|s| crate::models::DifficultyLevel::from_str(&s)),
                    edit_status: EditStatus::from_str(&row.get::<_, String>(22)?)
                        .unwrap_or_default(),
                    edited_video_path: row.get(23)?,
                    notes: row.get(24)?,
                    processing_status: ProcessingStatus::from_str_lenient(
                        &row.get::<_, String>(26).unwrap_or_default(),
                    )
                    .unwrap_or_default(),
                },
                post_id: row.get(1)?,
                post_title: row.get(27)?,
                creator_name: row.get(28)?,
                platform_name: row.get(29)?,
                subscription_name: row.get(30)?,
                categories: Vec::new(),
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }

        for item in items.iter_mut() {
            item.categories = self.post_categories(item.post_id)?;
        }

        let total = self.count_matching(&where_sql, &args)?;
        let next_cursor = items.last().map(|r| r.created_at);

        Ok(Page {
            items,
            total,
            next_cursor,
        })
    }

    fn count_matching(&self, where_sql: &str, args: &[Box<dyn rusqlite::ToSql>]) -> CoreResult<u64> {
        let sql = format!(
            r#"
            SELECT COUNT(*)
            FROM media
            JOIN posts ON posts.id = media.post_id
            JOIN platforms ON platforms.id = posts.platform_id
            LEFT JOIN creators ON creators.id = posts.creator_id
            LEFT JOIN subscriptions ON subscriptions.id = posts.subscription_id
            WHERE {where_sql}
            "#
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(args.iter().map(|b| b.as_ref())), |r| r.get(0))?;
        Ok(count as u64)
    }

    fn post_categories(&self, post_id: i64) -> CoreResult<Vec<CategoryType>> {
        let mut stmt = self
            .conn
            .prepare("SELECT category_type FROM post_categories WHERE post_id = ?1")?;
        let rows = stmt.query_map([post_id], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(c) = CategoryType::from_str(&row?) {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// O(1)-hashable set of all active media paths, for duplicate prevention.
    pub fn existing_file_paths(&mut self) -> CoreResult<HashSet<String>> {
        let started = Instant::now();
        let result = (|| -> CoreResult<HashSet<String>> {
            let mut stmt = self.conn.prepare(
                "SELECT media.file_path FROM media \
                 JOIN posts ON posts.id = media.post_id \
                 WHERE posts.deleted_at IS NULL",
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            let mut out = HashSet::new();
            for row in rows {
                out.insert(row?);
            }
            Ok(out)
        })();
        self.record_sample("existing_file_paths", started, &result);
        result
    }

    pub fn lookup_by_path(&mut self, file_path: &str) -> CoreResult<Option<Media>> {
        let started = Instant::now();
        let result = self.lookup_by_path_inner(file_path);
        self.record_sample("lookup_by_path", started, &result);
        result
    }

    fn lookup_by_path_inner(&self, file_path: &str) -> CoreResult<Option<Media>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, post_id, file_path, file_name, thumbnail_path, file_size, \
                 duration_seconds, media_type, resolution_width, resolution_height, fps, \
                 carousel_order, is_primary, edit_status, processing_status \
                 FROM media WHERE file_path = ?1",
                [file_path],
                |row| {
                    Ok(Media {
                        id: row.get(0)?,
                        post_id: row.get(1)?,
                        file_path: row.get(2)?,
                        file_name: row.get(3)?,
                        thumbnail_path: row.get(4)?,
                        file_size: row.get(5)?,
                        duration_seconds: row.get(6)?,
                        media_type: MediaType::from_str(&row.get::<_, String>(7)?)
                            .unwrap_or(MediaType::Video),
                        resolution_width: row.get(8)?,
                        resolution_height: row.get(9)?,
                        fps: row.get(10)?,
                        carousel_order: row.get(11)?,
                        is_primary: row.get::<_, i64>(12)? != 0,
                        detected_music: None,
                        detected_music_artist: None,
                        detected_music_confidence: None,
                        detected_characters: Vec::new(),
                        music_source: None,
                        final_music: None,
                        final_music_artist: None,
                        final_characters: Vec::new(),
                        difficulty_level: None,
                        edit_status: EditStatus::from_str(&row.get::<_, String>(13)?)
                            .unwrap_or_default(),
                        edited_video_path: None,
                        notes: None,
                        processing_status: ProcessingStatus::from_str_lenient(
                            &row.get::<_, String>(14)?,
                        )
                        .unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn pending_media(&mut self, platform: Option<&str>, limit: Option<u64>) -> CoreResult<Vec<Media>> {
        let started = Instant::now();
        let result = self.pending_media_inner(platform, limit);
        self.record_sample("pending_media", started, &result);
        result
    }

    fn pending_media_inner(&self, platform: Option<&str>, limit: Option<u64>) -> CoreResult<Vec<Media>> {
        let limit = limit.unwrap_or(1000);
        let sql = if platform.is_some() {
            "SELECT media.id, media.post_id, media.file_path, media.file_name \
             FROM media JOIN posts ON posts.id = media.post_id \
             JOIN platforms ON platforms.id = posts.platform_id \
             WHERE media.processing_status = 'pending' AND platforms.name = ?1 \
             ORDER BY media.created_at ASC LIMIT ?2"
        } else {
            "SELECT media.id, media.post_id, media.file_path, media.file_name \
             FROM media \
             WHERE media.processing_status = 'pending' \
             ORDER BY media.created_at ASC LIMIT ?1"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let row_fn = |row: &rusqlite::Row| -> rusqlite::Result<Media> {
            Ok(Media {
                id: row.get(0)?,
                post_id: row.get(1)?,
                file_path: row.get(2)?,
                file_name: row.get(3)?,
                thumbnail_path: None,
                file_size: None,
                duration_seconds: None,
                media_type: MediaType::Video,
                resolution_width: None,
                resolution_height: None,
                fps: None,
                carousel_order: 0,
                is_primary: false,
                detected_music: None,
                detected_music_artist: None,
                detected_music_confidence: None,
                detected_characters: Vec::new(),
                music_source: None,
                final_music: None,
                final_music_artist: None,
                final_characters: Vec::new(),
                difficulty_level: None,
                edit_status: EditStatus::default(),
                edited_video_path: None,
                notes: None,
                processing_status: ProcessingStatus::Pending,
            })
        };
        let mut out = Vec::new();
        if let Some(platform) = platform {
            for row in stmt.query_map(rusqlite::params![platform, limit], row_fn)? {
                out.push(row?);
            }
        } else {
            for row in stmt.query_map(rusqlite::params![limit], row_fn)? {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub fn batch_exists(&mut self, paths: &[String]) -> CoreResult<HashMap<String, bool>> {
        let existing = self.existing_file_paths()?;
        Ok(paths
            .iter()
            .map(|p| (p.clone(), existing.contains(p)))
            .collect())
    }

    pub fn batch_get_by_paths(&mut self, paths: &[String]) -> CoreResult<HashMap<String, Media>> {
        let mut out = HashMap::new();
        for path in paths {
            if let Some(media) = self.lookup_by_path(path)? {
                out.insert(path.clone(), media);
            }
        }
        Ok(out)
    }

    pub fn statistics(&mut self) -> CoreResult<PostStatistics> {
        let started = Instant::now();
        let result = self.statistics_inner();
        self.record_sample("statistics", started, &result);
        result
    }

    fn statistics_inner(&self) -> CoreResult<PostStatistics> {
        let active: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts WHERE deleted_at IS NULL", [], |r| r.get(0))?;
        let deleted: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts WHERE deleted_at IS NOT NULL", [], |r| {
                r.get(0)
            })?;
        let with_music: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM media WHERE detected_music IS NOT NULL OR final_music IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let with_characters: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM media WHERE detected_characters != '[]' OR final_characters != '[]'",
            [],
            |r| r.get(0),
        )?;
        let primary_creators: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM creators WHERE is_primary = 1", [], |r| r.get(0))?;
        let secondary_creators: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM creators WHERE is_primary = 0", [], |r| r.get(0))?;
        let subscriptions: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM subscriptions", [], |r| r.get(0))?;

        let mut per_platform = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT platforms.name, COUNT(*) FROM posts \
                 JOIN platforms ON platforms.id = posts.platform_id \
                 WHERE posts.deleted_at IS NULL GROUP BY platforms.name",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (k, v) = row?;
                per_platform.insert(k, v as u64);
            }
        }

        let mut per_edit_status = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT edit_status, COUNT(*) FROM media GROUP BY edit_status")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (k, v) = row?;
                per_edit_status.insert(k, v as u64);
            }
        }

        let mut per_processing_status = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT processing_status, COUNT(*) FROM media GROUP BY processing_status")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (k, v) = row?;
                per_processing_status.insert(k, v as u64);
            }
        }

        Ok(PostStatistics {
            active_posts: active as u64,
            deleted_posts: deleted as u64,
            per_platform,
            per_edit_status,
            per_processing_status,
            media_with_music: with_music as u64,
            media_with_characters: with_characters as u64,
            primary_creators: primary_creators as u64,
            secondary_creators: secondary_creators as u64,
            subscriptions: subscriptions as u64,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostStatistics {
    pub active_posts: u64,
    pub deleted_posts: u64,
    pub per_platform: HashMap<String, u64>,
    pub per_edit_status: HashMap<String, u64>,
    pub per_processing_status: HashMap<String, u64>,
    pub media_with_music: u64,
    pub media_with_characters: u64,
    pub primary_creators: u64,
    pub secondary_creators: u64,
    pub subscriptions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_smart_picks_offset_below_thresholds() {
        let req = PaginationRequest::smart(10, 20, Some(100));
        assert!(matches!(req, PaginationRequest::Offset { .. }));
    }

    #[test]
    fn pagination_smart_picks_cursor_past_offset_threshold() {
        let req = PaginationRequest::smart(2000, 20, Some(100));
        assert!(matches!(req, PaginationRequest::Cursor { .. }));
    }

    #[test]
    fn pagination_smart_picks_cursor_past_total_threshold() {
        let req = PaginationRequest::smart(0, 20, Some(20_000));
        assert!(matches!(req, PaginationRequest::Cursor { .. }));
    }

    #[test]
    fn existing_file_paths_empty_on_fresh_db() {
        let mut db = Db::open_in_memory(100).unwrap();
        assert!(db.existing_file_paths().unwrap().is_empty());
    }
}
