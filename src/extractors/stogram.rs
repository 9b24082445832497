//! 4K Stogram (Instagram) extractor (spec §4.3.3).
//!
//! Grounded on `src/external_sources/instagram.py` for the `web_url`
//! grouping and list-type substring detection rules.

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use crate::error::{CoreError, CoreResult};
use crate::models::{CategoryType, ExternalDbSource, MediaType, SubscriptionType};

use super::{CreatorHint, Extractor, RawItem, RawMedia, SubscriptionHint};

struct StogramRow {
    id: i64,
    subscription_id: Option<i64>,
    web_url: String,
    title: Option<String>,
    file: String,
    owner_name: String,
    owner_id: Option<String>,
    created_time: Option<i64>,
}

fn list_type_category(relative_path: &str) -> CategoryType {
    if relative_path.contains("/reels/") {
        CategoryType::Reels
    } else if relative_path.contains("/highlights/") {
        CategoryType::Highlights
    } else if relative_path.contains("/story/") {
        CategoryType::Stories
    } else if relative_path.contains("/tagged/") {
        CategoryType::Tagged
    } else {
        CategoryType::Feed
    }
}

pub struct StogramExtractor {
    db_path: PathBuf,
}

impl StogramExtractor {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open(&self) -> CoreResult<Connection> {
        Connection::open(&self.db_path)
            .map_err(|e| CoreError::SourceUnavailable(format!("stogram db: {e}")))
    }

    fn load_subscription(&self, conn: &Connection, subscription_id: Option<i64>) -> CoreResult<Option<SubscriptionHint>> {
        let Some(id) = subscription_id else {
            return Ok(None);
        };
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT type, display_name FROM subscriptions WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        let Some((sub_type, mut name)) = row else {
            return Ok(None);
        };
        if let Some(stripped) = name.strip_suffix(" - saved") {
            name = stripped.to_string();
        }
        Ok(Some(match sub_type {
            1 => SubscriptionHint {
                name: name.clone(),
                subscription_type: SubscriptionType::Account,
                subscription_url: Some(format!("https://www.instagram.com/{name}/")),
                external_uuid: None,
                is_account: true,
            },
            2 => SubscriptionHint {
                name: name.clone(),
                subscription_type: SubscriptionType::Hashtag,
                subscription_url: Some(format!("https://www.instagram.com/explore/tags/{name}/")),
                external_uuid: None,
                is_account: false,
            },
            3 => SubscriptionHint {
                name,
                subscription_type: SubscriptionType::Location,
                subscription_url: None,
                external_uuid: None,
                is_account: false,
            },
            4 => SubscriptionHint {
                name,
                subscription_type: SubscriptionType::Saved,
                subscription_url: None,
                external_uuid: None,
                is_account: false,
            },
            _ => return Ok(None),
        }))
    }
}

impl Extractor for StogramExtractor {
    fn is_available(&self) -> bool {
        self.db_path.exists()
    }

    fn extract(&self, offset: u64, limit: u64) -> CoreResult<Vec<RawItem>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;

        let mut stmt = conn.prepare(
            "SELECT id, subscriptionId, web_url, title, file, ownerName, ownerId, created_time \
             FROM photos WHERE state = 4 AND file IS NOT NULL ORDER BY web_url, id ASC",
        )?;
        let all_rows: Vec<StogramRow> = stmt
            .query_map([], |r| {
                Ok(StogramRow {
                    id: r.get(0)?,
                    subscription_id: r.get(1)?,
                    web_url: r.get(2)?,
                    title: r.get(3)?,
                    file: r.get(4)?,
                    owner_name: r.get(5)?,
                    owner_id: r.get(6)?,
                    created_time: r.get(7)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        // Group by web_url (each group is one post), preserving first-seen order.
        let mut order: Vec<String> = Vec::new();
        let mut groups: std::collections::HashMap<String, Vec<&StogramRow>> = std::collections::HashMap::new();
        for row in &all_rows {
            groups.entry(row.web_url.clone()).or_insert_with(|| {
                order.push(row.web_url.clone());
                Vec::new()
            });
            groups.get_mut(&row.web_url).unwrap().push(row);
        }

        let page: Vec<&String> = order.iter().skip(offset as usize).take(limit as usize).collect();

        let mut items = Vec::new();
        for web_url in page {
            let members = &groups[web_url];
            if let Some(item) = self.build_item(&conn, web_url, members)? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

impl StogramExtractor {
    fn build_item(&self, conn: &Connection, web_url: &str, members: &[&StogramRow]) -> CoreResult<Option<RawItem>> {
        let first = members[0];
        let subscription = self.load_subscription(conn, first.subscription_id)?;
        let category = match &subscription {
            Some(s) if s.subscription_type == SubscriptionType::Hashtag => CategoryType::Hashtag,
            Some(s) if s.subscription_type == SubscriptionType::Location => CategoryType::Location,
            Some(s) if s.subscription_type == SubscriptionType::Saved => CategoryType::Saved,
            _ => list_type_category(&first.file),
        };

        let mut media = Vec::new();
        for (idx, m) in members.iter().enumerate() {
            if !std::path::Path::new(&m.file).exists() {
                continue;
            }
            // `is_video` from the DB is observed inconsistent; classify by
            // extension instead (spec §4.3.3).
            let ext = std::path::Path::new(&m.file)
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            if MediaType::from_extension(&ext).is_none() {
                continue;
            }
            let file_name = std::path::Path::new(&m.file)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| m.file.clone());
            media.push(RawMedia {
                file_path: m.file.clone(),
                file_name,
                carousel_order: idx as i64,
                duration_seconds: None,
                resolution_width: None,
                resolution_height: None,
                download_item_id: m.id.to_string(),
                is_carousel_item: members.len() > 1,
                carousel_base_id: (members.len() > 1).then(|| web_url.to_string()),
            });
        }
        if media.is_empty() {
            return Ok(None);
        }

        let publication_date: Option<DateTime<Utc>> = first
            .created_time
            .and_then(|t| Utc.timestamp_opt(t, 0).single());

        Ok(Some(RawItem {
            platform: "instagram".to_string(),
            platform_post_id: Some(first.id.to_string()),
            post_url: Some(web_url.to_string()),
            title: first.title.clone(),
            title_is_filename_derived: first.title.is_none(),
            creator: Some(CreatorHint {
                name: first.owner_name.clone(),
                profile_url: Some(format!("https://www.instagram.com/{}/", first.owner_name)),
                platform_creator_id: first.owner_id.clone(),
            }),
            subscription,
            media,
            category_hints: vec![category],
            publication_date,
            publication_date_source: Some("4k_stogram".to_string()),
            download_date: Some(Utc::now()),
            external_db_source: Some(ExternalDbSource::FourKStogram),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_type_from_path_substrings() {
        assert_eq!(list_type_category("/a/reels/b.mp4"), CategoryType::Reels);
        assert_eq!(list_type_category("/a/highlights/b.mp4"), CategoryType::Highlights);
        assert_eq!(list_type_category("/a/feed/b.mp4"), CategoryType::Feed);
    }

    #[test]
    fn unavailable_source_yields_empty() {
        let ext = StogramExtractor::new(PathBuf::from("/nonexistent/stogram.sqlite"));
        assert!(ext.extract(0, 10).unwrap().is_empty());
    }
}
