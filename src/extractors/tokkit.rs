//! 4K Tokkit (TikTok) extractor (spec §4.3.2).
//!
//! Grounded on `src/external_sources/tiktok.py` for the `_index_` carousel
//! parsing and subscription sub-list detection rules.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::Connection;

use crate::error::{CoreError, CoreResult};
use crate::models::{CategoryType, ExternalDbSource, SubscriptionType};

use super::{CreatorHint, Extractor, RawItem, RawMedia, SubscriptionHint};

/// Splits a Tokkit `id` like `B1_index_0_3` into `(base_id, order, total)`.
/// Returns `None` for a single (non-carousel) id.
fn split_carousel_id(id: &str) -> Option<(String, i64, i64)> {
    let marker = "_index_";
    let pos = id.find(marker)?;
    let base = id[..pos].to_string();
    let rest = &id[pos + marker.len()..];
    let mut parts = rest.splitn(2, '_');
    let order: i64 = parts.next()?.parse().ok()?;
    let total: i64 = parts.next()?.parse().ok()?;
    Some((base, order, total))
}

fn post_url(author_name: &str, carousel_base_or_id: &str, media_type: i64) -> String {
    let segment = if media_type == 3 { "photo" } else { "video" };
    format!("https://www.tiktok.com/@{author_name}/{segment}/{carousel_base_or_id}")
}

pub struct TokkitExtractor {
    db_path: PathBuf,
}

impl TokkitExtractor {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open(&self) -> CoreResult<Connection> {
        Connection::open(&self.db_path)
            .map_err(|e| CoreError::SourceUnavailable(format!("tokkit db: {e}")))
    }

    fn load_subscription(
        &self,
        conn: &Connection,
        subscription_database_id: Option<i64>,
        relative_path: &str,
    ) -> CoreResult<Option<SubscriptionHint>> {
        let Some(sub_id) = subscription_database_id else {
            return Ok(None);
        };
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT type, name FROM Subscriptions WHERE databaseId = ?1",
                [sub_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        let Some((sub_type, name)) = row else {
            return Ok(None);
        };

        Ok(Some(match sub_type {
            1 => {
                let (list_type, suffix) = if relative_path.contains("/liked/") {
                    (CategoryType::Liked, " - Liked")
                } else if relative_path.contains("/favorites/") {
                    (CategoryType::Favorites, " - Favorites")
                } else {
                    (CategoryType::Feed, "")
                };
                let _ = list_type;
                SubscriptionHint {
                    name: format!("{name}{suffix}"),
                    subscription_type: SubscriptionType::Account,
                    subscription_url: Some(format!("https://www.tiktok.com/@{name}")),
                    external_uuid: None,
                    is_account: true,
                }
            }
            2 => SubscriptionHint {
                name: name.clone(),
                subscription_type: SubscriptionType::Hashtag,
                subscription_url: Some(format!("https://www.tiktok.com/tag/{name}")),
                external_uuid: None,
                is_account: false,
            },
            3 => SubscriptionHint {
                name: name.replace(' ', "-"),
                subscription_type: SubscriptionType::Music,
                subscription_url: None,
                external_uuid: Some(sub_id.to_string()),
                is_account: false,
            },
            _ => return Ok(None),
        }))
    }

    /// List-type category hint derived from the relative path substrings
    /// used for `account` subscriptions (spec §4.3.2).
    fn list_type_category(relative_path: &str) -> CategoryType {
        if relative_path.contains("/liked/") {
            CategoryType::Liked
        } else if relative_path.contains("/favorites/") {
            CategoryType::Favorites
        } else {
            CategoryType::Feed
        }
    }
}

struct TokkitRow {
    database_id: i64,
    subscription_database_id: Option<i64>,
    tiktok_id: String,
    author_name: String,
    relative_path: String,
    media_type: i64,
}

impl Extractor for TokkitExtractor {
    fn is_available(&self) -> bool {
        self.db_path.exists()
    }

    fn extract(&self, offset: u64, limit: u64) -> CoreResult<Vec<RawItem>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;

        // First select the N most recent carousel base ids plus singles,
        // then re-select all members of those bases, preserving carousel
        // integrity under a limited batch (spec §4.3.2).
        let mut stmt = conn.prepare(
            "SELECT databaseId, subscriptionDatabaseId, id, authorName, relativePath, MediaType \
             FROM MediaItems \
             WHERE downloaded = 1 AND MediaType IN (2, 3) \
             ORDER BY databaseId DESC",
        )?;
        let all_rows: Vec<TokkitRow> = stmt
            .query_map([], |r| {
                Ok(TokkitRow {
                    database_id: r.get(0)?,
                    subscription_database_id: r.get(1)?,
                    tiktok_id: r.get(2)?,
                    author_name: r.get(3)?,
                    relative_path: r.get(4)?,
                    media_type: r.get(5)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        let mut selected_bases: Vec<String> = Vec::new();
        let mut selected_singles: Vec<usize> = Vec::new();
        let mut seen_bases = std::collections::HashSet::new();
        let mut taken = 0u64;
        let mut skipped = 0u64;

        for (idx, row) in all_rows.iter().enumerate() {
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if taken >= limit {
                break;
            }
            match split_carousel_id(&row.tiktok_id) {
                Some((base, ..)) => {
                    if seen_bases.insert(base.clone()) {
                        selected_bases.push(base);
                        taken += 1;
                    }
                }
                None => {
                    selected_singles.push(idx);
                    taken += 1;
                }
            }
        }

        let mut items = Vec::new();

        for base in &selected_bases {
            let mut members: Vec<&TokkitRow> = all_rows
                .iter()
                .filter(|r| split_carousel_id(&r.tiktok_id).map(|(b, ..)| &b == base).unwrap_or(false))
                .collect();
            members.sort_by_key(|r| split_carousel_id(&r.tiktok_id).map(|(_, o, _)| o).unwrap_or(0));
            if members.is_empty() {
                continue;
            }
            if let Some(item) = self.build_item(&conn, base.clone(), &members)? {
                items.push(item);
            }
        }

        for idx in selected_singles {
            let row = &all_rows[idx];
            if let Some(item) = self.build_item(&conn, row.tiktok_id.clone(), &[row])? {
                items.push(item);
            }
        }

        Ok(items)
    }
}

impl TokkitExtractor {
    fn build_item(
        &self,
        conn: &Connection,
        carousel_base_id: String,
        members: &[&TokkitRow],
    ) -> CoreResult<Option<RawItem>> {
        let first = members[0];
        if !std::path::Path::new(&first.relative_path).exists() {
            return Ok(None);
        }

        let is_carousel = split_carousel_id(&first.tiktok_id).is_some();
        let url_id = if is_carousel { &carousel_base_id } else { &first.tiktok_id };
        let post_url = post_url(&first.author_name, url_id, first.media_type);

        let subscription = self.load_subscription(conn, first.subscription_database_id, &first.relative_path)?;
        let category = match &subscription {
            Some(s) if s.subscription_type == SubscriptionType::Hashtag => CategoryType::Hashtag,
            Some(s) if s.subscription_type == SubscriptionType::Music => CategoryType::Music,
            Some(s) if s.subscription_type == SubscriptionType::Account => {
                Self::list_type_category(&first.relative_path)
            }
            _ => CategoryType::Videos,
        };
        let _ = &subscription;

        let mut media = Vec::new();
        for (order, m) in members.iter().enumerate() {
            if !std::path::Path::new(&m.relative_path).exists() {
                continue;
            }
            let file_name = std::path::Path::new(&m.relative_path)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| m.relative_path.clone());
            media.push(RawMedia {
                file_path: m.relative_path.clone(),
                file_name,
                carousel_order: order as i64,
                duration_seconds: None,
                resolution_width: None,
                resolution_height: None,
                download_item_id: m.database_id.to_string(),
                is_carousel_item: is_carousel,
                carousel_base_id: is_carousel.then(|| carousel_base_id.clone()),
            });
        }
        if media.is_empty() {
            return Ok(None);
        }

        Ok(Some(RawItem {
            platform: "tiktok".to_string(),
            platform_post_id: Some(url_id.clone()),
            post_url: Some(post_url),
            title: None,
            title_is_filename_derived: true,
            creator: Some(CreatorHint {
                name: first.author_name.clone(),
                profile_url: Some(format!("https://www.tiktok.com/@{}", first.author_name)),
                platform_creator_id: Some(first.author_name.clone()),
            }),
            subscription,
            media,
            category_hints: vec![category],
            publication_date: None,
            publication_date_source: Some("4k_tokkit".to_string()),
            download_date: Some(Utc::now()),
            external_db_source: Some(ExternalDbSource::FourKTokkit),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_carousel_id() {
        assert_eq!(
            split_carousel_id("B1_index_0_3"),
            Some(("B1".to_string(), 0, 3))
        );
    }

    #[test]
    fn single_id_has_no_carousel_split() {
        assert_eq!(split_carousel_id("S123"), None);
    }

    #[test]
    fn unavailable_source_yields_empty() {
        let ext = TokkitExtractor::new(PathBuf::from("/nonexistent/tokkit.sqlite"));
        assert!(ext.extract(0, 10).unwrap().is_empty());
    }
}
