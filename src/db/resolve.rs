//! Creator/subscription/platform lookup and creation primitives used by
//! the normalization engine (spec §4.5 steps 2-4).
//!
//! Grounded on `db.rs`'s `insert_download`/`find_by_url` query style;
//! extended here with the secondary-creator and account-owned-subscription
//! shapes this domain needs that the teacher's single-table download model
//! never required.

use std::time::Instant;

use rusqlite::{params, OptionalExtension, Row};

use crate::error::CoreResult;
use crate::models::{AliasType, Creator, CreatorNameSource, Subscription, SubscriptionType};

use super::Db;

#[derive(Debug, Clone)]
pub struct NewCreator {
    pub name: String,
    pub platform_id: i64,
    pub parent_creator_id: Option<i64>,
    pub is_primary: bool,
    pub alias_type: AliasType,
    pub platform_creator_id: Option<String>,
    pub profile_url: Option<String>,
    pub creator_name_source: CreatorNameSource,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub name: String,
    pub platform_id: i64,
    pub subscription_type: SubscriptionType,
    pub is_account: bool,
    pub creator_id: Option<i64>,
    pub subscription_url: Option<String>,
    pub external_uuid: Option<String>,
}

fn creator_from_row(row: &Row) -> rusqlite::Result<Creator> {
    let alias_type: String = row.get(5)?;
    let creator_name_source: String = row.get(8)?;
    Ok(Creator {
        id: row.get(0)?,
        name: row.get(1)?,
        platform_id: row.get(2)?,
        parent_creator_id: row.get(3)?,
        is_primary: row.get::<_, i64>(4)? != 0,
        alias_type: AliasType::from_str(&alias_type).unwrap_or(AliasType::Main),
        platform_creator_id: row.get(6)?,
        profile_url: row.get(7)?,
        creator_name_source: CreatorNameSource::from_str(&creator_name_source).unwrap_or(CreatorNameSource::Db),
    })
}

fn subscription_from_row(row: &Row) -> rusqlite::Result<Subscription> {
    let subscription_type: String = row.get(3)?;
    Ok(Subscription {
        id: row.get(0)?,
        name: row.get(1)?,
        platform_id: row.get(2)?,
        subscription_type: SubscriptionType::from_str(&subscription_type).unwrap_or(SubscriptionType::Single),
        is_account: row.get::<_, i64>(4)? != 0,
        creator_id: row.get(5)?,
        subscription_url: row.get(6)?,
        external_uuid: row.get(7)?,
    })
}

const CREATOR_COLUMNS: &str = "id, name, platform_id, parent_creator_id, is_primary, alias_type, \
     platform_creator_id, profile_url, creator_name_source";
const SUBSCRIPTION_COLUMNS: &str =
    "id, name, platform_id, subscription_type, is_account, creator_id, subscription_url, external_uuid";

impl Db {
    pub fn platform_id_by_name(&mut self, name: &str) -> CoreResult<Option<i64>> {
        let started = Instant::now();
        let result = self
            .conn
            .query_row("SELECT id FROM platforms WHERE name = ?1", params![name], |r| r.get(0))
            .optional()
            .map_err(Into::into);
        self.record_sample("platform_id_by_name", started, &result);
        result
    }

    /// Lookup by `(platform, platform_creator_id)` (spec §4.5 step 3, first rule).
    pub fn find_creator_by_platform_creator_id(
        &mut self,
        platform_id: i64,
        platform_creator_id: &str,
    ) -> CoreResult<Option<Creator>> {
        let started = Instant::now();
        let sql = format!(
            "SELECT {CREATOR_COLUMNS} FROM creators WHERE platform_id = ?1 AND platform_creator_id = ?2"
        );
        let result = self
            .conn
            .query_row(&sql, params![platform_id, platform_creator_id], creator_from_row)
            .optional()
            .map_err(Into::into);
        self.record_sample("find_creator_by_platform_creator_id", started, &result);
        result
    }

    /// Lookup by `(platform, name, profile_url)` when no platform creator id
    /// is available (spec §4.5 step 3, second rule).
    pub fn find_creator_by_name_url(
        &mut self,
        platform_id: i64,
        name: &str,
        profile_url: Option<&str>,
    ) -> CoreResult<Option<Creator>> {
        let started = Instant::now();
        let sql = format!(
            "SELECT {CREATOR_COLUMNS} FROM creators \
             WHERE platform_id = ?1 AND name = ?2 AND profile_url IS ?3"
        );
        let result = self
            .conn
            .query_row(&sql, params![platform_id, name, profile_url], creator_from_row)
            .optional()
            .map_err(Into::into);
        self.record_sample("find_creator_by_name_url", started, &result);
        result
    }

    /// All creators sharing `(platform, name)` regardless of URL/id, ordered
    /// oldest-first, used to find the primary a secondary creator should
    /// link to (spec §4.5 step 3, third rule).
    pub fn find_creators_by_platform_name(&mut self, platform_id: i64, name: &str) -> CoreResult<Vec<Creator>> {
        let started = Instant::now();
        let sql = format!("SELECT {CREATOR_COLUMNS} FROM creators WHERE platform_id = ?1 AND name = ?2 ORDER BY id ASC");
        let result = (|| -> CoreResult<Vec<Creator>> {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params![platform_id, name], creator_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })();
        self.record_sample("find_creators_by_platform_name", started, &result);
        result
    }

    pub fn create_creator(&mut self, input: NewCreator) -> CoreResult<Creator> {
        let started = Instant::now();
        let result = (|| -> CoreResult<Creator> {
            self.conn.execute(
                "INSERT INTO creators (\
                    name, platform_id, parent_creator_id, is_primary, alias_type, \
                    platform_creator_id, profile_url, creator_name_source\
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    input.name,
                    input.platform_id,
                    input.parent_creator_id,
                    input.is_primary as i64,
                    input.alias_type.as_str(),
                    input.platform_creator_id,
                    input.profile_url,
                    input.creator_name_source.as_str(),
                ],
            )?;
            let id = self.conn.last_insert_rowid();
            Ok(Creator {
                id,
                name: input.name,
                platform_id: input.platform_id,
                parent_creator_id: input.parent_creator_id,
                is_primary: input.is_primary,
                alias_type: input.alias_type,
                platform_creator_id: input.platform_creator_id,
                profile_url: input.profile_url,
                creator_name_source: input.creator_name_source,
            })
        })();
        self.record_sample("create_creator", started, &result);
        result
    }

    pub fn find_subscription(
        &mut self,
        platform_id: i64,
        name: &str,
        subscription_type: SubscriptionType,
    ) -> CoreResult<Option<Subscription>> {
        let started = Instant::now();
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE platform_id = ?1 AND name = ?2 AND subscription_type = ?3"
        );
        let result = self
            .conn
            .query_row(&sql, params![platform_id, name, subscription_type.as_str()], subscription_from_row)
            .optional()
            .map_err(Into::into);
        self.record_sample("find_subscription", started, &result);
        result
    }

    pub fn create_subscription(&mut self, input: NewSubscription) -> CoreResult<Subscription> {
        let started = Instant::now();
        let result = (|| -> CoreResult<Subscription> {
            self.conn.execute(
                "INSERT INTO subscriptions (\
                    name, platform_id, subscription_type, is_account, creator_id, \
                    subscription_url, external_uuid\
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    input.name,
                    input.platform_id,
                    input.subscription_type.as_str(),
                    input.is_account as i64,
                    input.creator_id,
                    input.subscription_url,
                    input.external_uuid,
                ],
            )?;
            let id = self.conn.last_insert_rowid();
            Ok(Subscription {
                id,
                name: input.name,
                platform_id: input.platform_id,
                subscription_type: input.subscription_type,
                is_account: input.is_account,
                creator_id: input.creator_id,
                subscription_url: input.subscription_url,
                external_uuid: input.external_uuid,
            })
        })();
        self.record_sample("create_subscription", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn youtube_platform_id(db: &mut Db) -> i64 {
        db.platform_id_by_name("youtube").unwrap().unwrap()
    }

    #[test]
    fn creates_then_finds_creator_by_platform_creator_id() {
        let mut db = Db::open_in_memory(100).unwrap();
        let platform_id = youtube_platform_id(&mut db);
        let created = db
            .create_creator(NewCreator {
                name: "Alice".to_string(),
                platform_id,
                parent_creator_id: None,
                is_primary: true,
                alias_type: AliasType::Main,
                platform_creator_id: Some("alice".to_string()),
                profile_url: Some("https://youtube.com/@alice".to_string()),
                creator_name_source: CreatorNameSource::Db,
            })
            .unwrap();
        let found = db
            .find_creator_by_platform_creator_id(platform_id, "alice")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[test]
    fn secondary_creator_links_to_primary() {
        let mut db = Db::open_in_memory(100).unwrap();
        let platform_id = youtube_platform_id(&mut db);
        let primary = db
            .create_creator(NewCreator {
                name: "Bob".to_string(),
                platform_id,
                parent_creator_id: None,
                is_primary: true,
                alias_type: AliasType::Main,
                platform_creator_id: Some("bob1".to_string()),
                profile_url: None,
                creator_name_source: CreatorNameSource::Db,
            })
            .unwrap();
        let secondary = db
            .create_creator(NewCreator {
                name: "Bob".to_string(),
                platform_id,
                parent_creator_id: Some(primary.id),
                is_primary: false,
                alias_type: AliasType::Variation,
                platform_creator_id: Some("bob2".to_string()),
                profile_url: None,
                creator_name_source: CreatorNameSource::Db,
            })
            .unwrap();
        let siblings = db.find_creators_by_platform_name(platform_id, "Bob").unwrap();
        assert_eq!(siblings.len(), 2);
        assert_eq!(secondary.parent_creator_id, Some(primary.id));
        assert!(!secondary.is_primary);
    }

    #[test]
    fn creates_then_finds_subscription() {
        let mut db = Db::open_in_memory(100).unwrap();
        let platform_id = youtube_platform_id(&mut db);
        let created = db
            .create_subscription(NewSubscription {
                name: "Liked videos".to_string(),
                platform_id,
                subscription_type: SubscriptionType::Playlist,
                is_account: true,
                creator_id: None,
                subscription_url: None,
                external_uuid: None,
            })
            .unwrap();
        let found = db
            .find_subscription(platform_id, "Liked videos", SubscriptionType::Playlist)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
    }
}
