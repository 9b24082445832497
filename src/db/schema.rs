use rusqlite::{params, Connection};

use crate::error::CoreResult;
use crate::models::BOOTSTRAP_PLATFORMS;

/// Bump when a migration is added.
pub const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &mut Connection) -> CoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |r| r.get(0),
        )
        .ok();

    let current_version: i64 = existing.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0);

    if current_version == 0 {
        migration_v1(conn)?;
        set_schema_version(conn, 1)?;
    }

    // Future:
    // if current_version < 2 { migration_v2(conn)?; set_schema_version(conn, 2)?; }

    Ok(())
}

fn set_schema_version(conn: &mut Connection, v: i64) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![v.to_string()],
    )?;
    Ok(())
}

fn migration_v1(conn: &mut Connection) -> CoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS platforms (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          display_name TEXT NOT NULL,
          base_url TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS creators (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          platform_id INTEGER NOT NULL REFERENCES platforms(id),
          parent_creator_id INTEGER NULL REFERENCES creators(id),
          is_primary INTEGER NOT NULL DEFAULT 1,
          alias_type TEXT NOT NULL DEFAULT 'main',
          platform_creator_id TEXT NULL,
          profile_url TEXT NULL,
          creator_name_source TEXT NOT NULL DEFAULT 'db'
        );
        CREATE INDEX IF NOT EXISTS idx_creators_platform ON creators(platform_id);
        CREATE INDEX IF NOT EXISTS idx_creators_parent ON creators(parent_creator_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_creators_platform_pcid
          ON creators(platform_id, platform_creator_id)
          WHERE platform_creator_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS subscriptions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          platform_id INTEGER NOT NULL REFERENCES platforms(id),
          subscription_type TEXT NOT NULL,
          is_account INTEGER NOT NULL DEFAULT 0,
          creator_id INTEGER NULL REFERENCES creators(id),
          subscription_url TEXT NULL,
          external_uuid TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_platform ON subscriptions(platform_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_creator ON subscriptions(creator_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_type ON subscriptions(subscription_type);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_is_account ON subscriptions(is_account);

        CREATE TABLE IF NOT EXISTS posts (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          platform_id INTEGER NOT NULL REFERENCES platforms(id),
          platform_post_id TEXT NULL,
          post_url TEXT NULL,
          title_post TEXT NULL,
          use_filename INTEGER NOT NULL DEFAULT 0,
          creator_id INTEGER NULL REFERENCES creators(id),
          subscription_id INTEGER NULL REFERENCES subscriptions(id),
          publication_date TEXT NULL,
          publication_date_source TEXT NULL,
          publication_date_confidence INTEGER NULL,
          download_date TEXT NULL,
          is_carousel INTEGER NOT NULL DEFAULT 0,
          carousel_count INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          deleted_at TEXT NULL,
          deleted_by TEXT NULL,
          deletion_reason TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_posts_platform ON posts(platform_id);
        CREATE INDEX IF NOT EXISTS idx_posts_creator ON posts(creator_id);
        CREATE INDEX IF NOT EXISTS idx_posts_subscription ON posts(subscription_id);
        CREATE INDEX IF NOT EXISTS idx_posts_publication_date ON posts(publication_date);
        CREATE INDEX IF NOT EXISTS idx_posts_download_date ON posts(download_date);
        CREATE INDEX IF NOT EXISTS idx_posts_deleted_at ON posts(deleted_at);

        CREATE TABLE IF NOT EXISTS media (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
          file_path TEXT NOT NULL UNIQUE,
          file_name TEXT NOT NULL,
          thumbnail_path TEXT NULL,
          file_size INTEGER NULL,
          duration_seconds REAL NULL,
          media_type TEXT NOT NULL,
          resolution_width INTEGER NULL,
          resolution_height INTEGER NULL,
          fps REAL NULL,
          carousel_order INTEGER NOT NULL DEFAULT 0,
          is_primary INTEGER NOT NULL DEFAULT 0,
          detected_music TEXT NULL,
          detected_music_artist TEXT NULL,
          detected_music_confidence REAL NULL,
          detected_characters TEXT NOT NULL DEFAULT '[]',
          music_source TEXT NULL,
          final_music TEXT NULL,
          final_music_artist TEXT NULL,
          final_characters TEXT NOT NULL DEFAULT '[]',
          difficulty_level TEXT NULL,
          edit_status TEXT NOT NULL DEFAULT 'pendiente',
          edited_video_path TEXT NULL,
          notes TEXT NULL,
          processing_status TEXT NOT NULL DEFAULT 'pending',
          created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_media_post ON media(post_id);
        CREATE INDEX IF NOT EXISTS idx_media_post_order ON media(post_id, carousel_order);
        CREATE INDEX IF NOT EXISTS idx_media_processing_status ON media(processing_status);
        CREATE INDEX IF NOT EXISTS idx_media_edit_status ON media(edit_status);

        CREATE TABLE IF NOT EXISTS post_categories (
          post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
          category_type TEXT NOT NULL,
          PRIMARY KEY (post_id, category_type)
        );

        CREATE TABLE IF NOT EXISTS downloader_mapping (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          media_id INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE,
          download_item_id TEXT NOT NULL,
          external_db_source TEXT NOT NULL,
          is_carousel_item INTEGER NOT NULL DEFAULT 0,
          carousel_order INTEGER NULL,
          carousel_base_id TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_downloader_mapping_media ON downloader_mapping(media_id);
        CREATE INDEX IF NOT EXISTS idx_downloader_mapping_item_source
          ON downloader_mapping(download_item_id, external_db_source);
        "#,
    )?;

    seed_platforms(conn)?;
    Ok(())
}

fn seed_platforms(conn: &Connection) -> CoreResult<()> {
    for name in BOOTSTRAP_PLATFORMS {
        let display_name = capitalize(name);
        conn.execute(
            "INSERT OR IGNORE INTO platforms (name, display_name, base_url) VALUES (?1, ?2, NULL)",
            params![name, display_name],
        )?;
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_seeds_bootstrap_platforms() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM platforms", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, BOOTSTRAP_PLATFORMS.len());
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key='schema_version'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, "1");
    }
}
