//! Organized-Folders extractor (spec §4.3.4).
//!
//! Grounded on `src/external_sources/organized.py` for the platform/creator
//! folder-walking rules; uses `std::fs::read_dir` rather than a directory-
//! walking crate since the teacher's stack carries none and the walk here
//! is exactly two levels deep (platform, then creator).

use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;

use crate::error::CoreResult;
use crate::models::{CategoryType, MediaType};

use super::{is_recognized_media_extension, CreatorHint, Extractor, RawItem, RawMedia};

const MAIN_PLATFORM_FOLDERS: &[&str] = &["youtube", "tiktok", "instagram"];
const GENERIC_CREATOR_NAMES: &[&str] = &["downloads", "videos", "content", "media", "files"];

fn creator_profile_url(platform: &str, name: &str) -> String {
    match platform {
        "youtube" => format!("https://www.youtube.com/@{name}"),
        "tiktok" => format!("https://www.tiktok.com/@{name}"),
        "instagram" => format!("https://www.instagram.com/{name}/"),
        other => format!("https://{other}.com/{name}"),
    }
}

/// Cleans a raw folder name into a creator name, or `None` if it fails the
/// spec §4.3.4 acceptance rules (pure-digit, generic, length bounds).
fn clean_creator_name(raw: &str) -> Option<String> {
    let re = Regex::new(r"[^A-Za-z0-9_\-.]").ok()?;
    let cleaned = re.replace_all(raw, "").to_string();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if GENERIC_CREATOR_NAMES.contains(&cleaned.to_ascii_lowercase().as_str()) {
        return None;
    }
    if cleaned.len() < 2 || cleaned.len() > 100 {
        return None;
    }
    Some(cleaned)
}

fn directory_contains_media(dir: &Path) -> bool {
    walk_media_files(dir).next().is_some()
}

/// Recursively yields media file paths under `dir`.
fn walk_media_files(dir: &Path) -> Box<dyn Iterator<Item = PathBuf>> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Box::new(std::iter::empty());
    };
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_media_files(&path));
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if is_recognized_media_extension(ext) {
                files.push(path);
            }
        }
    }
    Box::new(files.into_iter())
}

pub struct OrganizedExtractor {
    root: PathBuf,
}

impl OrganizedExtractor {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn platform_folders(&self) -> Vec<(String, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if MAIN_PLATFORM_FOLDERS.contains(&name.as_str()) || directory_contains_media(&path) {
                out.push((name, path));
            }
        }
        out
    }
}

impl Extractor for OrganizedExtractor {
    fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn extract(&self, offset: u64, limit: u64) -> CoreResult<Vec<RawItem>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        let mut skipped = 0u64;

        'platforms: for (platform, platform_path) in self.platform_folders() {
            let Ok(creator_dirs) = std::fs::read_dir(&platform_path) else {
                continue;
            };
            for entry in creator_dirs.flatten() {
                let creator_path = entry.path();
                if !creator_path.is_dir() {
                    continue;
                }
                let raw_name = creator_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let Some(creator_name) = clean_creator_name(&raw_name) else {
                    continue;
                };

                for file_path in walk_media_files(&creator_path) {
                    if items.len() as u64 >= limit {
                        break 'platforms;
                    }
                    if skipped < offset {
                        skipped += 1;
                        continue;
                    }

                    let ext = file_path.extension().and_then(|e| e.to_str()).unwrap_or("");
                    let Some(_media_type) = MediaType::from_extension(ext) else {
                        continue;
                    };
                    let category = match platform.as_str() {
                        "youtube" | "tiktok" => CategoryType::Videos,
                        _ => CategoryType::Folder,
                    };
                    let file_name = file_path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let path_str = file_path.to_string_lossy().to_string();

                    items.push(RawItem {
                        platform: platform.clone(),
                        platform_post_id: None,
                        post_url: None,
                        title: None,
                        title_is_filename_derived: true,
                        creator: Some(CreatorHint {
                            profile_url: Some(creator_profile_url(&platform, &creator_name)),
                            platform_creator_id: Some(creator_name.clone()),
                            name: creator_name.clone(),
                        }),
                        subscription: None,
                        media: vec![RawMedia {
                            file_path: path_str,
                            file_name,
                            carousel_order: 0,
                            duration_seconds: None,
                            resolution_width: None,
                            resolution_height: None,
                            download_item_id: format!("organized:{}", file_path.display()),
                            is_carousel_item: false,
                            carousel_base_id: None,
                        }],
                        category_hints: vec![category],
                        publication_date: None,
                        publication_date_source: Some("organized_folder".to_string()),
                        download_date: Some(Utc::now()),
                        external_db_source: None,
                    });
                }
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pure_digit_names() {
        assert_eq!(clean_creator_name("12345"), None);
    }

    #[test]
    fn rejects_generic_names() {
        assert_eq!(clean_creator_name("Downloads"), None);
    }

    #[test]
    fn accepts_reasonable_name() {
        assert_eq!(clean_creator_name("Alice_Doe"), Some("Alice_Doe".to_string()));
    }

    #[test]
    fn unavailable_root_yields_empty() {
        let ext = OrganizedExtractor::new(PathBuf::from("/nonexistent/root"));
        assert!(ext.extract(0, 10).unwrap().is_empty());
    }
}
