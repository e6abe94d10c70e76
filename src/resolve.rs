//! Map asset server URLs onto downloaded working copies.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sync::AssetSync;
use crate::types::{Locale, ResourceType};

/// Prefix of every URL the resolver knows how to map.
pub const ASSET_HOST: &str = "https://bestdori.com/";

/// How strictly URLs should be redirected to local files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflineBehavior {
    /// Always use the remote URL.
    #[default]
    Disabled,
    /// Use the local file when it exists, the remote URL otherwise.
    EnableIfAvailable,
    /// Use the local file; report a miss instead of falling back.
    Enabled,
}

/// Where a URL should be loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "location", rename_all = "snake_case")]
pub enum Resolution {
    Remote(String),
    Local(PathBuf),
    /// Offline use was required but the file is not downloaded.
    Missing,
}

/// The branch and in-branch path a server URL maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    pub locale: Locale,
    pub resource_type: ResourceType,
    /// Path inside the working copy.
    pub path: String,
}

/// Resource type for an `assets/<locale>/<recognizer>/...` URL.
///
/// `next` is the path segment after the recognizer, if any.
pub fn resource_type_for(recognizer: &str, next: Option<&str>) -> ResourceType {
    match recognizer {
        "movie" => ResourceType::movie(),
        "sound" => ResourceType::sound(),
        "characters" if next == Some("ingameresourceset") => ResourceType::unsupported(),
        "live2d" | "star3d" | "musicscore" | "pickupsituation" => ResourceType::unsupported(),
        _ => ResourceType::basic(),
    }
}

/// Work out which branch holds the file behind `url`.
///
/// Returns `None` for URLs outside the asset host, without enough path
/// segments to identify a branch, or naming a locale the server does not
/// publish.
pub fn locate(url: &str) -> Option<AssetLocation> {
    let base_path = url.strip_prefix(ASSET_HOST)?;

    if base_path.starts_with("api") {
        return Some(AssetLocation {
            locale: Locale::jp(),
            resource_type: ResourceType::main(),
            path: base_path.to_string(),
        });
    }

    if base_path.starts_with("assets") {
        let segments: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() <= 3 {
            return None;
        }
        let locale = segments[1]
            .parse::<Locale>()
            .ok()
            .filter(Locale::is_known)?;
        let resource_type = resource_type_for(segments[2], segments.get(3).copied());
        return Some(AssetLocation {
            locale,
            resource_type,
            path: segments[1..].join("/"),
        });
    }

    None
}

/// Decide whether `url` should be served from a local working copy.
pub fn resolve(sync: &AssetSync, url: &str, behavior: OfflineBehavior) -> Resolution {
    if behavior == OfflineBehavior::Disabled {
        return Resolution::Remote(url.to_string());
    }

    let Some(location) = locate(url) else {
        return Resolution::Remote(url.to_string());
    };

    match sync.local_file(&location.path, &location.locale, &location.resource_type) {
        Some(path) => Resolution::Local(path),
        None if behavior == OfflineBehavior::Enabled => {
            log::error!(
                "Offline asset required but {} is not downloaded in {}/{}",
                location.path,
                location.locale,
                location.resource_type
            );
            Resolution::Missing
        }
        None => Resolution::Remote(url.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncConfig;
    use tempfile::tempdir;

    #[test]
    fn recognizers_map_to_types() {
        assert_eq!(resource_type_for("movie", None), ResourceType::movie());
        assert_eq!(resource_type_for("sound", Some("bgm")), ResourceType::sound());
        assert_eq!(
            resource_type_for("characters", Some("ingameresourceset")),
            ResourceType::unsupported()
        );
        assert_eq!(
            resource_type_for("characters", Some("resourceset")),
            ResourceType::basic()
        );
        for r in ["live2d", "star3d", "musicscore", "pickupsituation"] {
            assert_eq!(resource_type_for(r, None), ResourceType::unsupported());
        }
        assert_eq!(resource_type_for("stamp", None), ResourceType::basic());
    }

    #[test]
    fn locate_asset_urls() {
        let loc = locate("https://bestdori.com/assets/en/sound/bgm001_rip/bgm001.mp3").unwrap();
        assert_eq!(loc.locale.as_str(), "en");
        assert_eq!(loc.resource_type, ResourceType::sound());
        assert_eq!(loc.path, "en/sound/bgm001_rip/bgm001.mp3");
    }

    #[test]
    fn locate_api_urls() {
        let loc = locate("https://bestdori.com/api/cards/all.5.json").unwrap();
        assert_eq!(loc.locale, Locale::jp());
        assert_eq!(loc.resource_type, ResourceType::main());
        assert_eq!(loc.path, "api/cards/all.5.json");
    }

    #[test]
    fn locate_rejects_other_urls() {
        assert!(locate("https://example.com/assets/jp/movie/a/b").is_none());
        assert!(locate("https://bestdori.com/assets/jp/movie").is_none());
        assert!(locate("https://bestdori.com/assets/j p/movie/a/b").is_none());
        assert!(locate("https://bestdori.com/info").is_none());
        assert!(locate("https://bestdori.com/assets/xx/movie/a_rip/a.mp4").is_none());
    }

    #[test]
    fn unpublished_locale_stays_remote() {
        let dir = tempdir().unwrap();
        let sync = AssetSync::startup(SyncConfig::default().with_root(dir.path()));
        let url = "https://bestdori.com/assets/xx/movie/a_rip/a.mp4";

        let local = sync
            .resource_dir(&"xx".parse().unwrap(), &ResourceType::movie())
            .join("xx/movie/a_rip/a.mp4");
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, "mp4").unwrap();

        for behavior in [OfflineBehavior::EnableIfAvailable, OfflineBehavior::Enabled] {
            assert_eq!(
                resolve(&sync, url, behavior),
                Resolution::Remote(url.to_string())
            );
        }
    }

    #[test]
    fn resolve_follows_behavior() {
        let dir = tempdir().unwrap();
        let sync = AssetSync::startup(SyncConfig::default().with_root(dir.path()));
        let present = "https://bestdori.com/assets/jp/movie/op_rip/op.mp4";
        let absent = "https://bestdori.com/assets/jp/movie/ed_rip/ed.mp4";

        let local = sync
            .resource_dir(&Locale::jp(), &ResourceType::movie())
            .join("jp/movie/op_rip/op.mp4");
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, "mp4").unwrap();

        assert_eq!(
            resolve(&sync, present, OfflineBehavior::Disabled),
            Resolution::Remote(present.to_string())
        );
        assert_eq!(
            resolve(&sync, present, OfflineBehavior::EnableIfAvailable),
            Resolution::Local(local.clone())
        );
        assert_eq!(
            resolve(&sync, present, OfflineBehavior::Enabled),
            Resolution::Local(local)
        );
        assert_eq!(
            resolve(&sync, absent, OfflineBehavior::EnableIfAvailable),
            Resolution::Remote(absent.to_string())
        );
        assert_eq!(
            resolve(&sync, absent, OfflineBehavior::Enabled),
            Resolution::Missing
        );
        assert_eq!(
            resolve(&sync, "https://example.com/x", OfflineBehavior::Enabled),
            Resolution::Remote("https://example.com/x".to_string())
        );
    }
}
