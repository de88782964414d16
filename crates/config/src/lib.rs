//! Layered configuration.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. a configuration file: the one given explicitly, otherwise `trove.toml`
//!    in the platform config directory if it exists (TOML, YAML or JSON,
//!    picked by extension),
//! 3. environment variables prefixed `TROVE_`, with `__` separating nested
//!    keys (`TROVE_PROFILES__AVIF__LOSSY__QUALITY=70`).
//!
//! Relative directories are resolved against the working directory at load
//! time.

pub mod error;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use trove_codec::{Codec, Profiles};

use crate::error::{ErrorKind, Result};

pub const ENV_PREFIX: &str = "TROVE_";
pub const CONFIG_FILE: &str = "trove.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: SocketAddr,
    /// The tree being served.
    pub served_root: PathBuf,
    pub thumbnail_root: PathBuf,
    pub lossy_root: PathBuf,
    /// Built archives, and their `.part` files while building.
    pub archive_root: PathBuf,
    pub archive_retention_secs: u64,
    /// Serve re-encoded images from `/lossy`. When off, originals are served.
    pub lossy: bool,
    /// Warm the cache in the background and watch the tree for changes.
    pub precache: bool,
    pub precache_debounce_ms: u64,
    /// JSON object of `"path/prefix": "secret"`.
    pub secrets_file: PathBuf,
    pub secrets_reload_secs: u64,
    pub thumbnail_codec: String,
    pub lossy_codec: String,
    /// Lossy codecs the background worker keeps warm.
    pub lossy_codecs: Vec<String>,
    pub profiles: Profiles,
    pub eligible_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            served_root: PathBuf::from("file-dir"),
            thumbnail_root: PathBuf::from("thumbnails"),
            lossy_root: PathBuf::from("lossy"),
            archive_root: PathBuf::from("temp"),
            archive_retention_secs: 24 * 60 * 60,
            lossy: true,
            precache: true,
            precache_debounce_ms: 1000,
            secrets_file: PathBuf::from("passwords.json"),
            secrets_reload_secs: 5 * 60,
            thumbnail_codec: "avif".into(),
            lossy_codec: "webp".into(),
            lossy_codecs: vec!["avif".into(), "jpeg".into(), "webp".into()],
            profiles: Profiles::default(),
            eligible_extensions: ["jpg", "jpeg", "png", "dng", "avif", "jxl", "webp", "heic"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Codec choices, parsed out of [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codecs {
    pub thumbnail: Codec,
    pub lossy: Codec,
    pub warm: Vec<Codec>,
}

/// `trove.toml` in the platform's configuration directory.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "trove").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn file_provider(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

fn parse_codec(name: &str) -> Result<Codec> {
    Codec::from_str(name).or_raise(|| ErrorKind::Codec(name.to_string()))
}

impl Config {
    /// Defaults and file only; no environment.
    pub fn figment_without_env(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::Missing(path.to_path_buf())),
            Some(path) => Ok(file_provider(figment, path)),
            None => match default_config_file() {
                Some(path) if path.is_file() => Ok(file_provider(figment, &path)),
                _ => Ok(figment),
            },
        }
    }

    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        Ok(Self::figment_without_env(file)?.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load, resolve and validate.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(file)?)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        config.resolve_roots()?;
        config.validate()?;
        tracing::debug!(served_root = %config.served_root.display(), listen = %config.listen, "Configuration loaded");
        Ok(config)
    }

    fn resolve_roots(&mut self) -> Result<()> {
        for root in
            [&mut self.served_root, &mut self.thumbnail_root, &mut self.lossy_root, &mut self.archive_root, &mut self.secrets_file]
        {
            *root = std::path::absolute(&*root).or_raise(|| ErrorKind::Roots(root.display().to_string()))?;
        }
        Ok(())
    }

    pub fn codecs(&self) -> Result<Codecs> {
        Ok(Codecs {
            thumbnail: parse_codec(&self.thumbnail_codec)?,
            lossy: parse_codec(&self.lossy_codec)?,
            warm: self.lossy_codecs.iter().map(|name| parse_codec(name)).collect::<Result<_>>()?,
        })
    }

    /// Reject layouts that would have the cache feed on itself.
    pub fn validate(&self) -> Result<()> {
        self.codecs()?;
        let derived = [("thumbnail_root", &self.thumbnail_root), ("lossy_root", &self.lossy_root), ("archive_root", &self.archive_root)];
        for (i, (name, root)) in derived.iter().enumerate() {
            if root.starts_with(&self.served_root) {
                exn::bail!(ErrorKind::Roots(format!("{name} must not be inside served_root")));
            }
            for (other, other_root) in &derived[i + 1..] {
                if root == other_root {
                    exn::bail!(ErrorKind::Roots(format!("{name} and {other} must differ")));
                }
            }
        }
        Ok(())
    }

    pub fn archive_retention(&self) -> Duration {
        Duration::from_secs(self.archive_retention_secs)
    }

    pub fn precache_debounce(&self) -> Duration {
        Duration::from_millis(self.precache_debounce_ms)
    }

    pub fn secrets_reload(&self) -> Duration {
        Duration::from_secs(self.secrets_reload_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn load_file(name: &str, contents: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        Config::from_figment(Config::figment_without_env(Some(&path))?)
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default()))).unwrap();
        assert!(config.served_root.is_absolute());
        assert!(config.served_root.ends_with("file-dir"));
        assert_eq!(config.archive_retention(), Duration::from_secs(86_400));
        assert_eq!(config.precache_debounce(), Duration::from_secs(1));
        assert_eq!(config.secrets_reload(), Duration::from_secs(300));
        assert_eq!(
            config.codecs().unwrap(),
            Codecs { thumbnail: Codec::Avif, lossy: Codec::Webp, warm: vec![Codec::Avif, Codec::Jpeg, Codec::Webp] }
        );
    }

    #[rstest]
    #[case("trove.toml", "served_root = \"/data/files\"\nprecache = false\n[profiles.webp.lossy]\nquality = 70\neffort = 4\n")]
    #[case("trove.yaml", "served_root: /data/files\nprecache: false\nprofiles:\n  webp:\n    lossy: { quality: 70, effort: 4 }\n")]
    #[case("trove.json", r#"{"served_root": "/data/files", "precache": false, "profiles": {"webp": {"lossy": {"quality": 70, "effort": 4}}}}"#)]
    fn test_file_formats(#[case] name: &str, #[case] contents: &str) {
        let config = load_file(name, contents).unwrap();
        assert_eq!(config.served_root, Path::new("/data/files"));
        assert!(!config.precache);
        assert_eq!(config.profiles.webp.lossy.quality, 70);
        // Untouched values keep their defaults.
        assert_eq!(config.profiles.webp.thumbnail, Profiles::default().webp.thumbnail);
        assert_eq!(config.lossy_codec, "webp");
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::figment(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(*err, ErrorKind::Missing(_)));
    }

    #[rstest]
    #[case("thumbnail_codec = \"bmp\"")]
    #[case("lossy_codecs = [\"webp\", \"jxl\"]")]
    fn test_bad_codecs(#[case] contents: &str) {
        let err = load_file("trove.toml", contents).unwrap_err();
        assert!(matches!(*err, ErrorKind::Codec(_)));
    }

    #[rstest]
    #[case("served_root = \"/srv\"\nthumbnail_root = \"/srv/thumbs\"")]
    #[case("lossy_root = \"/cache\"\narchive_root = \"/cache\"")]
    fn test_overlapping_roots(#[case] contents: &str) {
        let err = load_file("trove.toml", contents).unwrap_err();
        assert!(matches!(*err, ErrorKind::Roots(_)));
    }

    #[test]
    fn test_wrong_type() {
        let err = load_file("trove.toml", "archive_retention_secs = \"forever\"").unwrap_err();
        assert!(matches!(*err, ErrorKind::Invalid));
    }
}
