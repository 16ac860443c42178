use crate::netease::{
    CacheTtls, EndpointPool, FailoverClient, FailoverSettings, HttpTransport, MusicApi,
    QuerySettings,
};
use crate::storage::{CacheStore, SqliteBackend};
use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod defaults;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Mirror base URLs; shuffled once per process.
    pub endpoints: Vec<String>,
    /// Mirror tried first on every request, if set.
    pub source_override: Option<String>,
    /// Mirrors raced together in the first automatic tier.
    pub race_size: usize,
    pub override_timeout_ms: u64,
    pub sticky_timeout_ms: u64,
    pub race_timeout_ms: u64,
    /// standard, higher, exhigh, lossless or hires
    pub audio_level: String,
    pub cookie: Option<String>,
    pub real_ip: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub lyrics_ttl_secs: u64,
    pub playlist_ttl_secs: u64,
    pub recommended_ttl_secs: u64,
    pub search_ttl_secs: u64,
    pub comments_ttl_secs: u64,
    pub artist_ttl_secs: u64,
    pub audio_url_ttl_secs: u64,
    /// Upper bound on stored payload bytes; unlimited when absent.
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        defaults::defaults()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        let failover = FailoverSettings::default();
        let query = QuerySettings::default();
        Self {
            endpoints: defaults::ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            source_override: None,
            race_size: failover.race_size,
            override_timeout_ms: failover.override_timeout.as_millis() as u64,
            sticky_timeout_ms: failover.sticky_timeout.as_millis() as u64,
            race_timeout_ms: failover.race_timeout.as_millis() as u64,
            audio_level: query.audio_level,
            cookie: None,
            real_ip: None,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            lyrics_ttl_secs: ttls.lyrics.as_secs(),
            playlist_ttl_secs: ttls.playlist.as_secs(),
            recommended_ttl_secs: ttls.recommended.as_secs(),
            search_ttl_secs: ttls.search.as_secs(),
            comments_ttl_secs: ttls.comments.as_secs(),
            artist_ttl_secs: ttls.artist.as_secs(),
            audio_url_ttl_secs: ttls.audio_url.as_secs(),
            max_bytes: Some(defaults::CACHE_MAX_BYTES),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let proj = ProjectDirs::from("dev", "mirrorbeat", "mirrorbeat");
        let data_dir = proj
            .as_ref()
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("mirrorbeat"));
        Self { data_dir }
    }
}

impl Config {
    pub fn failover_settings(&self) -> FailoverSettings {
        FailoverSettings {
            race_size: self.api.race_size.max(1),
            override_timeout: Duration::from_millis(self.api.override_timeout_ms),
            sticky_timeout: Duration::from_millis(self.api.sticky_timeout_ms),
            race_timeout: Duration::from_millis(self.api.race_timeout_ms),
        }
    }

    pub fn query_settings(&self) -> QuerySettings {
        let c = &self.cache;
        QuerySettings {
            ttls: CacheTtls {
                lyrics: Duration::from_secs(c.lyrics_ttl_secs),
                playlist: Duration::from_secs(c.playlist_ttl_secs),
                recommended: Duration::from_secs(c.recommended_ttl_secs),
                search: Duration::from_secs(c.search_ttl_secs),
                comments: Duration::from_secs(c.comments_ttl_secs),
                artist: Duration::from_secs(c.artist_ttl_secs),
                audio_url: Duration::from_secs(c.audio_url_ttl_secs),
            },
            audio_level: self.api.audio_level.clone(),
            cookie: self.api.cookie.clone(),
            real_ip: self.api.real_ip.clone(),
            ..QuerySettings::default()
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.paths.data_dir.join("cache.sqlite3")
    }

    /// Wire up the HTTP transport, the SQLite cache, and the query facade.
    pub fn build_api(&self) -> anyhow::Result<MusicApi> {
        let pool = EndpointPool::new(&self.api.endpoints)
            .context("config lists no usable api.endpoints")?;
        let transport = HttpTransport::new(&self.api.user_agent)?;
        let client = FailoverClient::new(Arc::new(transport), pool, self.failover_settings());
        if let Some(src) = self.api.source_override.as_deref() {
            client.set_api_source(Some(src));
        }

        let backend = SqliteBackend::open(&self.cache_path(), self.cache.max_bytes)
            .context("open cache database")?;
        let cache = CacheStore::new(Arc::new(backend));

        Ok(MusicApi::new(client, cache, self.query_settings()))
    }
}

pub fn save(cfg: &Config, override_path: Option<&Path>) -> anyhow::Result<()> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    write_config(cfg, &path)
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "mirrorbeat", "mirrorbeat")
        .context("ProjectDirs unavailable")?;
    Ok(proj.config_dir().join("config.toml"))
}

pub fn load(override_path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !path.exists() {
        let cfg = defaults::defaults();
        write_config(&cfg, &path)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg = toml::from_str::<Config>(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

fn write_config(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    let raw = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))?;
    // May hold an account cookie.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_defaults_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.toml");

        let first = load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(first.api.race_size, 6);

        let mut edited = first.clone();
        edited.api.endpoints = vec!["https://mirror.test".into()];
        edited.cache.lyrics_ttl_secs = 42;
        save(&edited, Some(&path)).unwrap();

        let again = load(Some(&path)).unwrap();
        assert_eq!(again.api.endpoints, vec!["https://mirror.test".to_string()]);
        assert_eq!(again.query_settings().ttls.lyrics, Duration::from_secs(42));
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let cfg: Config = toml::from_str("[api]\nrace_size = 3\n").unwrap();
        assert_eq!(cfg.failover_settings().race_size, 3);
        assert_eq!(cfg.failover_settings().sticky_timeout, Duration::from_secs(5));
        assert_eq!(cfg.api.audio_level, "exhigh");
        assert!(!cfg.api.endpoints.is_empty());
    }
}
