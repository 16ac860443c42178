use super::{ApiConfig, CacheConfig, Config, PathsConfig};

/// Mirrors used when the config file lists none of its own. A
/// self-hosted instance listens on port 3000 by default.
pub const ENDPOINTS: &[&str] = &["http://localhost:3000"];

pub const USER_AGENT: &str = "mirrorbeat/0.1";

/// 20 MiB of cached payloads before pruning kicks in.
pub const CACHE_MAX_BYTES: u64 = 20 * 1024 * 1024;

pub fn defaults() -> Config {
    Config {
        api: ApiConfig::default(),
        cache: CacheConfig::default(),
        paths: PathsConfig::default(),
    }
}
