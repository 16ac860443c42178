//! Query facade over the failover client and the cache.
//!
//! Every operation follows the same template: derive a cache key, try the
//! cache, otherwise go through the failover client, normalize, and cache the
//! result when it is non-empty. Empty results are returned but never cached
//! so a transient empty answer heals on the next call.

use crate::lyrics::{LyricLine, parse_lyrics};
use crate::netease::client::FailoverClient;
use crate::netease::endpoints::Endpoint;
use crate::netease::error::ApiError;
use crate::netease::models::{Artist, Comment, RecommendedPlaylist, Track};
use crate::netease::normalize;
use crate::storage::CacheStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const SEARCH_SONGS: u32 = 1;
const SEARCH_ARTISTS: u32 = 100;
const SEARCH_PLAYLISTS: u32 = 1000;

#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub lyrics: Duration,
    pub playlist: Duration,
    pub recommended: Duration,
    pub search: Duration,
    pub comments: Duration,
    pub artist: Duration,
    pub audio_url: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        const MIN: u64 = 60;
        Self {
            lyrics: Duration::from_secs(7 * 24 * 60 * MIN),
            playlist: Duration::from_secs(60 * MIN),
            recommended: Duration::from_secs(60 * MIN),
            search: Duration::from_secs(30 * MIN),
            comments: Duration::from_secs(15 * MIN),
            artist: Duration::from_secs(12 * 60 * MIN),
            audio_url: Duration::from_secs(10 * MIN),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub ttls: CacheTtls,
    /// Quality requested from `/song/url` (standard, higher, exhigh, lossless, hires).
    pub audio_level: String,
    pub cookie: Option<String>,
    pub real_ip: Option<String>,
    pub playlist_limit: u32,
    pub search_limit: u32,
    pub comment_limit: u32,
    pub recommend_limit: u32,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            ttls: CacheTtls::default(),
            audio_level: "exhigh".to_string(),
            cookie: None,
            real_ip: None,
            playlist_limit: 500,
            search_limit: 30,
            comment_limit: 50,
            recommend_limit: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtistSongOrder {
    Hot,
    Time,
}

impl ArtistSongOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtistSongOrder::Hot => "hot",
            ArtistSongOrder::Time => "time",
        }
    }
}

impl std::str::FromStr for ArtistSongOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(ArtistSongOrder::Hot),
            "time" | "recent" => Ok(ArtistSongOrder::Time),
            other => Err(format!("unknown order {other:?} (expected hot or time)")),
        }
    }
}

#[derive(Clone)]
pub struct MusicApi {
    client: FailoverClient,
    cache: CacheStore,
    settings: QuerySettings,
}

impl MusicApi {
    pub fn new(client: FailoverClient, cache: CacheStore, settings: QuerySettings) -> Self {
        Self {
            client,
            cache,
            settings,
        }
    }

    pub fn client(&self) -> &FailoverClient {
        &self.client
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn fetch_playlist(&self, id: u64) -> Result<Vec<Track>, ApiError> {
        self.fetch_playlist_page(id, self.settings.playlist_limit, 0)
            .await
    }

    pub async fn fetch_playlist_page(
        &self,
        id: u64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Track>, ApiError> {
        self.cached(
            format!("playlist:{id}:{limit}:{offset}"),
            self.settings.ttls.playlist,
            format!("/playlist/track/all?id={id}&limit={limit}&offset={offset}"),
            |v| normalize::songs_at(v, &["/songs"]),
        )
        .await
    }

    pub async fn fetch_recommended_playlists(&self) -> Result<Vec<RecommendedPlaylist>, ApiError> {
        let limit = self.settings.recommend_limit;
        self.cached(
            format!("recommended:{limit}"),
            self.settings.ttls.recommended,
            format!("/personalized?limit={limit}"),
            |v| normalize::playlists_at(v, &["/result"]),
        )
        .await
    }

    pub async fn search_playlists(&self, keywords: &str) -> Result<Vec<RecommendedPlaylist>, ApiError> {
        let (key, path) = self.search_request(keywords, SEARCH_PLAYLISTS);
        self.cached(key, self.settings.ttls.search, path, |v| {
            normalize::playlists_at(v, &["/result/playlists"])
        })
        .await
    }

    pub async fn search_songs(&self, keywords: &str) -> Result<Vec<Track>, ApiError> {
        let (key, path) = self.search_request(keywords, SEARCH_SONGS);
        self.cached(key, self.settings.ttls.search, path, |v| {
            normalize::songs_at(v, &["/result/songs"])
        })
        .await
    }

    pub async fn search_artists(&self, keywords: &str) -> Result<Vec<Artist>, ApiError> {
        let (key, path) = self.search_request(keywords, SEARCH_ARTISTS);
        self.cached(key, self.settings.ttls.search, path, |v| {
            normalize::artists_at(v, &["/result/artists"])
        })
        .await
    }

    pub async fn fetch_artist_top_songs(&self, artist_id: u64) -> Result<Vec<Track>, ApiError> {
        self.cached(
            format!("artist_top:{artist_id}"),
            self.settings.ttls.artist,
            format!("/artist/top/song?id={artist_id}"),
            |v| normalize::songs_at(v, &["/songs", "/hotSongs"]),
        )
        .await
    }

    pub async fn fetch_artist_detail(&self, artist_id: u64) -> Result<Option<Artist>, ApiError> {
        self.cached(
            format!("artist_detail:{artist_id}"),
            self.settings.ttls.artist,
            format!("/artist/detail?id={artist_id}"),
            |v| normalize::artist_at(v, &["/data/artist", "/artist"]),
        )
        .await
    }

    /// An artist's songs in the given order, with missing album covers filled
    /// in from a follow-up `/song/detail` call.
    pub async fn fetch_artist_songs_list(
        &self,
        artist_id: u64,
        order: ArtistSongOrder,
        limit: u32,
    ) -> Result<Vec<Track>, ApiError> {
        let key = format!("artist_songs:{artist_id}:{}:{limit}", order.as_str());
        if let Some(hit) = self.cache_get::<Vec<Track>>(&key) {
            return Ok(hit);
        }

        let v = self
            .client
            .request(&format!(
                "/artist/songs?id={artist_id}&order={}&limit={limit}",
                order.as_str()
            ))
            .await?;
        let mut tracks = normalize::songs_at(&v, &["/songs"]);

        let missing: Vec<String> = tracks
            .iter()
            .filter(|t| !t.has_cover())
            .map(|t| t.id.to_string())
            .collect();
        // A list still missing covers because the follow-up failed is not cached.
        let complete = missing.is_empty() || self.fill_covers(&mut tracks, &missing).await;
        if complete {
            self.cache_put(&key, &tracks, self.settings.ttls.artist);
        }
        Ok(tracks)
    }

    /// Returns `false` when the follow-up request itself failed.
    async fn fill_covers(&self, tracks: &mut [Track], ids: &[String]) -> bool {
        let path = format!("/song/detail?ids={}", ids.join(","));
        let detail = match self.client.request(&path).await {
            Ok(v) => normalize::songs_at(&v, &["/songs"]),
            Err(e) => {
                tracing::debug!(error = %e, "cover follow-up failed, keeping list as is");
                return false;
            }
        };
        let covers: HashMap<u64, String> = detail
            .into_iter()
            .filter(|t| t.has_cover())
            .map(|t| (t.id, t.album.cover_url))
            .collect();
        for t in tracks.iter_mut().filter(|t| !t.has_cover()) {
            if let Some(url) = covers.get(&t.id) {
                t.album.cover_url = url.clone();
            }
        }
        true
    }

    /// Resolve a playable URL. `None` when the mirror has no link for the track.
    pub async fn get_audio_url(&self, track_id: u64) -> Result<Option<String>, ApiError> {
        let level = &self.settings.audio_level;
        let mut path = format!("/song/url?id={track_id}&level={}", urlencoding::encode(level));
        if let Some(cookie) = self.settings.cookie.as_deref().filter(|c| !c.is_empty()) {
            path.push_str(&format!("&cookie={}", urlencoding::encode(cookie)));
        }
        if let Some(ip) = self.settings.real_ip.as_deref().filter(|c| !c.is_empty()) {
            path.push_str(&format!("&realIP={}", urlencoding::encode(ip)));
        }

        self.cached(
            format!("audio_url:{track_id}:{level}"),
            self.settings.ttls.audio_url,
            path,
            |v| {
                v.pointer("/data/0/url")
                    .and_then(|u| u.as_str())
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
            },
        )
        .await
    }

    pub async fn fetch_lyrics(&self, track_id: u64) -> Result<Vec<LyricLine>, ApiError> {
        self.cached(
            format!("lyrics:{track_id}"),
            self.settings.ttls.lyrics,
            format!("/lyric?id={track_id}"),
            |v| {
                let Some(lrc) = v.pointer("/lrc/lyric").and_then(|x| x.as_str()) else {
                    return Vec::new();
                };
                let translation = v
                    .pointer("/tlyric/lyric")
                    .and_then(|x| x.as_str())
                    .filter(|s| !s.trim().is_empty());
                parse_lyrics(lrc, translation, None)
            },
        )
        .await
    }

    pub async fn fetch_comments(&self, track_id: u64) -> Result<Vec<Comment>, ApiError> {
        let limit = self.settings.comment_limit;
        self.cached(
            format!("comments:{track_id}:{limit}"),
            self.settings.ttls.comments,
            format!("/comment/music?id={track_id}&limit={limit}"),
            |v| normalize::comments_at(v, &["/comments", "/data/comments"]),
        )
        .await
    }

    pub fn set_api_source(&self, url: Option<&str>) {
        self.client.set_api_source(url);
    }

    pub fn current_api_source(&self) -> Option<Endpoint> {
        self.client.current_api_source()
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    pub fn prune_cache(&self) -> usize {
        self.cache.prune()
    }

    fn search_request(&self, keywords: &str, kind: u32) -> (String, String) {
        let limit = self.settings.search_limit;
        let keywords = keywords.trim();
        let key = format!("search:{kind}:{limit}:{keywords}");
        let path = format!(
            "/cloudsearch?keywords={}&type={kind}&limit={limit}",
            urlencoding::encode(keywords)
        );
        (key, path)
    }

    async fn cached<T, F>(
        &self,
        key: String,
        ttl: Duration,
        path: String,
        normalize: F,
    ) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&Value) -> T,
    {
        if let Some(hit) = self.cache_get::<T>(&key) {
            return Ok(hit);
        }
        let v = self.client.request(&path).await?;
        let out = normalize(&v);
        self.cache_put(&key, &out, ttl);
        Ok(out)
    }

    fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let v = self.cache.get(key)?;
        match serde_json::from_value(v) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::debug!(key, error = %e, "cached value has an old shape, refetching");
                None
            }
        }
    }

    fn cache_put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Ok(v) = serde_json::to_value(value) else {
            return;
        };
        if is_empty_value(&v) {
            tracing::debug!(key, "empty result not cached");
            return;
        }
        self.cache.put(key, &v, ttl);
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netease::client::FailoverSettings;
    use crate::netease::endpoints::EndpointPool;
    use crate::netease::testing::{Reply, ScriptedTransport};
    use crate::storage::{KvBackend, MemoryBackend};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        api: MusicApi,
        transport: Arc<ScriptedTransport>,
        backend: Arc<MemoryBackend>,
    }

    fn fixture(urls: &[&str]) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let backend = Arc::new(MemoryBackend::new());
        let client = FailoverClient::new(
            transport.clone(),
            EndpointPool::ordered(urls).unwrap(),
            FailoverSettings {
                race_size: 6,
                override_timeout: Duration::from_millis(100),
                sticky_timeout: Duration::from_millis(100),
                race_timeout: Duration::from_millis(100),
            },
        );
        let api = MusicApi::new(
            client,
            CacheStore::new(backend.clone()),
            QuerySettings::default(),
        );
        Fixture {
            api,
            transport,
            backend,
        }
    }

    fn song(id: u64, cover: &str) -> Value {
        json!({"id": id, "name": format!("song {id}"), "ar": [{"id": 1, "name": "Art"}],
               "al": {"id": 2, "name": "Alb", "picUrl": cover}, "dt": 1000})
    }

    #[tokio::test]
    async fn test_failover_then_cache_hit_without_network() {
        let f = fixture(&["https://a", "https://b", "https://c"]);
        f.transport.script("https://a", Reply::Hang);
        f.transport.script("https://b", Reply::Hang);
        f.transport.script(
            "https://c",
            Reply::Json(json!({"code": 200, "songs": [song(1, "https://p/1.jpg")]})),
        );

        let tracks = f.api.fetch_playlist(42).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "song 1");

        tokio::time::sleep(Duration::from_millis(20)).await;
        f.transport.clear_calls();
        let again = f.api.fetch_playlist(42).await.unwrap();
        assert_eq!(again, tracks);
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_not_cached() {
        let f = fixture(&["https://a"]);
        f.transport
            .script("https://a", Reply::Json(json!({"code": 200, "result": {"songs": []}})));
        assert!(f.api.search_songs("nothing").await.unwrap().is_empty());
        assert!(f.backend.is_empty());

        f.api.search_songs("nothing").await.unwrap();
        assert_eq!(f.transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_surfaces_single_error() {
        let f = fixture(&["https://a", "https://b"]);
        f.transport.script("https://a", Reply::Fail);
        f.transport.script("https://b", Reply::Json(json!({"code": 401})));
        let err = f.api.fetch_comments(1).await.unwrap_err();
        assert!(matches!(err, ApiError::Unreachable { .. }));
        assert_eq!(err.to_string(), "no API endpoint reachable (2 attempts failed)");
    }

    #[tokio::test]
    async fn test_artist_songs_fill_missing_covers() {
        let f = fixture(&["https://a"]);
        f.transport.script_path(
            "https://a",
            "/artist/songs",
            Reply::Json(json!({"code": 200, "songs": [
                song(1, "https://p/1.jpg"),
                song(2, ""),
            ]})),
        );
        f.transport.script_path(
            "https://a",
            "/song/detail",
            Reply::Json(json!({"code": 200, "songs": [song(2, "https://p/2.jpg")]})),
        );

        let tracks = f
            .api
            .fetch_artist_songs_list(9, ArtistSongOrder::Time, 20)
            .await
            .unwrap();
        assert_eq!(tracks[1].album.cover_url, "https://p/2.jpg");

        let urls = f.transport.urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("/artist/songs?id=9&order=time&limit=20"));
        assert!(urls[1].contains("/song/detail?ids=2&"));
        assert!(f.backend.get("mb_cache:artist_songs:9:time:20").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_artist_songs_not_cached_when_cover_lookup_fails() {
        let f = fixture(&["https://a"]);
        f.transport.script_path(
            "https://a",
            "/artist/songs",
            Reply::Json(json!({"code": 200, "songs": [song(2, "")]})),
        );
        f.transport.script_path("https://a", "/song/detail", Reply::Fail);

        let tracks = f
            .api
            .fetch_artist_songs_list(9, ArtistSongOrder::Hot, 20)
            .await
            .unwrap();
        assert_eq!(tracks.len(), 1);
        assert!(!tracks[0].has_cover());
        assert!(f.backend.is_empty());

        f.transport.script_path(
            "https://a",
            "/song/detail",
            Reply::Json(json!({"code": 200, "songs": [song(2, "https://p/2.jpg")]})),
        );
        let healed = f
            .api
            .fetch_artist_songs_list(9, ArtistSongOrder::Hot, 20)
            .await
            .unwrap();
        assert_eq!(healed[0].album.cover_url, "https://p/2.jpg");
        assert!(f.backend.get("mb_cache:artist_songs:9:hot:20").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_search_cache_key_keeps_case() {
        let f = fixture(&["https://a"]);
        f.transport.script_path(
            "https://a",
            "keywords=ABBA",
            Reply::Json(json!({"code": 200, "result": {"songs": [song(1, "")]}})),
        );
        f.transport.script_path(
            "https://a",
            "keywords=abba",
            Reply::Json(json!({"code": 200, "result": {"songs": [song(2, "")]}})),
        );
        assert_eq!(f.api.search_songs(" ABBA ").await.unwrap()[0].id, 1);
        assert_eq!(f.api.search_songs("abba").await.unwrap()[0].id, 2);
        assert_eq!(f.api.search_songs("ABBA").await.unwrap()[0].id, 1);
        assert_eq!(f.transport.urls().len(), 2);
        assert_eq!(f.backend.len(), 2);
    }

    #[tokio::test]
    async fn test_lyrics_with_translation() {
        let f = fixture(&["https://a"]);
        f.transport.script(
            "https://a",
            Reply::Json(json!({"code": 200,
                "lrc": {"lyric": "[00:01.00]hi\n[00:03.00]bye"},
                "tlyric": {"lyric": "[00:01.10]salut"}})),
        );
        let lines = f.api.fetch_lyrics(5).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].duration_ms, 2000);
        assert_eq!(lines[0].translation.as_deref(), Some("salut"));
        assert_eq!(lines[1].duration_ms, 5000);
    }

    #[tokio::test]
    async fn test_audio_url_and_missing_url() {
        let f = fixture(&["https://a"]);
        f.transport.script_path(
            "https://a",
            "id=1&",
            Reply::Json(json!({"code": 200, "data": [{"id": 1, "url": "https://cdn/1.mp3"}]})),
        );
        f.transport.script_path(
            "https://a",
            "id=2&",
            Reply::Json(json!({"code": 200, "data": [{"id": 2, "url": null}]})),
        );
        assert_eq!(
            f.api.get_audio_url(1).await.unwrap().as_deref(),
            Some("https://cdn/1.mp3")
        );
        assert_eq!(f.api.get_audio_url(2).await.unwrap(), None);
        assert!(f.transport.urls()[0].contains("level=exhigh"));
        assert_eq!(f.backend.len(), 1);
    }

    #[tokio::test]
    async fn test_artist_detail_and_search_shapes() {
        let f = fixture(&["https://a"]);
        f.transport.script_path(
            "https://a",
            "/artist/detail",
            Reply::Json(json!({"code": 200, "data": {"artist": {"id": 3, "name": "X", "cover": "https://c/x.jpg"}}})),
        );
        f.transport.script_path(
            "https://a",
            "type=1000",
            Reply::Json(json!({"code": 200, "result": {"playlists": [
                {"id": 8, "name": "P", "coverImgUrl": "https://c/p.jpg", "trackCount": 3}
            ]}})),
        );
        let artist = f.api.fetch_artist_detail(3).await.unwrap().unwrap();
        assert_eq!(artist.picture_url, "https://c/x.jpg");
        let pls = f.api.search_playlists("  Chill Mix ").await.unwrap();
        assert_eq!(pls[0].track_count, 3);
        assert!(f.transport.urls()[1].contains("keywords=Chill%20Mix&type=1000"));
    }

    #[tokio::test]
    async fn test_api_source_passthrough_and_clear() {
        let f = fixture(&["https://a"]);
        f.transport
            .script("https://a", Reply::Json(json!({"code": 200, "result": [
                {"id": 1, "name": "R", "picUrl": "https://c/r.jpg"}
            ]})));
        assert_eq!(f.api.current_api_source(), None);
        f.api.fetch_recommended_playlists().await.unwrap();
        assert_eq!(f.api.current_api_source().as_deref(), Some("https://a"));
        f.api.set_api_source(Some("https://mine"));
        assert_eq!(f.api.current_api_source().as_deref(), Some("https://mine"));
        assert_eq!(f.api.clear_cache(), 1);
    }
}
