//! Upstream JSON → domain records.
//!
//! The mirrors run several backend generations that name the same fields
//! differently. Each entity is modelled as an untagged enum of the shapes seen
//! in the wild; serde picks the variant by which fields are present, and a
//! pure function per variant produces the canonical record. Items that match
//! no known shape are skipped.

use crate::netease::models::{
    Album, Artist, Comment, CommentAuthor, RecommendedPlaylist, Track,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const UNKNOWN_ALBUM: &str = "Unknown album";
pub const UNKNOWN_TITLE: &str = "Unknown title";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawSong {
    /// `song/detail`, `cloudsearch`, `playlist/track/all`
    Modern {
        #[serde(deserialize_with = "lenient_u64")]
        id: u64,
        name: Option<String>,
        ar: Vec<RawArtist>,
        al: Option<RawAlbum>,
        #[serde(default, deserialize_with = "lenient_u64")]
        dt: u64,
        fee: Option<i64>,
    },
    /// older `search` and `artist/top/song` payloads
    Legacy {
        #[serde(deserialize_with = "lenient_u64")]
        id: u64,
        name: Option<String>,
        artists: Vec<RawArtist>,
        album: Option<RawAlbum>,
        #[serde(default, deserialize_with = "lenient_u64")]
        duration: u64,
        fee: Option<i64>,
    },
}

#[derive(Debug, Deserialize)]
pub struct RawAlbum {
    #[serde(default, deserialize_with = "lenient_u64")]
    id: u64,
    name: Option<String>,
    #[serde(rename = "picUrl")]
    pic_url: Option<String>,
    pic_str: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawArtist {
    WithPicUrl {
        #[serde(deserialize_with = "lenient_u64")]
        id: u64,
        name: Option<String>,
        #[serde(rename = "picUrl")]
        pic_url: String,
        #[serde(rename = "img1v1Url")]
        img1v1_url: Option<String>,
    },
    WithImg1v1 {
        #[serde(deserialize_with = "lenient_u64")]
        id: u64,
        name: Option<String>,
        #[serde(rename = "img1v1Url")]
        img1v1_url: String,
    },
    /// `artist/detail` and bare references inside songs
    Detail {
        #[serde(default, deserialize_with = "lenient_u64")]
        id: u64,
        name: Option<String>,
        avatar: Option<String>,
        cover: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawPlaylist {
    /// `personalized`
    Personalized {
        #[serde(deserialize_with = "lenient_u64")]
        id: u64,
        name: Option<String>,
        #[serde(rename = "picUrl")]
        pic_url: String,
        #[serde(default, rename = "playCount", deserialize_with = "lenient_u64")]
        play_count: u64,
        #[serde(default, rename = "trackCount", deserialize_with = "lenient_u64")]
        track_count: u64,
        copywriter: Option<String>,
    },
    /// `cloudsearch?type=1000`
    Searched {
        #[serde(deserialize_with = "lenient_u64")]
        id: u64,
        name: Option<String>,
        #[serde(rename = "coverImgUrl")]
        cover_img_url: String,
        #[serde(default, rename = "playCount", deserialize_with = "lenient_u64")]
        play_count: u64,
        #[serde(default, rename = "trackCount", deserialize_with = "lenient_u64")]
        track_count: u64,
        description: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct RawComment {
    #[serde(alias = "id", rename = "commentId", deserialize_with = "lenient_u64")]
    comment_id: u64,
    user: Option<RawCommentUser>,
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    time: i64,
    #[serde(default, rename = "likedCount", deserialize_with = "lenient_u64")]
    liked_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct RawCommentUser {
    nickname: Option<String>,
    #[serde(rename = "avatarUrl")]
    avatar_url: Option<String>,
}

pub fn track(raw: RawSong) -> Track {
    match raw {
        RawSong::Modern {
            id,
            name,
            ar,
            al,
            dt,
            fee,
        } => Track {
            id,
            name: name.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            artists: ar.into_iter().map(artist).collect(),
            album: al.map(album).unwrap_or_else(unknown_album),
            duration_ms: dt,
            fee: fee.unwrap_or(0),
        },
        RawSong::Legacy {
            id,
            name,
            artists,
            album: al,
            duration,
            fee,
        } => Track {
            id,
            name: name.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            artists: artists.into_iter().map(artist).collect(),
            album: al.map(album).unwrap_or_else(unknown_album),
            duration_ms: duration,
            fee: fee.unwrap_or(0),
        },
    }
}

pub fn album(raw: RawAlbum) -> Album {
    Album {
        id: raw.id,
        name: raw
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        cover_url: resolve_cover_url(raw.pic_url.as_deref(), raw.pic_str.as_deref()),
    }
}

fn unknown_album() -> Album {
    Album {
        id: 0,
        name: UNKNOWN_ALBUM.to_string(),
        cover_url: String::new(),
    }
}

pub fn artist(raw: RawArtist) -> Artist {
    let (id, name, picture_url) = match raw {
        RawArtist::WithPicUrl {
            id,
            name,
            pic_url,
            img1v1_url,
        } => {
            let pic = if pic_url.is_empty() {
                img1v1_url.unwrap_or_default()
            } else {
                pic_url
            };
            (id, name, pic)
        }
        RawArtist::WithImg1v1 {
            id,
            name,
            img1v1_url,
        } => (id, name, img1v1_url),
        RawArtist::Detail {
            id,
            name,
            avatar,
            cover,
        } => (
            id,
            name,
            avatar
                .filter(|s| !s.is_empty())
                .or(cover)
                .unwrap_or_default(),
        ),
    };
    Artist {
        id,
        name: name.unwrap_or_default(),
        picture_url,
    }
}

pub fn playlist(raw: RawPlaylist) -> RecommendedPlaylist {
    match raw {
        RawPlaylist::Personalized {
            id,
            name,
            pic_url,
            play_count,
            track_count,
            copywriter,
        } => RecommendedPlaylist {
            id,
            name: name.unwrap_or_default(),
            cover_url: pic_url,
            play_count,
            track_count,
            description: copywriter.unwrap_or_default(),
        },
        RawPlaylist::Searched {
            id,
            name,
            cover_img_url,
            play_count,
            track_count,
            description,
        } => RecommendedPlaylist {
            id,
            name: name.unwrap_or_default(),
            cover_url: cover_img_url,
            play_count,
            track_count,
            description: description.unwrap_or_default(),
        },
    }
}

pub fn comment(raw: RawComment) -> Comment {
    let user = raw.user.unwrap_or(RawCommentUser {
        nickname: None,
        avatar_url: None,
    });
    Comment {
        id: raw.comment_id,
        author: CommentAuthor {
            nickname: user.nickname.unwrap_or_default(),
            avatar_url: user.avatar_url.unwrap_or_default(),
        },
        content: raw.content.unwrap_or_default(),
        time: raw.time,
        liked_count: raw.liked_count,
    }
}

/// Direct cover field first; the secondary `pic_str` only when it is itself an
/// absolute URL. A bare numeric id is never turned into a URL.
pub fn resolve_cover_url(pic_url: Option<&str>, pic_str: Option<&str>) -> String {
    if let Some(p) = pic_url.map(str::trim).filter(|p| !p.is_empty()) {
        return p.to_string();
    }
    match pic_str.map(str::trim) {
        Some(s) if is_absolute_http_url(s) => s.to_string(),
        _ => String::new(),
    }
}

fn is_absolute_http_url(s: &str) -> bool {
    match url::Url::parse(s) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some(),
        Err(_) => false,
    }
}

/// Normalize the first array found at any of `pointers`.
pub fn songs_at(v: &Value, pointers: &[&str]) -> Vec<Track> {
    items_at::<RawSong, _>(v, pointers, track)
}

pub fn artists_at(v: &Value, pointers: &[&str]) -> Vec<Artist> {
    items_at::<RawArtist, _>(v, pointers, artist)
}

pub fn playlists_at(v: &Value, pointers: &[&str]) -> Vec<RecommendedPlaylist> {
    items_at::<RawPlaylist, _>(v, pointers, playlist)
}

/// A single artist object at the first matching pointer.
pub fn artist_at(v: &Value, pointers: &[&str]) -> Option<Artist> {
    let obj = pointers
        .iter()
        .find_map(|p| v.pointer(p).filter(|x| x.is_object()))?;
    RawArtist::deserialize(obj)
        .map(artist)
        .ok()
        .filter(|a| a.id != 0 || !a.name.is_empty())
}

pub fn comments_at(v: &Value, pointers: &[&str]) -> Vec<Comment> {
    items_at::<RawComment, _>(v, pointers, comment)
}

fn items_at<R, T>(v: &Value, pointers: &[&str], f: fn(R) -> T) -> Vec<T>
where
    R: serde::de::DeserializeOwned,
{
    let Some(arr) = pointers
        .iter()
        .find_map(|p| v.pointer(p).and_then(|x| x.as_array()))
    else {
        return Vec::new();
    };

    arr.iter()
        .filter_map(|item| match R::deserialize(item) {
            Ok(raw) => Some(f(raw)),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognised item");
                None
            }
        })
        .collect()
}

fn lenient_u64<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_i64<'de, D>(d: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}
