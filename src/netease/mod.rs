//! Client for the mirrored NetEase-style music API.

pub mod api;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod normalize;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ArtistSongOrder, CacheTtls, MusicApi, QuerySettings};
pub use client::{FailoverClient, FailoverSettings, HttpTransport, Transport};
pub use endpoints::EndpointPool;
pub use error::ApiError;
