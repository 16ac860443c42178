use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mirrorbeat::config;
use mirrorbeat::lyrics::LyricLine;
use mirrorbeat::netease::ArtistSongOrder;
use mirrorbeat::netease::models::{Artist, Comment, RecommendedPlaylist, Track};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mirrorbeat", version, about = "Query a mirrored music API from the terminal")]
struct Cli {
    /// Override config file path.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Try this mirror first for this run.
    #[arg(long)]
    source: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print recommended playlists.
    Recommended,
    /// Print the tracks of a playlist.
    Playlist { playlist_id: u64 },
    /// Search songs, artists or playlists.
    Search {
        #[arg(value_enum)]
        kind: SearchKind,
        query: String,
    },
    /// Print artist details.
    Artist { artist_id: u64 },
    /// Print an artist's top songs.
    ArtistTop { artist_id: u64 },
    /// Print an artist's songs, hottest or newest first.
    ArtistSongs {
        artist_id: u64,
        #[arg(long, default_value = "hot")]
        order: ArtistSongOrder,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Print a playable audio URL for a track.
    Url { track_id: u64 },
    /// Print the timed lyrics of a track.
    Lyrics { track_id: u64 },
    /// Print hot comments of a track.
    Comments { track_id: u64 },
    /// Drop expired cache entries.
    Prune,
    /// Drop every cache entry.
    ClearCache,

    /// Persistent mirror override.
    Source {
        #[command(subcommand)]
        cmd: SourceCommand,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SearchKind {
    Songs,
    Artists,
    Playlists,
}

#[derive(Debug, Subcommand)]
enum SourceCommand {
    /// Always try this mirror first.
    Set { url: String },
    /// Go back to automatic mirror selection.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref()).context("load config")?;

    if let Command::Source { cmd } = &cli.command {
        let mut cfg = cfg;
        match cmd {
            SourceCommand::Set { url } => {
                cfg.api.source_override = Some(url.clone());
                config::save(&cfg, cli.config.as_deref()).context("save config")?;
                println!("Mirror override set to {url}.");
            }
            SourceCommand::Clear => {
                cfg.api.source_override = None;
                config::save(&cfg, cli.config.as_deref()).context("save config")?;
                println!("Cleared mirror override.");
            }
        }
        return Ok(());
    }

    let api = cfg.build_api()?;
    if let Some(src) = cli.source.as_deref() {
        api.set_api_source(Some(src));
    }

    match cli.command {
        Command::Recommended => {
            let lists = api.fetch_recommended_playlists().await?;
            print_playlists(&lists);
        }
        Command::Playlist { playlist_id } => {
            let tracks = api.fetch_playlist(playlist_id).await?;
            print_tracks(&tracks);
        }
        Command::Search { kind, query } => match kind {
            SearchKind::Songs => print_tracks(&api.search_songs(&query).await?),
            SearchKind::Artists => print_artists(&api.search_artists(&query).await?),
            SearchKind::Playlists => print_playlists(&api.search_playlists(&query).await?),
        },
        Command::Artist { artist_id } => match api.fetch_artist_detail(artist_id).await? {
            Some(artist) => print_artists(std::slice::from_ref(&artist)),
            None => println!("No artist with id {artist_id}."),
        },
        Command::ArtistTop { artist_id } => {
            let tracks = api.fetch_artist_top_songs(artist_id).await?;
            print_tracks(&tracks);
        }
        Command::ArtistSongs {
            artist_id,
            order,
            limit,
        } => {
            let tracks = api.fetch_artist_songs_list(artist_id, order, limit).await?;
            print_tracks(&tracks);
        }
        Command::Url { track_id } => match api.get_audio_url(track_id).await? {
            Some(url) => println!("{url}"),
            None => println!("No playable URL for track {track_id}."),
        },
        Command::Lyrics { track_id } => {
            let lines = api.fetch_lyrics(track_id).await?;
            print_lyrics(&lines);
        }
        Command::Comments { track_id } => {
            let comments = api.fetch_comments(track_id).await?;
            print_comments(&comments);
        }
        Command::Prune => {
            let removed = api.prune_cache();
            println!("Removed {removed} expired cache entries.");
        }
        Command::ClearCache => {
            let removed = api.clear_cache();
            println!("Removed {removed} cache entries.");
        }
        Command::Source { .. } => unreachable!("handled above"),
    }

    if let Some(src) = api.current_api_source() {
        tracing::debug!(source = %src, "last working mirror");
    }

    Ok(())
}

fn print_tracks(tracks: &[Track]) {
    for (i, t) in tracks.iter().enumerate() {
        let artists = t.artist_names();
        let artists = if artists.is_empty() {
            String::new()
        } else {
            format!(" - {artists}")
        };
        println!(
            "{:02}. {}{}  ({})  (id={})",
            i + 1,
            t.name,
            artists,
            format_ms(t.duration_ms),
            t.id
        );
    }
}

fn print_playlists(lists: &[RecommendedPlaylist]) {
    for (i, p) in lists.iter().enumerate() {
        println!(
            "{:02}. {}  [{} tracks, {} plays]  (id={})",
            i + 1,
            p.name,
            p.track_count,
            p.play_count,
            p.id
        );
    }
}

fn print_artists(artists: &[Artist]) {
    for (i, a) in artists.iter().enumerate() {
        println!("{:02}. {}  (id={})", i + 1, a.name, a.id);
    }
}

fn print_lyrics(lines: &[LyricLine]) {
    for l in lines {
        println!("[{}] {}", format_ms(l.start_ms), l.text);
        if let Some(tr) = &l.translation {
            println!("        {tr}");
        }
    }
}

fn print_comments(comments: &[Comment]) {
    for c in comments {
        println!("{} ({} likes): {}", c.author.nickname, c.liked_count, c.content);
    }
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
