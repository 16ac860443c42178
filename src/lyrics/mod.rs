//! Lyrics module for synchronized lyrics
//!
//! This module provides:
//! - LRC format parser producing a duration-annotated timeline
//! - Translation alignment against a second LRC block

pub mod parser;

pub use parser::{LyricLine, parse_lyrics};
