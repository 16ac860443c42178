//! LRC format parser
//!
//! Parses synchronized lyrics in LRC format into a timeline where every line
//! knows how long it stays on screen:
//! [mm:ss.xx] Lyrics line here
//!
//! Example:
//! [00:12.34] Hello world
//! [00:15.000] Another line

use serde::{Deserialize, Serialize};

/// Display time given to the final line when nothing follows it.
pub const LAST_LINE_MS: u64 = 5000;
/// Lower bound for any computed line duration.
pub const MIN_LINE_MS: u64 = 400;
/// A translated line attaches when its timestamp is strictly closer than this.
pub const TRANSLATION_TOLERANCE_MS: u64 = 500;

/// A single line of lyrics on the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricLine {
    /// Timestamp in milliseconds from start
    pub start_ms: u64,
    pub text: String,
    /// How long the line is shown, derived from the next line's start
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    /// Set when the line shares its start time with the previous one
    #[serde(default)]
    pub continuation: bool,
}

/// One `[time]text` occurrence before durations are known.
#[derive(Debug, Clone)]
struct TimedText {
    start_ms: u64,
    text: String,
}

/// Parse an LRC block and optionally align a translated LRC block to it.
///
/// `track_duration_ms` caps the final line so it never runs past the end of
/// the track. Input with no timed lines yields an empty timeline.
pub fn parse_lyrics(
    content: &str,
    translation: Option<&str>,
    track_duration_ms: Option<u64>,
) -> Vec<LyricLine> {
    let originals = parse_timed(content);
    if originals.is_empty() {
        return Vec::new();
    }
    // File order: the first translated line within tolerance wins.
    let translated = translation.map(collect_timed).unwrap_or_default();

    let mut lines = Vec::with_capacity(originals.len());
    for (i, cur) in originals.iter().enumerate() {
        let duration_ms = match originals.get(i + 1) {
            Some(next) => next.start_ms.saturating_sub(cur.start_ms),
            None => match track_duration_ms {
                Some(total) => LAST_LINE_MS.min(total.saturating_sub(cur.start_ms)),
                None => LAST_LINE_MS,
            },
        };

        let continuation = i > 0 && originals[i - 1].start_ms == cur.start_ms;

        let translation = translated
            .iter()
            .find(|t| t.start_ms.abs_diff(cur.start_ms) < TRANSLATION_TOLERANCE_MS)
            .map(|t| t.text.clone());

        lines.push(LyricLine {
            start_ms: cur.start_ms,
            text: cur.text.clone(),
            duration_ms: duration_ms.max(MIN_LINE_MS),
            translation,
            continuation,
        });
    }
    lines
}

/// Extract every timed, non-empty line, sorted by start time.
///
/// The sort is stable, so lines sharing a timestamp keep their file order.
fn parse_timed(content: &str) -> Vec<TimedText> {
    let mut out = collect_timed(content);
    out.sort_by_key(|l| l.start_ms);
    out
}

/// Timed, non-empty lines in the order they appear in the file.
fn collect_timed(content: &str) -> Vec<TimedText> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(parsed) = parse_timed_line(line) {
            out.extend(parsed);
        }
    }
    out
}

/// Parse a timed line like [00:12.34]Lyrics or [00:12.34][00:15.00]Lyrics
fn parse_timed_line(line: &str) -> Option<Vec<TimedText>> {
    let mut timestamps = Vec::new();
    let mut pos = 0;

    while line[pos..].starts_with('[') {
        let Some(end) = line[pos..].find(']') else {
            break;
        };
        let Some(ms) = parse_timestamp(&line[pos + 1..pos + end]) else {
            // Metadata tag such as [ti:Title] or a bracketed lyric.
            break;
        };
        timestamps.push(ms);
        pos += end + 1;
    }

    if timestamps.is_empty() {
        return None;
    }

    let text = line[pos..].trim();
    if text.is_empty() {
        return None;
    }

    Some(
        timestamps
            .into_iter()
            .map(|start_ms| TimedText {
                start_ms,
                text: text.to_string(),
            })
            .collect(),
    )
}

/// Parse timestamp string like "00:12.34" or "00:12.345" to milliseconds.
///
/// The fraction's width decides its scale: two digits are centiseconds,
/// three digits are milliseconds.
pub fn parse_timestamp(s: &str) -> Option<u64> {
    let (min, rest) = s.split_once(':')?;
    let (sec, frac) = match rest.split_once('.') {
        Some((sec, frac)) => (sec, Some(frac)),
        None => (rest, None),
    };

    let min: u64 = parse_digits(min)?;
    let sec: u64 = parse_digits(sec)?;
    let ms = match frac {
        None => 0,
        Some(f) => match f.len() {
            1 => parse_digits(f)? * 100,
            2 => parse_digits(f)? * 10,
            3 => parse_digits(f)?,
            _ => return None,
        },
    };
    min.checked_mul(60_000)?
        .checked_add(sec.checked_mul(1000)?)?
        .checked_add(ms)
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:12"), Some(12000));
        assert_eq!(parse_timestamp("01:30"), Some(90000));
        assert_eq!(parse_timestamp("00:12.34"), Some(12340));
        assert_eq!(parse_timestamp("00:12.340"), Some(12340));
        assert_eq!(parse_timestamp("02:03.045"), Some(2 * 60_000 + 3000 + 45));
        assert_eq!(parse_timestamp("02:03.04"), Some(2 * 60_000 + 3000 + 40));
        assert_eq!(parse_timestamp("ti:Title"), None);
        assert_eq!(parse_timestamp("00:12.3456"), None);
    }

    #[test]
    fn test_durations_and_last_line() {
        let lrc = "[ti:Test Song]\n[00:01.00]one\n[00:03.50]two\n[00:04.00]three\n";
        let lines = parse_lyrics(lrc, None, None);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].start_ms, 1000);
        assert_eq!(lines[0].duration_ms, 2500);
        assert_eq!(lines[1].duration_ms, 500);
        assert_eq!(lines[2].duration_ms, LAST_LINE_MS);
    }

    #[test]
    fn test_duration_floor_for_duplicate_timestamps() {
        let lrc = "[00:10.00]a\n[00:10.00]b\n[00:10.10]c";
        let lines = parse_lyrics(lrc, None, None);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.duration_ms >= MIN_LINE_MS));
        assert!(!lines[0].continuation);
        assert!(lines[1].continuation);
        assert!(!lines[2].continuation);
    }

    #[test]
    fn test_last_line_capped_by_track_length() {
        let lines = parse_lyrics("[00:58.00]end", None, Some(60_000));
        assert_eq!(lines[0].duration_ms, 2000);
        let lines = parse_lyrics("[00:59.90]end", None, Some(60_000));
        assert_eq!(lines[0].duration_ms, MIN_LINE_MS);
    }

    #[test]
    fn test_empty_lines_dropped_and_multi_tags_expanded() {
        let lrc = "[00:01.00]\n[00:02.00][00:06.00]chorus\nplain text\n[00:04.00] verse ";
        let lines = parse_lyrics(lrc, None, None);
        let texts: Vec<_> = lines.iter().map(|l| (l.start_ms, l.text.as_str())).collect();
        assert_eq!(
            texts,
            vec![(2000, "chorus"), (4000, "verse"), (6000, "chorus")]
        );
    }

    #[test]
    fn test_translation_alignment() {
        let lrc = "[00:01.00]hello\n[00:05.00]world\n[00:09.00]again";
        let tr = "[00:01.40]bonjour\n[00:01.45]salut\n[00:05.50]monde\n[00:08.60]encore";
        let lines = parse_lyrics(lrc, Some(tr), None);
        assert_eq!(lines[0].translation.as_deref(), Some("bonjour"));
        // exactly 500ms apart is outside the window
        assert_eq!(lines[1].translation, None);
        assert_eq!(lines[2].translation.as_deref(), Some("encore"));
    }

    #[test]
    fn test_malformed_input_is_empty() {
        assert!(parse_lyrics("", None, None).is_empty());
        assert!(parse_lyrics("no tags at all\n[xx:yy]nope", None, None).is_empty());
        assert!(parse_lyrics("[00:01.00", None, None).is_empty());
    }

    #[test]
    fn test_translation_takes_first_match_in_file_order() {
        let tr = "[00:01.45]salut\n[00:01.40]bonjour";
        let lines = parse_lyrics("[00:01.00]hello", Some(tr), None);
        assert_eq!(lines[0].translation.as_deref(), Some("salut"));
    }

    #[test]
    fn test_oversized_timestamp_is_skipped() {
        assert_eq!(parse_timestamp("999999999999999999:00.00"), None);
        assert!(parse_lyrics("[999999999999999999:00.00]boom", None, None).is_empty());
        let lines = parse_lyrics("[999999999999999999:00]boom\n[00:02.00]ok", None, None);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "ok");
    }
}
