//! Rolling manifest trimming.
//!
//! The segmenter appends to `live.m3u8` indefinitely. These functions parse
//! that manifest, drop entries that have already been played out, and
//! re-emit a compact playlist whose `#EXT-X-PROGRAM-DATE-TIME` values are
//! derived from the session's own clock rather than the transcoder's.
//!
//! Entry start times are assigned cumulatively from `playlist_start`, so the
//! caller must pass the start time returned by the previous trim.

use chrono::{DateTime, Duration, Utc};
use std::fmt::Write;

use crate::error::{Error, Result};
use crate::segment::parse_sequence;

const DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";
const DEFAULT_VERSION: u32 = 6;
/// Longest segment duration accepted from a manifest.
const MAX_SEGMENT_SECONDS: f64 = 86_400.0;

/// Outcome of a manifest trim.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimResult {
    /// The rewritten manifest text.
    pub playlist: String,
    /// Start time of the oldest entry kept.
    pub playlist_start: DateTime<Utc>,
    /// Sequence number of the oldest entry kept.
    pub sequence: i64,
    /// Number of segments in the rewritten manifest.
    pub segment_count: usize,
}

/// Remove every segment that starts before `filter_before`.
pub fn trim<S: AsRef<str>>(
    playlist_start: DateTime<Utc>,
    filter_before: DateTime<Utc>,
    lines: &[S],
) -> Result<TrimResult> {
    let manifest = Manifest::parse(playlist_start, lines)?;
    Ok(manifest.render(Selection::Since(filter_before)))
}

/// Like [`trim`], but guarantees the manifest ends with a discontinuity so the
/// next transcoder invocation's output is appended after a break.
pub fn trim_with_discontinuity<S: AsRef<str>>(
    playlist_start: DateTime<Utc>,
    filter_before: DateTime<Utc>,
    lines: &[S],
) -> Result<TrimResult> {
    let mut manifest = Manifest::parse(playlist_start, lines)?;
    manifest.end_with_discontinuity();
    Ok(manifest.render(Selection::Since(filter_before)))
}

/// Serve at most `max_segments` entries to a player.
///
/// When more than `max_segments` entries exist, the first `max_segments` at or
/// after `filter_before` are preferred; if too few are that recent, the last
/// `max_segments` are used instead. Anything after the last kept entry is
/// dropped.
pub fn trim_window<S: AsRef<str>>(
    playlist_start: DateTime<Utc>,
    filter_before: DateTime<Utc>,
    lines: &[S],
    max_segments: usize,
) -> Result<TrimResult> {
    let manifest = Manifest::parse(playlist_start, lines)?;
    Ok(manifest.render(Selection::Window {
        filter_before,
        max_segments,
    }))
}

// ---------------------------------------------------------------------------
// Parsed representation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    start: DateTime<Utc>,
    extinf: String,
    uri: String,
    sequence: i64,
}

#[derive(Debug, Clone)]
enum Item {
    Segment(Entry),
    Discontinuity,
}

#[derive(Debug, Clone, Copy)]
enum Selection {
    Since(DateTime<Utc>),
    Window {
        filter_before: DateTime<Utc>,
        max_segments: usize,
    },
}

#[derive(Debug)]
struct Manifest {
    version: u32,
    target_duration: u32,
    discontinuity_sequence: u64,
    map: Option<String>,
    items: Vec<Item>,
    end: DateTime<Utc>,
}

impl Manifest {
    fn parse<S: AsRef<str>>(playlist_start: DateTime<Utc>, lines: &[S]) -> Result<Self> {
        let mut manifest = Manifest {
            version: DEFAULT_VERSION,
            target_duration: 0,
            discontinuity_sequence: 0,
            map: None,
            items: Vec::new(),
            end: playlist_start,
        };

        let mut i = 0;

        // Header: everything before the first #EXTINF.
        while i < lines.len() {
            let line = lines[i].as_ref().trim();
            if line.starts_with("#EXTINF:") {
                break;
            }

            if line == DISCONTINUITY {
                manifest.items.push(Item::Discontinuity);
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                manifest.target_duration = parse_number(i, value)?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                manifest.version = parse_number(i, value)?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-DISCONTINUITY-SEQUENCE:") {
                manifest.discontinuity_sequence = parse_number(i, value)?;
            } else if line.starts_with("#EXT-X-MAP:") {
                manifest.map = Some(line.to_string());
            }

            i += 1;
        }

        let mut current = playlist_start;

        while i < lines.len() {
            let line = lines[i].as_ref().trim();

            if line.is_empty() {
                i += 1;
                continue;
            }

            if line == DISCONTINUITY {
                manifest.items.push(Item::Discontinuity);
                i += 1;
                continue;
            }

            let Some(value) = line.strip_prefix("#EXTINF:") else {
                // Per-segment tags outside an #EXTINF block (including the
                // transcoder's own program-date-time) are rewritten or dropped.
                if line.starts_with("#EXT-X-MAP:") && manifest.map.is_none() {
                    manifest.map = Some(line.to_string());
                }
                i += 1;
                continue;
            };

            let extinf_index = i;
            let seconds: f64 = value
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .parse()
                .map_err(|_| Error::malformed(i, format!("invalid duration in {line}")))?;
            if !seconds.is_finite() || !(0.0..=MAX_SEGMENT_SECONDS).contains(&seconds) {
                return Err(Error::malformed(i, format!("invalid duration in {line}")));
            }

            // Skip tag lines between #EXTINF and the segment URI.
            i += 1;
            while i < lines.len() {
                let next = lines[i].as_ref().trim();
                if !next.is_empty() && !next.starts_with('#') {
                    break;
                }
                i += 1;
            }
            if i >= lines.len() {
                return Err(Error::malformed(extinf_index, "segment has no uri"));
            }

            let uri = lines[i].as_ref().trim().to_string();
            let sequence = parse_sequence(&uri)
                .ok_or_else(|| Error::malformed(i, format!("no sequence number in {uri}")))?;

            manifest.items.push(Item::Segment(Entry {
                start: current,
                extinf: line.to_string(),
                uri,
                sequence,
            }));

            current = current
                .checked_add_signed(Duration::microseconds((seconds * 1_000_000.0).round() as i64))
                .ok_or_else(|| Error::malformed(extinf_index, "segment start out of range"))?;
            i += 1;
        }

        manifest.end = current;
        Ok(manifest)
    }

    fn end_with_discontinuity(&mut self) {
        if matches!(self.items.last(), Some(Item::Segment(_))) {
            self.items.push(Item::Discontinuity);
        }
    }

    fn render(mut self, selection: Selection) -> TrimResult {
        // The header always carries a leading discontinuity.
        let leading = self
            .items
            .iter()
            .take_while(|item| matches!(item, Item::Discontinuity))
            .count();
        self.items.drain(..leading);

        let segment_indices: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| matches!(item, Item::Segment(_)).then_some(idx))
            .collect();

        let kept: Vec<usize> = match selection {
            Selection::Since(filter_before) => segment_indices
                .iter()
                .copied()
                .filter(|&idx| self.entry(idx).start >= filter_before)
                .collect(),
            Selection::Window {
                filter_before,
                max_segments,
            } => {
                if segment_indices.len() > max_segments {
                    let recent: Vec<usize> = segment_indices
                        .iter()
                        .copied()
                        .filter(|&idx| self.entry(idx).start >= filter_before)
                        .collect();
                    if recent.len() >= max_segments {
                        recent.into_iter().take(max_segments).collect()
                    } else {
                        segment_indices[segment_indices.len() - max_segments..].to_vec()
                    }
                } else {
                    segment_indices.clone()
                }
            }
        };

        if let (Selection::Window { .. }, Some(&last)) = (selection, kept.last()) {
            self.items.truncate(last + 1);
        }

        let first_kept = kept.first().copied();

        let dropped_discontinuities = match first_kept {
            Some(first) => self.items[..first]
                .iter()
                .filter(|item| matches!(item, Item::Discontinuity))
                .count() as u64,
            None => 0,
        };

        let (sequence, playlist_start) = match first_kept {
            Some(first) => {
                let entry = self.entry(first);
                (entry.sequence, entry.start)
            }
            None => {
                let next = segment_indices
                    .last()
                    .map(|&idx| self.entry(idx).sequence + 1)
                    .unwrap_or(0);
                (next, self.end)
            }
        };

        let mut out = String::new();
        let _ = writeln!(out, "#EXTM3U");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{sequence}");
        let _ = writeln!(
            out,
            "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
            self.discontinuity_sequence + dropped_discontinuities
        );
        let _ = writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS");
        if let Some(map) = &self.map {
            let _ = writeln!(out, "{map}");
        }
        let _ = writeln!(out, "{DISCONTINUITY}");

        let is_kept = |idx: usize| kept.binary_search(&idx).is_ok();
        let last_index = self.items.len().saturating_sub(1);

        for (idx, item) in self.items.iter().enumerate() {
            match item {
                Item::Segment(entry) => {
                    if is_kept(idx) {
                        let _ = writeln!(out, "{}", entry.extinf);
                        let _ = writeln!(
                            out,
                            "#EXT-X-PROGRAM-DATE-TIME:{}",
                            format_program_date_time(entry.start)
                        );
                        let _ = writeln!(out, "{}", entry.uri);
                    }
                }
                Item::Discontinuity => {
                    let before_kept = idx < last_index
                        && is_kept(idx + 1)
                        && Some(idx + 1) != first_kept;
                    let trailing = idx == last_index && !kept.is_empty();
                    if before_kept || trailing {
                        let _ = writeln!(out, "{DISCONTINUITY}");
                    }
                }
            }
        }

        TrimResult {
            playlist: out,
            playlist_start,
            sequence,
            segment_count: kept.len(),
        }
    }

    fn entry(&self, idx: usize) -> &Entry {
        match &self.items[idx] {
            Item::Segment(entry) => entry,
            Item::Discontinuity => unreachable!("index {idx} is not a segment"),
        }
    }
}

fn parse_number<T: std::str::FromStr>(index: usize, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::malformed(index, format!("invalid number: {value}")))
}

/// Format a timestamp the way players expect in `#EXT-X-PROGRAM-DATE-TIME`.
pub fn format_program_date_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const INPUT: &str = "#EXTM3U
#EXT-X-VERSION:6
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:1137
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-DISCONTINUITY
#EXTINF:4.000000,
#EXT-X-PROGRAM-DATE-TIME:2021-10-08T08:34:49.320-0500
live001137.ts
#EXTINF:4.000000,
#EXT-X-PROGRAM-DATE-TIME:2021-10-08T08:34:53.320-0500
live001138.ts
#EXTINF:4.000000,
#EXT-X-PROGRAM-DATE-TIME:2021-10-08T08:34:57.320-0500
live001139.ts";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 10, 9, 13, 0, 0).unwrap()
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn oversized_duration_is_malformed() {
        let input = ["#EXTM3U", "#EXT-X-TARGETDURATION:4", "#EXTINF:1e18,", "live000001.ts"];
        let err = trim(start(), start(), &input).unwrap_err();
        assert!(matches!(err, Error::Malformed { line: 3, .. }), "{err:?}");

        let input = ["#EXTM3U", "#EXTINF:90000,", "live000001.ts"];
        assert!(trim(start(), start(), &input).is_err());
    }

    #[test]
    fn start_overflow_is_malformed() {
        let input = ["#EXTM3U", "#EXTINF:4,", "live000001.ts"];
        let err = trim(DateTime::<Utc>::MAX_UTC, DateTime::<Utc>::MAX_UTC, &input).unwrap_err();
        assert!(matches!(err, Error::Malformed { line: 2, .. }), "{err:?}");
    }

    #[test]
    fn rewrites_program_date_time() {
        let result = trim(start(), start() - Duration::seconds(30), &lines(INPUT)).unwrap();

        assert_eq!(result.playlist_start, start());
        assert_eq!(result.sequence, 1137);
        assert_eq!(result.segment_count, 3);
        assert_eq!(
            result.playlist,
            "#EXTM3U
#EXT-X-VERSION:6
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:1137
#EXT-X-DISCONTINUITY-SEQUENCE:0
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-DISCONTINUITY
#EXTINF:4.000000,
#EXT-X-PROGRAM-DATE-TIME:2021-10-09T13:00:00.000+0000
live001137.ts
#EXTINF:4.000000,
#EXT-X-PROGRAM-DATE-TIME:2021-10-09T13:00:04.000+0000
live001138.ts
#EXTINF:4.000000,
#EXT-X-PROGRAM-DATE-TIME:2021-10-09T13:00:08.000+0000
live001139.ts
"
        );
    }

    #[test]
    fn filters_old_segments() {
        let result = trim(start(), start() + Duration::seconds(6), &lines(INPUT)).unwrap();

        assert_eq!(result.playlist_start, start() + Duration::seconds(8));
        assert_eq!(result.sequence, 1139);
        assert_eq!(result.segment_count, 1);
        assert_eq!(
            result.playlist,
            "#EXTM3U
#EXT-X-VERSION:6
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:1139
#EXT-X-DISCONTINUITY-SEQUENCE:0
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-DISCONTINUITY
#EXTINF:4.000000,
#EXT-X-PROGRAM-DATE-TIME:2021-10-09T13:00:08.000+0000
live001139.ts
"
        );
    }

    #[test]
    fn counts_dropped_discontinuities() {
        let input = INPUT.replace(
            "live001137.ts\n",
            "live001137.ts\n#EXT-X-DISCONTINUITY\n",
        );
        let result = trim(start(), start() + Duration::seconds(6), &lines(&input)).unwrap();

        assert_eq!(result.sequence, 1139);
        assert!(result.playlist.contains("#EXT-X-DISCONTINUITY-SEQUENCE:1\n"));
        // Only the header discontinuity remains.
        assert_eq!(result.playlist.matches("#EXT-X-DISCONTINUITY\n").count(), 1);
    }

    #[test]
    fn keeps_interior_discontinuity() {
        let input = INPUT.replace(
            "live001137.ts\n",
            "live001137.ts\n#EXT-X-DISCONTINUITY\n",
        );
        let result = trim(start(), start() - Duration::seconds(30), &lines(&input)).unwrap();

        assert!(result.playlist.contains(
            "live001137.ts\n#EXT-X-DISCONTINUITY\n#EXTINF:4.000000,\n"
        ));
        assert!(result.playlist.contains("#EXT-X-DISCONTINUITY-SEQUENCE:0\n"));
    }

    #[test]
    fn adds_trailing_discontinuity() {
        let result =
            trim_with_discontinuity(start(), start() - Duration::seconds(30), &lines(INPUT))
                .unwrap();

        assert_eq!(result.segment_count, 3);
        assert!(result.playlist.ends_with("live001139.ts\n#EXT-X-DISCONTINUITY\n"));
    }

    #[test]
    fn trailing_discontinuity_not_doubled() {
        let once =
            trim_with_discontinuity(start(), start() - Duration::seconds(30), &lines(INPUT))
                .unwrap();
        let twice = trim_with_discontinuity(
            once.playlist_start,
            start() - Duration::seconds(30),
            &lines(&once.playlist),
        )
        .unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn limits_segments() {
        let result =
            trim_window(start(), start() - Duration::seconds(30), &lines(INPUT), 2).unwrap();

        assert_eq!(result.playlist_start, start());
        assert_eq!(result.sequence, 1137);
        assert_eq!(result.segment_count, 2);
        assert!(result.playlist.ends_with("live001138.ts\n"));
        assert!(!result.playlist.contains("live001139.ts"));
    }

    #[test]
    fn window_falls_back_to_latest() {
        let result =
            trim_window(start(), start() + Duration::seconds(6), &lines(INPUT), 2).unwrap();

        assert_eq!(result.sequence, 1138);
        assert_eq!(result.segment_count, 2);
        assert!(!result.playlist.contains("live001137.ts"));
        assert!(result.playlist.contains("live001139.ts"));
    }

    #[test]
    fn window_larger_than_manifest_keeps_everything() {
        let result =
            trim_window(start(), start() + Duration::seconds(6), &lines(INPUT), 10).unwrap();
        assert_eq!(result.segment_count, 3);
        assert_eq!(result.sequence, 1137);
    }

    #[test]
    fn trim_is_idempotent() {
        let filter = start() + Duration::seconds(2);
        let first = trim(start(), filter, &lines(INPUT)).unwrap();
        let second = trim(first.playlist_start, filter, &lines(&first.playlist)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn keeps_segment_starting_exactly_at_cutoff() {
        let result = trim(start(), start() + Duration::seconds(4), &lines(INPUT)).unwrap();
        assert_eq!(result.sequence, 1138);
        assert_eq!(result.segment_count, 2);
        assert_eq!(result.playlist_start, start() + Duration::seconds(4));
    }

    #[test]
    fn nothing_kept_points_past_the_end() {
        let result = trim(start(), start() + Duration::seconds(60), &lines(INPUT)).unwrap();
        assert_eq!(result.segment_count, 0);
        assert_eq!(result.sequence, 1140);
        assert_eq!(result.playlist_start, start() + Duration::seconds(12));
        assert!(!result.playlist.contains("#EXTINF"));
    }

    #[test]
    fn header_only_manifest() {
        let input = "#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-TARGETDURATION:4\n";
        let result = trim(start(), start(), &lines(input)).unwrap();
        assert_eq!(result.segment_count, 0);
        assert_eq!(result.sequence, 0);
        assert_eq!(result.playlist_start, start());
    }

    #[test]
    fn preserves_map_and_discontinuity_sequence() {
        let input = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:4
#EXT-X-DISCONTINUITY-SEQUENCE:5
#EXT-X-MAP:URI=\"init.mp4\"
#EXTINF:4.000000,
live000001.m4s
#EXTINF:4.000000,
live000002.m4s";
        let result = trim(start(), start(), &lines(input)).unwrap();
        assert!(result.playlist.contains("#EXT-X-VERSION:7\n"));
        assert!(result.playlist.contains("#EXT-X-DISCONTINUITY-SEQUENCE:5\n"));
        assert!(result.playlist.contains("#EXT-X-MAP:URI=\"init.mp4\"\n"));
        assert_eq!(result.segment_count, 2);
    }

    #[test]
    fn fractional_durations_accumulate() {
        let input = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:3.500000,
live000001.ts
#EXTINF:4.000000,
live000002.ts";
        let result = trim(start(), start() + Duration::seconds(3), &lines(input)).unwrap();
        assert_eq!(result.sequence, 2);
        assert_eq!(result.playlist_start, start() + Duration::milliseconds(3500));
        assert!(result
            .playlist
            .contains("#EXT-X-PROGRAM-DATE-TIME:2021-10-09T13:00:03.500+0000"));
    }

    #[test]
    fn no_kept_entry_precedes_cutoff() {
        let filter = start() + Duration::seconds(5);
        let result = trim(start(), filter, &lines(INPUT)).unwrap();
        assert!(!result.playlist.contains("live001137.ts"));
        assert!(!result.playlist.contains("live001138.ts"));
        assert!(result.playlist_start >= filter);
    }

    #[test]
    fn invalid_duration_is_an_error() {
        let input = "#EXTM3U\n#EXTINF:abc,\nlive000001.ts";
        let err = trim(start(), start(), &lines(input)).unwrap_err();
        assert!(matches!(err, Error::Malformed { line: 2, .. }));
    }

    #[test]
    fn missing_uri_is_an_error() {
        let input = "#EXTM3U\n#EXTINF:4.0,\n";
        assert!(trim(start(), start(), &lines(input)).is_err());
    }
}
