//! Segment file naming.
//!
//! The segmenter writes `live<seq>.ts` (MPEG-TS) or `live<seq>.m4s` (fMP4)
//! files. Generated-at names of the form `live_<generated>_<seq>.<ext>` are
//! also understood.

use std::path::Path;

/// File name prefix shared by every segment.
pub const SEGMENT_PREFIX: &str = "live";

/// Container format of a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// MPEG transport stream.
    Ts,
    /// Fragmented MP4 media segment.
    M4s,
}

impl SegmentKind {
    /// All known segment kinds.
    pub const ALL: [SegmentKind; 2] = [SegmentKind::Ts, SegmentKind::M4s];

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            SegmentKind::Ts => "ts",
            SegmentKind::M4s => "m4s",
        }
    }

    /// MIME type used when serving the segment.
    pub fn content_type(self) -> &'static str {
        match self {
            SegmentKind::Ts => "video/mp2t",
            SegmentKind::M4s => "video/iso.segment",
        }
    }

    /// Detect the kind from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.extension().eq_ignore_ascii_case(ext))
    }
}

/// A parsed segment file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentName {
    pub kind: SegmentKind,
    pub sequence: i64,
    /// Generation stamp for `live_<generated>_<seq>` names.
    pub generated_at: Option<i64>,
}

impl SegmentName {
    /// Parse a bare file name such as `live001137.ts`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        let kind = SegmentKind::from_extension(ext)?;
        let rest = stem.strip_prefix(SEGMENT_PREFIX)?;

        if let Some(rest) = rest.strip_prefix('_') {
            let (generated, seq) = rest.split_once('_')?;
            return Some(Self {
                kind,
                sequence: parse_digits(seq)?,
                generated_at: Some(parse_digits(generated)?),
            });
        }

        Some(Self {
            kind,
            sequence: parse_digits(rest)?,
            generated_at: None,
        })
    }

    /// Parse the final component of a path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::parse)
    }
}

fn parse_digits(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Sequence number embedded in a segment URI or file name.
pub fn parse_sequence(uri: &str) -> Option<i64> {
    let name = uri.rsplit('/').next().unwrap_or(uri);
    let name = name.split('?').next().unwrap_or(name);
    SegmentName::parse(name).map(|s| s.sequence)
}

/// The ffmpeg output pattern for a segment kind (`live%06d.ts`).
pub fn segment_pattern(kind: SegmentKind) -> String {
    format!("{SEGMENT_PREFIX}%06d.{}", kind.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ts_name() {
        let name = SegmentName::parse("live001137.ts").unwrap();
        assert_eq!(name.kind, SegmentKind::Ts);
        assert_eq!(name.sequence, 1137);
        assert_eq!(name.generated_at, None);
    }

    #[test]
    fn parses_generated_m4s_name() {
        let name = SegmentName::parse("live_1633784400_000042.m4s").unwrap();
        assert_eq!(name.kind, SegmentKind::M4s);
        assert_eq!(name.sequence, 42);
        assert_eq!(name.generated_at, Some(1633784400));
    }

    #[test]
    fn rejects_foreign_files() {
        assert!(SegmentName::parse("live.m3u8").is_none());
        assert!(SegmentName::parse("init.mp4").is_none());
        assert!(SegmentName::parse("liveabc.ts").is_none());
        assert!(SegmentName::parse("live-12.ts").is_none());
        assert!(SegmentName::parse("live12.mkv").is_none());
        assert!(SegmentName::parse("live12").is_none());
    }

    #[test]
    fn parse_sequence_strips_path_and_query() {
        assert_eq!(parse_sequence("live000009.ts"), Some(9));
        assert_eq!(parse_sequence("/iptv/session/7/live000010.ts?x=1"), Some(10));
        assert_eq!(parse_sequence("other.ts"), None);
    }

    #[test]
    fn pattern_matches_parser() {
        assert_eq!(segment_pattern(SegmentKind::Ts), "live%06d.ts");
        assert_eq!(segment_pattern(SegmentKind::M4s), "live%06d.m4s");
    }
}
