//! Filename-parse metadata fallback
//!
//! DJ libraries carry a lot of identity in filenames: "128 - Artist -
//! Title (Remix) [Label]", "01. Artist - Title", "Artist_-_Title".
//! Patterns come from configuration and are tried in order; the first
//! match wins. Version suffixes like "(Extended Mix)" stay part of the
//! title.

use crate::extractors::TagMetadata;
use regex::Regex;

pub struct FilenameParser {
    patterns: Vec<Regex>,
}

impl FilenameParser {
    /// Compile the configured patterns; invalid ones are skipped with a warning
    pub fn new(pattern_sources: &[String]) -> Self {
        let mut patterns = Vec::with_capacity(pattern_sources.len());
        for source in pattern_sources {
            match Regex::new(source) {
                Ok(re) => patterns.push(re),
                Err(e) => {
                    tracing::warn!(pattern = %source, error = %e, "skipping invalid filename pattern");
                }
            }
        }
        Self { patterns }
    }

    /// Parse a file stem (no extension). Returns None when no pattern
    /// matches or the match yields no artist/title pair.
    pub fn parse(&self, stem: &str) -> Option<TagMetadata> {
        let cleaned = clean_stem(stem);

        for pattern in &self.patterns {
            let Some(caps) = pattern.captures(&cleaned) else {
                continue;
            };

            let artist = caps
                .name("artist")
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty());
            let mut title = caps
                .name("title")
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty());

            // Keep version indicators with the title
            if let (Some(t), Some(version)) = (&title, caps.name("version")) {
                let v = version.as_str().trim();
                if !v.is_empty() {
                    title = Some(format!("{t} {v}"));
                }
            }

            let track_number = caps
                .name("track")
                .and_then(|m| m.as_str().parse::<i64>().ok());

            if artist.is_some() && title.is_some() {
                return Some(TagMetadata {
                    artist,
                    title,
                    track_number,
                    ..Default::default()
                });
            }
        }

        None
    }
}

/// Normalize a stem before matching: underscores keep their structural
/// meaning for the underscore pattern, so only whitespace is collapsed.
fn clean_stem(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    let mut last_space = false;
    for ch in stem.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CleanupConfig;

    fn parser() -> FilenameParser {
        FilenameParser::new(&CleanupConfig::default().filename_patterns)
    }

    #[test]
    fn test_bpm_artist_title() {
        let meta = parser().parse("128 - Len Faki - My Black Flag").unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Len Faki"));
        assert_eq!(meta.title.as_deref(), Some("My Black Flag"));
    }

    #[test]
    fn test_tracknumber_artist_title() {
        let meta = parser().parse("01. Aphex Twin - Xtal").unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Aphex Twin"));
        assert_eq!(meta.title.as_deref(), Some("Xtal"));
        assert_eq!(meta.track_number, Some(1));
    }

    #[test]
    fn test_underscore_format() {
        let meta = parser().parse("Robert_Hood_-_Minus").unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Robert_Hood"));
        assert_eq!(meta.title.as_deref(), Some("Minus"));
    }

    #[test]
    fn test_version_kept_in_title() {
        let meta = parser().parse("Underworld - Born Slippy (Nuxx)").unwrap();
        assert_eq!(meta.title.as_deref(), Some("Born Slippy (Nuxx)"));
    }

    #[test]
    fn test_no_dash_yields_none() {
        assert!(parser().parse("random recording 42").is_none());
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let parser = FilenameParser::new(&["([unclosed".to_string()]);
        assert!(parser.parse("A - B").is_none());
    }
}
