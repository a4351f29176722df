//! Path and filename handling for the organized and rejected trees

use std::path::Path;

/// Characters that never appear in emitted path components
const INVALID_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Sanitize a single path component: invalid characters become '-',
/// surrounding whitespace and trailing dots are stripped.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if INVALID_CHARS.contains(&ch) || ch.is_control() {
            out.push('-');
        } else {
            out.push(ch);
        }
    }
    let trimmed = out.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() {
        "-".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Cap a filename stem so `stem + extension` stays within `max_len`,
/// cutting on a char boundary.
pub fn cap_stem(stem: &str, ext_len: usize, max_len: usize) -> String {
    let budget = max_len.saturating_sub(ext_len).max(1);
    if stem.chars().count() <= budget {
        return stem.to_string();
    }
    stem.chars().take(budget).collect::<String>().trim_end().to_string()
}

/// True when `path` lies under any of the given prefixes
pub fn is_under_any(path: &Path, prefixes: &[std::path::PathBuf]) -> bool {
    prefixes.iter().any(|p| path.starts_with(p))
}

/// Fold a year into its decade label, e.g. 1987 → "1980s"
pub fn decade_for_year(year: i64) -> String {
    format!("{}s", (year / 10) * 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_sanitize_replaces_invalid() {
        assert_eq!(sanitize_component("AC/DC: Back?"), "AC-DC- Back-");
        assert_eq!(sanitize_component("  trailing.  "), "trailing");
        assert_eq!(sanitize_component("***"), "---");
        assert_eq!(sanitize_component(""), "-");
    }

    #[test]
    fn test_cap_stem_respects_budget() {
        let stem = "a".repeat(300);
        let capped = cap_stem(&stem, 4, 180);
        assert!(capped.len() + 4 <= 180);
    }

    #[test]
    fn test_cap_stem_short_unchanged() {
        assert_eq!(cap_stem("short", 4, 180), "short");
    }

    #[test]
    fn test_decade_folding() {
        assert_eq!(decade_for_year(1987), "1980s");
        assert_eq!(decade_for_year(2000), "2000s");
        assert_eq!(decade_for_year(2011), "2010s");
    }

    #[test]
    fn test_is_under_any() {
        let prefixes = vec![PathBuf::from("/a/b")];
        assert!(is_under_any(Path::new("/a/b/c.mp3"), &prefixes));
        assert!(!is_under_any(Path::new("/a/bc/c.mp3"), &prefixes));
    }
}
