//! JSON Pointer handling for patch paths.
//!
//! Segments arrive percent-encoded (pointers are embedded in URLs on some
//! servers) and RFC 6901 escaped. Decoding runs in that order: percent first,
//! then `~1` / `~0`.

use std::fmt;

use percent_encoding::percent_decode_str;

/// A parsed pointer. Keeps the original text for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    raw: String,
    segments: Vec<String>,
}

impl Pointer {
    pub fn root() -> Self {
        Self {
            raw: String::new(),
            segments: Vec::new(),
        }
    }

    /// Parses a pointer. `""` is the root; anything else must start with `/`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = raw.strip_prefix('/') else {
            return Err("pointer must be empty or start with '/'".into());
        };
        let segments = rest
            .split('/')
            .map(decode_segment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Builds a pointer from unescaped segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        let mut raw = String::new();
        for segment in &segments {
            raw.push('/');
            raw.push_str(&escape_segment(segment));
        }
        Self { raw, segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Splits into the parent segments and the final segment. `None` for the root.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        self.segments
            .split_last()
            .map(|(last, parent)| (parent, last.as_str()))
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Escapes one segment for inclusion in a pointer string. `%` is encoded so
/// the segment survives the percent decoding in [`Pointer::parse`].
pub fn escape_segment(segment: &str) -> String {
    if !segment.contains(&['~', '/', '%'][..]) {
        return segment.to_string();
    }
    segment
        .replace('%', "%25")
        .replace('~', "~0")
        .replace('/', "~1")
}

fn decode_segment(segment: &str) -> Result<String, String> {
    let decoded = percent_decode_str(segment)
        .decode_utf8()
        .map_err(|err| format!("segment `{segment}` is not valid utf-8: {err}"))?;
    if !decoded.contains('~') {
        return Ok(decoded.into_owned());
    }
    let mut out = String::with_capacity(decoded.len());
    let mut chars = decoded.chars();
    while let Some(ch) = chars.next() {
        if ch != '~' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(format!("segment `{segment}` has a dangling '~' escape")),
        }
    }
    Ok(out)
}

/// Parses an array index segment: digits only, no leading zeros.
pub(crate) fn parse_index(segment: &str) -> Option<usize> {
    let bytes = segment.as_bytes();
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    segment.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_root() {
        let pointer = Pointer::parse("").unwrap();
        assert!(pointer.is_root());
        assert!(pointer.split_last().is_none());
    }

    #[test]
    fn rejects_missing_leading_slash() {
        assert!(Pointer::parse("nofirstslash").is_err());
    }

    #[test]
    fn decodes_percent_then_tilde_escapes() {
        let pointer = Pointer::parse("/a~1b/c%20d/%7E0/e~0f").unwrap();
        assert_eq!(pointer.segments(), ["a/b", "c d", "~", "e~f"]);
    }

    #[test]
    fn dangling_tilde_is_an_error() {
        assert!(Pointer::parse("/bad~2").is_err());
        assert!(Pointer::parse("/bad~").is_err());
    }

    #[test]
    fn trailing_slash_addresses_empty_key() {
        let pointer = Pointer::parse("/entries/").unwrap();
        assert_eq!(pointer.segments(), ["entries", ""]);
    }

    #[test]
    fn from_segments_escapes_reserved_characters() {
        let pointer = Pointer::from_segments(["tasks", "a/b~c"]);
        assert_eq!(pointer.as_str(), "/tasks/a~1b~0c");
        assert_eq!(Pointer::parse(pointer.as_str()).unwrap(), pointer);

        let percent = Pointer::from_segments(["files", "100%20done.txt"]);
        assert_eq!(percent.as_str(), "/files/100%2520done.txt");
        assert_eq!(Pointer::parse(percent.as_str()).unwrap(), percent);
    }

    #[test]
    fn index_parsing_rejects_leading_zeros() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("17"), Some(17));
        assert_eq!(parse_index("07"), None);
        assert_eq!(parse_index("-"), None);
        assert_eq!(parse_index(""), None);
    }
}
