//! Filename and storage-key sanitisation.
//!
//! Newsletters arrive with names typed by humans and, historically, names
//! that were percent-encoded once or twice on their way through browsers
//! and the cloud SDK (`Report%25202024.html`). Everything stored by this
//! crate goes through [`sanitize_filename`] first so the same upload always
//! lands on the same, readable key.
//!
//! ## Rules (applied in order)
//!
//! 1. Percent-decode, turn leftover `%` into spaces, `\` into `/`, keep the
//!    last path segment, trim.
//! 2. Empty → `newsletter.html`.
//! 3. Split stem / extension; the extension is lower-cased and keeps only
//!    alphanumerics (Unicode-aware), defaulting to `.html`.
//! 4. Stem characters outside `[A-Za-z0-9 _.-]` become spaces; whitespace
//!    runs collapse; empty → `newsletter`.
//! 5. Dot runs collapse to a single `.`; the result is capped at 255 chars,
//!    taken from the stem so the extension survives whenever it fits.
//!
//! The output is a fixed point: `sanitize_filename(sanitize_filename(x))`
//! equals `sanitize_filename(x)` for every input.

use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

/// Base name used when nothing usable survives sanitisation.
pub const DEFAULT_BASENAME: &str = "newsletter";

/// Extension appended when the input has none (or only junk).
pub const DEFAULT_EXTENSION: &str = ".html";

/// Replacement for an intermediate path segment that sanitises to nothing.
pub const DEFAULT_SEGMENT: &str = "folder";

/// Filesystem name limit, in characters.
pub const MAX_FILENAME_LEN: usize = 255;

/// Characters left untouched when re-encoding a key: unreserved plus `/`.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

static RE_STEM_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9 _.\-]+").unwrap());

static RE_SEGMENT_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9 _\-]+").unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static RE_DOT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());

/// Return a filesystem- and URL-safe filename for arbitrary user input.
///
/// ```rust
/// use newsletter_store::sanitize::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Some%20File.HTML"), "Some File.html");
/// assert_eq!(sanitize_filename("../../etc/passwd"), "passwd.html");
/// assert_eq!(sanitize_filename(""), "newsletter.html");
/// ```
pub fn sanitize_filename(raw: &str) -> String {
    let decoded = percent_decode(raw).replace('%', " ").replace('\\', "/");
    let last = decoded.rsplit('/').next().unwrap_or("").trim();

    if last.is_empty() {
        return format!("{DEFAULT_BASENAME}{DEFAULT_EXTENSION}");
    }

    let (stem, ext) = split_extension(last);
    let ext = clean_extension(ext);
    let stem_budget = MAX_FILENAME_LEN
        .saturating_sub(ext.chars().count())
        .max(1);
    let stem = clean_stem(stem, stem_budget);

    let joined = format!("{stem}{ext}");
    let collapsed = RE_DOT_RUN.replace_all(&joined, ".");
    collapsed.chars().take(MAX_FILENAME_LEN).collect()
}

/// Sanitise a `/`-separated storage key segment by segment.
///
/// The last segment is treated as a filename ([`sanitize_filename`]); every
/// directory segment keeps only alphanumerics, space, `_` and `-`. Segment
/// count and order are preserved: a segment that sanitises to nothing
/// (including empty, `.` and `..`) becomes `folder`.
pub fn sanitize_relative_path(path: &str) -> String {
    let normalised = path.replace('\\', "/");
    let segments: Vec<&str> = normalised.split('/').collect();

    let Some((last, dirs)) = segments.split_last() else {
        return sanitize_filename("");
    };

    let mut out: Vec<String> = dirs.iter().map(|d| sanitize_segment(d)).collect();
    out.push(sanitize_filename(last));
    out.join("/")
}

/// Percent-decode `input`, replacing invalid UTF-8 with U+FFFD.
///
/// Malformed escapes such as `%zz` are left as-is.
pub fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Percent-encode a storage key, leaving `/` and unreserved characters alone.
pub fn percent_encode_path(input: &str) -> String {
    utf8_percent_encode(input, PATH_ENCODE_SET).to_string()
}

/// Extension of `filename` without the dot, or `""` when there is none.
pub fn file_format(filename: &str) -> String {
    let (_, ext) = split_extension(filename);
    ext.trim_start_matches('.').to_string()
}

/// Split a filename into `(stem, ".ext")`.
///
/// Leading dots belong to the stem, so `.profile` has no extension.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => name.split_at(idx),
        _ => (name, ""),
    }
}

fn clean_extension(ext: &str) -> String {
    // Lower-case first: some capitals lower to a letter plus a combining mark.
    let cleaned: String = ext
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect();

    if cleaned.is_empty() {
        DEFAULT_EXTENSION.to_string()
    } else {
        format!(".{cleaned}")
    }
}

fn clean_stem(stem: &str, max_len: usize) -> String {
    let replaced = RE_STEM_DISALLOWED.replace_all(stem, " ");
    let collapsed = RE_WHITESPACE.replace_all(&replaced, " ");
    let dotted = RE_DOT_RUN.replace_all(collapsed.trim(), ".");

    // The stem is pure ASCII here, so byte truncation is char truncation.
    let mut stem = dotted.into_owned();
    stem.truncate(max_len);
    let mut base = DEFAULT_BASENAME.to_string();
    base.truncate(max_len);

    // A trailing dot would merge with the extension dot into `..`.
    let trimmed = stem
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_start();

    if trimmed.is_empty() {
        base
    } else {
        trimmed.to_string()
    }
}

fn sanitize_segment(segment: &str) -> String {
    let decoded = percent_decode(segment).replace('%', " ");
    let replaced = RE_SEGMENT_DISALLOWED.replace_all(&decoded, " ");
    let collapsed = RE_WHITESPACE.replace_all(&replaced, " ");
    let trimmed = collapsed.trim();

    if trimmed.is_empty() {
        DEFAULT_SEGMENT.to_string()
    } else {
        trimmed.to_string()
    }
}
