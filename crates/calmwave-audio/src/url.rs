//! Audio URL normalization and source classification.

const STORAGE_OBJECT_PREFIX: &str = "/storage/v1/object/";
const STORAGE_ACCESS_MODES: [&str; 3] = ["public/", "sign/", "authenticated/"];

const STREAM_EXTENSIONS: [&str; 4] = ["m3u8", "m3u", "pls", "xspf"];
const STREAM_KEYWORDS: [&str; 5] = ["stream", "live", "radio", "icecast", "shoutcast"];

/// Normalize a user/catalog supplied audio URL.
///
/// - trims whitespace; blank input yields `None`
/// - `data:` URLs pass through untouched
/// - a missing scheme becomes `https://`
/// - object-storage paths are rewritten to their public form
/// - repeated `/` in the path are collapsed
///
/// Applying it twice gives the same result as applying it once.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if is_data_url(trimmed) {
        return Some(trimmed.to_string());
    }

    let owned;
    let with_scheme = if scheme_len(trimmed).is_some() {
        trimmed
    } else {
        let host_and_path = trimmed.trim_start_matches('/');
        if host_and_path.is_empty() {
            return None;
        }
        owned = format!("https://{host_and_path}");
        owned.as_str()
    };

    let split = scheme_len(with_scheme)?;
    let (scheme, mut rest) = with_scheme.split_at(split);
    if is_http_scheme(scheme) {
        rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            return None;
        }
    }

    let (path, suffix) = split_suffix(rest);
    let path = fix_storage_path(&collapse_slashes(path));
    Some(format!("{scheme}{path}{suffix}"))
}

/// Rewrite `/storage/v1/object/<bucket>/…` to `/storage/v1/object/public/<bucket>/…`.
///
/// Paths already carrying an access mode (`public`, `sign`, `authenticated`) are kept.
pub fn fix_storage_path(path: &str) -> String {
    let Some(idx) = path.find(STORAGE_OBJECT_PREFIX) else {
        return path.to_string();
    };
    let split = idx + STORAGE_OBJECT_PREFIX.len();
    let (head, tail) = path.split_at(split);
    if tail.is_empty() || STORAGE_ACCESS_MODES.iter().any(|m| tail.starts_with(m)) {
        return path.to_string();
    }
    format!("{head}public/{tail}")
}

pub fn is_data_url(url: &str) -> bool {
    url.get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
}

/// Classify a URL as a live stream (no meaningful duration, no seek or loop).
pub fn is_live_stream_url(url: &str) -> bool {
    if is_data_url(url) {
        return false;
    }
    if let Some(ext) = infer_extension(url) {
        if STREAM_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
    }
    let rest = match scheme_len(url) {
        Some(n) => &url[n..],
        None => url,
    };
    let (host_and_path, _) = split_suffix(rest);
    host_and_path
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| STREAM_KEYWORDS.iter().any(|k| token.starts_with(k)))
}

/// Infer a lowercase file extension from the URL path if present.
pub fn infer_extension(url: &str) -> Option<String> {
    let (tail, _) = split_suffix(url);
    let file = tail.rsplit('/').next().unwrap_or(tail);
    let mut parts = file.rsplit('.');
    let ext = parts.next()?;
    if parts.next().is_some() && !ext.is_empty() {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

/// Length of `scheme://`, when `url` starts with one.
fn scheme_len(url: &str) -> Option<usize> {
    let idx = url.find("://")?;
    let scheme = &url[..idx];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(idx + 3)
    } else {
        None
    }
}

fn is_http_scheme(scheme: &str) -> bool {
    let scheme = scheme.trim_end_matches("://");
    scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
}

/// Split off the query/fragment so path rewriting leaves them alone.
fn split_suffix(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}
