//! Helpers for keeping credentials out of logs and untrusted names out of
//! file paths.

use std::path::Path;

/// Returns only the filename component of a path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo from a Git remote or cluster URL.
///
/// - `https://ghp_token@github.com/org/fabric` → `https://****@github.com/org/fabric`
/// - `git@github.com:org/fabric.git` is returned unchanged
pub fn redact_url(url: &str) -> String {
    if url.starts_with("git@") {
        return url.to_string();
    }

    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &url[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }

    url.to_string()
}

/// Makes a resource name or namespace safe to use as a single path
/// component. Separators, dot-segments and control characters never reach
/// the filesystem.
pub fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed if trimmed.len() != cleaned.len() => format!("_{}", trimmed),
        _ => cleaned,
    }
}
