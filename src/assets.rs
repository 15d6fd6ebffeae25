use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Resolves a media path returned by the API against `base`.
///
/// Absolute `http(s)` URLs pass through untouched; empty paths stay empty so callers can
/// show a placeholder instead of requesting the API root.
pub fn resolve(base: &str, path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return String::new();
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let base = base.trim().trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Same as [`resolve`] but falls back to `fallback` for missing avatars.
pub fn resolve_or(base: &str, path: &str, fallback: &str) -> String {
    let resolved = resolve(base, path);
    if resolved.is_empty() {
        fallback.to_string()
    } else {
        resolved
    }
}

/// Link copied by the share action for a video or reply.
pub fn video_share_url(base: &str, video_id: &str) -> String {
    share_url(base, "video", video_id)
}

pub fn profile_share_url(base: &str, username: &str) -> String {
    share_url(base, "profile", username)
}

fn share_url(base: &str, kind: &str, segment: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let segment = utf8_percent_encode(segment.trim(), NON_ALPHANUMERIC);
    format!("{base}/{kind}/{segment}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            resolve("http://localhost:5000", "https://cdn.test/v.mp4"),
            "https://cdn.test/v.mp4"
        );
    }

    #[test]
    fn relative_paths_join_base() {
        assert_eq!(
            resolve("http://localhost:5000", "/uploads/v.mp4"),
            "http://localhost:5000/uploads/v.mp4"
        );
        assert_eq!(
            resolve("http://localhost:5000/", "uploads/v.mp4"),
            "http://localhost:5000/uploads/v.mp4"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        assert_eq!(
            resolve("https://otogram.test/backend", "/uploads/v.mp4"),
            "https://otogram.test/backend/uploads/v.mp4"
        );
    }

    #[test]
    fn empty_path_uses_fallback() {
        assert_eq!(resolve("http://localhost:5000", "  "), "");
        assert_eq!(
            resolve_or("http://localhost:5000", "", "/default-avatar.png"),
            "/default-avatar.png"
        );
    }

    #[test]
    fn share_links_encode_the_last_segment() {
        assert_eq!(
            video_share_url("http://localhost:5000/", "abc123"),
            "http://localhost:5000/video/abc123"
        );
        assert_eq!(
            profile_share_url("http://localhost:5000", "nour al"),
            "http://localhost:5000/profile/nour%20al"
        );
    }
}
