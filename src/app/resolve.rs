use url::Url;

/// Turns a CSV fragment into an absolute, fetchable URL.
///
/// Fragments that already carry a scheme and authority pass through
/// unchanged. Everything else is given a leading slash and joined against
/// the default host with RFC 3986 semantics, so the host's own path is
/// replaced, not appended, and `..` segments resolve normally.
pub fn resolve_target(fragment: &str, default_host: &str) -> Result<String, String> {
    let fragment = fragment.trim();

    if let Ok(parsed) = Url::parse(fragment) {
        if parsed.has_host() {
            return Ok(fragment.to_string());
        }
    }

    let base = Url::parse(default_host)
        .map_err(|err| format!("invalid default host '{default_host}': {err}"))?;
    let relative = if fragment.starts_with('/') {
        fragment.to_string()
    } else {
        format!("/{fragment}")
    };
    base.join(&relative)
        .map(|joined| joined.to_string())
        .map_err(|err| format!("cannot join '{relative}' to '{default_host}': {err}"))
}

/// Product pages live at `<host>/+,<product_no>`.
pub fn product_fragment(product_no: &str) -> String {
    format!("/+,{product_no}")
}

/// Resolves an image `src` attribute against the batch host. Protocol-relative
/// and root-relative paths are the only forms the source pages emit; anything
/// else is used as-is.
pub fn resolve_image_src(src: &str, host: &str) -> String {
    if let Some(rest) = src.strip_prefix("//") {
        format!("https://{rest}")
    } else if src.starts_with('/') {
        format!("{}{src}", host.trim_end_matches('/'))
    } else {
        src.to_string()
    }
}

/// Infers an image extension by substring matching on the URL, defaulting
/// to `jpg`.
pub fn image_extension(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    if lower.contains(".png") {
        "png"
    } else if lower.contains(".gif") {
        "gif"
    } else if lower.contains(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_fragment_joins_host() {
        assert_eq!(
            resolve_target("/p/123", "https://h.test").as_deref(),
            Ok("https://h.test/p/123")
        );
    }

    #[test]
    fn missing_leading_slash_is_normalized() {
        assert_eq!(
            resolve_target("p/123", "https://h.test").as_deref(),
            Ok("https://h.test/p/123")
        );
    }

    #[test]
    fn absolute_fragment_passes_through() {
        assert_eq!(
            resolve_target("http://other.test/x", "https://h.test").as_deref(),
            Ok("http://other.test/x")
        );
    }

    #[test]
    fn host_path_is_replaced_not_appended() {
        assert_eq!(
            resolve_target("/p/123", "https://h.test/base/path").as_deref(),
            Ok("https://h.test/p/123")
        );
    }

    #[test]
    fn dotdot_segments_resolve_per_rfc_3986() {
        assert_eq!(
            resolve_target("/a/../b", "https://h.test").as_deref(),
            Ok("https://h.test/b")
        );
    }

    #[test]
    fn fragment_is_trimmed() {
        assert_eq!(
            resolve_target("  /p/9  ", "https://h.test").as_deref(),
            Ok("https://h.test/p/9")
        );
    }

    #[test]
    fn invalid_host_is_an_error() {
        assert!(resolve_target("/p/1", "not a host").is_err());
    }

    #[test]
    fn product_fragment_format() {
        assert_eq!(product_fragment("PD123"), "/+,PD123");
    }

    #[test]
    fn image_src_resolution() {
        assert_eq!(
            resolve_image_src("//cdn.test/img/a.jpg", "https://h.test"),
            "https://cdn.test/img/a.jpg"
        );
        assert_eq!(
            resolve_image_src("/img/a.jpg", "https://h.test/"),
            "https://h.test/img/a.jpg"
        );
        assert_eq!(
            resolve_image_src("https://cdn.test/a.jpg", "https://h.test"),
            "https://cdn.test/a.jpg"
        );
    }

    #[test]
    fn extension_inference() {
        assert_eq!(image_extension("https://c.test/a.png?x=1"), "png");
        assert_eq!(image_extension("https://c.test/a.GIF"), "gif");
        assert_eq!(image_extension("https://c.test/a.webp"), "webp");
        assert_eq!(image_extension("https://c.test/a"), "jpg");
    }
}
