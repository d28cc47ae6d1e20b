use std::io::Read;

/// Prefix of cross-package shared asset paths.
pub const SHARED_CONTENT_PREFIX: &str = "_content";

/// Readable content of a resolved asset.
pub type ContentStream = Box<dyn Read + Send>;

/// A logical asset path, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPath<'a> {
    /// `_content/<package>/<rest>`: an asset owned by `package`
    Shared { package: &'a str, rest: String },
    /// Any other path, relative to the requesting package's own assets
    Own(String),
}

impl<'a> ContentPath<'a> {
    /// Classify a logical path.
    ///
    /// Returns `None` for empty paths and paths that could leave their
    /// content root: empty, `.` or `..` segments after the leading slashes.
    pub fn parse(path: &'a str) -> Option<Self> {
        let trimmed = path.trim_start_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();

        if segments.iter().any(|s| matches!(*s, "" | "." | "..")) {
            return None;
        }

        if segments[0] == SHARED_CONTENT_PREFIX {
            let package = segments.get(1).copied()?;
            if segments.len() < 3 {
                return None;
            }
            let rest = segments[2..].join("/");
            return Some(Self::Shared { package, rest });
        }

        Some(Self::Own(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shared_path() {
        assert_eq!(
            ContentPath::parse("_content/pkgB/img/logo.png"),
            Some(ContentPath::Shared {
                package: "pkgB",
                rest: "img/logo.png".to_string()
            })
        );
        assert_eq!(
            ContentPath::parse("/_content/pkgB/logo.png"),
            Some(ContentPath::Shared {
                package: "pkgB",
                rest: "logo.png".to_string()
            })
        );
    }

    #[test]
    fn test_parse_own_path() {
        assert_eq!(
            ContentPath::parse("css/site.css"),
            Some(ContentPath::Own("css/site.css".to_string()))
        );
        assert_eq!(
            ContentPath::parse("_contentish/a.css"),
            Some(ContentPath::Own("_contentish/a.css".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_incomplete_or_escaping_paths() {
        assert_eq!(ContentPath::parse(""), None);
        assert_eq!(ContentPath::parse("_content"), None);
        assert_eq!(ContentPath::parse("_content/pkgB"), None);
        assert_eq!(ContentPath::parse("_content//logo.png"), None);
        assert_eq!(ContentPath::parse("../secret.txt"), None);
        assert_eq!(ContentPath::parse("_content/pkgB/../../etc/passwd"), None);
    }

    #[test]
    fn test_parse_rejects_empty_and_dot_segments() {
        assert_eq!(ContentPath::parse("_content/pkgA//etc/hostname"), None);
        assert_eq!(ContentPath::parse("_content/pkgA/img//logo.png"), None);
        assert_eq!(ContentPath::parse("_content/pkgA/./logo.png"), None);
        assert_eq!(ContentPath::parse("css//site.css"), None);
        assert_eq!(ContentPath::parse("./site.css"), None);
        assert_eq!(ContentPath::parse("css/"), None);
        assert_eq!(ContentPath::parse("/"), None);
    }
}
