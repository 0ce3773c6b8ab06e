//! Filesystem path → URL pattern resolution.
//!
//! Canonical patterns use `:name` for parameters and `*name` for a trailing
//! catch-all. [`to_matcher_syntax`] rewrites them for the `matchit` matcher.
use std::{
    borrow::Cow,
    path::{Component, Path},
};

/// Base name that maps to its directory's own path.
pub const INDEX_NAME: &str = "index";

/// Map one filesystem segment to one URL segment.
///
/// `[id]` becomes `:id`, `[...slug]` becomes `*slug`; everything else passes
/// through unchanged.
pub fn parse_segment(segment: &str) -> Cow<'_, str> {
    let inner = match segment
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
    {
        Some(inner) if !inner.is_empty() => inner,
        _ => return Cow::Borrowed(segment),
    };

    match inner.strip_prefix("...") {
        Some(rest) if !rest.is_empty() => Cow::Owned(format!("*{rest}")),
        Some(_) => Cow::Borrowed(segment),
        None => Cow::Owned(format!(":{inner}")),
    }
}

/// Resolve the URL pattern for a route file.
///
/// Returns `None` when the file is not a route (underscore-prefixed base
/// name) or lies outside `routes_root`.
pub fn resolve_route_path(routes_root: &Path, file_path: &Path, base_name: &str) -> Option<String> {
    if base_name.starts_with('_') {
        return None;
    }

    let dir = file_path.parent().unwrap_or(routes_root);
    let relative = dir.strip_prefix(routes_root).ok()?;

    let mut segments: Vec<Cow<'_, str>> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .map(parse_segment)
        .collect();

    if segments.is_empty() && base_name == INDEX_NAME {
        return Some("/".to_string());
    }

    if base_name != INDEX_NAME {
        segments.push(parse_segment(base_name));
    }

    Some(normalize_pattern(&segments.join("/")))
}

/// Pattern a directory's own `index` file would resolve to.
pub fn resolve_directory_path(routes_root: &Path, dir: &Path) -> Option<String> {
    resolve_route_path(routes_root, &dir.join(INDEX_NAME), INDEX_NAME)
}

/// Prefix a single `/`, collapse repeated slashes and strip a trailing slash.
pub fn normalize_pattern(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    out.push('/');
    for segment in raw.split('/').filter(|s| !s.is_empty()) {
        if out.len() > 1 {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Rewrite a canonical pattern into `matchit` syntax: `:id` → `{id}`,
/// `*rest` → `{*rest}`.
pub fn to_matcher_syntax(pattern: &str) -> String {
    if pattern == "/" {
        return "/".to_string();
    }
    pattern
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.replace('{', "{{").replace('}', "}}")
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Number of non-empty segments, used to order nested scopes.
pub fn pattern_depth(pattern: &str) -> usize {
    pattern.split('/').filter(|s| !s.is_empty()).count()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn resolve(rel: &str) -> Option<String> {
        let root = PathBuf::from("/srv/app/routes");
        let file = root.join(rel);
        let base = file.file_stem().unwrap().to_str().unwrap().to_string();
        resolve_route_path(&root, &file, &base)
    }

    #[test]
    fn test_parse_segment() {
        assert_eq!(parse_segment("[id]"), ":id");
        assert_eq!(parse_segment("users"), "users");
        assert_eq!(parse_segment("[...slug]"), "*slug");
        assert_eq!(parse_segment("[]"), "[]");
        assert_eq!(parse_segment("[id"), "[id");
        assert_eq!(parse_segment("[...]"), "[...]");
    }

    #[test]
    fn test_root_index_is_slash() {
        assert_eq!(resolve("index.toml").as_deref(), Some("/"));
    }

    #[test]
    fn test_nested_and_parameter_routes() {
        assert_eq!(resolve("hello.toml").as_deref(), Some("/hello"));
        assert_eq!(resolve("users/index.toml").as_deref(), Some("/users"));
        assert_eq!(resolve("users/[id].toml").as_deref(), Some("/users/:id"));
        assert_eq!(
            resolve("users/[id]/posts/[postId].toml").as_deref(),
            Some("/users/:id/posts/:postId")
        );
        assert_eq!(resolve("docs/[...path].toml").as_deref(), Some("/docs/*path"));
    }

    #[test]
    fn test_underscore_files_are_skipped() {
        assert_eq!(resolve("_middleware.toml"), None);
        assert_eq!(resolve("users/_index.toml"), None);
    }

    #[test]
    fn test_file_outside_root_is_skipped() {
        let root = PathBuf::from("/srv/app/routes");
        assert_eq!(
            resolve_route_path(&root, Path::new("/srv/other/x.toml"), "x"),
            None
        );
    }

    #[test]
    fn test_patterns_have_no_double_or_trailing_slash() {
        for rel in [
            "a/b/c.toml",
            "a/index.toml",
            "[x]/index.toml",
            "index.toml",
            "a/./b.toml",
        ] {
            let pattern = resolve(rel).unwrap();
            assert!(!pattern.contains("//"), "{pattern}");
            assert!(pattern == "/" || !pattern.ends_with('/'), "{pattern}");
            assert!(pattern.starts_with('/'));
        }
    }

    #[test]
    fn test_normalize_pattern() {
        assert_eq!(normalize_pattern(""), "/");
        assert_eq!(normalize_pattern("//a///b/"), "/a/b");
        assert_eq!(normalize_pattern("/"), "/");
    }

    #[test]
    fn test_directory_path() {
        let root = PathBuf::from("/srv/app/routes");
        assert_eq!(resolve_directory_path(&root, &root).as_deref(), Some("/"));
        assert_eq!(
            resolve_directory_path(&root, &root.join("users/[id]")).as_deref(),
            Some("/users/:id")
        );
    }

    #[test]
    fn test_matcher_syntax() {
        assert_eq!(to_matcher_syntax("/"), "/");
        assert_eq!(to_matcher_syntax("/users/:id"), "/users/{id}");
        assert_eq!(to_matcher_syntax("/docs/*path"), "/docs/{*path}");
        assert_eq!(to_matcher_syntax("/a{b}"), "/a{{b}}");
    }

    #[test]
    fn test_pattern_depth() {
        assert_eq!(pattern_depth("/"), 0);
        assert_eq!(pattern_depth("/users/:id"), 2);
    }
}
