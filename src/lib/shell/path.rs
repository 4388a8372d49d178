//! Slash-separated path arithmetic for the remote (always Unix) filesystem.

/// Lexically normalizes an absolute path: collapses repeated slashes, drops
/// `.`, resolves `..` without climbing above `/`, strips a trailing slash.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Resolves `target` against `cwd` the way `cd` would.
pub fn resolve(cwd: &str, target: &str) -> String {
    if target.starts_with('/') {
        clean(target)
    } else {
        clean(&format!("{}/{}", cwd, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_absolute_paths() {
        assert_eq!(clean("/"), "/");
        assert_eq!(clean(""), "/");
        assert_eq!(clean("/home//user/./docs/"), "/home/user/docs");
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("/../.."), "/");
    }

    #[test]
    fn resolves_relative_and_absolute_targets() {
        assert_eq!(resolve("/home", "user"), "/home/user");
        assert_eq!(resolve("/home/user", ".."), "/home");
        assert_eq!(resolve("/home/user", "/tmp/"), "/tmp");
        assert_eq!(resolve("/", ".."), "/");
        assert_eq!(resolve("/srv", "./app/../logs"), "/srv/logs");
    }

    #[test]
    fn cd_then_parent_returns_to_start() {
        for start in ["/home", "/var/log", "/a/b/c"] {
            for child in ["x", "deep/er", "./y"] {
                let entered = resolve(start, child);
                let back = child
                    .split('/')
                    .filter(|s| !s.is_empty() && *s != ".")
                    .fold(entered, |dir, _| resolve(&dir, ".."));
                assert_eq!(back, start);
            }
        }
        assert_eq!(resolve(&resolve("/home", "user"), ".."), "/home");
    }
}
