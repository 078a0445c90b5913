//! Lexical POSIX path resolution against a remote cwd

/// Resolve `path` against `cwd`
///
/// Absolute paths are only normalised. Nothing touches the remote
/// filesystem, so symlinks are not followed.
pub fn resolve_path(path: &str, cwd: &str) -> String {
    if path.starts_with('/') {
        return normalize_path(path);
    }

    let base = if cwd.is_empty() { "/" } else { cwd };
    normalize_path(&format!("{}/{}", base.trim_end_matches('/'), path))
}

/// Collapse `.`, `..`, repeated and trailing separators
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match stack.last() {
                Some(&last) if last != ".." => {
                    stack.pop();
                }
                _ if !absolute => stack.push(".."),
                _ => {}
            },
            other => stack.push(other),
        }
    }

    if absolute {
        format!("/{}", stack.join("/"))
    } else if stack.is_empty() {
        ".".to_string()
    } else {
        stack.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path() {
        assert_eq!(resolve_path("/var/log", "/home"), "/var/log");
        assert_eq!(resolve_path("/etc/passwd", "/"), "/etc/passwd");
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(resolve_path("logs", "/var"), "/var/logs");
        assert_eq!(resolve_path(".", "/home"), "/home");
    }

    #[test]
    fn test_parent_directory() {
        assert_eq!(resolve_path("..", "/var/log"), "/var");
        assert_eq!(resolve_path("../etc", "/var/log"), "/var/etc");
        assert_eq!(resolve_path("../../..", "/var"), "/");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path("/var/./log"), "/var/log");
        assert_eq!(normalize_path("/var/log/"), "/var/log");
        assert_eq!(normalize_path("a/../.."), "..");
        assert_eq!(normalize_path("a/.."), ".");
        assert_eq!(normalize_path("/"), "/");
    }
}
