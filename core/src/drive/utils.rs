//! Path helpers shared by drives, the permission table and the copy engine.
//!
//! Drive paths are backend-relative, `/`-separated, with no leading or
//! trailing slash. The drive root is the empty string.

use std::time::{SystemTime, UNIX_EPOCH};

/// Normalize a path into drive form.
///
/// Backslashes are treated as separators, empty and `.` segments are
/// dropped and `..` pops the previous segment without ever escaping the
/// root.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Last segment of a drive path (`""` for the root).
pub fn path_base(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Parent of a drive path (`""` for top-level entries and the root).
pub fn path_parent(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Join two drive paths and normalize the result.
pub fn path_join(base: &str, name: &str) -> String {
    clean_path(&format!("{base}/{name}"))
}

/// Number of segments in a path; the root has depth 0.
pub fn path_depth(path: &str) -> usize {
    clean_path(path).split('/').filter(|s| !s.is_empty()).count()
}

/// Whether `ancestor` is `path` itself or one of its ancestors.
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    let ancestor = clean_path(ancestor);
    let path = clean_path(path);
    if ancestor.is_empty() || ancestor == path {
        return true;
    }
    path.strip_prefix(&ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Milliseconds since the Unix epoch, `0` for times before it.
pub fn millis_from_system_time(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
