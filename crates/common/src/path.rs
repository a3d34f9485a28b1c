//! Virtual path normalization.
//!
//! Gateway paths are virtual (they address the mounted tree, not the local
//! filesystem), so cleaning happens at the string level: a guaranteed
//! leading `/`, no empty or `.` segments, `..` resolved without escaping
//! the root, no trailing slash except for the root itself.

pub fn clean_path(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Last path segment, if any.
pub fn base_name(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|s| !s.is_empty())
}
