//! Path helpers used by the assembler, the digger and the config loader.
//!
//! Mount points and path directives are always absolute and are frequently
//! re-rooted below a physical root directory, so the helpers here operate
//! on string prefixes rather than going through [`Path::components`].

use std::path::{Path, PathBuf};

/// Strip `prefix` from `path`, returning the remaining absolute path.
///
/// Returns `None` when `path` does not lie below `prefix`. Stripping the
/// prefix from the prefix itself yields `Some("/")`.
#[must_use]
pub fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }

    let rest = path.strip_prefix(prefix)?;
    match rest.as_bytes().first() {
        None => Some("/"),
        Some(b'/') => Some(rest),
        Some(_) => None,
    }
}

/// True when `path` equals `prefix` or lies below it.
#[must_use]
pub fn is_path_prefix(prefix: &str, path: &str) -> bool {
    strip_path_prefix(path, prefix).is_some()
}

/// Join an absolute path below a root directory.
///
/// `join_below("/mnt/root", "/usr/bin")` is `/mnt/root/usr/bin`. A root of
/// `None` returns the path unchanged (the view is constructed in place at
/// the live `/`).
#[must_use]
pub fn join_below(root: Option<&Path>, abs_path: &str) -> PathBuf {
    match root {
        Some(root) => root.join(abs_path.trim_start_matches('/')),
        None => PathBuf::from(abs_path),
    }
}

/// Final component of a path, if it has one.
#[must_use]
pub fn const_basename(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    })
}

/// Parent directory of an absolute path. The parent of `/` is `/`.
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &trimmed[..idx],
    }
}

/// Render argv for log output, quoting arguments that contain spaces.
#[must_use]
pub fn concat_argv<S: AsRef<str>>(argv: &[S]) -> String {
    let mut out = String::new();
    for (i, arg) in argv.iter().enumerate() {
        let arg = arg.as_ref();
        if i > 0 {
            out.push(' ');
        }
        if arg.contains(' ') {
            out.push('"');
            out.push_str(arg);
            out.push('"');
        } else {
            out.push_str(arg);
        }
    }
    out
}
