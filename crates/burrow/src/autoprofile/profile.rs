//! The autoprofile policy language.
//!
//! A profile is a list of `keyword [arg]` lines applied in order against
//! a captured tree. Profiles are either built in (selected by tag) or
//! loaded from an absolute path.

use std::fs;
use std::path::Path;

use burrow_common::{BurrowError, BurrowResult};

/// Type of the environment the analyser emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmittedKind {
    /// A `define-layer` block.
    #[default]
    Layer,
    /// A `define-image` block.
    Image,
}

/// One profile line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileAction {
    /// Set the emitted layer's type.
    EnvironmentType(EmittedKind),
    /// Suppress the final stray-file check.
    IgnoreStrays,
    /// Accepted for compatibility; does nothing.
    OptionalDirectory(String),
    /// If the path exists in the tree, mark it ignored.
    Ignore(String),
    /// Declare the path ignored if its direct children all end up
    /// ignored.
    IgnoreIfEmpty(String),
    /// Same, applied recursively to all descendants.
    IgnoreEmptySubdirs(String),
    /// Require the path; emit an `overlay` directive for it.
    Overlay(String),
    /// Require the path; emit a `bind` directive for it.
    Bind(String),
    /// Empty tree at the path: ignore. Otherwise: overlay.
    OverlayUnlessEmpty(String),
    /// Empty tree at the path: ignore. Otherwise: bind.
    BindUnlessEmpty(String),
    /// A non-empty directory here is a fatal error.
    MustBeEmpty(String),
    /// If the path (default `/etc/ld.so.cache`) exists, enable
    /// `use ldconfig` and ignore it.
    CheckLdconfig(Option<String>),
    /// Emit a tmpfs `mount` directive for the path.
    MountTmpfs(String),
    /// Emit a wrapper profile for each executable child of the path.
    CheckBinaries(String),
}

/// A parsed profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoProfile {
    /// Profile name (tag or file path).
    pub name: String,
    /// Actions in declaration order.
    pub actions: Vec<ProfileAction>,
}

/// The built-in default policy: the usual suspects of a Linux root
/// filesystem, with `/etc` handled conservatively.
const DEFAULT_PROFILE: &str = "\
ignore-if-empty /etc
ignore /etc/rc.d
ignore /etc/init.d
overlay-unless-empty /etc/alternatives
check-ldconfig
ignore-if-empty /dev
ignore /dev/null
must-be-empty /boot
overlay-unless-empty /bin
overlay-unless-empty /sbin
overlay-unless-empty /lib
overlay-unless-empty /lib64
overlay-unless-empty /opt
ignore /usr/sysimage/rpm
overlay-unless-empty /usr
ignore /var/cache
ignore /var/lib/zypp
ignore /var/log
ignore /var/run
overlay-unless-empty /var
ignore-empty-subdirs /
";

/// Look up a built-in profile by tag.
#[must_use]
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "default" => Some(DEFAULT_PROFILE),
        _ => None,
    }
}

/// Load a profile: a built-in tag, or an absolute path to a profile
/// file.
pub fn load(selector: &str) -> BurrowResult<AutoProfile> {
    if let Some(text) = builtin(selector) {
        return parse(selector, text);
    }

    if selector.starts_with('/') {
        let text = fs::read_to_string(Path::new(selector))?;
        return parse(selector, &text);
    }

    Err(BurrowError::Config {
        message: format!("Unknown profile \"{selector}\" (not a built-in tag or absolute path)"),
    })
}

/// Parse a profile text. `#` starts a comment; blank lines are ignored.
pub fn parse(name: &str, text: &str) -> BurrowResult<AutoProfile> {
    let mut actions = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();
        let keyword = words.next().expect("line is non-empty");
        let arg = words.next().map(str::to_string);

        if words.next().is_some() {
            return Err(profile_error(name, lineno, "too many arguments"));
        }

        let need = |arg: Option<String>| {
            arg.ok_or_else(|| profile_error(name, lineno, &format!("{keyword} needs an argument")))
        };

        let action = match keyword {
            "environment-type" => match need(arg)?.as_str() {
                "layer" => ProfileAction::EnvironmentType(EmittedKind::Layer),
                "image" => ProfileAction::EnvironmentType(EmittedKind::Image),
                other => {
                    return Err(profile_error(
                        name,
                        lineno,
                        &format!("unknown environment type \"{other}\""),
                    ));
                }
            },
            "ignore" => match arg.as_deref() {
                Some("strays") => ProfileAction::IgnoreStrays,
                Some(path) if path.starts_with('/') => ProfileAction::Ignore(path.to_string()),
                _ => {
                    return Err(profile_error(
                        name,
                        lineno,
                        "ignore needs \"strays\" or an absolute path",
                    ));
                }
            },
            "optional-directory" => ProfileAction::OptionalDirectory(need(arg)?),
            "ignore-if-empty" => ProfileAction::IgnoreIfEmpty(need(arg)?),
            "ignore-empty-subdirs" => ProfileAction::IgnoreEmptySubdirs(need(arg)?),
            "overlay" => ProfileAction::Overlay(need(arg)?),
            "bind" => ProfileAction::Bind(need(arg)?),
            "overlay-unless-empty" => ProfileAction::OverlayUnlessEmpty(need(arg)?),
            "bind-unless-empty" => ProfileAction::BindUnlessEmpty(need(arg)?),
            "must-be-empty" => ProfileAction::MustBeEmpty(need(arg)?),
            "check-ldconfig" => ProfileAction::CheckLdconfig(arg),
            "mount-tmpfs" => ProfileAction::MountTmpfs(need(arg)?),
            "check-binaries" => ProfileAction::CheckBinaries(need(arg)?),
            other => {
                return Err(profile_error(name, lineno, &format!("unknown keyword \"{other}\"")));
            }
        };

        actions.push(action);
    }

    Ok(AutoProfile {
        name: name.to_string(),
        actions,
    })
}

fn profile_error(name: &str, lineno: usize, message: &str) -> BurrowError {
    BurrowError::Config {
        message: format!("profile {name}:{}: {message}", lineno + 1),
    }
}
