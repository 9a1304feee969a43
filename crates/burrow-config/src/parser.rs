//! Config file loader.
//!
//! Hand-rolled line/word scanner: `#` starts a comment, tokens are
//! whitespace separated, `{` and `}` are single-character tokens. The
//! `config` directive includes another file or a whole directory; errors
//! carry the filename, line number and the chain of includes that led
//! there.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use burrow_common::{BurrowError, BurrowResult};

use crate::model::{
    Config, EnvironmentConfig, LayerConfig, LayerKind, PathDirective, PathKind, ProfileConfig,
};

/// Load a configuration file, following includes.
pub fn load(path: &Path) -> BurrowResult<Config> {
    let mut loader = Loader {
        config: Config::default(),
        warned: HashSet::new(),
    };
    loader.process_file(path, &[])?;
    Ok(loader.config)
}

/// Parse a configuration from a string, for tests and the round-trip
/// property.
pub fn parse_str(text: &str) -> BurrowResult<Config> {
    let mut loader = Loader {
        config: Config::default(),
        warned: HashSet::new(),
    };
    let mut parser = Parser::new(PathBuf::from("<string>"), text, Vec::new());
    loader.process_toplevel(&mut parser)?;
    Ok(loader.config)
}

struct Loader {
    config: Config,
    warned: HashSet<&'static str>,
}

struct Parser {
    file: PathBuf,
    lines: VecDeque<String>,
    lineno: u32,
    words: VecDeque<String>,
    /// (file, line) pairs of the include chain, innermost last.
    chain: Vec<(PathBuf, u32)>,
}

impl Parser {
    fn new(file: PathBuf, text: &str, chain: Vec<(PathBuf, u32)>) -> Self {
        Parser {
            file,
            lines: text.lines().map(str::to_string).collect(),
            lineno: 0,
            words: VecDeque::new(),
            chain,
        }
    }

    /// Advance to the next line; false at end of input.
    fn next_line(&mut self) -> bool {
        let Some(line) = self.lines.pop_front() else {
            return false;
        };
        self.lineno += 1;
        self.words.clear();
        for word in line.split_whitespace() {
            if word.starts_with('#') {
                break;
            }
            self.words.push_back(word.to_string());
        }
        true
    }

    fn next_word(&mut self) -> Option<String> {
        self.words.pop_front()
    }

    fn error(&self, message: impl Into<String>) -> BurrowError {
        let mut message = message.into();
        for (file, line) in self.chain.iter().rev() {
            message.push_str(&format!("\n  included from {}:{}", file.display(), line));
        }
        BurrowError::Parse {
            file: self.file.clone(),
            line: self.lineno,
            message,
        }
    }

    /// Consume the single argument of a string directive; reject trailing
    /// noise.
    fn string_argument(&mut self, keyword: &str) -> BurrowResult<String> {
        let arg = self
            .next_word()
            .ok_or_else(|| self.error(format!("missing argument to {keyword} directive")))?;
        if self.next_word().is_some() {
            return Err(self.error(format!(
                "unexpected noise after argument to {keyword} directive"
            )));
        }
        Ok(arg)
    }
}

/// Which flavour of layer block is being parsed; drives validation of the
/// `directory`/`image` source directives.
#[derive(Clone, Copy, PartialEq)]
enum LayerBlock {
    DefineLayer,
    DefineImage,
}

impl Loader {
    fn process_file(&mut self, path: &Path, chain: &[(PathBuf, u32)]) -> BurrowResult<()> {
        let text = fs::read_to_string(path).map_err(|err| BurrowError::Config {
            message: format!("Unable to open {}: {err}", path.display()),
        })?;

        let mut parser = Parser::new(path.to_path_buf(), &text, chain.to_vec());
        self.process_toplevel(&mut parser)
    }

    fn process_toplevel(&mut self, parser: &mut Parser) -> BurrowResult<()> {
        while parser.next_line() {
            let Some(keyword) = parser.next_word() else {
                continue;
            };

            match keyword.as_str() {
                "config" => self.process_include(parser)?,
                "client-path" => {
                    self.config.client_path = PathBuf::from(parser.string_argument("client-path")?);
                }
                "profile" => self.process_profile(parser)?,
                "environment" => self.process_environment(parser)?,
                other => return Err(parser.error(format!("unexpected keyword \"{other}\""))),
            }
        }
        Ok(())
    }

    fn process_include(&mut self, parser: &mut Parser) -> BurrowResult<()> {
        let Some(filename) = parser.next_word() else {
            return Err(parser.error("missing pathname"));
        };
        self.include_path(Path::new(&filename), parser)
    }

    fn include_path(&mut self, path: &Path, parser: &Parser) -> BurrowResult<()> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!(path = %path.display(), "include target does not exist, skipping");
                return Ok(());
            }
            Err(err) => {
                return Err(parser.error(format!("cannot access \"{}\": {err}", path.display())));
            }
        };

        if meta.is_file() {
            let mut chain = parser.chain.clone();
            chain.push((parser.file.clone(), parser.lineno));
            return self.process_file(path, &chain);
        }

        if meta.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|err| {
                    parser.error(format!("cannot open directory \"{}\": {err}", path.display()))
                })?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|child| {
                    !child
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with('.'))
                })
                .collect();
            entries.sort();

            for child in entries {
                self.include_path(&child, parser)?;
            }
            return Ok(());
        }

        Err(parser.error(format!(
            "cannot include \"{}\" - unsupported file type",
            path.display()
        )))
    }

    fn warn_obsolete(&mut self, parser: &Parser, old: &'static str, new: &str) {
        if self.warned.insert(old) {
            tracing::warn!(
                "{}:{}: keyword \"{old}\" is obsolete, use \"{new}\"",
                parser.file.display(),
                parser.lineno
            );
        }
    }

    fn process_profile(&mut self, parser: &mut Parser) -> BurrowResult<()> {
        let Some(name) = parser.next_word() else {
            return Err(parser.error("missing name argument"));
        };
        if self.config.profile(&name).is_some() {
            return Err(parser.error(format!("duplicate declaration of profile \"{name}\"")));
        }

        let mut profile = ProfileConfig::new(&name);
        process_block(parser, |parser, keyword| {
            match keyword {
                "wrapper" => profile.wrapper = Some(parser.string_argument(keyword)?),
                "command" => profile.command = Some(parser.string_argument(keyword)?),
                "environment" => profile.environment = Some(parser.string_argument(keyword)?),
                other => {
                    return Err(
                        parser.error(format!("unexpected keyword \"{other}\" in profile block"))
                    );
                }
            }
            Ok(())
        })?;

        self.config.profiles.push(profile);
        Ok(())
    }

    fn process_environment(&mut self, parser: &mut Parser) -> BurrowResult<()> {
        let Some(name) = parser.next_word() else {
            return Err(parser.error("missing name argument"));
        };
        if self.config.environment(&name).is_some() {
            return Err(parser.error(format!("duplicate declaration of environment \"{name}\"")));
        }

        let mut env = EnvironmentConfig::new(&name);
        let mut obsolete: Vec<(&'static str, &'static str)> = Vec::new();

        process_block(parser, |parser, keyword| {
            match keyword {
                "provides" => env.provides.push(parser.string_argument(keyword)?),
                "requires" => env.requires.push(parser.string_argument(keyword)?),
                "define-layer" => {
                    env.layers
                        .push(process_layer_block(parser, LayerBlock::DefineLayer)?);
                }
                "define-image" => {
                    env.layers
                        .push(process_layer_block(parser, LayerBlock::DefineImage)?);
                }
                "overlay" => {
                    obsolete.push(("overlay", "define-layer"));
                    env.layers
                        .push(process_layer_block(parser, LayerBlock::DefineLayer)?);
                }
                "use-environment" => {
                    env.layers.push(LayerConfig {
                        kind: LayerKind::Reference {
                            environment: parser.string_argument(keyword)?,
                        },
                        use_ldconfig: false,
                        paths: Vec::new(),
                    });
                }
                "layer" => {
                    obsolete.push(("layer", "use-environment"));
                    env.layers.push(LayerConfig {
                        kind: LayerKind::Reference {
                            environment: parser.string_argument(keyword)?,
                        },
                        use_ldconfig: false,
                        paths: Vec::new(),
                    });
                }
                other => {
                    return Err(parser.error(format!(
                        "unexpected keyword \"{other}\" in environment block"
                    )));
                }
            }
            Ok(())
        })?;

        for (old, new) in obsolete {
            self.warn_obsolete(parser, old, new);
        }

        self.config.environments.push(env);
        Ok(())
    }
}

/// Parse a `{ ... }` block, dispatching each keyword to `handler`.
fn process_block(
    parser: &mut Parser,
    mut handler: impl FnMut(&mut Parser, &str) -> BurrowResult<()>,
) -> BurrowResult<()> {
    match parser.next_word() {
        Some(word) if word == "{" => {}
        Some(word) => {
            return Err(parser.error(format!("unexpected token \"{word}\" at start of block")));
        }
        None => return Ok(()),
    }
    let start_line = parser.lineno;

    while parser.next_line() {
        let Some(keyword) = parser.next_word() else {
            continue;
        };
        if keyword == "}" {
            return Ok(());
        }
        handler(parser, &keyword)?;
    }

    Err(parser.error(format!(
        "end of file while looking for closing brace (starting at line {start_line})"
    )))
}

fn process_layer_block(parser: &mut Parser, block: LayerBlock) -> BurrowResult<LayerConfig> {
    let mut directory: Option<PathBuf> = None;
    let mut image: Option<String> = None;
    let mut use_ldconfig = false;
    let mut paths = Vec::new();

    process_block(parser, |parser, keyword| {
        match keyword {
            "directory" => directory = Some(PathBuf::from(parser.string_argument(keyword)?)),
            "image" => image = Some(parser.string_argument(keyword)?),
            "use" => {
                let feature = parser.string_argument(keyword)?;
                if feature == "ldconfig" {
                    use_ldconfig = true;
                } else {
                    return Err(parser.error(format!("use: unknown feature \"{feature}\"")));
                }
            }
            "hide" => paths.push(path_directive(parser, keyword, PathKind::Hide)?),
            "bind" => paths.push(path_directive(parser, keyword, PathKind::Bind)?),
            "bind-children" => {
                paths.push(path_directive(parser, keyword, PathKind::BindChildren)?);
            }
            "overlay" => paths.push(path_directive(parser, keyword, PathKind::Overlay)?),
            "overlay-children" => {
                paths.push(path_directive(parser, keyword, PathKind::OverlayChildren)?);
            }
            "wormhole" => paths.push(path_directive(parser, keyword, PathKind::Wormhole)?),
            "mount" => paths.push(mount_directive(parser)?),
            other => {
                return Err(parser.error(format!("unexpected keyword \"{other}\" in layer block")));
            }
        }
        Ok(())
    })?;

    let kind = match block {
        LayerBlock::DefineLayer => {
            if image.is_some() {
                return Err(parser.error("define-layer does not take an \"image\" directive"));
            }
            let directory = directory
                .ok_or_else(|| parser.error("define-layer needs a \"directory\" directive"))?;
            LayerKind::Layer { directory }
        }
        LayerBlock::DefineImage => {
            if directory.is_some() {
                return Err(parser.error("define-image does not take a \"directory\" directive"));
            }
            let image =
                image.ok_or_else(|| parser.error("define-image needs an \"image\" directive"))?;
            LayerKind::Image { image }
        }
    };

    Ok(LayerConfig {
        kind,
        use_ldconfig,
        paths,
    })
}

fn path_directive(
    parser: &mut Parser,
    keyword: &str,
    kind: PathKind,
) -> BurrowResult<PathDirective> {
    let path = parser.string_argument(keyword)?;
    check_absolute(parser, keyword, &path)?;
    Ok(PathDirective { kind, path })
}

fn mount_directive(parser: &mut Parser) -> BurrowResult<PathDirective> {
    let Some(path) = parser.next_word() else {
        return Err(parser.error("mount: missing path argument"));
    };
    check_absolute(parser, "mount", &path)?;

    let Some(fstype) = parser.next_word() else {
        return Err(parser.error("mount: missing filesystem type"));
    };

    // `-` is the placeholder for "no device" when options follow.
    let device = parser.next_word().filter(|device| device != "-");
    let options = parser.next_word();
    if parser.next_word().is_some() {
        return Err(parser.error("mount: too many arguments"));
    }

    Ok(PathDirective {
        kind: PathKind::Mount {
            fstype,
            device,
            options,
        },
        path,
    })
}

fn check_absolute(parser: &Parser, keyword: &str, path: &str) -> BurrowResult<()> {
    if !path.starts_with('/') {
        return Err(parser.error(format!(
            "{keyword}: invalid path \"{path}\" - must specify an absolute path name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_environment() {
        let config = parse_str(
            "environment yast {\n\
             \tdefine-layer {\n\
             \t\tdirectory /opt/layers/yast\n\
             \t\tbind /sbin/yast2\n\
             \t}\n\
             }\n",
        )
        .unwrap();

        let env = config.environment("yast").unwrap();
        assert_eq!(env.layers.len(), 1);
        assert_eq!(
            env.layers[0].kind,
            LayerKind::Layer {
                directory: PathBuf::from("/opt/layers/yast")
            }
        );
        assert_eq!(env.layers[0].paths[0].kind, PathKind::Bind);
        assert_eq!(env.layers[0].paths[0].path, "/sbin/yast2");
    }

    #[test]
    fn parse_profile_block() {
        let config = parse_str(
            "profile yast2 {\n\
             \twrapper /usr/lib/burrow/bin/yast2\n\
             \tcommand /sbin/yast2\n\
             \tenvironment yast\n\
             }\n",
        )
        .unwrap();

        let profile = config.profile("yast2").unwrap();
        assert_eq!(profile.command.as_deref(), Some("/sbin/yast2"));
        assert_eq!(profile.environment.as_deref(), Some("yast"));
    }

    #[test]
    fn parse_mount_directive() {
        let config = parse_str(
            "environment e {\n\
             \tdefine-layer {\n\
             \t\tdirectory /l\n\
             \t\tmount /tmp tmpfs - size=64m\n\
             \t\tmount /proc proc\n\
             \t}\n\
             }\n",
        )
        .unwrap();

        let layer = &config.environments[0].layers[0];
        assert_eq!(
            layer.paths[0].kind,
            PathKind::Mount {
                fstype: "tmpfs".into(),
                device: None,
                options: Some("size=64m".into())
            }
        );
        assert_eq!(
            layer.paths[1].kind,
            PathKind::Mount {
                fstype: "proc".into(),
                device: None,
                options: None
            }
        );
    }

    #[test]
    fn obsolete_aliases_are_rewritten() {
        let config = parse_str(
            "environment child {\n\
             \tlayer parent\n\
             \toverlay {\n\
             \t\tdirectory /c\n\
             \t}\n\
             }\n",
        )
        .unwrap();

        let env = config.environment("child").unwrap();
        assert_eq!(
            env.layers[0].kind,
            LayerKind::Reference {
                environment: "parent".into()
            }
        );
        assert!(matches!(env.layers[1].kind, LayerKind::Layer { .. }));
    }

    #[test]
    fn duplicate_environment_rejected() {
        let err = parse_str("environment e {\n}\nenvironment e {\n}\n").unwrap_err();
        assert!(err.to_string().contains("duplicate declaration"));
    }

    #[test]
    fn relative_path_rejected() {
        let err = parse_str(
            "environment e {\n\
             \tdefine-layer {\n\
             \t\tdirectory /l\n\
             \t\tbind sbin/yast2\n\
             \t}\n\
             }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("absolute path"));
    }

    #[test]
    fn unterminated_block_rejected() {
        let err = parse_str("environment e {\n\tprovides x-1\n").unwrap_err();
        assert!(err.to_string().contains("closing brace"));
    }

    #[test]
    fn comments_and_blank_lines() {
        let config = parse_str(
            "# a comment\n\
             \n\
             environment e { # trailing comment\n\
             \tprovides x-1\n\
             }\n",
        )
        .unwrap();
        assert_eq!(config.environments[0].provides, vec!["x-1".to_string()]);
    }
}
