//! Canonical config emission.
//!
//! The writer produces the same block language the loader consumes, so
//! that `parse(emit(config))` equals `config` modulo comments and
//! whitespace. The digger relies on this to persist its `.digger.conf`.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use burrow_common::BurrowResult;

use crate::model::{Config, LayerConfig, LayerKind, PathKind};

impl Config {
    /// Render the canonical text form.
    #[must_use]
    pub fn to_config_string(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "client-path {}", self.client_path.display());

        for profile in &self.profiles {
            let _ = writeln!(out);
            let _ = writeln!(out, "profile {} {{", profile.name);
            if let Some(wrapper) = &profile.wrapper {
                let _ = writeln!(out, "\twrapper {wrapper}");
            }
            if let Some(command) = &profile.command {
                let _ = writeln!(out, "\tcommand {command}");
            }
            if let Some(environment) = &profile.environment {
                let _ = writeln!(out, "\tenvironment {environment}");
            }
            let _ = writeln!(out, "}}");
        }

        for env in &self.environments {
            let _ = writeln!(out);
            let _ = writeln!(out, "environment {} {{", env.name);
            for id in &env.provides {
                let _ = writeln!(out, "\tprovides {id}");
            }
            for id in &env.requires {
                let _ = writeln!(out, "\trequires {id}");
            }
            for layer in &env.layers {
                write_layer(&mut out, layer);
            }
            let _ = writeln!(out, "}}");
        }

        out
    }

    /// Write the canonical text form to a file.
    pub fn write(&self, path: &Path) -> BurrowResult<()> {
        fs::write(path, self.to_config_string())?;
        tracing::debug!(path = %path.display(), "Wrote configuration");
        Ok(())
    }
}

fn write_layer(out: &mut String, layer: &LayerConfig) {
    match &layer.kind {
        LayerKind::Reference { environment } => {
            let _ = writeln!(out, "\tuse-environment {environment}");
            return;
        }
        LayerKind::Layer { directory } => {
            let _ = writeln!(out, "\tdefine-layer {{");
            let _ = writeln!(out, "\t\tdirectory {}", directory.display());
        }
        LayerKind::Image { image } => {
            let _ = writeln!(out, "\tdefine-image {{");
            let _ = writeln!(out, "\t\timage {image}");
        }
    }

    if layer.use_ldconfig {
        let _ = writeln!(out, "\t\tuse ldconfig");
    }

    for directive in &layer.paths {
        match &directive.kind {
            PathKind::Mount {
                fstype,
                device,
                options,
            } => {
                let mut line = format!("\t\tmount {} {fstype}", directive.path);
                match (device, options) {
                    (Some(device), Some(options)) => {
                        let _ = write!(line, " {device} {options}");
                    }
                    (Some(device), None) => {
                        let _ = write!(line, " {device}");
                    }
                    (None, Some(options)) => {
                        let _ = write!(line, " - {options}");
                    }
                    (None, None) => {}
                }
                let _ = writeln!(out, "{line}");
            }
            kind => {
                let _ = writeln!(out, "\t\t{} {}", kind.keyword(), directive.path);
            }
        }
    }

    let _ = writeln!(out, "\t}}");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::model::{EnvironmentConfig, PathDirective, ProfileConfig};
    use crate::parser::parse_str;

    use super::*;

    fn sample_config() -> Config {
        let mut profile = ProfileConfig::new("yast2");
        profile.wrapper = Some("/usr/lib/burrow/bin/yast2".into());
        profile.command = Some("/sbin/yast2".into());
        profile.environment = Some("yast".into());

        let mut env = EnvironmentConfig::new("yast");
        env.provides.push("yast2-4.2".into());
        env.requires.push("base-1.0".into());
        env.layers.push(LayerConfig {
            kind: LayerKind::Reference {
                environment: "base".into(),
            },
            use_ldconfig: false,
            paths: Vec::new(),
        });
        env.layers.push(LayerConfig {
            kind: LayerKind::Layer {
                directory: PathBuf::from("/opt/layers/yast"),
            },
            use_ldconfig: true,
            paths: vec![
                PathDirective {
                    kind: PathKind::Bind,
                    path: "/sbin/yast2".into(),
                },
                PathDirective {
                    kind: PathKind::Overlay,
                    path: "/usr".into(),
                },
                PathDirective {
                    kind: PathKind::Mount {
                        fstype: "tmpfs".into(),
                        device: None,
                        options: Some("size=64m".into()),
                    },
                    path: "/tmp".into(),
                },
                PathDirective {
                    kind: PathKind::Wormhole,
                    path: "/usr/bin/reenter".into(),
                },
            ],
        });

        let mut base = EnvironmentConfig::new("base");
        base.layers.push(LayerConfig {
            kind: LayerKind::Image {
                image: "registry.example.com/leap:15.3".into(),
            },
            use_ldconfig: false,
            paths: Vec::new(),
        });

        Config {
            client_path: PathBuf::from("/usr/bin/burrow"),
            profiles: vec![profile],
            environments: vec![env, base],
        }
    }

    #[test]
    fn round_trip() {
        let config = sample_config();
        let emitted = config.to_config_string();
        let reparsed = parse_str(&emitted).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn round_trip_is_stable() {
        let config = sample_config();
        let once = config.to_config_string();
        let twice = parse_str(&once).unwrap().to_config_string();
        assert_eq!(once, twice);
    }
}
