//! Configure-time reference flattening.
//!
//! Before any assembly, every environment is reduced to a flat list of
//! non-`Reference` layers: each `use-environment` entry is replaced by the
//! referenced environment's layers, recursively. Cycles are an error, and
//! the flat list must contain at most one `Image` layer, at the bottom.

use burrow_common::{BurrowError, BurrowResult};

use crate::model::{Config, LayerConfig, LayerKind};

/// An environment with all references spliced away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEnvironment {
    /// Environment name.
    pub name: String,
    /// Capabilities provided.
    pub provides: Vec<String>,
    /// Capabilities required.
    pub requires: Vec<String>,
    /// Flat layer stack, bottom first. Contains no `Reference` layers.
    pub layers: Vec<LayerConfig>,
}

/// Flatten every environment of a configuration.
pub fn flatten(config: &Config) -> BurrowResult<Vec<FlatEnvironment>> {
    config
        .environments
        .iter()
        .map(|env| flatten_one(config, &env.name))
        .collect()
}

/// Flatten a single environment by name.
pub fn flatten_one(config: &Config, name: &str) -> BurrowResult<FlatEnvironment> {
    let env = config
        .environment(name)
        .ok_or_else(|| BurrowError::EnvironmentNotFound {
            name: name.to_string(),
        })?;

    let mut layers = Vec::new();
    let mut visiting = vec![name.to_string()];
    chase_layers(config, name, &env.layers, &mut layers, &mut visiting)?;

    validate_image_position(name, &layers)?;

    Ok(FlatEnvironment {
        name: env.name.clone(),
        provides: env.provides.clone(),
        requires: env.requires.clone(),
        layers,
    })
}

fn chase_layers(
    config: &Config,
    env_name: &str,
    declared: &[LayerConfig],
    out: &mut Vec<LayerConfig>,
    visiting: &mut Vec<String>,
) -> BurrowResult<()> {
    for layer in declared {
        let LayerKind::Reference { environment } = &layer.kind else {
            // Duplicate layers reached through several references are kept
            // as declared, not deduplicated.
            if out.contains(layer) {
                tracing::debug!(
                    environment = env_name,
                    "splicing a layer that is already present in the stack"
                );
            }
            out.push(layer.clone());
            continue;
        };

        if visiting.iter().any(|name| name == environment) {
            return Err(BurrowError::Config {
                message: format!(
                    "environment {} references lower layer \"{environment}\", creating a cycle",
                    visiting.last().expect("visiting is never empty")
                ),
            });
        }

        let lower =
            config
                .environment(environment)
                .ok_or_else(|| BurrowError::Config {
                    message: format!(
                        "environment {env_name} references lower layer \"{environment}\", which does not exist"
                    ),
                })?;

        visiting.push(environment.clone());
        chase_layers(config, environment, &lower.layers, out, visiting)?;
        visiting.pop();
    }

    Ok(())
}

fn validate_image_position(name: &str, layers: &[LayerConfig]) -> BurrowResult<()> {
    for (index, layer) in layers.iter().enumerate() {
        if layer.is_image() && index != 0 {
            return Err(BurrowError::Config {
                message: format!(
                    "environment {name} specifies an image container, but it's not the bottom most layer"
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_str;

    use super::*;

    #[test]
    fn reference_splices_in_order() {
        let config = parse_str(
            "environment parent {\n\
             \tdefine-layer {\n\
             \t\tdirectory /p\n\
             \t}\n\
             }\n\
             environment child {\n\
             \tuse-environment parent\n\
             \tdefine-layer {\n\
             \t\tdirectory /c\n\
             \t}\n\
             }\n",
        )
        .unwrap();

        let flat = flatten_one(&config, "child").unwrap();
        assert_eq!(flat.layers.len(), 2);
        assert_eq!(
            flat.layers[0].kind,
            LayerKind::Layer {
                directory: "/p".into()
            }
        );
        assert_eq!(
            flat.layers[1].kind,
            LayerKind::Layer {
                directory: "/c".into()
            }
        );
    }

    #[test]
    fn flattening_is_fixpoint() {
        let config = parse_str(
            "environment a {\n\
             \tdefine-layer {\n\
             \t\tdirectory /a\n\
             \t}\n\
             }\n\
             environment b {\n\
             \tuse-environment a\n\
             \tuse-environment a\n\
             }\n",
        )
        .unwrap();

        let once = flatten_one(&config, "b").unwrap();
        // Duplicates are preserved, not collapsed.
        assert_eq!(once.layers.len(), 2);

        // A flat environment contains no references, so flattening its
        // layer list again changes nothing.
        assert!(once.layers.iter().all(|layer| !layer.is_reference()));
    }

    #[test]
    fn cycle_is_detected() {
        let config = parse_str(
            "environment a {\n\
             \tuse-environment b\n\
             }\n\
             environment b {\n\
             \tuse-environment a\n\
             }\n",
        )
        .unwrap();

        let err = flatten_one(&config, "a").unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn missing_reference_is_an_error() {
        let config = parse_str("environment a {\n\tuse-environment ghost\n}\n").unwrap();
        let err = flatten_one(&config, "a").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn image_must_be_bottom() {
        let config = parse_str(
            "environment base {\n\
             \tdefine-image {\n\
             \t\timage leap:15.3\n\
             \t}\n\
             }\n\
             environment bad {\n\
             \tdefine-layer {\n\
             \t\tdirectory /l\n\
             \t}\n\
             \tuse-environment base\n\
             }\n\
             environment good {\n\
             \tuse-environment base\n\
             \tdefine-layer {\n\
             \t\tdirectory /l\n\
             \t}\n\
             }\n",
        )
        .unwrap();

        assert!(flatten_one(&config, "bad").is_err());
        let good = flatten_one(&config, "good").unwrap();
        assert!(good.layers[0].is_image());
    }
}
