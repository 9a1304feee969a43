//! Capture-to-config flow without mounts: a harvested tree is analysed,
//! the emitted config parses back, and the resulting environment
//! flattens onto its base.

use std::fs;
use std::path::Path;

use burrow::autoprofile::{self, AutoProfileOptions};
use burrow::registry::CapabilityRegistry;
use burrow_config::{load, parse_str, Config, EnvironmentConfig, LayerConfig};

/// Lay out what a digger session leaves behind: a tree with a new
/// binary, and the `.digger.conf` describing it.
fn fake_harvested_root(root: &Path) {
    let tree = root.join("tree");
    fs::create_dir_all(tree.join("usr/bin")).unwrap();
    fs::write(tree.join("usr/bin/newbin"), "#!/bin/sh\necho new\n").unwrap();

    let mut env = EnvironmentConfig::new("leap-build");
    env.provides.push("python3-devel-3.9".to_string());
    env.requires.push("leap-img".to_string());
    env.layers.push(LayerConfig::for_directory("tree"));

    let config = Config {
        environments: vec![env],
        ..Config::default()
    };
    config.write(&root.join(".digger.conf")).unwrap();
}

#[test]
fn digger_config_parses_back() {
    let temp = tempfile::tempdir().unwrap();
    fake_harvested_root(temp.path());

    let config = load(&temp.path().join(".digger.conf")).unwrap();
    assert_eq!(config.environments.len(), 1);

    let env = &config.environments[0];
    assert_eq!(env.name, "leap-build");
    assert_eq!(env.provides, vec!["python3-devel-3.9".to_string()]);
    assert_eq!(env.layers.len(), 1);
    assert_eq!(
        env.layers[0],
        LayerConfig::for_directory("tree"),
    );
}

#[test]
fn autoprofile_turns_capture_into_layer_config() {
    let temp = tempfile::tempdir().unwrap();
    fake_harvested_root(temp.path());

    let opts = AutoProfileOptions {
        overlay_root: temp.path().to_path_buf(),
        environment_name: Some("leap-build".to_string()),
        output: Some("auto".to_string()),
        profile: "default".to_string(),
        provides: vec!["python3-devel-3.9".to_string()],
        ..AutoProfileOptions::default()
    };

    let analysis = autoprofile::run(&opts).unwrap();
    assert!(analysis.digger_layout);

    let out = autoprofile::output_path(&analysis, &opts).unwrap().unwrap();
    analysis.config.write(&out).unwrap();

    let emitted = load(&out).unwrap();
    let env = emitted.environment("leap-build").unwrap();
    assert_eq!(env.provides, vec!["python3-devel-3.9".to_string()]);

    let layer = &env.layers[0];
    assert!(layer
        .paths
        .iter()
        .any(|directive| directive.path == "/usr" && directive.kind.keyword() == "overlay"));
}

#[test]
fn captured_environment_flattens_onto_base() {
    // Scenario: the emitted environment stacks on a base resolved by
    // capability.
    let temp = tempfile::tempdir().unwrap();

    let combined = parse_str(&format!(
        "environment base {{\n\
         \tprovides base-tools-1.0\n\
         \tdefine-layer {{\n\
         \t\tdirectory {0}/base\n\
         \t}}\n\
         }}\n\
         environment captured {{\n\
         \trequires base-tools-1.0\n\
         \tuse-environment base\n\
         \tdefine-layer {{\n\
         \t\tdirectory {0}/tree\n\
         \t\toverlay /usr\n\
         \t}}\n\
         }}\n",
        temp.path().display()
    ))
    .unwrap();

    let flat = burrow_config::flatten_one(&combined, "captured").unwrap();
    assert_eq!(flat.layers.len(), 2);
    assert_eq!(flat.requires, vec!["base-tools-1.0".to_string()]);
}

#[test]
fn registry_resolves_best_capability_version() {
    let temp = tempfile::tempdir().unwrap();
    let registry_dir = temp.path().join("registry");
    fs::create_dir(&registry_dir).unwrap();
    let registry = CapabilityRegistry::new(&registry_dir);

    let register = |id: &str, file: &str| {
        let path = temp.path().join(file);
        fs::write(&path, "environment e {\n}\n").unwrap();
        registry.register(&[id.to_string()], &path).unwrap();
        fs::canonicalize(&path).unwrap()
    };

    register("python3-devel-3.7.9", "a.conf");
    let expected = register("python3-devel-3.8.1", "b.conf");
    register("python3-devel-3.8.0rc", "c.conf");

    let best = registry.best_match("python3-devel-3.8").unwrap().unwrap();
    assert_eq!(best, expected);
}
