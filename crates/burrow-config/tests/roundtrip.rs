//! Config loader integration: files on disk, includes, round-trip.

use std::fs;
use std::path::PathBuf;

use burrow_config::{flatten_one, load, parse_str, LayerKind, PathKind};

#[test]
fn load_with_includes() {
    let temp = tempfile::tempdir().unwrap();

    let included = temp.path().join("extra.conf");
    fs::write(
        &included,
        "environment extra {\n\
         \tdefine-layer {\n\
         \t\tdirectory /opt/extra\n\
         \t}\n\
         }\n",
    )
    .unwrap();

    let main = temp.path().join("main.conf");
    fs::write(
        &main,
        format!(
            "client-path /usr/bin/burrow\n\
             config {}\n\
             config {}/does-not-exist.conf\n\
             environment main {{\n\
             \tuse-environment extra\n\
             }}\n",
            included.display(),
            temp.path().display(),
        ),
    )
    .unwrap();

    let config = load(&main).unwrap();
    assert!(config.environment("extra").is_some());
    assert!(config.environment("main").is_some());

    let flat = flatten_one(&config, "main").unwrap();
    assert_eq!(flat.layers.len(), 1);
    assert_eq!(
        flat.layers[0].kind,
        LayerKind::Layer {
            directory: PathBuf::from("/opt/extra")
        }
    );
}

#[test]
fn include_directory_is_read() {
    let temp = tempfile::tempdir().unwrap();
    let conf_dir = temp.path().join("conf.d");
    fs::create_dir(&conf_dir).unwrap();
    fs::write(
        conf_dir.join("10-first.conf"),
        "environment first {\n}\n",
    )
    .unwrap();
    fs::write(
        conf_dir.join("20-second.conf"),
        "environment second {\n}\n",
    )
    .unwrap();
    // Dotfiles are skipped.
    fs::write(conf_dir.join(".hidden.conf"), "garbage that would fail\n").unwrap();

    let main = temp.path().join("main.conf");
    fs::write(&main, format!("config {}\n", conf_dir.display())).unwrap();

    let config = load(&main).unwrap();
    assert_eq!(config.environments.len(), 2);
    assert_eq!(config.environments[0].name, "first");
    assert_eq!(config.environments[1].name, "second");
}

#[test]
fn parse_error_reports_include_chain() {
    let temp = tempfile::tempdir().unwrap();

    let broken = temp.path().join("broken.conf");
    fs::write(&broken, "environment x {\n\tnonsense here\n}\n").unwrap();

    let main = temp.path().join("main.conf");
    fs::write(&main, format!("config {}\n", broken.display())).unwrap();

    let err = load(&main).unwrap_err().to_string();
    assert!(err.contains("broken.conf:2"), "{err}");
    assert!(err.contains("included from"), "{err}");
    assert!(err.contains("main.conf:1"), "{err}");
}

#[test]
fn full_round_trip_through_disk() {
    let text = "\
client-path /usr/bin/burrow

profile yast2 {
\twrapper /usr/lib/burrow/bin/yast2
\tcommand /sbin/yast2
\tenvironment yast
}

environment base {
\tdefine-image {
\t\timage registry.example.com/leap:15.3
\t}
}

environment yast {
\tprovides yast2-4.2.1
\trequires base-1.0
\tuse-environment base
\tdefine-layer {
\t\tdirectory /opt/layers/yast
\t\tuse ldconfig
\t\tbind /sbin/yast2
\t\tbind-children /usr/lib/yast2
\t\toverlay /usr
\t\toverlay-children /etc
\t\tmount /tmp tmpfs - size=64m
\t\tmount /proc proc
\t\twormhole /usr/bin/reenter
\t}
}
";

    let config = parse_str(text).unwrap();

    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("emitted.conf");
    config.write(&path).unwrap();

    let reparsed = load(&path).unwrap();
    assert_eq!(reparsed, config);

    // Directive order and kinds survive.
    let layer = &reparsed.environment("yast").unwrap().layers[1];
    let kinds: Vec<&'static str> = layer
        .paths
        .iter()
        .map(|directive| directive.kind.keyword())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "bind",
            "bind-children",
            "overlay",
            "overlay-children",
            "mount",
            "mount",
            "wormhole"
        ]
    );
    assert!(matches!(
        layer.paths[4].kind,
        PathKind::Mount { ref options, .. } if options.as_deref() == Some("size=64m")
    ));
}
