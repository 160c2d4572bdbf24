use std::io::Write;

use super::*;

#[test]
fn parsing() {
    let tests = [
        ("", ProfdConfig::default()),
        (
            "address: 0.0.0.0:8080",
            ProfdConfig {
                address: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
                ..Default::default()
            },
        ),
        (
            "address: 127.0.0.1:8080",
            ProfdConfig {
                address: Some(SocketAddr::from(([127, 0, 0, 1], 8080))),
                ..Default::default()
            },
        ),
        (
            "address: '[::]:8080'",
            ProfdConfig {
                address: Some(SocketAddr::from((
                    [0u16, 0, 0, 0, 0, 0, 0, 0],
                    8080,
                ))),
                ..Default::default()
            },
        ),
        (
            "expose_metrics: true",
            ProfdConfig {
                expose_metrics: Some(true),
                ..Default::default()
            },
        ),
        (
            r#"
            address: 127.0.0.1:9000
            expose_metrics: false
            "#,
            ProfdConfig {
                address: Some(SocketAddr::from(([127, 0, 0, 1], 9000))),
                expose_metrics: Some(false),
            },
        ),
    ];

    for (input, expected) in tests {
        let config = ProfdConfig::try_from(input).unwrap();
        assert_eq!(config, expected, "failed on: {input}");
    }
}

#[test]
fn parsing_errors() {
    let tests = [
        "address: not-an-address",
        "address: 42",
        "expose_metrics: sure",
        "unknown_field: true",
        "- a\n- list",
    ];

    for input in tests {
        assert!(
            ProfdConfig::try_from(input).is_err(),
            "should have failed on: {input}"
        );
    }
}

#[test]
fn update() {
    let mut config = ProfdConfig {
        address: Some(SocketAddr::from(([0, 0, 0, 0], 9000))),
        expose_metrics: None,
    };

    config.update(&ProfdConfig {
        address: Some(SocketAddr::from(([127, 0, 0, 1], 8080))),
        expose_metrics: Some(true),
    });

    assert_eq!(config.address(), SocketAddr::from(([127, 0, 0, 1], 8080)));
    assert!(config.expose_metrics());

    // None fields leave the previous value in place
    config.update(&ProfdConfig::default());
    assert_eq!(config.address(), SocketAddr::from(([127, 0, 0, 1], 8080)));
    assert!(config.expose_metrics());
}

#[test]
fn file_loading() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "address: 127.0.0.1:8080").unwrap();

    let config = ProfdConfigBuilder::new()
        .add_files(&[file.path()])
        .load_files()
        .unwrap();

    assert_eq!(config.address(), SocketAddr::from(([127, 0, 0, 1], 8080)));

    // Missing files are skipped
    let config = ProfdConfigBuilder::new()
        .add_files(&["/does/not/exist.yml"])
        .load_files()
        .unwrap();
    assert_eq!(config, ProfdConfig::default());
}
