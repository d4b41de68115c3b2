//! Integration tests for celfs-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use celfs_config::testing::TestEnvironment;

/// Test config loading from real global config file
#[test]
fn test_load_global_config_from_file() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(
        r#"
[client]
explicit_predicate_attempts = 2
current_predicate_attempts = 8

[file]
content_type = "text/plain"
cache_enabled = true

[directory]
update_attempts = 3
"#,
    )
    .unwrap();

    let config = env.load_config().unwrap();
    assert_eq!(config.client.explicit_predicate_attempts, 2);
    assert_eq!(config.client.current_predicate_attempts, 8);
    assert_eq!(config.file.content_type, "text/plain");
    assert!(config.file.cache_enabled);
    assert_eq!(config.directory.update_attempts, 3);
    // Unspecified keys keep their defaults
    assert_eq!(config.directory.exclusive_link_attempts, 1);
    assert_eq!(config.backoff.cap_ms, 100);
}

/// Test config hierarchy: project config overrides global key by key
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(
        r#"
[file]
content_type = "text/plain"
block_size = 4096

[backoff]
initial_ms = 5
"#,
    )
    .unwrap();
    env.write_project_config(
        r#"
[file]
block_size = 65536
"#,
    )
    .unwrap();

    let config = env.load_config().unwrap();
    assert_eq!(config.file.block_size, 65536);
    assert_eq!(config.file.content_type, "text/plain");
    assert_eq!(config.backoff.initial_ms, 5);
}

/// Test malformed config reports a parse error
#[test]
fn test_malformed_config_is_rejected() {
    let env = TestEnvironment::new().unwrap();
    env.write_project_config("[file\nblock_size = ").unwrap();
    assert!(env.load_config().is_err());

    env.write_project_config("[file]\nblock_size = \"big\"\n").unwrap();
    assert!(env.load_config().is_err());
}

/// Test the rendered default config parses back
#[test]
fn test_default_toml_parses() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(&celfs_config::Config::default_toml().unwrap())
        .unwrap();
    let config = env.load_config().unwrap();
    assert_eq!(
        config.file.replication,
        celfs_config::Config::default().file.replication
    );
}
