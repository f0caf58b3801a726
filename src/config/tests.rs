use super::*;

#[test]
fn defaults_are_sane() {
    let cfg = Config::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_body_size, DEFAULT_MAX_BODY_SIZE);
    assert!(!cfg.include_all);
}

#[test]
fn file_layer_overrides_defaults() {
    let file = FileConfig {
        max_body_size: Some(2048),
        include_all: Some(true),
        ..Default::default()
    };
    let defaults = Config::default();
    let merged = Config {
        max_body_size: file.max_body_size.unwrap_or(defaults.max_body_size),
        include_all: file.include_all.unwrap_or(defaults.include_all),
        ..defaults
    };
    assert_eq!(merged.max_body_size, 2048);
    assert!(merged.include_all);
}

#[test]
fn validate_rejects_zero_body_cap() {
    let mut cfg = Config::default();
    cfg.max_body_size = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_unknown_log_level() {
    let mut cfg = Config::default();
    cfg.logging.level = "loud".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_empty_wrapped_binary() {
    let mut cfg = Config::default();
    cfg.wrapped_binary = "".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn to_toml_round_trips_through_file_config() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml();
    let parsed: FileConfig = toml::from_str(&toml_str).expect("valid toml");
    assert_eq!(parsed.max_body_size, Some(cfg.max_body_size));
    assert_eq!(parsed.wrapped_binary, Some(cfg.wrapped_binary));
}
