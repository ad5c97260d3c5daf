//! Tests for the configuration module.

use super::*;

#[test]
fn test_default_config() {
    let config = CentralConfig::default();
    assert_eq!(config.common.data_dir, "./data");
    assert_eq!(config.common.log_level, "info");
    assert_eq!(config.common.agent_color, "black");
    assert_eq!(config.model.architecture, "enhanced");
    assert_eq!(config.replay.max_games, 10000);
    assert_eq!(config.web.host, "0.0.0.0");
    assert_eq!(config.web.port, 8000);
}

#[test]
fn test_training_defaults() {
    let config = CentralConfig::default();
    let t = &config.training;
    assert!((t.learning_rate - 0.0001).abs() < f64::EPSILON);
    assert!((t.gamma - 0.99).abs() < f64::EPSILON);
    assert!((t.value_loss_coef - 0.5).abs() < f64::EPSILON);
    assert!((t.entropy_coef - 0.01).abs() < f64::EPSILON);
    assert!((t.max_loss_threshold - 10.0).abs() < f64::EPSILON);
    assert_eq!(t.batch_size, 32);
    assert_eq!(t.save_interval, 10);
    assert!(t.prioritized_replay);
    assert!((t.priority_temperature - 0.8).abs() < f64::EPSILON);
    assert!((t.recent_ratio - 0.8).abs() < f64::EPSILON);
}

#[test]
fn test_exploration_defaults() {
    let config = CentralConfig::default();
    assert!((config.exploration.decay_rate - 0.995).abs() < f64::EPSILON);
    assert_eq!(config.exploration.win_rate_window, 50);
}

#[test]
fn test_draughts_env_overrides() {
    std::env::set_var("DRAUGHTS_MODEL_ARCHITECTURE", "baseline");
    std::env::set_var("DRAUGHTS_REPLAY_MAX_GAMES", "7");
    std::env::set_var("DRAUGHTS_TRAINING_GAMMA", "0.5");

    let config = load_config();
    assert_eq!(config.model.architecture, "baseline");
    assert_eq!(config.replay.max_games, 7);
    assert!((config.training.gamma - 0.5).abs() < f64::EPSILON);

    std::env::remove_var("DRAUGHTS_MODEL_ARCHITECTURE");
    std::env::remove_var("DRAUGHTS_REPLAY_MAX_GAMES");
    std::env::remove_var("DRAUGHTS_TRAINING_GAMMA");
}

#[test]
fn test_unparseable_override_is_ignored() {
    std::env::set_var("DRAUGHTS_TRAINER_HEALTH_PORT", "not-a-port");
    let config = apply_env_overrides(CentralConfig::default());
    assert_eq!(config.trainer.health_port, 8081);
    std::env::remove_var("DRAUGHTS_TRAINER_HEALTH_PORT");
}

#[test]
fn test_list_override() {
    std::env::set_var(
        "DRAUGHTS_WEB_ALLOWED_ORIGINS",
        "http://a.example, http://b.example,",
    );
    let config = apply_env_overrides(CentralConfig::default());
    assert_eq!(
        config.web.allowed_origins,
        vec!["http://a.example".to_string(), "http://b.example".to_string()]
    );
    std::env::remove_var("DRAUGHTS_WEB_ALLOWED_ORIGINS");
}

#[test]
fn test_parse_config_toml() {
    let toml_content = r#"
[common]
data_dir = "/custom/data"

[model]
architecture = "baseline"
residual_blocks = 1

[training]
batch_size = 128
prioritized_replay = false
"#;
    let config: CentralConfig = toml::from_str(toml_content).unwrap();
    assert_eq!(config.common.data_dir, "/custom/data");
    assert_eq!(config.model.architecture, "baseline");
    assert_eq!(config.model.residual_blocks, 1);
    assert_eq!(config.training.batch_size, 128);
    assert!(!config.training.prioritized_replay);
}

#[test]
fn test_partial_config() {
    let toml_content = r#"
[replay]
max_games = 50
"#;
    let config: CentralConfig = toml::from_str(toml_content).unwrap();
    assert_eq!(config.replay.max_games, 50);
    assert_eq!(config.replay.db_path, "./data/replay.db"); // Default
    assert_eq!(config.common.agent_color, "black"); // Default
    assert_eq!(config.web.port, 8000); // Default
}

#[test]
fn test_load_from_missing_path_falls_back() {
    let config = load_from_path(std::path::Path::new("/definitely/not/here.toml"));
    assert_eq!(config.web.port, 8000);
}

#[test]
fn test_load_from_invalid_toml_falls_back() {
    let dir = std::env::temp_dir().join(format!("draughts-cfg-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");
    std::fs::write(&path, "this is [not toml").unwrap();

    let config = load_from_path(&path);
    assert_eq!(config.model.channels, 64);

    std::fs::remove_dir_all(&dir).ok();
}
