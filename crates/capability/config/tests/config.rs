use gateway_config::{ConfigError, GatewayConfig};

// 环境变量是进程级共享状态，所有断言放在同一个测试中顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::remove_var("GATEWAY_BACKEND");
        std::env::remove_var("GATEWAY_TOKEN_TTL_SECONDS");
        std::env::remove_var("GATEWAY_ADMIN_USERNAME");
        std::env::remove_var("GATEWAY_ADMIN_PASSWORD");
        std::env::remove_var("GATEWAY_MAPPING_FILE");
    }
    let config = GatewayConfig::from_env().expect("defaults");
    assert_eq!(config.backend, "transport");
    assert_eq!(config.token_ttl_seconds, 28_800);
    assert_eq!(config.mapping_file.to_str(), Some("mappings.json"));
    assert!(config.admin_username.is_none());

    unsafe {
        std::env::set_var("GATEWAY_BACKEND", "Synthetic");
        std::env::set_var("GATEWAY_TOKEN_TTL_SECONDS", "3600");
        std::env::set_var("GATEWAY_PASSWORD_ITERATIONS", "1000");
        std::env::set_var("GATEWAY_MAPPING_FILE", "/tmp/gateway-mappings.json");
        std::env::set_var("GATEWAY_TRANSFER_INTERVAL_MS", "250");
        std::env::set_var("GATEWAY_ADMIN_USERNAME", "admin");
        std::env::set_var("GATEWAY_ADMIN_PASSWORD", "admin123");
    }
    let config = GatewayConfig::from_env().expect("config");
    assert_eq!(config.backend, "synthetic");
    assert_eq!(config.token_ttl_seconds, 3600);
    assert_eq!(config.password_iterations, 1000);
    assert_eq!(config.transfer_interval_ms, 250);
    assert_eq!(config.admin_username.as_deref(), Some("admin"));

    unsafe {
        std::env::set_var("GATEWAY_TOKEN_TTL_SECONDS", "0");
    }
    assert!(matches!(
        GatewayConfig::from_env(),
        Err(ConfigError::Invalid(key, _)) if key == "GATEWAY_TOKEN_TTL_SECONDS"
    ));

    unsafe {
        std::env::set_var("GATEWAY_TOKEN_TTL_SECONDS", "3600");
        std::env::set_var("GATEWAY_BACKEND", "carrier-pigeon");
    }
    assert!(GatewayConfig::from_env().is_err());

    unsafe {
        std::env::set_var("GATEWAY_BACKEND", "transport");
        std::env::remove_var("GATEWAY_ADMIN_PASSWORD");
    }
    assert!(matches!(GatewayConfig::from_env(), Err(ConfigError::Missing(_))));
}
