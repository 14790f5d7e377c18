use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub redis_url: String,
    pub cache_backend: String,
    pub jwt_secret: String,
    pub auth_dev_bypass_enabled: bool,
    pub cache_first_page_ttl_ms: u64,
    pub cache_history_page_ttl_ms: u64,
    pub cache_unread_ttl_ms: u64,
    pub reaction_lock_ttl_ms: u64,
    pub poll_message_limit: usize,
    pub poll_deleted_window_ms: u64,
    pub poll_thread_deleted_window_ms: u64,
    pub poll_circuit_fail_threshold: u32,
    pub poll_circuit_open_ms: u64,
    pub poll_emergency_stop: bool,
    pub reaction_event_retention_ms: u64,
    pub deletion_record_retention_ms: u64,
    pub retention_sweep_interval_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("cache_backend", "memory")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("auth_dev_bypass_enabled", false)?
            .set_default("cache_first_page_ttl_ms", 5_000)?
            .set_default("cache_history_page_ttl_ms", 60_000)?
            .set_default("cache_unread_ttl_ms", 60_000)?
            .set_default("reaction_lock_ttl_ms", 10_000)?
            .set_default("poll_message_limit", 50)?
            .set_default("poll_deleted_window_ms", 30_000)?
            .set_default("poll_thread_deleted_window_ms", 300_000)?
            .set_default("poll_circuit_fail_threshold", 5)?
            .set_default("poll_circuit_open_ms", 15_000)?
            .set_default("poll_emergency_stop", false)?
            .set_default("reaction_event_retention_ms", 3_600_000)?
            .set_default("deletion_record_retention_ms", 3_600_000)?
            .set_default("retention_sweep_interval_ms", 300_000)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
