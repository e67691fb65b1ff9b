use std::time::Duration;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use serde::{Deserialize, Serialize};
use anyhow::{Result, Context};

use crate::presence::{BackoffConfig, OrchestratorConfig, SupervisorConfig};
use crate::security::{RateLimitConfig, SpamGuardConfig};

/// 机器人配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// 聊天平台 Bot Token（不会出现在 show-config 输出中）
    #[serde(skip_serializing, default)]
    pub discord_token: String,
    /// 日志级别
    pub log_level: String,
    /// 模拟语音连接失败率（没有真实平台连接时使用）
    pub simulate_failure_rate: f64,
    /// 模拟已建立会话在心跳时掉线的概率
    #[serde(default)]
    pub simulate_drop_rate: f64,
    /// 常驻语音配置
    pub voice: VoiceConfig,
    /// 请求准入配置
    pub admission: AdmissionConfig,
    /// 统计配置
    pub analytics: AnalyticsConfig,
    /// Keep-alive HTTP 服务配置
    pub http: HttpConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            log_level: "info".to_string(),
            simulate_failure_rate: 0.0,
            simulate_drop_rate: 0.0,
            voice: VoiceConfig::default(),
            admission: AdmissionConfig::default(),
            analytics: AnalyticsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| "配置文件格式错误")?;

        Ok(toml_config.into())
    }

    /// 从环境变量加载配置（部署平台约定的变量不带前缀，其余使用 UPIBOT_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(token) = env::var("DISCORD_TOKEN") {
            self.discord_token = token;
        }
        if let Ok(ids) = env::var("VOICE_CHANNEL_IDS") {
            self.voice.channel_ids = parse_channel_ids(&ids)
                .context("VOICE_CHANNEL_IDS 格式错误")?;
        }
        if let Ok(max) = env::var("MAX_COMMANDS_PER_MINUTE") {
            self.admission.max_requests = max.parse().unwrap_or(self.admission.max_requests);
        }
        if let Ok(days) = env::var("ANALYTICS_RETENTION_DAYS") {
            self.analytics.retention_days = days.parse().unwrap_or(self.analytics.retention_days);
        }
        if let Ok(host) = env::var("HOST") {
            self.http.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            self.http.port = port.parse().unwrap_or(self.http.port);
        }

        if let Ok(log_level) = env::var("UPIBOT_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(rate) = env::var("UPIBOT_SIMULATE_FAILURE_RATE") {
            self.simulate_failure_rate = rate.parse().unwrap_or(self.simulate_failure_rate);
        }
        if let Ok(rate) = env::var("UPIBOT_SIMULATE_DROP_RATE") {
            self.simulate_drop_rate = rate.parse().unwrap_or(self.simulate_drop_rate);
        }
        if let Ok(window) = env::var("UPIBOT_WINDOW_SECS") {
            self.admission.window_secs = window.parse().unwrap_or(self.admission.window_secs);
        }
        if let Ok(threshold) = env::var("UPIBOT_SPAM_THRESHOLD") {
            self.admission.spam_threshold = threshold.parse().unwrap_or(self.admission.spam_threshold);
        }
        if let Ok(timeout) = env::var("UPIBOT_CONNECT_TIMEOUT_SECS") {
            self.voice.connect_timeout_secs = timeout.parse().unwrap_or(self.voice.connect_timeout_secs);
        }
        if let Ok(base) = env::var("UPIBOT_BACKOFF_BASE_MS") {
            self.voice.backoff_base_ms = base.parse().unwrap_or(self.voice.backoff_base_ms);
        }
        if let Ok(max) = env::var("UPIBOT_BACKOFF_MAX_MS") {
            self.voice.backoff_max_ms = max.parse().unwrap_or(self.voice.backoff_max_ms);
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) -> Result<()> {
        if let Some(ids) = &cli.voice_channel_ids {
            self.voice.channel_ids = parse_channel_ids(ids)
                .context("--voice-channel-ids 格式错误")?;
        }
        if let Some(host) = &cli.host {
            self.http.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.http.port = port;
        }
        if let Some(rate) = cli.simulate_failure_rate {
            self.simulate_failure_rate = rate;
        }
        if let Some(rate) = cli.simulate_drop_rate {
            self.simulate_drop_rate = rate;
        }
        if let Some(log_level) = cli.get_log_level() {
            self.log_level = log_level;
        }
        Ok(())
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 配置文件（如果存在）
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new("config.toml").exists() {
            info!("📄 从默认配置文件加载: config.toml");
            Self::from_toml_file("config.toml")?
        } else {
            Self::new()
        };

        // 2. 环境变量
        config.merge_from_env()?;

        // 3. 命令行参数（最高优先级）
        config.merge_from_cli(cli)?;

        Ok(config)
    }

    /// 检查配置，返回全部问题（为空表示有效）
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.validate_runtime();
        problems.extend(self.validate_deployment());
        problems
    }

    /// 运行参数问题：时间间隔、上限、退避与抖动范围
    ///
    /// 这些值会直接进入定时器和限流器，任何模式下都必须修正。
    pub fn validate_runtime(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !(0.0..=1.0).contains(&self.simulate_failure_rate) {
            problems.push(format!("simulate_failure_rate 必须在 [0, 1] 内: {}", self.simulate_failure_rate));
        }
        if !(0.0..=1.0).contains(&self.simulate_drop_rate) {
            problems.push(format!("simulate_drop_rate 必须在 [0, 1] 内: {}", self.simulate_drop_rate));
        }
        problems.extend(self.voice.validate());
        problems.extend(self.admission.validate());

        if self.analytics.enabled && self.analytics.prune_interval_secs == 0 {
            problems.push("analytics.prune_interval_secs 必须大于 0".to_string());
        }

        problems
    }

    /// 部署问题：凭据与语音频道，开发模式下可以忽略
    pub fn validate_deployment(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.discord_token.trim().is_empty() {
            problems.push("DISCORD_TOKEN 未设置".to_string());
        }
        if self.voice.channel_ids.is_empty() {
            problems.push("未配置语音频道（VOICE_CHANNEL_IDS）".to_string());
        }

        problems
    }
}

/// 解析逗号分隔的频道 ID 列表
pub fn parse_channel_ids(raw: &str) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = part
            .parse::<u64>()
            .with_context(|| format!("无效的频道 ID: {}", part))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// 常驻语音配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// 需要常驻的语音频道
    pub channel_ids: Vec<u64>,
    pub connect_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub missed_heartbeat_tolerance: u32,
    pub heartbeat_staleness_secs: u64,
    /// 心跳延迟告警阈值（毫秒）
    pub latency_warn_ms: u64,
    /// 存活检查间隔
    pub poll_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            channel_ids: Vec::new(),
            connect_timeout_secs: 5,
            heartbeat_interval_secs: 15,
            heartbeat_timeout_secs: 5,
            missed_heartbeat_tolerance: 3,
            heartbeat_staleness_secs: 60,
            latency_warn_ms: 200,
            poll_interval_secs: 30,
            backoff_base_ms: 1_000,
            backoff_max_ms: 32_000,
            jitter_fraction: 0.2,
        }
    }
}

impl VoiceConfig {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.connect_timeout_secs == 0 {
            problems.push("voice.connect_timeout_secs 必须大于 0".to_string());
        }
        if self.heartbeat_interval_secs == 0 {
            problems.push("voice.heartbeat_interval_secs 必须大于 0".to_string());
        }
        if self.heartbeat_timeout_secs == 0 {
            problems.push("voice.heartbeat_timeout_secs 必须大于 0".to_string());
        }
        if self.missed_heartbeat_tolerance == 0 {
            problems.push("voice.missed_heartbeat_tolerance 必须大于 0".to_string());
        }
        if self.heartbeat_staleness_secs < self.heartbeat_interval_secs {
            problems.push("voice.heartbeat_staleness_secs 不能小于心跳间隔".to_string());
        }
        if self.poll_interval_secs == 0 {
            problems.push("voice.poll_interval_secs 必须大于 0".to_string());
        }
        if self.backoff_base_ms == 0 {
            problems.push("voice.backoff_base_ms 必须大于 0".to_string());
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            problems.push(format!(
                "voice.backoff_base_ms ({}) 不能大于 backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            problems.push(format!("voice.jitter_fraction 必须在 [0, 1] 内: {}", self.jitter_fraction));
        }
        problems
    }
}

impl From<&VoiceConfig> for OrchestratorConfig {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            supervisor: SupervisorConfig {
                connect_timeout: Duration::from_secs(config.connect_timeout_secs),
                heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
                heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
                missed_heartbeat_tolerance: config.missed_heartbeat_tolerance,
                heartbeat_staleness: Duration::from_secs(config.heartbeat_staleness_secs),
                latency_warn: Duration::from_millis(config.latency_warn_ms),
                backoff: BackoffConfig {
                    base_delay: Duration::from_millis(config.backoff_base_ms),
                    max_delay: Duration::from_millis(config.backoff_max_ms),
                    jitter_fraction: config.jitter_fraction,
                },
            },
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

/// 请求准入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// 滑动窗口长度（秒）
    pub window_secs: u64,
    /// 每个窗口允许的请求数
    pub max_requests: usize,
    pub spam_threshold: u32,
    pub spam_decay_amount: u32,
    pub spam_decay_interval_secs: u64,
    pub spam_ceiling: u32,
    /// 空闲用户回收时间
    pub idle_eviction_secs: u64,
    /// 回收任务间隔
    pub eviction_sweep_interval_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 5,
            spam_threshold: 5,
            spam_decay_amount: 1,
            spam_decay_interval_secs: 10,
            spam_ceiling: 20,
            idle_eviction_secs: 3600,
            eviction_sweep_interval_secs: 300,
        }
    }
}

impl AdmissionConfig {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.window_secs == 0 {
            problems.push("admission.window_secs 必须大于 0".to_string());
        }
        if self.max_requests == 0 {
            problems.push("admission.max_requests 必须至少为 1".to_string());
        }
        if self.spam_threshold == 0 {
            problems.push("admission.spam_threshold 必须大于 0".to_string());
        }
        if self.spam_ceiling < self.spam_threshold {
            problems.push("admission.spam_ceiling 不能小于 spam_threshold".to_string());
        }
        if self.spam_decay_interval_secs == 0 {
            problems.push("admission.spam_decay_interval_secs 必须大于 0".to_string());
        }
        if self.idle_eviction_secs < self.window_secs {
            problems.push("admission.idle_eviction_secs 不能小于窗口长度".to_string());
        }
        if self.eviction_sweep_interval_secs == 0 {
            problems.push("admission.eviction_sweep_interval_secs 必须大于 0".to_string());
        }
        problems
    }

    pub fn eviction_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_sweep_interval_secs)
    }
}

impl From<&AdmissionConfig> for RateLimitConfig {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            max_events: config.max_requests,
            idle_eviction: Duration::from_secs(config.idle_eviction_secs),
        }
    }
}

impl From<&AdmissionConfig> for SpamGuardConfig {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            threshold: config.spam_threshold,
            decay_amount: config.spam_decay_amount,
            decay_interval: Duration::from_secs(config.spam_decay_interval_secs),
            ceiling: config.spam_ceiling,
            idle_eviction: Duration::from_secs(config.idle_eviction_secs),
        }
    }
}

/// 统计配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    /// 保留天数
    pub retention_days: u64,
    pub prune_interval_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 30,
            prune_interval_secs: 3600,
        }
    }
}

impl AnalyticsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

/// Keep-alive HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 10000,
        }
    }
}

impl HttpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    bot: Option<TomlBotConfig>,
    voice: Option<TomlVoiceConfig>,
    admission: Option<TomlAdmissionConfig>,
    analytics: Option<TomlAnalyticsConfig>,
    http: Option<TomlHttpConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlBotConfig {
    discord_token: Option<String>,
    simulate_failure_rate: Option<f64>,
    simulate_drop_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TomlVoiceConfig {
    channel_ids: Option<Vec<u64>>,
    connect_timeout_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    missed_heartbeat_tolerance: Option<u32>,
    heartbeat_staleness_secs: Option<u64>,
    latency_warn_ms: Option<u64>,
    poll_interval_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    jitter_fraction: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TomlAdmissionConfig {
    window_secs: Option<u64>,
    max_requests: Option<usize>,
    spam_threshold: Option<u32>,
    spam_decay_amount: Option<u32>,
    spam_decay_interval_secs: Option<u64>,
    spam_ceiling: Option<u32>,
    idle_eviction_secs: Option<u64>,
    eviction_sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlAnalyticsConfig {
    enabled: Option<bool>,
    retention_days: Option<u64>,
    prune_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlHttpConfig {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

impl From<TomlConfig> for BotConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = Self::default();

        if let Some(bot) = toml.bot {
            if let Some(token) = bot.discord_token {
                config.discord_token = token;
            }
            if let Some(rate) = bot.simulate_failure_rate {
                config.simulate_failure_rate = rate;
            }
            if let Some(rate) = bot.simulate_drop_rate {
                config.simulate_drop_rate = rate;
            }
        }

        if let Some(voice) = toml.voice {
            let v = &mut config.voice;
            if let Some(ids) = voice.channel_ids {
                v.channel_ids = ids;
            }
            if let Some(x) = voice.connect_timeout_secs {
                v.connect_timeout_secs = x;
            }
            if let Some(x) = voice.heartbeat_interval_secs {
                v.heartbeat_interval_secs = x;
            }
            if let Some(x) = voice.heartbeat_timeout_secs {
                v.heartbeat_timeout_secs = x;
            }
            if let Some(x) = voice.missed_heartbeat_tolerance {
                v.missed_heartbeat_tolerance = x;
            }
            if let Some(x) = voice.heartbeat_staleness_secs {
                v.heartbeat_staleness_secs = x;
            }
            if let Some(x) = voice.latency_warn_ms {
                v.latency_warn_ms = x;
            }
            if let Some(x) = voice.poll_interval_secs {
                v.poll_interval_secs = x;
            }
            if let Some(x) = voice.backoff_base_ms {
                v.backoff_base_ms = x;
            }
            if let Some(x) = voice.backoff_max_ms {
                v.backoff_max_ms = x;
            }
            if let Some(x) = voice.jitter_fraction {
                v.jitter_fraction = x;
            }
        }

        if let Some(admission) = toml.admission {
            let a = &mut config.admission;
            if let Some(x) = admission.window_secs {
                a.window_secs = x;
            }
            if let Some(x) = admission.max_requests {
                a.max_requests = x;
            }
            if let Some(x) = admission.spam_threshold {
                a.spam_threshold = x;
            }
            if let Some(x) = admission.spam_decay_amount {
                a.spam_decay_amount = x;
            }
            if let Some(x) = admission.spam_decay_interval_secs {
                a.spam_decay_interval_secs = x;
            }
            if let Some(x) = admission.spam_ceiling {
                a.spam_ceiling = x;
            }
            if let Some(x) = admission.idle_eviction_secs {
                a.idle_eviction_secs = x;
            }
            if let Some(x) = admission.eviction_sweep_interval_secs {
                a.eviction_sweep_interval_secs = x;
            }
        }

        if let Some(analytics) = toml.analytics {
            if let Some(enabled) = analytics.enabled {
                config.analytics.enabled = enabled;
            }
            if let Some(days) = analytics.retention_days {
                config.analytics.retention_days = days;
            }
            if let Some(secs) = analytics.prune_interval_secs {
                config.analytics.prune_interval_secs = secs;
            }
        }

        if let Some(http) = toml.http {
            if let Some(enabled) = http.enabled {
                config.http.enabled = enabled;
            }
            if let Some(host) = http.host {
                config.http.host = host;
            }
            if let Some(port) = http.port {
                config.http.port = port;
            }
        }

        if let Some(level) = toml.logging.and_then(|l| l.level) {
            config.log_level = level;
        }

        config
    }
}

/// 早期日志配置（完整配置加载之前用于初始化日志）
#[derive(Debug, Clone, Default)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 只读取配置文件的 [logging] 段；文件缺失或格式错误时返回空配置
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    #[derive(Deserialize)]
    struct LoggingOnly {
        logging: Option<TomlLoggingConfig>,
    }

    let path = config_file.unwrap_or("config.toml");
    let logging = fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<LoggingOnly>(&content).ok())
        .and_then(|parsed| parsed.logging)
        .unwrap_or_default();

    EarlyLoggingConfig {
        level: logging.level,
        format: logging.format,
        file: logging.file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_bot_settings() {
        let config = BotConfig::default();
        assert_eq!(config.admission.max_requests, 5);
        assert_eq!(config.admission.window_secs, 60);
        assert_eq!(config.admission.idle_eviction_secs, 3600);
        assert_eq!(config.voice.connect_timeout_secs, 5);
        assert_eq!(config.voice.latency_warn_ms, 200);
        assert_eq!(config.analytics.retention_days, 30);
        assert_eq!(config.http.port, 10000);
    }

    #[test]
    fn test_toml_sections_override_defaults() {
        let config = BotConfig::from_toml_str(
            r#"
            [bot]
            discord_token = "abc"

            [voice]
            channel_ids = [111, 222]
            backoff_max_ms = 60000

            [admission]
            max_requests = 3

            [http]
            port = 8080

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.discord_token, "abc");
        assert_eq!(config.voice.channel_ids, vec![111, 222]);
        assert_eq!(config.voice.backoff_max_ms, 60_000);
        assert_eq!(config.voice.backoff_base_ms, 1_000);
        assert_eq!(config.admission.max_requests, 3);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.log_level, "debug");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = BotConfig::default();
        config.admission.max_requests = 0;
        config.voice.backoff_base_ms = 64_000;
        config.voice.jitter_fraction = 1.5;
        config.voice.missed_heartbeat_tolerance = 0;

        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("DISCORD_TOKEN")));
        assert!(problems.iter().any(|p| p.contains("VOICE_CHANNEL_IDS")));
        assert!(problems.iter().any(|p| p.contains("max_requests")));
        assert!(problems.iter().any(|p| p.contains("backoff_base_ms")));
        assert!(problems.iter().any(|p| p.contains("jitter_fraction")));
        assert!(problems.iter().any(|p| p.contains("missed_heartbeat_tolerance")));
    }

    #[test]
    fn test_dev_waivable_problems_are_separate() {
        let config = BotConfig::default();
        assert!(config.validate_runtime().is_empty());
        assert_eq!(config.validate_deployment().len(), 2);

        let mut config = BotConfig::default();
        config.discord_token = "abc".to_string();
        config.voice.channel_ids = vec![1];
        config.voice.heartbeat_interval_secs = 0;
        config.voice.poll_interval_secs = 0;
        config.voice.jitter_fraction = f64::NAN;
        config.admission.max_requests = 0;
        config.admission.eviction_sweep_interval_secs = 0;
        config.simulate_drop_rate = 2.0;

        assert!(config.validate_deployment().is_empty());
        let runtime = config.validate_runtime();
        assert!(runtime.iter().any(|p| p.contains("heartbeat_interval_secs")));
        assert!(runtime.iter().any(|p| p.contains("poll_interval_secs")));
        assert!(runtime.iter().any(|p| p.contains("jitter_fraction")));
        assert!(runtime.iter().any(|p| p.contains("max_requests")));
        assert!(runtime.iter().any(|p| p.contains("eviction_sweep_interval_secs")));
        assert!(runtime.iter().any(|p| p.contains("simulate_drop_rate")));
        assert_eq!(config.validate().len(), runtime.len());
    }

    #[test]
    fn test_drop_rate_from_toml() {
        let config = BotConfig::from_toml_str(
            r#"
            [bot]
            simulate_drop_rate = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.simulate_drop_rate, 0.25);
    }

    #[test]
    fn test_parse_channel_ids() {
        assert_eq!(parse_channel_ids("1, 2,,3,2").unwrap(), vec![1, 2, 3]);
        assert!(parse_channel_ids("1,abc").is_err());
        assert!(parse_channel_ids("").unwrap().is_empty());
    }

    #[test]
    fn test_conversions() {
        let voice = VoiceConfig::default();
        let orchestrator = OrchestratorConfig::from(&voice);
        assert_eq!(orchestrator.supervisor.backoff.base_delay, Duration::from_secs(1));
        assert_eq!(orchestrator.supervisor.backoff.max_delay, Duration::from_secs(32));
        assert_eq!(orchestrator.poll_interval, Duration::from_secs(30));

        let admission = AdmissionConfig::default();
        let limit = RateLimitConfig::from(&admission);
        assert_eq!(limit.window, Duration::from_secs(60));
        assert_eq!(limit.max_events, 5);
        let spam = SpamGuardConfig::from(&admission);
        assert_eq!(spam.threshold, 5);
    }

    #[test]
    fn test_token_not_serialized() {
        let mut config = BotConfig::default();
        config.discord_token = "secret-token".to_string();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret-token"));
    }

    #[test]
    fn test_early_logging_missing_file() {
        let early = load_early_logging_config(Some("/nonexistent/upibot.toml"));
        assert!(early.level.is_none());
        assert!(early.format.is_none());
    }
}
