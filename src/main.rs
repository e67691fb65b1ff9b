use anyhow::{Context, Result};
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use upibot::{
    cli::{Cli, Commands},
    config::{self, BotConfig},
    http::{HttpServerState, KeepAliveServer},
    infra::{metrics, EventBus, MemoryAnalyticsStore},
    logging,
    model::VoiceTarget,
    presence::{OrchestratorConfig, PresenceRegistry, SimulatedVoiceConnector},
    security::{AntiSpamGuard, PaymentGate, SlidingWindowLimiter},
};

/// 模拟语音连接的握手延迟
const SIMULATED_CONNECT_LATENCY: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => return generate_config(path),
            Commands::ValidateConfig { path } => return validate_config(path),
            Commands::ShowConfig => return show_config(&cli),
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.as_deref().or(early_log.file.as_deref());

    let _log_guard = logging::init_logging(&log_level, log_format.as_deref(), log_file, cli.quiet)?;

    tracing::info!("🚀 UPI Bot starting...");

    let config = BotConfig::load(&cli).context("加载配置失败")?;

    // 运行参数问题任何模式下都不放行；--dev 只忽略凭据与频道
    let runtime_problems = config.validate_runtime();
    for problem in &runtime_problems {
        tracing::error!("❌ 配置问题: {}", problem);
    }
    let deployment_problems = config.validate_deployment();
    for problem in &deployment_problems {
        if cli.dev {
            tracing::warn!("⚠️ 配置问题（开发模式已忽略）: {}", problem);
        } else {
            tracing::error!("❌ 配置问题: {}", problem);
        }
    }
    if !runtime_problems.is_empty() {
        tracing::error!("💡 请修正配置后重试");
        process::exit(1);
    }
    if !deployment_problems.is_empty() && !cli.dev {
        tracing::error!("💡 请修正配置后重试，或使用 --dev 忽略凭据与频道检查");
        process::exit(1);
    }

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    tracing::info!("📊 Bot Configuration:");
    tracing::info!("  - Voice Channels: {:?}", config.voice.channel_ids);
    tracing::info!(
        "  - Simulated Failure / Drop Rate: {} / {}",
        config.simulate_failure_rate,
        config.simulate_drop_rate
    );
    tracing::info!(
        "  - Admission: {} requests / {}s, spam threshold {}",
        config.admission.max_requests,
        config.admission.window_secs,
        config.admission.spam_threshold
    );
    tracing::info!(
        "  - Analytics: {} (retention {} days)",
        if config.analytics.enabled { "enabled" } else { "disabled" },
        config.analytics.retention_days
    );
    if config.http.enabled {
        tracing::info!("  - Keep-alive HTTP: {}", config.http.bind_address());
    }
    tracing::info!("  - Log Level: {}", config.log_level);

    if let Err(e) = metrics::init() {
        tracing::warn!("⚠️ Prometheus recorder 初始化失败: {}", e);
    }

    if let Err(e) = run(config).await {
        tracing::error!("❌ 运行失败: {}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(config: BotConfig) -> Result<()> {
    let event_bus = Arc::new(EventBus::new());

    // 请求准入
    let analytics = Arc::new(if config.analytics.enabled {
        MemoryAnalyticsStore::new()
    } else {
        MemoryAnalyticsStore::disabled()
    });
    let limiter = SlidingWindowLimiter::new((&config.admission).into());
    let guard = Arc::new(
        AntiSpamGuard::new(limiter, (&config.admission).into()).with_event_bus(event_bus.clone()),
    );
    let gate = Arc::new(PaymentGate::new(guard.clone(), analytics.clone()));

    // 常驻语音
    let connector = Arc::new(
        SimulatedVoiceConnector::new(config.simulate_failure_rate, SIMULATED_CONNECT_LATENCY)
            .with_drop_rate(config.simulate_drop_rate),
    );
    let registry = Arc::new(PresenceRegistry::new(
        connector,
        OrchestratorConfig::from(&config.voice),
        event_bus.clone(),
    ));
    for &channel_id in &config.voice.channel_ids {
        registry
            .register(VoiceTarget(channel_id))
            .with_context(|| format!("注册语音频道失败: {}", channel_id))?;
    }
    registry.start_all().context("启动语音在线保持失败")?;

    // 后台任务
    let sweeper = guard.spawn_eviction_sweeper(config.admission.eviction_sweep_interval());
    let retention = config.analytics.enabled.then(|| {
        analytics.spawn_retention_task(config.analytics.retention(), config.analytics.prune_interval())
    });

    let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
    let http_task = if config.http.enabled {
        let state = HttpServerState::new(registry.clone(), gate.clone(), analytics.clone());
        let server = KeepAliveServer::new(state, config.http.bind_address());
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = http_shutdown_rx.await;
            };
            if let Err(e) = server.serve(shutdown).await {
                tracing::error!("❌ Keep-alive server failed: {}", e);
            }
        }))
    } else {
        None
    };

    tracing::info!("✅ UPI Bot is running, press Ctrl+C to stop");

    wait_for_shutdown_signal().await?;
    tracing::info!("🛑 Shutdown signal received");

    registry.stop_all().await;
    sweeper.abort();
    if let Some(task) = retention {
        task.abort();
    }
    let _ = http_shutdown_tx.send(());
    if let Some(task) = http_task {
        let _ = task.await;
    }

    tracing::info!("✅ Shutdown completed");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).context("SIGTERM handler failed")?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("Ctrl+C handler failed")?;
        Ok(())
    }
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# UPI Bot 配置文件
# 此文件由 upibot generate-config 生成

[bot]
# discord_token 建议通过 DISCORD_TOKEN 环境变量提供
simulate_failure_rate = 0.0
simulate_drop_rate = 0.0

[voice]
channel_ids = []
connect_timeout_secs = 5
heartbeat_interval_secs = 15
heartbeat_timeout_secs = 5
missed_heartbeat_tolerance = 3
heartbeat_staleness_secs = 60
latency_warn_ms = 200
poll_interval_secs = 30
backoff_base_ms = 1000
backoff_max_ms = 32000
jitter_fraction = 0.2

[admission]
window_secs = 60
max_requests = 5
spam_threshold = 5
spam_decay_amount = 1
spam_decay_interval_secs = 10
spam_ceiling = 20
idle_eviction_secs = 3600
eviction_sweep_interval_secs = 300

[analytics]
enabled = true
retention_days = 30
prune_interval_secs = 3600

[http]
enabled = true
host = "0.0.0.0"
port = 10000

[logging]
level = "info"
format = "compact"
# file = "./logs/upibot.log"
"#;

    fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = BotConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    let problems = config.validate();
    if problems.is_empty() {
        println!("✅ 配置文件有效: {}", path);
    } else {
        println!("⚠️ 配置文件存在 {} 个问题: {}", problems.len(), path);
        for problem in &problems {
            println!("  - {}", problem);
        }
    }

    println!("📊 配置摘要:");
    println!("  - Voice Channels: {:?}", config.voice.channel_ids);
    println!("  - Max Requests: {} / {}s", config.admission.max_requests, config.admission.window_secs);
    println!("  - HTTP: {}", config.http.bind_address());

    if problems.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("配置无效: {}", path)
    }
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = BotConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
