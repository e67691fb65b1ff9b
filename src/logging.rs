use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};
use anyhow::{Context, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 初始化日志系统
///
/// 指定 `log_file` 时额外按天滚动写入文件；返回的 guard 必须持有到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet {
        "error"
    } else {
        log_level
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    // 根据格式选择不同的终端输出方式
    layers.push(match log_format {
        // JSON 格式（适合生产环境）
        Some("json") => fmt::layer().json().boxed(),
        // Pretty 格式（适合开发环境）
        Some("pretty") | Some("dev") => fmt::layer().pretty().boxed(),
        // Compact 格式（默认）
        _ => fmt::layer().compact().boxed(),
    });

    let guard = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("日志系统已初始化")?;

    Ok(guard)
}

fn file_writer(path: &str) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let path = Path::new(path);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("日志文件路径无效: {}", path.display()))?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("无法创建日志目录: {}", directory.display()))?;

    let appender = tracing_appender::rolling::daily(directory, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
