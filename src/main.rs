//! Pratighat - 多智能体任务编排核心
//!
//! 入口：加载配置、初始化日志、构建编排器，然后进入交互式 Shell、HTTP API 或单次请求模式。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use pratighat::config::load_config;
use pratighat::core::{
    run_with_graceful_shutdown, spawn_shell, OperationalMode, OrchestratorBuilder, ShutdownCoordinator,
    ShutdownManager,
};
use pratighat::observability;
use pratighat::ui::run_app;

/// Multi-agent task orchestration: decomposition, backend routing, bounded dispatch and result memory.
#[derive(Parser, Debug)]
#[command(name = "pratighat", version, about)]
struct Cli {
    /// Interactive shell (default when no request is given).
    #[arg(long)]
    interactive: bool,

    /// Serve the HTTP API (requires the `web` feature).
    #[arg(long, conflicts_with = "interactive")]
    api: bool,

    /// Config file path (overrides config/default.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Operational mode: assisted | autopilot | manual.
    #[arg(long)]
    mode: Option<OperationalMode>,

    /// API listen host.
    #[arg(long)]
    host: Option<String>,

    /// API listen port.
    #[arg(long)]
    port: Option<u16>,

    /// One-shot request; prints the outcome as JSON and exits.
    #[arg(value_name = "REQUEST", conflicts_with_all = ["interactive", "api"])]
    request: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;
    if let Some(mode) = cli.mode {
        cfg.app.operational_mode = mode;
    }
    if let Some(host) = cli.host.clone() {
        cfg.api.host = host;
    }
    if let Some(port) = cli.port {
        cfg.api.port = port;
    }

    let one_shot = (!cli.request.is_empty()).then(|| cli.request.join(" "));
    let interactive = !cli.api && one_shot.is_none();

    // TUI 模式下不写控制台，避免破坏备用屏幕
    let logs = observability::init(&cfg.logging, !interactive).context("Failed to initialise logging")?;

    let shutdown = Arc::new(ShutdownManager::new());
    let mode = cfg.app.operational_mode;
    let (api_host, api_port) = (cfg.api.host.clone(), cfg.api.port);
    let orchestrator = OrchestratorBuilder::new(cfg)
        .with_root_token(shutdown.token())
        .build()
        .context("Failed to build orchestrator")?;
    let background = orchestrator.start_background();
    let cleanup = ShutdownCoordinator::for_orchestrator(&orchestrator);

    if cli.api {
        #[cfg(feature = "web")]
        {
            let orch = Arc::clone(&orchestrator);
            let token = shutdown.token();
            let app = async move {
                if let Err(e) = pratighat::api::serve(orch, &api_host, api_port, token).await {
                    tracing::error!("API server failed: {:#}", e);
                }
            };
            run_with_graceful_shutdown(Arc::clone(&shutdown), app, cleanup).await;
        }
        #[cfg(not(feature = "web"))]
        {
            let _ = (api_host, api_port, cleanup);
            anyhow::bail!("API mode requires building with `--features web`");
        }
    } else if let Some(text) = one_shot {
        let orch = Arc::clone(&orchestrator);
        let app = async move {
            match orch.process(orch.text_request(text)).await {
                Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::error!("Failed to serialise outcome: {}", e),
                },
                Err(e) => eprintln!("error: {e}"),
            }
        };
        run_with_graceful_shutdown(Arc::clone(&shutdown), app, cleanup).await;
    } else {
        let (cmd_tx, state_rx) = spawn_shell(Arc::clone(&orchestrator), logs);
        let app = async move {
            if let Err(e) = run_app(state_rx, cmd_tx, mode).await {
                tracing::error!("App run failed: {:#}", e);
            }
        };
        run_with_graceful_shutdown(Arc::clone(&shutdown), app, cleanup).await;
    }

    futures_util::future::join_all(background).await;
    Ok(())
}
