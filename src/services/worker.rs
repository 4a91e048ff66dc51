use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{Instrument, info, info_span, warn};

use super::coordinator::{Coordinator, StartOutcome};
use super::poller::CommandPoller;
use crate::app::AppConfig;
use crate::browser::{BrowserSession, CredentialResolver, TecSite};
use crate::core::models::{Area, ScrapingProgress};
use crate::storage::{ControlStore, MemoryStore, QuestionStore, SupabaseStore};

/// 进程里共用的存储，在 main 中创建一次后注入
#[derive(Clone)]
pub struct Stores {
    pub control: Arc<dyn ControlStore>,
    pub questions: Arc<dyn QuestionStore>,
    memory: Option<Arc<MemoryStore>>,
}

impl Stores {
    /// `dry_run` 时使用内存存储，不连接 Supabase
    pub fn open(config: &AppConfig, dry_run: bool) -> Result<Self> {
        if dry_run {
            info!("🧪 dry-run 模式：数据只保存在内存中");
            let memory = Arc::new(MemoryStore::new());
            return Ok(Self {
                control: memory.clone(),
                questions: memory.clone(),
                memory: Some(memory),
            });
        }

        let supabase = Arc::new(SupabaseStore::new(&config.storage).context("无法创建 Supabase 客户端")?);
        Ok(Self {
            control: supabase.clone(),
            questions: supabase,
            memory: None,
        })
    }

    /// dry-run 时打印内存中保存的题目数
    pub async fn report_dry_run(&self) {
        if let Some(memory) = &self.memory {
            info!("🧪 dry-run 共保存 {} 道题（未写入数据库）", memory.question_count().await);
        }
    }
}

/// 为账号组装浏览器会话、站点和协调器
pub fn build_coordinator(
    config: Arc<AppConfig>,
    account_id: &str,
    stores: &Stores,
) -> Result<Coordinator<TecSite>> {
    let resolver = CredentialResolver::new(stores.control.clone(), config.worker.cookies_dir.clone());
    let session = BrowserSession::new(config.clone(), account_id, resolver);
    let site = TecSite::new(config.clone(), session)?;
    Coordinator::new(
        account_id,
        config,
        site,
        stores.control.clone(),
        stores.questions.clone(),
    )
}

/// 单账号常驻进程：轮询命令、发送心跳，收到退出信号后停止抓取
pub async fn run_worker(config: Arc<AppConfig>, account_id: &str, stores: Stores) -> Result<()> {
    let coordinator = build_coordinator(config.clone(), account_id, &stores)?;
    let span = info_span!("worker", account = %account_id);

    async move {
        if let Err(e) = coordinator.restore().await {
            warn!("⚠️ 读取上次进度失败: {:#}", e);
        }

        let stagger = config.worker.start_stagger_secs;
        if stagger > 0 {
            info!("⏳ 等待 {} 秒后开始轮询", stagger);
            sleep(Duration::from_secs(stagger)).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });

        let heartbeat = {
            let coordinator = coordinator.clone();
            let period = Duration::from_secs(config.worker.heartbeat_interval_secs.max(1));
            tokio::spawn(
                async move {
                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        coordinator.heartbeat().await;
                    }
                }
                .in_current_span(),
            )
        };

        let poller = CommandPoller::new(coordinator.clone(), stores.control.clone(), &config.worker);
        poller.run(shutdown_rx).await;

        heartbeat.abort();
        info!("🛑 正在停止当前抓取...");
        coordinator.shutdown().await;
        stores.report_dry_run().await;
        info!("👋 worker 已退出");
        Ok(())
    }
    .instrument(span)
    .await
}

/// 前台抓取一个领域，Ctrl+C 时在当前页之后停止
pub async fn run_once(
    config: Arc<AppConfig>,
    account_id: &str,
    area: Area,
    stores: Stores,
) -> Result<ScrapingProgress> {
    let coordinator = build_coordinator(config, account_id, &stores)?;
    let span = info_span!("worker", account = %account_id);

    async move {
        if let Err(e) = coordinator.restore().await {
            warn!("⚠️ 读取上次进度失败: {:#}", e);
        }
        if let StartOutcome::Conflict(progress) = coordinator.start(area).await {
            return Ok(progress);
        }

        let stopper = coordinator.clone();
        let signal_task = tokio::spawn(async move {
            shutdown_signal().await;
            stopper.stop().await;
        });
        coordinator.wait().await;
        signal_task.abort();

        stores.report_dry_run().await;
        Ok(coordinator.status().await)
    }
    .instrument(span)
    .await
}

/// SIGINT 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("🛑 收到退出信号");
}
