use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::coordinator::{Coordinator, SignalOutcome, StartOutcome};
use crate::app::config::WorkerConfig;
use crate::core::models::{Command, CommandKind, CommandStatus};
use crate::core::site::QuestionSite;
use crate::storage::ControlStore;

/// 轮询命令表，把命令交给协调器
pub struct CommandPoller<S: QuestionSite> {
    coordinator: Coordinator<S>,
    control: Arc<dyn ControlStore>,
    poll_interval: Duration,
    default_cron_hours: u32,
}

impl<S: QuestionSite> CommandPoller<S> {
    pub fn new(coordinator: Coordinator<S>, control: Arc<dyn ControlStore>, worker: &WorkerConfig) -> Self {
        Self {
            coordinator,
            control,
            poll_interval: Duration::from_secs(worker.poll_interval_secs.max(1)),
            default_cron_hours: worker.default_cron_hours,
        }
    }

    /// 一直轮询，直到 shutdown 变为 true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("📡 开始轮询命令，间隔 {:?}", self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("⚠️ 轮询命令失败: {:#}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("📡 命令轮询已停止");
    }

    /// 处理最早的一条待处理命令，没有命令时返回 false
    pub async fn poll_once(&self) -> Result<bool> {
        let account_id = self.coordinator.account_id();
        let Some(command) = self.control.next_pending_command(account_id).await? else {
            return Ok(false);
        };

        info!("📨 收到命令 {:?} ({})", command.kind, command.id);
        self.control
            .mark_command(&command.id, CommandStatus::Processing, None)
            .await?;

        match self.dispatch(&command).await {
            Ok(()) => {
                self.control
                    .mark_command(&command.id, CommandStatus::Completed, None)
                    .await?;
            }
            Err(e) => {
                error!("❌ 命令 {} 执行失败: {}", command.id, e);
                self.control
                    .mark_command(&command.id, CommandStatus::Failed, Some(&e.to_string()))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, command: &Command) -> Result<()> {
        match command.kind {
            CommandKind::Start | CommandKind::Resume => {
                if let Some(hours) = command.interval_hours {
                    let hours = if hours == 0 { self.default_cron_hours } else { hours };
                    self.coordinator.start_cron(hours).await?;
                    if command.area.is_none() {
                        return Ok(());
                    }
                }
                let area = command
                    .area
                    .ok_or_else(|| anyhow!("start 命令缺少领域"))?;
                match self.coordinator.start(area).await {
                    StartOutcome::Accepted(progress) => {
                        debug!("已启动 {}，从第 {} 页之后开始", area, progress.current_page)
                    }
                    StartOutcome::Conflict(progress) => {
                        info!("⏭️ 已有抓取在运行 ({:?})，忽略本次启动", progress.area)
                    }
                }
                Ok(())
            }
            CommandKind::Stop => {
                let outcome = self.coordinator.stop().await;
                debug!("stop: {:?}", outcome);
                Ok(())
            }
            CommandKind::Pause => {
                if self.coordinator.pause().await == SignalOutcome::NotRunning {
                    info!("当前没有运行中的抓取，忽略暂停");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Area, ScrapeStatus};
    use crate::storage::memory::MemoryStore;
    use crate::testing::{FakeSite, Gate, fast_config};

    const ACCOUNT: &str = "conta-01";

    fn poller(site: FakeSite, store: &Arc<MemoryStore>) -> CommandPoller<FakeSite> {
        let config = Arc::new(fast_config(100));
        let coordinator =
            Coordinator::new(ACCOUNT, config.clone(), site, store.clone(), store.clone()).unwrap();
        CommandPoller::new(coordinator, store.clone(), &config.worker)
    }

    #[tokio::test]
    async fn empty_queue_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        let poller = poller(FakeSite::new(&[], 1, 1), &store);
        assert!(!poller.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn start_command_runs_and_completes() {
        let store = Arc::new(MemoryStore::new());
        let poller = poller(FakeSite::new(&[("Direito Penal", 2)], 2, 1), &store);
        let command = store
            .enqueue_command(ACCOUNT, CommandKind::Start, Some(Area::Policial), None)
            .await
            .unwrap();

        assert!(poller.poll_once().await.unwrap());
        poller.coordinator.wait().await;

        assert_eq!(
            store.command_status(&command.id).await,
            Some((CommandStatus::Completed, None))
        );
        assert_eq!(store.question_count().await, 2);
        assert!(!poller.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn start_without_area_fails_with_reason() {
        let store = Arc::new(MemoryStore::new());
        let poller = poller(FakeSite::new(&[], 1, 1), &store);
        let command = store
            .enqueue_command(ACCOUNT, CommandKind::Start, None, None)
            .await
            .unwrap();

        poller.poll_once().await.unwrap();
        let (status, error) = store.command_status(&command.id).await.unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert!(error.unwrap().contains("领域"));
    }

    #[tokio::test]
    async fn commands_for_other_accounts_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let poller = poller(FakeSite::new(&[], 1, 1), &store);
        store
            .enqueue_command("conta-02", CommandKind::Stop, None, None)
            .await
            .unwrap();
        assert!(!poller.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn pause_command_drains_running_scrape() {
        let store = Arc::new(MemoryStore::new());
        let mut site = FakeSite::new(&[("Direito Penal", 10)], 5, 1);
        let gate = Gate::at(1);
        site.gate = Some(gate.clone());
        let poller = poller(site, &store);

        store
            .enqueue_command(ACCOUNT, CommandKind::Resume, Some(Area::Policial), None)
            .await
            .unwrap();
        poller.poll_once().await.unwrap();
        gate.reached.notified().await;

        let pause = store
            .enqueue_command(ACCOUNT, CommandKind::Pause, None, None)
            .await
            .unwrap();
        poller.poll_once().await.unwrap();
        gate.release.notify_one();
        poller.coordinator.wait().await;

        assert_eq!(
            store.command_status(&pause.id).await,
            Some((CommandStatus::Completed, None))
        );
        let progress = poller.coordinator.status().await;
        assert_eq!(progress.status, ScrapeStatus::Paused);
        assert_eq!(progress.current_page, 1);
    }

    #[tokio::test]
    async fn interval_turns_on_cron_and_stop_turns_it_off() {
        let store = Arc::new(MemoryStore::new());
        let poller = poller(FakeSite::new(&[], 1, 1), &store);

        store
            .enqueue_command(ACCOUNT, CommandKind::Start, None, Some(12))
            .await
            .unwrap();
        poller.poll_once().await.unwrap();
        assert!(poller.coordinator.cron_active().await);

        store
            .enqueue_command(ACCOUNT, CommandKind::Stop, None, None)
            .await
            .unwrap();
        poller.poll_once().await.unwrap();
        assert!(!poller.coordinator.cron_active().await);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let poller = poller(FakeSite::new(&[], 1, 1), &store);
        let (tx, rx) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(poller.run(rx), stopper);
        })
        .await
        .unwrap();
    }
}
