use anyhow::{Result, bail};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::retry::{RetryPolicy, retry};
use crate::app::AppConfig;
use crate::core::ScraperError;
use crate::core::models::{
    AccountValidity, Area, LogLevel, Notebook, NotebookPage, NotebookStatus, ScrapeStatus,
    ScrapingProgress, SubjectCount,
};
use crate::core::site::QuestionSite;
use crate::core::types::{ProcessResult, ProcessStats};
use crate::extract::{ExtractionErrorKind, QuestionExtractor};
use crate::notebook::QuotaManager;
use crate::storage::{ControlStore, PersistenceSink, QuestionStore, log_event};

const SIGNAL_NONE: u8 = 0;
const SIGNAL_STOP: u8 = 1;
const SIGNAL_PAUSE: u8 = 2;

/// start 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Accepted(ScrapingProgress),
    /// 已有抓取在运行，没有启动新的
    Conflict(ScrapingProgress),
}

/// stop / pause 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// 运行中的抓取会在当前页处理完后结束
    Signalled,
    /// 没有在运行，只更新了保存的状态
    Reset,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginCheck {
    Valid,
    Invalid,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Stopped,
    Paused,
}

struct Inner<S> {
    account_id: String,
    config: Arc<AppConfig>,
    site: Mutex<S>,
    control: Arc<dyn ControlStore>,
    sink: PersistenceSink,
    extractor: QuestionExtractor,
    retry: RetryPolicy,
    running: AtomicBool,
    signal: AtomicU8,
    progress: RwLock<ScrapingProgress>,
    persist_lock: Mutex<()>,
    run_task: Mutex<Option<JoinHandle<()>>>,
    cron_stop: Mutex<Option<oneshot::Sender<()>>>,
}

/// 一个账号的抓取协调器
///
/// 同一时间只允许一轮抓取；stop / pause 在当前页处理完后生效，
/// 每页之后都会保存进度，下次 start 可以从断点继续。
pub struct Coordinator<S: QuestionSite> {
    inner: Arc<Inner<S>>,
}

impl<S: QuestionSite> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: QuestionSite> Coordinator<S> {
    pub fn new(
        account_id: &str,
        config: Arc<AppConfig>,
        site: S,
        control: Arc<dyn ControlStore>,
        questions: Arc<dyn QuestionStore>,
    ) -> Result<Self> {
        let retry = RetryPolicy::from_limits(&config.limits);
        Ok(Self {
            inner: Arc::new(Inner {
                account_id: account_id.to_string(),
                config,
                site: Mutex::new(site),
                control,
                sink: PersistenceSink::new(questions),
                extractor: QuestionExtractor::new()?,
                retry,
                running: AtomicBool::new(false),
                signal: AtomicU8::new(SIGNAL_NONE),
                progress: RwLock::new(ScrapingProgress::default()),
                persist_lock: Mutex::new(()),
                run_task: Mutex::new(None),
                cron_stop: Mutex::new(None),
            }),
        })
    }

    pub fn account_id(&self) -> &str {
        &self.inner.account_id
    }

    pub fn is_scraping_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// 读取上次保存的进度
    pub async fn restore(&self) -> Result<()> {
        if let Some(saved) = self.inner.control.load_progress(&self.inner.account_id).await? {
            info!(
                "📥 已读取上次进度: {:?} caderno {:?} 第 {} 页 ({:?})",
                saved.area, saved.current_notebook_id, saved.current_page, saved.status
            );
            if saved.is_running() {
                warn!("⚠️ 上次抓取没有正常结束，下次 start 会从断点继续");
            }
            *self.inner.progress.write().await = saved;
        }
        Ok(())
    }

    pub async fn status(&self) -> ScrapingProgress {
        self.inner.progress.read().await.clone()
    }

    pub fn list_areas() -> Vec<Area> {
        Area::by_priority()
    }

    /// 开始抓取一个领域，已在运行时返回 Conflict
    pub async fn start(&self, area: Area) -> StartOutcome {
        let inner = &self.inner;
        if inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("⏭️ 抓取已在运行，忽略启动 {}", area);
            return StartOutcome::Conflict(self.status().await);
        }

        let snapshot = {
            let mut progress = inner.progress.write().await;
            if progress.can_resume_for(area) {
                info!(
                    "▶️ 从断点继续 {}: caderno {:?} 第 {} 页之后",
                    area, progress.current_notebook_id, progress.current_page
                );
                progress.status = ScrapeStatus::Running;
                progress.last_error = None;
            } else {
                *progress = ScrapingProgress::fresh(area);
            }
            progress.clone()
        };

        let this = self.clone();
        let span = info_span!("run", area = area.slug());
        let handle = tokio::spawn(async move { this.run(area).await }.instrument(span));
        *inner.run_task.lock().await = Some(handle);
        StartOutcome::Accepted(snapshot)
    }

    /// 等待当前这一轮抓取结束
    pub async fn wait(&self) {
        let handle = self.inner.run_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("抓取任务异常退出: {}", e);
            }
        }
    }

    /// 停止抓取，下次 start 会重新开始
    pub async fn stop(&self) -> SignalOutcome {
        self.stop_cron().await;
        if self.is_scraping_running() {
            info!("⏹️ 收到停止请求，当前页处理完后结束");
            self.raise(SIGNAL_STOP);
            return SignalOutcome::Signalled;
        }

        let reset = {
            let mut progress = self.inner.progress.write().await;
            if progress.status == ScrapeStatus::Idle {
                false
            } else {
                progress.status = ScrapeStatus::Idle;
                true
            }
        };
        if reset {
            self.persist().await;
            SignalOutcome::Reset
        } else {
            SignalOutcome::NotRunning
        }
    }

    /// 暂停抓取，下次 start 同一领域会从断点继续
    pub async fn pause(&self) -> SignalOutcome {
        if self.is_scraping_running() {
            info!("⏸️ 收到暂停请求，当前页处理完后暂停");
            self.raise(SIGNAL_PAUSE);
            SignalOutcome::Signalled
        } else {
            SignalOutcome::NotRunning
        }
    }

    /// 只测试登录，然后关闭浏览器
    pub async fn login_test(&self) -> LoginCheck {
        let inner = &self.inner;
        if inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return LoginCheck::Busy;
        }

        let ok = {
            let mut site = inner.site.lock().await;
            let ok = site.login().await;
            site.close_browser().await;
            ok
        };
        inner.signal.store(SIGNAL_NONE, Ordering::Release);
        inner.running.store(false, Ordering::Release);

        let (check, level, message) = if ok {
            (LoginCheck::Valid, LogLevel::Info, "登录测试成功")
        } else {
            (LoginCheck::Invalid, LogLevel::Error, "登录测试失败")
        };
        log_event(&*inner.control, &inner.account_id, None, level, message).await;
        check
    }

    /// 运行中时刷新心跳
    pub async fn heartbeat(&self) {
        if !self.is_scraping_running() {
            return;
        }
        self.inner.progress.write().await.heartbeat_at = Some(Utc::now());
        self.persist().await;
    }

    /// 每隔 `interval_hours` 小时按优先级启动下一个领域
    pub async fn start_cron(&self, interval_hours: u32) -> Result<()> {
        if interval_hours == 0 {
            bail!("定时间隔必须大于 0 小时");
        }
        info!("⏰ 已开启定时抓取，每 {} 小时一次", interval_hours);
        self.start_cron_every(Duration::from_secs(u64::from(interval_hours) * 3600))
            .await;
        Ok(())
    }

    pub(crate) async fn start_cron_every(&self, period: Duration) {
        self.stop_cron().await;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let areas = Area::by_priority();
            let mut cursor = 0usize;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let area = areas[cursor % areas.len()];
                        match this.start(area).await {
                            StartOutcome::Accepted(_) => {
                                info!("⏰ 定时任务启动 {}", area);
                                cursor += 1;
                            }
                            StartOutcome::Conflict(_) => debug!("抓取仍在运行，跳过本次定时任务"),
                        }
                    }
                }
            }
        });
        *self.inner.cron_stop.lock().await = Some(stop_tx);
    }

    pub async fn stop_cron(&self) -> bool {
        match self.inner.cron_stop.lock().await.take() {
            Some(stop_tx) => {
                let _ = stop_tx.send(());
                info!("⏰ 定时抓取已关闭");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn cron_active(&self) -> bool {
        self.inner.cron_stop.lock().await.is_some()
    }

    /// 停止定时任务和当前抓取，并等待结束
    pub async fn shutdown(&self) {
        self.stop().await;
        self.wait().await;
    }

    // ------------------------------------------------------------------------

    async fn run(&self, area: Area) {
        let inner = &self.inner;
        self.persist().await;
        log_event(
            &*inner.control,
            &inner.account_id,
            None,
            LogLevel::Info,
            &format!("开始抓取 {}", area),
        )
        .await;

        let outcome = {
            let mut site = inner.site.lock().await;
            let outcome = self.drive(&mut site, area).await;
            site.close_browser().await;
            outcome
        };

        let (level, message) = {
            let mut progress = inner.progress.write().await;
            progress.last_checkpoint_at = Some(Utc::now());
            match &outcome {
                Ok(RunEnd::Completed) => {
                    progress.status = ScrapeStatus::Idle;
                    (LogLevel::Info, format!("✅ {} 抓取完成，共保存 {} 道题", area, progress.total_questions_scraped))
                }
                Ok(RunEnd::Stopped) => {
                    progress.status = ScrapeStatus::Idle;
                    (LogLevel::Info, format!("⏹️ {} 已停止", area))
                }
                Ok(RunEnd::Paused) => {
                    progress.status = ScrapeStatus::Paused;
                    (LogLevel::Info, format!("⏸️ {} 已暂停于第 {} 页", area, progress.current_page))
                }
                Err(e) => {
                    progress.status = ScrapeStatus::Error;
                    progress.last_error = Some(e.to_string());
                    (LogLevel::Error, format!("❌ {} 抓取失败: {}", area, e))
                }
            }
        };

        match level {
            LogLevel::Error => error!("{}", message),
            _ => info!("{}", message),
        }
        if let Err(ScraperError::LoginFailed(_)) = &outcome {
            if let Err(e) = inner
                .control
                .set_account_validity(&inner.account_id, AccountValidity::Invalid)
                .await
            {
                warn!("更新账号状态失败: {}", e);
            }
        }

        self.persist().await;
        let notebook_id = self.inner.progress.read().await.current_notebook_id.clone();
        log_event(
            &*inner.control,
            &inner.account_id,
            notebook_id.as_deref(),
            level,
            &message,
        )
        .await;
        inner.signal.store(SIGNAL_NONE, Ordering::Release);
        inner.running.store(false, Ordering::Release);
    }

    async fn drive(&self, site: &mut S, area: Area) -> Result<RunEnd, ScraperError> {
        self.login(site).await?;
        if let Some(end) = self.pending_signal() {
            return Ok(end);
        }

        let mut notebooks = self.prepare_notebooks(site, area).await?;
        let resume_id = self.inner.progress.read().await.current_notebook_id.clone();
        let start_index = resume_id
            .as_deref()
            .and_then(|id| notebooks.iter().position(|n| n.id == id))
            .unwrap_or(0);

        let mut total = ProcessStats::default();
        let mut first = true;
        for notebook in notebooks
            .iter_mut()
            .skip(start_index)
            .filter(|n| !n.is_completed())
        {
            if !first {
                sleep(Duration::from_millis(self.inner.config.delays.between_notebooks_ms)).await;
            }
            first = false;

            let outcome = self.scrape_notebook(site, area, notebook, &mut total).await;
            match &outcome {
                Ok(None) => notebook.complete(),
                Ok(Some(_)) => notebook.status = NotebookStatus::Paused,
                Err(e) => notebook.fail(&e.to_string()),
            }
            self.save_notebook(notebook).await;
            if let Some(end) = outcome? {
                return Ok(end);
            }
        }

        info!(
            "📊 {} 汇总: 保存 {}，空 {}，损坏 {}，不完整 {}，写入失败 {}",
            area, total.saved, total.empty, total.corrupted, total.incomplete, total.failed
        );
        Ok(RunEnd::Completed)
    }

    async fn login(&self, site: &mut S) -> Result<(), ScraperError> {
        if site.has_session() {
            return Ok(());
        }
        let attempts = self.inner.config.limits.login_attempts.max(1);
        for attempt in 1..=attempts {
            if site.login().await {
                return Ok(());
            }
            if attempt < attempts {
                let delay = self.inner.retry.delay_for_attempt(attempt);
                warn!("⚠️ 登录失败 (第 {}/{} 次)，{:?} 后重试...", attempt, attempts, delay);
                sleep(delay).await;
            }
        }
        Err(ScraperError::LoginFailed(format!("连续 {} 次登录失败", attempts)))
    }

    /// 续抓时复用本轮分配的 caderno，否则按学科重新分配
    async fn prepare_notebooks(&self, site: &mut S, area: Area) -> Result<Vec<Notebook>, ScraperError> {
        let inner = &self.inner;
        let plan_id = inner.progress.read().await.plan_id.clone();
        if let Some(plan_id) = plan_id {
            let existing = inner
                .control
                .load_notebooks(&inner.account_id, &plan_id)
                .await
                .map_err(ScraperError::storage)?;
            if !existing.is_empty() {
                let done = existing.iter().filter(|n| n.is_completed()).count();
                info!("📚 复用已有的 {} 个 caderno，其中 {} 个已完成", existing.len(), done);
                return Ok(existing);
            }
        }

        let subjects = self.list_subjects_with_retry(site, area).await?;
        let mut quota = QuotaManager::new(area, inner.config.limits.notebook_ceiling);
        for subject in subjects.iter().filter(|s| s.quantity > 0) {
            let allocations = quota.assign(&mut *site, &subject.name, subject.quantity).await?;
            for a in &allocations {
                debug!("{} -> caderno {} ({} 题)", a.subject, a.notebook_id, a.quantity);
            }
        }
        debug!("配额状态: {:?}", quota.state());
        let plan_id = uuid::Uuid::new_v4().to_string();
        let mut notebooks = quota.finish();
        for notebook in &mut notebooks {
            notebook.plan_id = plan_id.clone();
        }
        info!("📚 {} 共分配到 {} 个 caderno", area, notebooks.len());

        retry(&inner.retry, "保存 caderno", || {
            inner.control.save_notebooks(&inner.account_id, &notebooks)
        })
        .await
        .map_err(ScraperError::storage)?;
        inner.progress.write().await.plan_id = Some(plan_id);
        self.persist().await;
        Ok(notebooks)
    }

    async fn list_subjects_with_retry(&self, site: &mut S, area: Area) -> Result<Vec<SubjectCount>, ScraperError> {
        let policy = &self.inner.retry;
        for attempt in 1..=policy.attempts {
            match site.list_subjects(area).await {
                Ok(subjects) => return Ok(subjects),
                Err(e) if e.is_transient() && attempt < policy.attempts => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!("⚠️ 读取学科失败 (第 {}/{} 次): {}，{:?} 后重试...", attempt, policy.attempts, e, delay);
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ScraperError::Browser("读取学科失败".to_string()))
    }

    async fn fetch_with_retry(
        &self,
        site: &mut S,
        notebook: &Notebook,
        page: u32,
    ) -> Result<NotebookPage, ScraperError> {
        let policy = &self.inner.retry;
        for attempt in 1..=policy.attempts {
            match site.fetch_page(notebook, page).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_transient() && attempt < policy.attempts => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        "⚠️ caderno {} 第 {} 页加载失败 (第 {}/{} 次): {}，{:?} 后重试...",
                        notebook.id, page, attempt, policy.attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ScraperError::NavigationTimeout {
            url: notebook.url.clone(),
            secs: self.inner.config.limits.navigation_timeout_secs,
        })
    }

    /// 返回 Some 表示收到了停止或暂停信号
    async fn scrape_notebook(
        &self,
        site: &mut S,
        area: Area,
        notebook: &mut Notebook,
        total: &mut ProcessStats,
    ) -> Result<Option<RunEnd>, ScraperError> {
        let mut page_number = {
            let mut progress = self.inner.progress.write().await;
            progress.enter_notebook(&notebook.id);
            progress.current_page + 1
        };
        notebook.begin();
        self.save_notebook(notebook).await;
        info!("📖 开始 caderno {} ({}) 第 {} 页", notebook.name, notebook.id, page_number);

        loop {
            if let Some(end) = self.pending_signal() {
                return Ok(Some(end));
            }

            let page = self.fetch_with_retry(site, notebook, page_number).await?;
            if page.fragments.is_empty() {
                debug!("caderno {} 第 {} 页没有题目，结束", notebook.id, page_number);
                return Ok(None);
            }

            let stats = self.process_page(area, notebook, &page).await;
            total.merge(&stats);
            self.checkpoint(page_number, &stats).await;
            notebook.checkpoint(page_number, stats.saved as u32);
            self.save_notebook(notebook).await;
            info!(
                "✅ caderno {} 第 {} 页: 保存 {}，空 {}，损坏 {}，不完整 {}，写入失败 {}",
                notebook.id, page_number, stats.saved, stats.empty, stats.corrupted, stats.incomplete, stats.failed
            );

            if !page.has_next {
                return Ok(None);
            }
            page_number += 1;
            sleep(Duration::from_millis(self.inner.config.delays.between_pages_ms)).await;
        }
    }

    /// 单道题的错误只计数，不中断整页
    async fn process_page(&self, area: Area, notebook: &Notebook, page: &NotebookPage) -> ProcessStats {
        let inner = &self.inner;
        let mut stats = ProcessStats::default();
        let mut questions = Vec::with_capacity(page.fragments.len());

        for fragment in &page.fragments {
            let extraction = inner.extractor.extract(fragment);
            if !extraction.success {
                let kind = match &extraction.error {
                    Some(err) => {
                        debug!("跳过题目: {}", err);
                        err.kind
                    }
                    None => ExtractionErrorKind::Corrupted,
                };
                stats.add_result(ProcessResult::from(kind));
                continue;
            }
            match extraction.into_question(area) {
                Ok(question) => questions.push(question),
                Err(e) => {
                    debug!("跳过题目: {}", e);
                    stats.add_result(ProcessResult::Incomplete);
                }
            }
        }

        let report = inner.sink.save(&questions).await;
        let failed: HashSet<&str> = report.failed.iter().map(|f| f.source_id.as_str()).collect();
        for question in &questions {
            stats.add_result(if failed.contains(question.source_id.as_str()) {
                ProcessResult::Failed
            } else {
                ProcessResult::Saved
            });
        }

        if let Some(first) = report.failed.first() {
            log_event(
                &*inner.control,
                &inner.account_id,
                Some(&notebook.id),
                LogLevel::Warning,
                &format!(
                    "第 {} 页有 {} 道题保存失败，例如 {}: {}",
                    page.number,
                    report.failed.len(),
                    first.source_id,
                    first.reason
                ),
            )
            .await;
        }
        stats
    }

    async fn checkpoint(&self, page: u32, stats: &ProcessStats) {
        self.inner
            .progress
            .write()
            .await
            .checkpoint(page, stats.processed() as u32, stats.saved as u64);
        self.persist().await;
    }

    /// 保存最新的进度，写入按顺序进行
    async fn persist(&self) {
        let inner = &self.inner;
        let _guard = inner.persist_lock.lock().await;
        let snapshot = inner.progress.read().await.clone();
        if let Err(e) = retry(&inner.retry, "保存进度", || {
            inner.control.save_progress(&inner.account_id, &snapshot)
        })
        .await
        {
            warn!("⚠️ 保存进度失败: {}", e);
        }
    }

    /// caderno 的状态和计数，失败只记录警告
    async fn save_notebook(&self, notebook: &Notebook) {
        let inner = &self.inner;
        if let Err(e) = retry(&inner.retry, "保存 caderno 状态", || {
            inner
                .control
                .save_notebooks(&inner.account_id, std::slice::from_ref(notebook))
        })
        .await
        {
            warn!("⚠️ 保存 caderno {} 状态失败: {}", notebook.id, e);
        }
    }

    /// 设置信号；抓取恰好已经结束时撤回，避免影响下一轮
    fn raise(&self, signal: u8) {
        let inner = &self.inner;
        inner.signal.store(signal, Ordering::Release);
        if !self.is_scraping_running() {
            let _ = inner
                .signal
                .compare_exchange(signal, SIGNAL_NONE, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    fn pending_signal(&self) -> Option<RunEnd> {
        match self.inner.signal.load(Ordering::Acquire) {
            SIGNAL_STOP => Some(RunEnd::Stopped),
            SIGNAL_PAUSE => Some(RunEnd::Paused),
            _ => None,
        }
    }
}
