pub mod memory;
pub mod supabase;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::ScraperError;
use crate::core::models::{
    AccountValidity, Area, Command, CommandKind, CommandStatus, Credentials, ExtractedQuestion,
    LogLevel, Notebook, ScrapingProgress,
};
use crate::core::types::{FailedRecord, SaveReport};

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// 题目表，按 source_id upsert
#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn upsert_question(&self, question: &ExtractedQuestion) -> Result<(), ScraperError>;
}

/// 命令表、进度表、账号表、caderno 表和日志表
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// 最早的一条待处理命令
    async fn next_pending_command(&self, account_id: &str) -> Result<Option<Command>>;

    async fn mark_command(
        &self,
        command_id: &str,
        status: CommandStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn enqueue_command(
        &self,
        account_id: &str,
        kind: CommandKind,
        area: Option<Area>,
        interval_hours: Option<u32>,
    ) -> Result<Command>;

    async fn load_progress(&self, account_id: &str) -> Result<Option<ScrapingProgress>>;

    async fn save_progress(&self, account_id: &str, progress: &ScrapingProgress) -> Result<()>;

    /// 某次分配的全部 caderno，按 sequence 排序
    async fn load_notebooks(&self, account_id: &str, plan_id: &str) -> Result<Vec<Notebook>>;

    /// 按 id upsert，也用于更新单个 caderno 的状态和计数
    async fn save_notebooks(&self, account_id: &str, notebooks: &[Notebook]) -> Result<()>;

    async fn account_credentials(&self, account_id: &str) -> Result<Option<Credentials>>;

    async fn set_account_validity(&self, account_id: &str, validity: AccountValidity)
    -> Result<()>;

    async fn append_log(
        &self,
        account_id: &str,
        notebook_id: Option<&str>,
        level: LogLevel,
        message: &str,
    ) -> Result<()>;
}

/// 写日志表，失败只记录警告
pub async fn log_event(
    store: &dyn ControlStore,
    account_id: &str,
    notebook_id: Option<&str>,
    level: LogLevel,
    message: &str,
) {
    if let Err(e) = store.append_log(account_id, notebook_id, level, message).await {
        warn!("写入抓取日志失败: {}", e);
    }
}

/// 批量写入题目，逐条 upsert，单条失败不影响其他记录
#[derive(Clone)]
pub struct PersistenceSink {
    store: Arc<dyn QuestionStore>,
}

impl PersistenceSink {
    pub fn new(store: Arc<dyn QuestionStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, batch: &[ExtractedQuestion]) -> SaveReport {
        let mut report = SaveReport::default();
        for question in batch {
            let result = match validate(question) {
                Ok(()) => self.store.upsert_question(question).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    debug!("💾 已保存题目 {}", question.source_id);
                    report.success += 1;
                }
                Err(e) => {
                    warn!("❌ 保存题目 {} 失败: {}", question.source_id, e);
                    report.failed.push(FailedRecord {
                        source_id: question.source_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

fn validate(question: &ExtractedQuestion) -> Result<(), ScraperError> {
    let malformed = |reason: &str| ScraperError::PersistenceFailure {
        source_id: question.source_id.clone(),
        reason: reason.to_string(),
    };
    if question.source_id.is_empty() || !question.source_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed("题目编号不是数字"));
    }
    if question.enunciado.trim().is_empty() {
        return Err(malformed("题干为空"));
    }
    Ok(())
}
