use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use super::{ControlStore, QuestionStore};
use crate::core::ScraperError;
use crate::core::models::{
    AccountValidity, Area, Command, CommandKind, CommandStatus, Credentials, ExtractedQuestion,
    LogLevel, Notebook, ScrapingProgress,
};

#[derive(Default)]
struct Tables {
    questions: HashMap<String, ExtractedQuestion>,
    commands: Vec<(Command, Option<String>)>,
    progress: HashMap<String, ScrapingProgress>,
    notebooks: HashMap<String, Vec<Notebook>>,
    credentials: HashMap<String, Credentials>,
    validity: HashMap<String, AccountValidity>,
    logs: Vec<(String, Option<String>, LogLevel, String)>,
    failing_ids: HashSet<String>,
}

/// 进程内存储，用于 --dry-run 和测试
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn question_count(&self) -> usize {
        self.tables.lock().await.questions.len()
    }

    #[cfg(test)]
    pub async fn question(&self, source_id: &str) -> Option<ExtractedQuestion> {
        self.tables.lock().await.questions.get(source_id).cloned()
    }

    #[cfg(test)]
    pub async fn fail_upserts_for(&self, source_id: &str) {
        self.tables.lock().await.failing_ids.insert(source_id.to_string());
    }

    #[cfg(test)]
    pub async fn set_credentials(&self, account_id: &str, credentials: Credentials) {
        self.tables
            .lock()
            .await
            .credentials
            .insert(account_id.to_string(), credentials);
    }

    #[cfg(test)]
    pub async fn validity(&self, account_id: &str) -> AccountValidity {
        self.tables
            .lock()
            .await
            .validity
            .get(account_id)
            .copied()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub async fn command_status(&self, command_id: &str) -> Option<(CommandStatus, Option<String>)> {
        self.tables
            .lock()
            .await
            .commands
            .iter()
            .find(|(c, _)| c.id == command_id)
            .map(|(c, err)| (c.status, err.clone()))
    }

    #[cfg(test)]
    pub async fn log_messages(&self) -> Vec<String> {
        self.tables
            .lock()
            .await
            .logs
            .iter()
            .map(|(_, _, _, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn upsert_question(&self, question: &ExtractedQuestion) -> Result<(), ScraperError> {
        let mut tables = self.tables.lock().await;
        if tables.failing_ids.contains(&question.source_id) {
            return Err(ScraperError::PersistenceFailure {
                source_id: question.source_id.clone(),
                reason: "写入被拒绝".to_string(),
            });
        }
        tables
            .questions
            .insert(question.source_id.clone(), question.clone());
        Ok(())
    }
}

#[async_trait]
impl ControlStore for MemoryStore {
    async fn next_pending_command(&self, account_id: &str) -> Result<Option<Command>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .commands
            .iter()
            .map(|(c, _)| c)
            .filter(|c| c.account_id == account_id && c.status == CommandStatus::Pending)
            .min_by_key(|c| c.created_at)
            .cloned())
    }

    async fn mark_command(
        &self,
        command_id: &str,
        status: CommandStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let (command, err) = tables
            .commands
            .iter_mut()
            .find(|(c, _)| c.id == command_id)
            .ok_or_else(|| anyhow!("命令不存在: {}", command_id))?;
        command.status = status;
        *err = error.map(str::to_string);
        Ok(())
    }

    async fn enqueue_command(
        &self,
        account_id: &str,
        kind: CommandKind,
        area: Option<Area>,
        interval_hours: Option<u32>,
    ) -> Result<Command> {
        let command = Command {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            kind,
            area,
            interval_hours,
            status: CommandStatus::Pending,
            created_at: Utc::now(),
        };
        self.tables.lock().await.commands.push((command.clone(), None));
        Ok(command)
    }

    async fn load_progress(&self, account_id: &str) -> Result<Option<ScrapingProgress>> {
        Ok(self.tables.lock().await.progress.get(account_id).cloned())
    }

    async fn save_progress(&self, account_id: &str, progress: &ScrapingProgress) -> Result<()> {
        self.tables
            .lock()
            .await
            .progress
            .insert(account_id.to_string(), progress.clone());
        Ok(())
    }

    async fn load_notebooks(&self, account_id: &str, plan_id: &str) -> Result<Vec<Notebook>> {
        let tables = self.tables.lock().await;
        let mut notebooks: Vec<Notebook> = tables
            .notebooks
            .get(account_id)
            .map(|all| all.iter().filter(|n| n.plan_id == plan_id).cloned().collect())
            .unwrap_or_default();
        notebooks.sort_by_key(|n| n.sequence);
        Ok(notebooks)
    }

    async fn save_notebooks(&self, account_id: &str, notebooks: &[Notebook]) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let stored = tables.notebooks.entry(account_id.to_string()).or_default();
        for nb in notebooks {
            match stored.iter_mut().find(|n| n.id == nb.id) {
                Some(existing) => *existing = nb.clone(),
                None => stored.push(nb.clone()),
            }
        }
        Ok(())
    }

    async fn account_credentials(&self, account_id: &str) -> Result<Option<Credentials>> {
        Ok(self.tables.lock().await.credentials.get(account_id).cloned())
    }

    async fn set_account_validity(
        &self,
        account_id: &str,
        validity: AccountValidity,
    ) -> Result<()> {
        self.tables
            .lock()
            .await
            .validity
            .insert(account_id.to_string(), validity);
        Ok(())
    }

    async fn append_log(
        &self,
        account_id: &str,
        notebook_id: Option<&str>,
        level: LogLevel,
        message: &str,
    ) -> Result<()> {
        self.tables.lock().await.logs.push((
            account_id.to_string(),
            notebook_id.map(str::to_string),
            level,
            message.to_string(),
        ));
        Ok(())
    }
}
