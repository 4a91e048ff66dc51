use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::utils::text::fold_diacritics;

// ============================================================================
// 领域 (área)
// ============================================================================

/// 题库的职业领域，固定有序，数字越小优先级越高
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Area {
    Policial,
    Fiscal,
    TribunaisMpu,
    Administrativa,
    Bancaria,
    Controle,
    GestaoGovernanca,
    Regulacao,
    Legislativo,
    Diplomacia,
    Militar,
    Outras,
}

impl Area {
    pub const ALL: [Area; 12] = [
        Area::Policial,
        Area::Fiscal,
        Area::TribunaisMpu,
        Area::Administrativa,
        Area::Bancaria,
        Area::Controle,
        Area::GestaoGovernanca,
        Area::Regulacao,
        Area::Legislativo,
        Area::Diplomacia,
        Area::Militar,
        Area::Outras,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Area::Policial => "policial",
            Area::Fiscal => "fiscal",
            Area::TribunaisMpu => "tribunais-mpu",
            Area::Administrativa => "administrativa",
            Area::Bancaria => "bancaria",
            Area::Controle => "controle",
            Area::GestaoGovernanca => "gestao-governanca",
            Area::Regulacao => "regulacao",
            Area::Legislativo => "legislativo",
            Area::Diplomacia => "diplomacia",
            Area::Militar => "militar",
            Area::Outras => "outras",
        }
    }

    /// 站点上显示的名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Area::Policial => "Policial",
            Area::Fiscal => "Fiscal",
            Area::TribunaisMpu => "Tribunais e MPU",
            Area::Administrativa => "Administrativa",
            Area::Bancaria => "Bancária",
            Area::Controle => "Controle",
            Area::GestaoGovernanca => "Gestão e Governança",
            Area::Regulacao => "Regulação",
            Area::Legislativo => "Legislativo",
            Area::Diplomacia => "Diplomacia",
            Area::Militar => "Militar",
            Area::Outras => "Outras Carreiras",
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            Area::Policial => 1,
            Area::Fiscal => 2,
            Area::TribunaisMpu => 3,
            Area::Administrativa => 4,
            Area::Bancaria => 5,
            Area::Controle => 6,
            Area::GestaoGovernanca => 7,
            Area::Regulacao => 8,
            Area::Legislativo => 9,
            Area::Diplomacia => 10,
            Area::Militar => 11,
            Area::Outras => 12,
        }
    }

    /// 按优先级排序的全部领域
    pub fn by_priority() -> Vec<Area> {
        let mut areas = Self::ALL.to_vec();
        areas.sort_by_key(|a| a.priority());
        areas
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Area {
    type Err = anyhow::Error;

    /// 接受 slug 或显示名称，不区分大小写和重音
    fn from_str(s: &str) -> Result<Self> {
        let wanted = fold_diacritics(s.trim());
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.slug() == wanted || fold_diacritics(a.display_name()) == wanted)
            .ok_or_else(|| anyhow!("未知领域: {}", s))
    }
}

// ============================================================================
// 抓取进度
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

/// 每个账号一份，每页处理完后更新并持久化，用于断点续抓
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScrapingProgress {
    pub area: Option<Area>,
    /// 本轮分配出来的 caderno 组，续抓时只读取这一组
    #[serde(default)]
    pub plan_id: Option<String>,
    pub current_notebook_id: Option<String>,
    /// 当前 caderno 中最后一个处理完的页码，0 表示尚未开始
    pub current_page: u32,
    pub questions_in_notebook: u32,
    pub total_questions_scraped: u64,
    pub status: ScrapeStatus,
    pub last_error: Option<String>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl ScrapingProgress {
    /// 新的一轮抓取
    pub fn fresh(area: Area) -> Self {
        Self {
            area: Some(area),
            status: ScrapeStatus::Running,
            last_checkpoint_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// 是否可以从这份进度继续抓取指定领域
    ///
    /// 只有暂停、出错或异常退出（仍显示 running）的进度才会续抓，
    /// `Idle` 代表上一轮已停止或已完成。
    pub fn can_resume_for(&self, area: Area) -> bool {
        self.area == Some(area)
            && self.status != ScrapeStatus::Idle
            && self.current_notebook_id.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.status == ScrapeStatus::Running
    }

    /// 切换到下一个 caderno
    pub fn enter_notebook(&mut self, notebook_id: &str) {
        if self.current_notebook_id.as_deref() != Some(notebook_id) {
            self.current_notebook_id = Some(notebook_id.to_string());
            self.current_page = 0;
            self.questions_in_notebook = 0;
        }
    }

    /// 一页处理完后的检查点
    pub fn checkpoint(&mut self, page: u32, processed: u32, saved: u64) {
        self.current_page = page;
        self.questions_in_notebook += processed;
        self.total_questions_scraped += saved;
        self.last_checkpoint_at = Some(Utc::now());
    }
}

// ============================================================================
// 账号与凭据
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountValidity {
    Valid,
    Invalid,
    #[default]
    Unknown,
}

impl AccountValidity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountValidity::Valid => "valid",
            AccountValidity::Invalid => "invalid",
            AccountValidity::Unknown => "unknown",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub cookies_path: PathBuf,
    /// 登录时才解析，支持运行期间轮换密码
    pub credentials: Option<Credentials>,
    pub last_known_validity: AccountValidity,
}

// ============================================================================
// Caderno / 题目
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotebookStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Error,
}

/// 站点上的题目本 (caderno)，题目数永远不超过上限
///
/// 同一次分配出来的 caderno 共享 `plan_id`，按 `sequence` 依次抓取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub area: Area,
    pub url: String,
    pub question_count: u32,
    pub sequence: u32,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub status: NotebookStatus,
    /// 已保存的题目数
    #[serde(default)]
    pub scraped: u32,
    /// 最后一个处理完的页码
    #[serde(default)]
    pub last_page: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Notebook {
    pub fn new(id: String, name: String, area: Area, url: String, sequence: u32) -> Self {
        Self {
            id,
            name,
            area,
            url,
            question_count: 0,
            sequence,
            plan_id: String::new(),
            status: NotebookStatus::Pending,
            scraped: 0,
            last_page: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == NotebookStatus::Completed
    }

    pub fn begin(&mut self) {
        self.status = NotebookStatus::Running;
        self.last_error = None;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn checkpoint(&mut self, page: u32, saved: u32) {
        self.last_page = page;
        self.scraped += saved;
    }

    pub fn complete(&mut self) {
        self.status = NotebookStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: &str) {
        self.status = NotebookStatus::Error;
        self.last_error = Some(reason.to_string());
    }
}

/// 某个学科及其可用题目数量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCount {
    pub name: String,
    pub quantity: u32,
}

/// caderno 中的一页：每道题的 HTML 片段，以及是否还有下一页
#[derive(Debug, Clone, Default)]
pub struct NotebookPage {
    pub number: u32,
    pub fragments: Vec<String>,
    pub has_next: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub letter: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionShape {
    /// Certo / Errado
    Binary,
    MultipleChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedQuestion {
    pub source_id: String,
    pub area: Area,
    pub materia: Option<String>,
    pub assunto: Option<String>,
    pub concurso: Option<String>,
    pub banca: Option<String>,
    pub orgao: Option<String>,
    pub cargo: Option<String>,
    pub prova: Option<String>,
    pub ano: Option<i32>,
    pub enunciado: String,
    pub alternativas: Vec<Alternative>,
    pub gabarito: Option<String>,
    pub comentario: Option<String>,
    pub imagens: Vec<String>,
    pub imagens_comentario: Vec<String>,
    pub shape: QuestionShape,
    pub extraction_confidence: f32,
}

// ============================================================================
// 控制命令
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
    Pause,
    /// 与 start 等价
    Resume,
}

impl FromStr for CommandKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(CommandKind::Start),
            "stop" => Ok(CommandKind::Stop),
            "pause" => Ok(CommandKind::Pause),
            "resume" => Ok(CommandKind::Resume),
            other => Err(anyhow!("未知命令: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub account_id: String,
    pub kind: CommandKind,
    pub area: Option<Area>,
    pub interval_hours: Option<u32>,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}
