use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use urlencoding::encode;

use super::{ControlStore, QuestionStore};
use crate::app::config::{StorageConfig, TableNames};
use crate::core::ScraperError;
use crate::core::models::{
    AccountValidity, Alternative, Area, Command, CommandKind, CommandStatus, Credentials,
    ExtractedQuestion, LogLevel, Notebook, NotebookStatus, QuestionShape, ScrapeStatus,
    ScrapingProgress,
};

/// Supabase (PostgREST) 存储，客户端在 main 中创建一次后注入
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    key: String,
    tables: TableNames,
}

impl SupabaseStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_url = config
            .supabase_url
            .clone()
            .context("缺少 SUPABASE_URL")?;
        let key = config
            .supabase_key
            .clone()
            .context("缺少 SUPABASE_SERVICE_ROLE_KEY / SUPABASE_ANON_KEY")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key,
            tables: config.tables.clone(),
        })
    }

    fn request(&self, method: Method, table: &str, query: &str) -> RequestBuilder {
        let mut url = format!("{}/rest/v1/{}", self.base_url, table);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        self.client
            .request(method, url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn upsert<T: Serialize + ?Sized>(&self, table: &str, on_conflict: &str, body: &T) -> Result<()> {
        let resp = self
            .request(Method::POST, table, &format!("on_conflict={}", on_conflict))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(body)
            .send()
            .await
            .with_context(|| format!("请求 {} 失败", table))?;
        check(resp).await?;
        Ok(())
    }

    async fn select<T: for<'de> Deserialize<'de>>(&self, table: &str, query: &str) -> Result<Vec<T>> {
        let resp = self
            .request(Method::GET, table, query)
            .send()
            .await
            .with_context(|| format!("查询 {} 失败", table))?;
        let rows = check(resp)
            .await?
            .json::<Vec<T>>()
            .await
            .with_context(|| format!("解析 {} 响应失败", table))?;
        Ok(rows)
    }

    async fn patch(&self, table: &str, query: &str, body: &Value) -> Result<()> {
        let resp = self
            .request(Method::PATCH, table, query)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await
            .with_context(|| format!("更新 {} 失败", table))?;
        check(resp).await?;
        Ok(())
    }
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("PostgREST 返回 {}: {}", status, body)
}

fn eq(column: &str, value: &str) -> String {
    format!("{}=eq.{}", column, encode(value))
}

// ============================================================================
// 行结构
// ============================================================================

#[derive(Debug, Serialize)]
struct QuestionRow<'a> {
    id: i64,
    area: &'a str,
    materia: Option<&'a str>,
    assunto: Option<&'a str>,
    concurso: Option<&'a str>,
    banca: Option<&'a str>,
    orgao: Option<&'a str>,
    cargo_area_especialidade_edicao: Option<&'a str>,
    prova: Option<&'a str>,
    ano: Option<i32>,
    enunciado: &'a str,
    alternativas: &'a [Alternative],
    gabarito: Option<&'a str>,
    comentario: Option<&'a str>,
    imagens_enunciado: &'a [String],
    imagens_comentario: &'a [String],
    tipo: &'a str,
    confianca_extracao: f32,
    ativo: bool,
    updated_at: DateTime<Utc>,
}

impl<'a> QuestionRow<'a> {
    fn from_question(q: &'a ExtractedQuestion) -> Result<Self, ScraperError> {
        let id = q.source_id.parse::<i64>().map_err(|e| ScraperError::PersistenceFailure {
            source_id: q.source_id.clone(),
            reason: format!("题目编号无效: {}", e),
        })?;
        Ok(Self {
            id,
            area: q.area.slug(),
            materia: q.materia.as_deref(),
            assunto: q.assunto.as_deref(),
            concurso: q.concurso.as_deref(),
            banca: q.banca.as_deref(),
            orgao: q.orgao.as_deref(),
            cargo_area_especialidade_edicao: q.cargo.as_deref(),
            prova: q.prova.as_deref(),
            ano: q.ano,
            enunciado: &q.enunciado,
            alternativas: &q.alternativas,
            gabarito: q.gabarito.as_deref(),
            comentario: q.comentario.as_deref(),
            imagens_enunciado: &q.imagens,
            imagens_comentario: &q.imagens_comentario,
            tipo: match q.shape {
                QuestionShape::Binary => "certo_errado",
                QuestionShape::MultipleChoice => "multipla_escolha",
            },
            confianca_extracao: q.extraction_confidence,
            ativo: true,
            updated_at: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CommandRow {
    id: Value,
    command: String,
    account_id: String,
    status: CommandStatus,
    #[serde(default)]
    payload: Option<CommandPayload>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CommandPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval_hours: Option<u32>,
}

impl CommandRow {
    fn into_command(self) -> Result<Command> {
        let payload = self.payload.unwrap_or_default();
        let area = payload
            .area
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(str::parse::<Area>)
            .transpose()?;
        let id = match self.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(Command {
            id,
            account_id: self.account_id,
            kind: self.command.parse()?,
            area,
            interval_hours: payload.interval_hours,
            status: self.status,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgressRow {
    account_id: String,
    area: Option<Area>,
    plan_id: Option<String>,
    current_caderno_id: Option<String>,
    current_page: u32,
    questions_in_caderno: u32,
    total_questions_scraped: u64,
    status: ScrapeStatus,
    last_error: Option<String>,
    last_checkpoint_at: Option<DateTime<Utc>>,
    heartbeat_at: Option<DateTime<Utc>>,
}

impl ProgressRow {
    fn new(account_id: &str, p: &ScrapingProgress) -> Self {
        Self {
            account_id: account_id.to_string(),
            area: p.area,
            plan_id: p.plan_id.clone(),
            current_caderno_id: p.current_notebook_id.clone(),
            current_page: p.current_page,
            questions_in_caderno: p.questions_in_notebook,
            total_questions_scraped: p.total_questions_scraped,
            status: p.status,
            last_error: p.last_error.clone(),
            last_checkpoint_at: p.last_checkpoint_at,
            heartbeat_at: p.heartbeat_at,
        }
    }

    fn into_progress(self) -> ScrapingProgress {
        ScrapingProgress {
            area: self.area,
            plan_id: self.plan_id,
            current_notebook_id: self.current_caderno_id,
            current_page: self.current_page,
            questions_in_notebook: self.questions_in_caderno,
            total_questions_scraped: self.total_questions_scraped,
            status: self.status,
            last_error: self.last_error,
            last_checkpoint_at: self.last_checkpoint_at,
            heartbeat_at: self.heartbeat_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NotebookRow {
    id: String,
    account_id: String,
    plan_id: String,
    sequence: u32,
    name: String,
    area: Area,
    url: String,
    question_count: u32,
    status: NotebookStatus,
    questions_scraped: u32,
    last_page: u32,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl NotebookRow {
    fn new(account_id: &str, n: &Notebook) -> Self {
        Self {
            id: n.id.clone(),
            account_id: account_id.to_string(),
            plan_id: n.plan_id.clone(),
            sequence: n.sequence,
            name: n.name.clone(),
            area: n.area,
            url: n.url.clone(),
            question_count: n.question_count,
            status: n.status,
            questions_scraped: n.scraped,
            last_page: n.last_page,
            started_at: n.started_at,
            completed_at: n.completed_at,
            last_error: n.last_error.clone(),
        }
    }
}

impl From<NotebookRow> for Notebook {
    fn from(row: NotebookRow) -> Self {
        Notebook {
            id: row.id,
            name: row.name,
            area: row.area,
            url: row.url,
            question_count: row.question_count,
            sequence: row.sequence,
            plan_id: row.plan_id,
            status: row.status,
            scraped: row.questions_scraped,
            last_page: row.last_page,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_error: row.last_error,
        }
    }
}

// ============================================================================
// trait 实现
// ============================================================================

#[async_trait]
impl QuestionStore for SupabaseStore {
    async fn upsert_question(&self, question: &ExtractedQuestion) -> Result<(), ScraperError> {
        let row = QuestionRow::from_question(question)?;
        self.upsert(&self.tables.questions, "id", &row)
            .await
            .map_err(|e| ScraperError::PersistenceFailure {
                source_id: question.source_id.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ControlStore for SupabaseStore {
    async fn next_pending_command(&self, account_id: &str) -> Result<Option<Command>> {
        let query = format!(
            "{}&{}&order=created_at.asc&limit=1",
            eq("account_id", account_id),
            eq("status", "pending")
        );
        let rows: Vec<CommandRow> = self.select(&self.tables.commands, &query).await?;
        rows.into_iter().next().map(CommandRow::into_command).transpose()
    }

    async fn mark_command(
        &self,
        command_id: &str,
        status: CommandStatus,
        error: Option<&str>,
    ) -> Result<()> {
        debug!("命令 {} -> {:?}", command_id, status);
        let mut body = json!({ "status": status });
        if matches!(status, CommandStatus::Completed | CommandStatus::Failed) {
            body["processed_at"] = json!(Utc::now());
        }
        if let Some(err) = error {
            body["error_message"] = json!(err);
        }
        self.patch(&self.tables.commands, &eq("id", command_id), &body)
            .await
    }

    async fn enqueue_command(
        &self,
        account_id: &str,
        kind: CommandKind,
        area: Option<Area>,
        interval_hours: Option<u32>,
    ) -> Result<Command> {
        let payload = CommandPayload {
            area: area.map(|a| a.slug().to_string()),
            interval_hours,
        };
        let body = json!({
            "command": kind,
            "account_id": account_id,
            "status": CommandStatus::Pending,
            "payload": payload,
        });
        let resp = self
            .request(Method::POST, &self.tables.commands, "")
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .context("写入命令失败")?;
        let rows = check(resp)
            .await?
            .json::<Vec<CommandRow>>()
            .await
            .context("解析命令响应失败")?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("命令表没有返回新行"))?
            .into_command()
    }

    async fn load_progress(&self, account_id: &str) -> Result<Option<ScrapingProgress>> {
        let rows: Vec<ProgressRow> = self
            .select(&self.tables.progress, &eq("account_id", account_id))
            .await?;
        Ok(rows.into_iter().next().map(ProgressRow::into_progress))
    }

    async fn save_progress(&self, account_id: &str, progress: &ScrapingProgress) -> Result<()> {
        let row = ProgressRow::new(account_id, progress);
        self.upsert(&self.tables.progress, "account_id", &row).await
    }

    async fn load_notebooks(&self, account_id: &str, plan_id: &str) -> Result<Vec<Notebook>> {
        let query = format!(
            "{}&{}&order=sequence.asc",
            eq("account_id", account_id),
            eq("plan_id", plan_id)
        );
        let rows: Vec<NotebookRow> = self.select(&self.tables.notebooks, &query).await?;
        Ok(rows.into_iter().map(Notebook::from).collect())
    }

    async fn save_notebooks(&self, account_id: &str, notebooks: &[Notebook]) -> Result<()> {
        if notebooks.is_empty() {
            return Ok(());
        }
        let rows: Vec<NotebookRow> = notebooks
            .iter()
            .map(|n| NotebookRow::new(account_id, n))
            .collect();
        self.upsert(&self.tables.notebooks, "id", rows.as_slice()).await
    }

    async fn account_credentials(&self, account_id: &str) -> Result<Option<Credentials>> {
        let query = format!("{}&select=email,password", eq("id", account_id));
        let rows: Vec<Credentials> = self.select(&self.tables.accounts, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn set_account_validity(
        &self,
        account_id: &str,
        validity: AccountValidity,
    ) -> Result<()> {
        let body = json!({
            "login_status": validity.as_str(),
            "is_active": validity != AccountValidity::Invalid,
            "last_login_check": Utc::now(),
        });
        self.patch(&self.tables.accounts, &eq("id", account_id), &body)
            .await
    }

    async fn append_log(
        &self,
        account_id: &str,
        notebook_id: Option<&str>,
        level: LogLevel,
        message: &str,
    ) -> Result<()> {
        let body = json!({
            "account_id": account_id,
            "caderno_id": notebook_id,
            "log_type": level,
            "message": message,
        });
        let resp = self
            .request(Method::POST, &self.tables.logs, "")
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .context("写入日志表失败")?;
        check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_values_are_url_encoded() {
        assert_eq!(eq("account_id", "conta 1&x"), "account_id=eq.conta%201%26x");
    }

    #[test]
    fn command_row_reads_payload() {
        let raw = json!({
            "id": 42,
            "command": "resume",
            "account_id": "conta-1",
            "status": "pending",
            "payload": { "area": "tribunais-mpu", "interval_hours": 12 },
            "created_at": "2024-05-01T10:00:00Z"
        });
        let row: CommandRow = serde_json::from_value(raw).unwrap();
        let cmd = row.into_command().unwrap();
        assert_eq!(cmd.id, "42");
        assert_eq!(cmd.kind, CommandKind::Resume);
        assert_eq!(cmd.area, Some(Area::TribunaisMpu));
        assert_eq!(cmd.interval_hours, Some(12));
    }

    #[test]
    fn command_row_without_payload_has_no_area() {
        let raw = json!({
            "id": "abc",
            "command": "stop",
            "account_id": "conta-1",
            "status": "pending",
            "payload": null,
            "created_at": "2024-05-01T10:00:00Z"
        });
        let cmd = serde_json::from_value::<CommandRow>(raw)
            .unwrap()
            .into_command()
            .unwrap();
        assert_eq!(cmd.kind, CommandKind::Stop);
        assert!(cmd.area.is_none());
    }

    #[test]
    fn question_row_uses_numeric_id_and_shape_label() {
        let q = ExtractedQuestion {
            source_id: "123".into(),
            area: Area::Fiscal,
            materia: None,
            assunto: None,
            concurso: None,
            banca: Some("CESPE".into()),
            orgao: None,
            cargo: Some("Agente".into()),
            prova: None,
            ano: Some(2021),
            enunciado: "x".into(),
            alternativas: vec![],
            gabarito: None,
            comentario: None,
            imagens: vec![],
            imagens_comentario: vec![],
            shape: QuestionShape::Binary,
            extraction_confidence: 0.5,
        };
        let row = QuestionRow::from_question(&q).unwrap();
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["id"], 123);
        assert_eq!(value["tipo"], "certo_errado");
        assert_eq!(value["area"], "fiscal");
        assert_eq!(value["ano"], 2021);
        assert_eq!(value["banca"], "CESPE");
        assert_eq!(value["cargo_area_especialidade_edicao"], "Agente");

        let bad = ExtractedQuestion { source_id: "12a".into(), ..q };
        assert!(matches!(
            QuestionRow::from_question(&bad),
            Err(ScraperError::PersistenceFailure { .. })
        ));
    }

    #[test]
    fn notebook_row_carries_plan_and_lifecycle() {
        let mut nb = Notebook::new("55".into(), "Policial 10".into(), Area::Policial, "u".into(), 10);
        nb.plan_id = "plan-1".into();
        nb.begin();
        nb.checkpoint(3, 60);
        let value = serde_json::to_value(NotebookRow::new("conta-1", &nb)).unwrap();
        assert_eq!(value["sequence"], 10);
        assert_eq!(value["plan_id"], "plan-1");
        assert_eq!(value["status"], "running");
        assert_eq!(value["questions_scraped"], 60);

        let back: Notebook = serde_json::from_value::<NotebookRow>(value).unwrap().into();
        assert_eq!(back, nb);
    }

    #[test]
    fn missing_credentials_fail_construction() {
        assert!(SupabaseStore::new(&StorageConfig::default()).is_err());
    }
}
