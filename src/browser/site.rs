use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::scripts;
use super::session::BrowserSession;
use crate::app::AppConfig;
use crate::core::ScraperError;
use crate::core::models::{Area, Notebook, NotebookPage, SubjectCount};
use crate::core::site::QuestionSite;
use crate::extract::PageInspector;
use crate::notebook::{NotebookPlatform, notebook_name};
use crate::utils::text::parse_count;

#[derive(Debug, Deserialize)]
struct RawSubject {
    name: String,
    #[serde(default)]
    count: String,
}

#[derive(Debug, Deserialize)]
struct FragmentsPayload {
    #[serde(default)]
    fragments: Vec<String>,
    #[serde(default, rename = "hasNext")]
    has_next: bool,
}

/// 浏览器当前停在哪个 caderno 的哪一页
///
/// 只在一页读取成功后记录；翻页途中出错时位置未知，下次改为按 URL 打开。
#[derive(Debug, Default)]
struct PageCursor {
    at: Option<(String, u32)>,
}

impl PageCursor {
    /// 能否直接点击下一页到达 `page`，调用后位置清空直到 `settle`
    fn begin(&mut self, notebook_id: &str, page: u32) -> bool {
        let follows = page > 1
            && self
                .at
                .as_ref()
                .is_some_and(|(id, p)| id == notebook_id && *p + 1 == page);
        self.at = None;
        follows
    }

    fn settle(&mut self, notebook_id: &str, page: u32) {
        self.at = Some((notebook_id.to_string(), page));
    }

    fn reset(&mut self) {
        self.at = None;
    }
}

/// TecConcursos 站点，通过浏览器会话操作
pub struct TecSite {
    config: Arc<AppConfig>,
    session: BrowserSession,
    inspector: PageInspector,
    notebook_id: Regex,
    cursor: PageCursor,
}

impl TecSite {
    pub fn new(config: Arc<AppConfig>, session: BrowserSession) -> Result<Self> {
        Ok(Self {
            config,
            session,
            inspector: PageInspector::new()?,
            notebook_id: Regex::new(r"cadernos/(\d+)")?,
            cursor: PageCursor::default(),
        })
    }

    /// 打开页面；被重定向到登录页时重新登录一次
    async fn visit(&mut self, url: &str) -> Result<(), ScraperError> {
        self.cursor.reset();
        self.session.goto(url).await?;
        if !self.session.current_url().await?.contains("/login") {
            return Ok(());
        }

        warn!("⚠️ 会话已失效，重新登录...");
        self.session.close_browser().await;
        if !self.session.login().await {
            return Err(ScraperError::LoginFailed("会话失效后重新登录失败".to_string()));
        }
        self.session.goto(url).await
    }

    async fn click_by_text(&self, selector: &str, text: &str) -> Result<bool, ScraperError> {
        self.session
            .evaluate(scripts::CLICK_BY_TEXT_JS, &json!({ "selector": selector, "text": text }))
            .await
    }

    /// 进入新建 caderno 表单并选中领域
    async fn open_form_for_area(&mut self, area: Area) -> Result<(), ScraperError> {
        let url = self.config.site.notebooks_url();
        self.visit(&url).await?;
        if self.click_by_text("button, a, .btn-novo-caderno", "Novo Caderno").await? {
            self.session.wait_for_navigation().await;
        }

        let selected: bool = self
            .session
            .evaluate(scripts::SELECT_AREA_JS, &json!(area.display_name()))
            .await?;
        if !selected {
            return Err(ScraperError::Browser(format!("找不到领域: {}", area)));
        }
        self.pause_after_load().await;
        Ok(())
    }

    async fn open_quantity_editor(&self) -> Result<(), ScraperError> {
        if self
            .click_by_text("a, button, .edit-quantities", "Editar quantidades")
            .await?
        {
            self.pause_after_load().await;
        }
        Ok(())
    }

    async fn save_form(&self, name: &str) -> Result<(), ScraperError> {
        let clicked: bool = self
            .session
            .evaluate(scripts::SAVE_NOTEBOOK_JS, &json!({ "name": name }))
            .await?;
        if !clicked {
            return Err(ScraperError::Browser("找不到保存按钮".to_string()));
        }
        self.session.wait_for_navigation().await;
        self.pause_after_load().await;
        Ok(())
    }

    async fn pause_after_load(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(
            self.config.delays.after_page_load_ms,
        ))
        .await;
    }

    fn edit_url(&self, notebook: &Notebook) -> String {
        format!(
            "{}/questoes/cadernos/{}/editar",
            self.config.site.base_url, notebook.id
        )
    }
}

#[async_trait]
impl NotebookPlatform for TecSite {
    async fn open_notebook(&mut self, area: Area, sequence: u32) -> Result<Notebook, ScraperError> {
        let name = notebook_name(area, sequence);
        info!("📗 正在创建 caderno: {}", name);
        self.open_form_for_area(area).await?;

        if self.config.worker.exclude_outdated {
            let boxes: u32 = self
                .session
                .evaluate(scripts::EXCLUDE_OUTDATED_JS, &Value::Null)
                .await?;
            debug!("已勾选 {} 个排除选项", boxes);
        }

        self.save_form(&name).await?;
        let url = self.session.current_url().await?;
        let id = self
            .notebook_id
            .captures(&url)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| ScraperError::Browser(format!("无法从 URL 读取 caderno id: {}", url)))?;

        let url = self.config.site.notebook_url(&id);
        Ok(Notebook::new(id, name, area, url, sequence))
    }

    async fn add_to_notebook(
        &mut self,
        notebook: &Notebook,
        subject: &str,
        quantity: u32,
    ) -> Result<(), ScraperError> {
        let url = self.edit_url(notebook);
        self.visit(&url).await?;
        self.open_quantity_editor().await?;

        let found: bool = self
            .session
            .evaluate(
                scripts::SET_SUBJECT_QUANTITY_JS,
                &json!({ "subject": subject, "quantity": quantity }),
            )
            .await?;
        if !found {
            return Err(ScraperError::Browser(format!("找不到学科: {}", subject)));
        }
        self.save_form(&notebook.name).await
    }
}

#[async_trait]
impl QuestionSite for TecSite {
    async fn login(&mut self) -> bool {
        self.cursor.reset();
        self.session.login().await
    }

    async fn close_browser(&mut self) {
        self.cursor.reset();
        self.session.close_browser().await;
    }

    fn has_session(&self) -> bool {
        self.session.is_active()
    }

    async fn list_subjects(&mut self, area: Area) -> Result<Vec<SubjectCount>, ScraperError> {
        self.open_form_for_area(area).await?;
        self.open_quantity_editor().await?;
        let raw: Vec<RawSubject> = self
            .session
            .evaluate(scripts::LIST_SUBJECTS_JS, &Value::Null)
            .await?;
        let subjects: Vec<SubjectCount> = raw
            .into_iter()
            .filter_map(|s| match parse_count(&s.count) {
                Some(quantity) if quantity > 0 => Some(SubjectCount {
                    name: s.name,
                    quantity,
                }),
                _ => {
                    debug!("忽略学科 {} (题量: {:?})", s.name, s.count);
                    None
                }
            })
            .collect();
        info!("📚 {} 共有 {} 个学科", area, subjects.len());
        Ok(subjects)
    }

    async fn fetch_page(
        &mut self,
        notebook: &Notebook,
        page: u32,
    ) -> Result<NotebookPage, ScraperError> {
        if self.cursor.begin(&notebook.id, page) {
            let clicked: bool = self
                .session
                .evaluate(scripts::NEXT_PAGE_JS, &Value::Null)
                .await?;
            if !clicked {
                return Ok(NotebookPage {
                    number: page,
                    ..Default::default()
                });
            }
            self.session.wait_for_navigation().await;
            self.pause_after_load().await;
        } else {
            let url = if page <= 1 {
                notebook.url.clone()
            } else {
                format!("{}?pagina={}", notebook.url, page)
            };
            self.visit(&url).await?;
        }

        let payload: FragmentsPayload = self
            .session
            .evaluate(scripts::QUESTION_FRAGMENTS_JS, &Value::Null)
            .await?;

        if payload.fragments.is_empty() {
            let html = self.session.content().await?;
            let problem = self.inspector.inspect(&html);
            if problem.is_blocking() {
                return Err(ScraperError::PageBlocked(problem));
            }
            debug!("caderno {} 第 {} 页没有题目 ({})", notebook.id, page, problem);
        }

        self.cursor.settle(&notebook.id, page);
        Ok(NotebookPage {
            number: page,
            fragments: payload.fragments,
            has_next: payload.has_next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_click_only_follows_a_settled_page() {
        let mut cursor = PageCursor::default();
        assert!(!cursor.begin("10", 1));
        cursor.settle("10", 1);
        assert!(cursor.begin("10", 2));
        // 点击后读取失败，重试时必须按 URL 打开第 2 页
        assert!(!cursor.begin("10", 2));
        cursor.settle("10", 2);
        assert!(cursor.begin("10", 3));
    }

    #[test]
    fn other_notebook_or_skipped_page_reloads() {
        let mut cursor = PageCursor::default();
        cursor.settle("10", 4);
        assert!(!cursor.begin("11", 5));
        cursor.settle("10", 4);
        assert!(!cursor.begin("10", 6));
        cursor.settle("10", 4);
        cursor.reset();
        assert!(!cursor.begin("10", 5));
    }
}
