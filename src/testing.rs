//! 测试用的假站点与配置

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::app::AppConfig;
use crate::app::config::DelayConfig;
use crate::core::ScraperError;
use crate::core::models::{Area, Notebook, NotebookPage, SubjectCount};
use crate::core::site::QuestionSite;
use crate::notebook::{NotebookPlatform, notebook_name};

/// 所有等待都为 0、重试很快的配置
pub fn fast_config(ceiling: u32) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.delays = DelayConfig::none();
    cfg.limits.notebook_ceiling = ceiling;
    cfg.limits.retry_attempts = 3;
    cfg.limits.retry_initial_delay_ms = 1;
    cfg.limits.retry_max_delay_ms = 2;
    cfg.limits.login_attempts = 2;
    cfg
}

/// 在某一页暂停，直到测试放行
pub struct Gate {
    pub page: u32,
    pub reached: Notify,
    pub release: Notify,
    used: AtomicBool,
}

impl Gate {
    pub fn at(page: u32) -> Arc<Self> {
        Arc::new(Self {
            page,
            reached: Notify::new(),
            release: Notify::new(),
            used: AtomicBool::new(false),
        })
    }
}

#[derive(Default)]
pub struct FakeState {
    pub login_ok: AtomicBool,
    pub logins: AtomicU32,
    pub active_sessions: AtomicU32,
    pub max_sessions: AtomicU32,
    pub opened: AtomicU32,
    pub fetch_failures: AtomicU32,
    pub fetched: Mutex<Vec<(String, u32)>>,
    pub added: Mutex<Vec<(String, String, u32)>>,
}

/// 内存中的站点：每个 caderno 固定页数，每页固定题数
pub struct FakeSite {
    pub state: Arc<FakeState>,
    pub subjects: Vec<SubjectCount>,
    pub pages_per_notebook: u32,
    pub questions_per_page: u32,
    pub corrupted_on_page: Option<u32>,
    pub gate: Option<Arc<Gate>>,
    pub login_gate: Option<Arc<Gate>>,
    session: bool,
}

impl FakeSite {
    pub fn new(subjects: &[(&str, u32)], pages_per_notebook: u32, questions_per_page: u32) -> Self {
        let state = FakeState::default();
        state.login_ok.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
            subjects: subjects
                .iter()
                .map(|(name, quantity)| SubjectCount {
                    name: name.to_string(),
                    quantity: *quantity,
                })
                .collect(),
            pages_per_notebook,
            questions_per_page,
            corrupted_on_page: None,
            gate: None,
            login_gate: None,
            session: false,
        }
    }
}

pub fn question_html(id: u32) -> String {
    format!(
        r#"<div data-questao-id="{id}">
             <div class="questao-enunciado-texto">Enunciado da questão {id} com texto suficiente.</div>
             <ul class="questao-enunciado-alternativas"><li>Certo</li><li>Errado</li></ul>
             <div class="questao-complementos-comentario-conteudo-texto">Gabarito: Certo</div>
           </div>"#
    )
}

#[async_trait]
impl NotebookPlatform for FakeSite {
    async fn open_notebook(&mut self, area: Area, sequence: u32) -> Result<Notebook, ScraperError> {
        let n = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Notebook::new(
            n.to_string(),
            notebook_name(area, sequence),
            area,
            format!("fake://cadernos/{}", n),
            sequence,
        ))
    }

    async fn add_to_notebook(
        &mut self,
        notebook: &Notebook,
        subject: &str,
        quantity: u32,
    ) -> Result<(), ScraperError> {
        self.state
            .added
            .lock()
            .unwrap()
            .push((notebook.id.clone(), subject.to_string(), quantity));
        Ok(())
    }
}

#[async_trait]
impl QuestionSite for FakeSite {
    async fn login(&mut self) -> bool {
        if self.session {
            return false;
        }
        self.state.logins.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.login_gate {
            if !gate.used.swap(true, Ordering::SeqCst) {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }
        if !self.state.login_ok.load(Ordering::SeqCst) {
            return false;
        }
        self.session = true;
        let active = self.state.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_sessions.fetch_max(active, Ordering::SeqCst);
        true
    }

    async fn close_browser(&mut self) {
        if self.session {
            self.session = false;
            self.state.active_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn has_session(&self) -> bool {
        self.session
    }

    async fn list_subjects(&mut self, _area: Area) -> Result<Vec<SubjectCount>, ScraperError> {
        Ok(self.subjects.clone())
    }

    async fn fetch_page(
        &mut self,
        notebook: &Notebook,
        page: u32,
    ) -> Result<NotebookPage, ScraperError> {
        if self.state.fetch_failures.load(Ordering::SeqCst) > 0 {
            self.state.fetch_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ScraperError::NavigationTimeout {
                url: notebook.url.clone(),
                secs: 0,
            });
        }

        self.state
            .fetched
            .lock()
            .unwrap()
            .push((notebook.id.clone(), page));

        if let Some(gate) = &self.gate {
            if gate.page == page && !gate.used.swap(true, Ordering::SeqCst) {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }

        if page > self.pages_per_notebook {
            return Ok(NotebookPage {
                number: page,
                ..Default::default()
            });
        }

        let base: u32 = notebook.id.parse::<u32>().unwrap_or(0) * 100_000 + page * 100;
        let mut fragments: Vec<String> = (0..self.questions_per_page)
            .map(|i| question_html(base + i))
            .collect();
        if self.corrupted_on_page == Some(page) {
            fragments.push(r#"<div class="questao-enunciado-texto">{{ q.enunciado }}</div>"#.to_string());
        }
        Ok(NotebookPage {
            number: page,
            fragments,
            has_next: page < self.pages_per_notebook,
        })
    }
}
