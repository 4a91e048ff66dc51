use async_trait::async_trait;

use crate::core::ScraperError;
use crate::core::models::{Area, Notebook, NotebookPage, SubjectCount};
use crate::notebook::NotebookPlatform;

/// 题库站点的抽象：登录、读取学科、翻页
///
/// 真实实现是 `browser::TecSite`，测试里用内存中的假站点。
#[async_trait]
pub trait QuestionSite: NotebookPlatform + Send + 'static {
    /// 建立会话；已有活动会话时返回 false
    async fn login(&mut self) -> bool;

    /// 关闭浏览器，之后可以重新 login
    async fn close_browser(&mut self);

    fn has_session(&self) -> bool;

    /// 领域下所有学科及其可用题量
    async fn list_subjects(&mut self, area: Area) -> Result<Vec<SubjectCount>, ScraperError>;

    /// 读取 caderno 的某一页（从 1 开始）
    async fn fetch_page(&mut self, notebook: &Notebook, page: u32)
    -> Result<NotebookPage, ScraperError>;
}
