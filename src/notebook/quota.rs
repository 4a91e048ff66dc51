use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::ScraperError;
use crate::core::models::{Area, Notebook};

/// 站点上创建 caderno、向 caderno 加题的操作
#[async_trait]
pub trait NotebookPlatform: Send {
    /// 新建一个空 caderno，`sequence` 从 1 开始，用于命名
    async fn open_notebook(&mut self, area: Area, sequence: u32) -> Result<Notebook, ScraperError>;

    /// 把某学科的 `quantity` 道题加入 caderno
    async fn add_to_notebook(
        &mut self,
        notebook: &Notebook,
        subject: &str,
        quantity: u32,
    ) -> Result<(), ScraperError>;
}

/// caderno 命名规则: "<领域> <序号>"
pub fn notebook_name(area: Area, sequence: u32) -> String {
    format!("{} {}", area.display_name(), sequence)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaState {
    NoNotebook,
    Open(Notebook),
    Full(Notebook),
}

/// 一次分配：把某学科的若干题放入某个 caderno
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub notebook_id: String,
    pub subject: String,
    pub quantity: u32,
}

/// 管理当前 caderno 的题量，保证永远不超过上限
///
/// 状态转换: NoNotebook -> Open(n) -> Full(上限)；
/// 下一道题放不下时当前 caderno 变为 Full 并关闭，再开一个新的 Open(0)。
pub struct QuotaManager {
    area: Area,
    ceiling: u32,
    state: QuotaState,
    closed: Vec<Notebook>,
    sequence: u32,
}

impl QuotaManager {
    pub fn new(area: Area, ceiling: u32) -> Self {
        Self {
            area,
            ceiling: ceiling.max(1),
            state: QuotaState::NoNotebook,
            closed: Vec::new(),
            sequence: 0,
        }
    }

    pub fn state(&self) -> &QuotaState {
        &self.state
    }

    /// 分配 `quantity` 道题，放不下的部分自动拆到新的 caderno
    pub async fn assign<P>(
        &mut self,
        platform: &mut P,
        subject: &str,
        quantity: u32,
    ) -> Result<Vec<Allocation>, ScraperError>
    where
        P: NotebookPlatform + ?Sized,
    {
        let mut allocations = Vec::new();
        let mut remaining = quantity;

        while remaining > 0 {
            let room = match &self.state {
                QuotaState::Open(nb) => self.ceiling.saturating_sub(nb.question_count),
                _ => 0,
            };
            if room == 0 {
                self.mark_full();
                self.rollover(platform).await?;
                continue;
            }

            let take = room.min(remaining);
            let QuotaState::Open(nb) = &mut self.state else {
                continue;
            };
            let attempted = nb.question_count + take;
            if attempted > self.ceiling {
                return Err(ScraperError::QuotaExceeded {
                    notebook_id: nb.id.clone(),
                    attempted,
                    ceiling: self.ceiling,
                });
            }

            platform.add_to_notebook(nb, subject, take).await?;
            nb.question_count = attempted;
            remaining -= take;
            debug!(
                "📒 {} +{} 道 {} ({}/{})",
                nb.name, take, subject, nb.question_count, self.ceiling
            );
            allocations.push(Allocation {
                notebook_id: nb.id.clone(),
                subject: subject.to_string(),
                quantity: take,
            });
        }

        Ok(allocations)
    }

    fn mark_full(&mut self) {
        self.state = match std::mem::replace(&mut self.state, QuotaState::NoNotebook) {
            QuotaState::Open(nb) => {
                info!("📕 caderno {} 已满 ({} 道)", nb.name, nb.question_count);
                QuotaState::Full(nb)
            }
            other => other,
        };
    }

    /// 关闭已满的 caderno（如有）并开新的
    async fn rollover<P>(&mut self, platform: &mut P) -> Result<(), ScraperError>
    where
        P: NotebookPlatform + ?Sized,
    {
        if let QuotaState::Open(nb) | QuotaState::Full(nb) =
            std::mem::replace(&mut self.state, QuotaState::NoNotebook)
        {
            self.closed.push(nb);
        }

        self.sequence += 1;
        let mut nb = platform.open_notebook(self.area, self.sequence).await?;
        nb.question_count = 0;
        nb.sequence = self.sequence;
        info!("📗 新建 caderno: {} (id={})", nb.name, nb.id);
        self.state = QuotaState::Open(nb);
        Ok(())
    }

    /// 结束分配，返回按创建顺序排列的全部 caderno
    pub fn finish(self) -> Vec<Notebook> {
        let mut all = self.closed;
        match self.state {
            QuotaState::Open(nb) | QuotaState::Full(nb) => all.push(nb),
            QuotaState::NoNotebook => {}
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 记录所有调用，并在每次加题时检查上限
    struct FakePlatform {
        ceiling: u32,
        opened: Vec<Notebook>,
        added: Vec<(String, String, u32)>,
        counts: std::collections::HashMap<String, u32>,
    }

    impl FakePlatform {
        fn new(ceiling: u32) -> Self {
            Self {
                ceiling,
                opened: Vec::new(),
                added: Vec::new(),
                counts: Default::default(),
            }
        }
    }

    #[async_trait]
    impl NotebookPlatform for FakePlatform {
        async fn open_notebook(&mut self, area: Area, sequence: u32) -> Result<Notebook, ScraperError> {
            let nb = Notebook::new(
                format!("nb-{}", sequence),
                notebook_name(area, sequence),
                area,
                String::new(),
                sequence,
            );
            self.opened.push(nb.clone());
            Ok(nb)
        }

        async fn add_to_notebook(
            &mut self,
            notebook: &Notebook,
            subject: &str,
            quantity: u32,
        ) -> Result<(), ScraperError> {
            let count = self.counts.entry(notebook.id.clone()).or_default();
            *count += quantity;
            assert!(*count <= self.ceiling, "{} passou do limite", notebook.id);
            self.added.push((notebook.id.clone(), subject.to_string(), quantity));
            Ok(())
        }
    }

    #[tokio::test]
    async fn thirty_thousand_and_two_questions_need_two_notebooks() {
        let mut platform = FakePlatform::new(30_000);
        let mut quota = QuotaManager::new(Area::Policial, 30_000);
        for _ in 0..30_002 {
            quota.assign(&mut platform, "Direito Penal", 1).await.unwrap();
        }
        let notebooks = quota.finish();
        assert_eq!(notebooks.len(), 2);
        assert_eq!(notebooks[0].question_count, 30_000);
        assert_eq!(notebooks[1].question_count, 2);
        assert_eq!(notebooks[0].name, "Policial 1");
        assert_eq!(notebooks[1].name, "Policial 2");
        let sequences: Vec<u32> = notebooks.iter().map(|n| n.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn full_notebook_rolls_over_only_when_next_question_arrives() {
        let mut platform = FakePlatform::new(100);
        let mut quota = QuotaManager::new(Area::Fiscal, 100);
        quota.assign(&mut platform, "Contabilidade", 100).await.unwrap();
        assert!(matches!(quota.state(), QuotaState::Open(nb) if nb.question_count == 100));
        assert_eq!(platform.opened.len(), 1);

        let allocations = quota.assign(&mut platform, "Auditoria", 1).await.unwrap();
        assert_eq!(platform.opened.len(), 2);
        assert_eq!(allocations, vec![Allocation {
            notebook_id: "nb-2".into(),
            subject: "Auditoria".into(),
            quantity: 1,
        }]);
    }

    #[tokio::test]
    async fn large_subject_is_split_across_notebooks() {
        let mut platform = FakePlatform::new(1_000);
        let mut quota = QuotaManager::new(Area::Bancaria, 1_000);
        quota.assign(&mut platform, "Português", 700).await.unwrap();
        let split = quota.assign(&mut platform, "Matemática", 1_800).await.unwrap();

        let quantities: Vec<u32> = split.iter().map(|a| a.quantity).collect();
        assert_eq!(quantities, vec![300, 1_000, 500]);
        assert_eq!(platform.added.len(), 4);
        assert_eq!(platform.added[1], ("nb-1".to_string(), "Matemática".to_string(), 300));
        let notebooks = quota.finish();
        let counts: Vec<u32> = notebooks.iter().map(|n| n.question_count).collect();
        assert_eq!(counts, vec![1_000, 1_000, 500]);
    }

    #[tokio::test]
    async fn ceiling_holds_for_any_burst_sequence() {
        let ceiling = 250;
        let mut platform = FakePlatform::new(ceiling);
        let mut quota = QuotaManager::new(Area::Outras, ceiling);
        let mut total = 0u32;
        // 伪随机的批量大小
        let mut seed = 17u32;
        for _ in 0..200 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let burst = seed % 400;
            quota.assign(&mut platform, "Geral", burst).await.unwrap();
            total += burst;
            if let QuotaState::Open(nb) = quota.state() {
                assert!(nb.question_count <= ceiling);
            }
        }
        let notebooks = quota.finish();
        assert!(notebooks.iter().all(|n| n.question_count <= ceiling));
        assert_eq!(notebooks.iter().map(|n| n.question_count).sum::<u32>(), total);
        let expected = total.div_ceil(ceiling) as usize;
        assert_eq!(notebooks.len(), expected);
    }

    #[tokio::test]
    async fn nothing_is_opened_for_zero_questions() {
        let mut platform = FakePlatform::new(10);
        let mut quota = QuotaManager::new(Area::Militar, 10);
        assert!(quota.assign(&mut platform, "X", 0).await.unwrap().is_empty());
        assert_eq!(*quota.state(), QuotaState::NoNotebook);
        assert!(quota.finish().is_empty());
    }
}
