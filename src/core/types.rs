use crate::extract::ExtractionErrorKind;

/// 单道题的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    Saved,
    Empty,
    Corrupted,
    Incomplete,
    Failed,
}

impl From<ExtractionErrorKind> for ProcessResult {
    fn from(kind: ExtractionErrorKind) -> Self {
        match kind {
            ExtractionErrorKind::Empty => ProcessResult::Empty,
            ExtractionErrorKind::Corrupted => ProcessResult::Corrupted,
            ExtractionErrorKind::Incomplete => ProcessResult::Incomplete,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStats {
    pub saved: usize,
    pub empty: usize,
    pub corrupted: usize,
    pub incomplete: usize,
    pub failed: usize,
}

impl ProcessStats {
    pub fn add_result(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Saved => self.saved += 1,
            ProcessResult::Empty => self.empty += 1,
            ProcessResult::Corrupted => self.corrupted += 1,
            ProcessResult::Incomplete => self.incomplete += 1,
            ProcessResult::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &ProcessStats) {
        self.saved += other.saved;
        self.empty += other.empty;
        self.corrupted += other.corrupted;
        self.incomplete += other.incomplete;
        self.failed += other.failed;
    }

    pub fn processed(&self) -> usize {
        self.saved + self.empty + self.corrupted + self.incomplete + self.failed
    }
}

/// 一批题目写入后的结果
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    pub success: usize,
    pub failed: Vec<FailedRecord>,
}

#[derive(Debug, Clone)]
pub struct FailedRecord {
    pub source_id: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate_and_merge() {
        let mut page = ProcessStats::default();
        page.add_result(ProcessResult::Saved);
        page.add_result(ExtractionErrorKind::Corrupted.into());
        page.add_result(ProcessResult::Failed);

        let mut total = ProcessStats::default();
        total.merge(&page);
        total.merge(&page);
        assert_eq!(total.saved, 2);
        assert_eq!(total.corrupted, 2);
        assert_eq!(total.processed(), 6);
    }
}
