pub mod extractor;
pub mod problems;

pub use extractor::{ExtractionErrorKind, QuestionExtractor};
pub use problems::{PageInspector, PageProblem};
