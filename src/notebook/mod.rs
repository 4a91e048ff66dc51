pub mod quota;

pub use quota::{NotebookPlatform, QuotaManager, notebook_name};
