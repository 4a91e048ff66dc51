pub mod error;
pub mod models;
pub mod site;
pub mod types;

pub use error::ScraperError;
