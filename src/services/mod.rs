pub mod coordinator;
pub mod poller;
pub mod retry;
pub mod worker;

pub use coordinator::{Coordinator, LoginCheck};
