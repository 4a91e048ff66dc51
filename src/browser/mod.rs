pub mod cookies;
pub mod credential;
pub mod headless;
pub mod scripts;
pub mod session;
pub mod site;

pub use cookies::CookieStore;
pub use credential::CredentialResolver;
pub use session::BrowserSession;
pub use site::TecSite;
