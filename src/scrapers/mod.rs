pub mod browser;
pub mod fetcher;
pub mod idealista;
pub mod identity;
pub mod throttle;
pub mod traits;
pub mod types;

pub use browser::BrowserIdentitySource;
pub use fetcher::{Fetcher, HttpPageSource};
pub use idealista::IdealistaParser;
pub use identity::{FallbackIdentitySource, Identity, IdentityProvider, StaticIdentitySource};
pub use traits::{IdentitySource, PageSource};
