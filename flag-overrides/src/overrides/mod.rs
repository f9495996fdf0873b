pub mod bag;
pub mod store;

pub use bag::{FlagValue, OverridesBag};
pub use store::{CookieOverridesStore, OverridesSource, COOKIE_NAME};
