// Local project/session registry owned by the host
// Records, persistence, one-time legacy import and path dedup

pub mod bootstrap;
pub mod dedup;
pub mod flags;
pub mod legacy;
pub mod models;
pub mod store;

pub use bootstrap::{bootstrap_registry, BootstrapReport};
pub use flags::FlagStore;
pub use models::{GroupRecord, ProjectCategory, ProjectRecord, SessionRecord};
pub use store::HubStore;
