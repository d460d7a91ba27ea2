// Shared snapshot sync between hosts
// Codec, merge rules, the serialized sync service and the file watcher

pub mod codec;
pub mod engine;
pub mod service;
pub mod watcher;

pub use codec::{SnapshotProject, SyncSnapshot, SNAPSHOT_VERSION};
pub use engine::{ImportOutcome, LocalFilesystem, PathProbe};
pub use service::{RegistryEvent, RegistrySync};
