pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod observe;
pub mod playback;
pub mod sync;
pub mod system;

pub use config::{Config, RefreshStrategy};
pub use db::{CatalogEvent, Db};
pub use media::scanner::{CollectionInfo, Scanner, VideoFile};
pub use observe::CatalogWatch;
pub use playback::PlaybackTracker;
pub use sync::{CatalogSync, ProgressCallback, RefreshStatus};
