pub mod config;
pub mod events;
pub mod logging;
pub mod remote;
pub mod uploader;

// Re-export commonly used types
pub use config::AppConfig;
pub use events::{NoticeLevel, TaskEvent, TaskEventPublisher};
pub use logging::{LogConfig, LogGuard};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteCheckResult, RemoteStore};
pub use uploader::{
    TaskHandle, TaskId, TaskSnapshot, TaskStatus, UploadError, UploadManager, UploadResult,
    UploaderConfig,
};
