pub mod command;
pub mod config;
pub mod matrix;
pub mod moderation;
pub mod status;
pub mod store;
pub mod sync;
pub mod testing;

use std::sync::Arc;

pub use awareness_core::RecordingLogger;
pub use config::{Config, ConfigHandle, ModerationConfig};
pub use matrix::MatrixClient;
pub use moderation::{ModerationEngine, ReportWorkflow};
pub use store::{InMemoryWarningStore, SqliteWarningStore, WarningStore};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(git_hash: &str) -> String {
    git_hash.chars().take(8).collect()
}

pub fn get_bot_version() -> String {
    // A hash injected by the packaging build wins over git detection
    if let Some(git_hash) = option_env!("AWARENESS_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        built_info::PKG_VERSION.to_string()
    }
}

pub struct AppState {
    pub matrix: Arc<MatrixClient>,
    pub engine: Arc<ModerationEngine>,
    pub reports: Arc<ReportWorkflow>,
    pub store: Arc<dyn WarningStore>,
    pub moderation_config: ConfigHandle,
    pub auto_join: bool,
    pub status_auth_token: Option<String>,
    pub recording_logger: Option<RecordingLogger>,
}
