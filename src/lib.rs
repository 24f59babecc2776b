pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod mutation;
pub mod navigation;
pub mod tree;
pub mod workflow;

#[cfg(test)]
mod fixtures;

pub use backend::{InMemoryBackend, SessionContext, TreeBackend};
pub use config::ConfigManager;
pub use error::{MoveError, MoveResult};
pub use models::{ApiResult, Config, DocumentRef, FolderNode, Forest, MoveAck, MoveRequest, TreeSnapshot};
pub use navigation::{NavigationState, VisibleFolder};
pub use tree::ClientRootMatcher;
pub use workflow::{MoveDialog, MoveOutcome, MovePhaseKind, MoveWorkflow};

/// Installs the global logger.
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Calling this more
/// than once is harmless; later calls are ignored.
pub fn init_logging(config: &Config) {
    let env = env_logger::Env::default().default_filter_or(config.log_filter.as_str());
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already installed");
    }
}
