pub mod adapter;
pub mod classify;
pub mod service;
pub mod types;

pub use adapter::{VcsAdapter, DEFAULT_BRANCH};
pub use classify::{is_binary_path, TierClassifier, TierRule};
pub use service::GitService;
pub use types::*;
