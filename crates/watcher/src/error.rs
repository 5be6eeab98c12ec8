//! Typed backend failures surfaced through `anyhow` seams

/// Fatal backend startup failures
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The platform watch-count ceiling was hit while registering watches.
    /// Partial coverage would be silent data loss, so startup aborts.
    #[error(
        "watch limit exhausted while registering {path}: {detail}. \
         Raise the platform limit (on Linux: `sysctl fs.inotify.max_user_watches=524288`) \
         or use force_polling"
    )]
    WatchLimit { path: String, detail: String },

    /// The out-of-process helper exited or its pipe closed
    #[error("change helper process failed: {0}")]
    HelperFailed(String),
}
