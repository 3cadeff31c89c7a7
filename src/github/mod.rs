mod client;
pub mod comment;
mod pr;

pub use client::{GitHubClient, GitHubError};
pub use comment::{CommentKind, PrComment};
pub use pr::{
    file_context, ChangedFile, PrRef, PrRefError, DEFAULT_CONTEXT_RADIUS, MAX_DIFF_CHARS,
    MAX_FILE_CHARS,
};
