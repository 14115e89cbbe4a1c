//! Plain results returned by the Git plumbing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub path: String,
    /// 'M', 'A', 'D', 'R' or '?' for untracked.
    pub status: char,
    pub staged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStatus {
    pub is_repo: bool,
    pub branch: Option<String>,
    pub is_clean: bool,
    pub ahead: u32,
    pub behind: u32,
    pub files: Vec<FileStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    pub message: String,
    pub files_changed: u32,
}

impl PullResult {
    pub fn up_to_date() -> Self {
        Self {
            message: "Already up to date.".to_string(),
            files_changed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub message: String,
    /// `None` when there was nothing to commit.
    pub commit_hash: Option<String>,
    pub pushed: bool,
}

impl CommitResult {
    pub fn nothing_to_commit() -> Self {
        Self {
            message: "Nothing to commit".to_string(),
            commit_hash: None,
            pushed: false,
        }
    }
}
