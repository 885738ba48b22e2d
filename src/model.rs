use serde::{Deserialize, Serialize};

/// Default name given to a file that was created without one.
pub const DEFAULT_FILENAME: &str = "newfile.txt";

/// A single text file inside a bundle. Values are immutable; edits produce a
/// new value that replaces the old one in the owning bundle by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub id: String,
    pub filename: String,
    pub data: String,
}

impl FileData {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// Sentinel empty file: no id, no content, default filename.
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            filename: DEFAULT_FILENAME.to_string(),
            data: String::new(),
        }
    }

    pub fn with_data(&self, data: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            filename: self.filename.clone(),
            data: data.into(),
        }
    }
}

/// An ordered group of files edited and saved together.
///
/// `id` is a client-local identity that stays stable across local edits.
/// `last_server_id` is only set while the bundle exactly mirrors the copy
/// last written to the server; any local mutation clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBundle {
    pub id: String,
    pub files: Vec<FileData>,
    #[serde(default)]
    pub last_server_id: Option<String>,
}

impl FileBundle {
    /// A fresh bundle holding one empty file.
    pub fn new(id: impl Into<String>, file_id: impl Into<String>) -> Self {
        let file = FileData {
            id: file_id.into(),
            ..FileData::empty()
        };
        Self {
            id: id.into(),
            files: vec![file],
            last_server_id: None,
        }
    }

    /// Combined character count across all files, checked against the save
    /// ceiling before any network call is made.
    pub fn total_len(&self) -> usize {
        self.files.iter().map(|f| f.data.chars().count()).sum()
    }
}

/// The single user-visible error. A new one always replaces the previous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub title: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}
