use thiserror::Error;
use tracing::debug;

use crate::cache::{ClientCache, FAVORITES_LIST_KEY, HISTORY_LIST_KEY, UPLOAD_LIST_KEY};
use crate::keygen::KeyGenerator;
use crate::model::{ErrorInfo, FileBundle, FileData};
use crate::upload::UploadService;

/// Upload list, history, and favorites are all capped at this many entries;
/// inserting past the cap evicts from the tail.
pub const MAX_LIST_ENTRIES: usize = 10;

/// Combined character ceiling across a bundle's files, checked before any
/// save call. Mirrors the server's request body cap.
pub const MAX_BUNDLE_CHARS: usize = 390_000;

/// Failures that indicate a caller bug rather than user-correctable input.
/// They are raised out of commands and caught only by the dispatch gate.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state container is not initialized")]
    NotInitialized,
    #[error("no active upload")]
    NoActiveUpload,
    #[error("upload {0} is not in the list")]
    UnknownUpload(String),
    #[error("upload index {0} is out of range")]
    IndexOutOfRange(usize),
}

/// Which bundle is active: an entry of the upload list, the single ad-hoc
/// slot, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    List(usize),
    AdHoc,
}

/// URL sink the container pushes canonical paths into. The browser host
/// backs this with history.pushState; tests record; headless contexts drop.
pub trait Navigator {
    fn push_state(&mut self, path: &str);
}

/// Navigator for contexts with no address bar.
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn push_state(&mut self, _path: &str) {}
}

/// Every state mutation flows through [`StateContainer::dispatch`] as one of
/// these commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize,
    CreateUpload { set_active: bool },
    InsertUpload { bundle: FileBundle, set_active: bool },
    ReadUpload { server_id: String },
    DeleteUpload { id: String },
    SelectUpload { index: Option<usize> },
    SaveActiveUpload,
    SetActiveUploadDirty,
    CreateFile { filename: String, set_active: bool },
    UpdateFile { id: String, contents: String },
    DeleteFile { id: String },
    SetActiveFile { index: Option<usize> },
    CreateHistory { server_id: String },
    DeleteHistory { server_id: String },
    CreateFavorite { server_id: String },
    DeleteFavorite { server_id: String },
    ShowError { title: String, message: String },
    ResetMessage,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Initialize => "initialize",
            Command::CreateUpload { .. } => "create_upload",
            Command::InsertUpload { .. } => "insert_upload",
            Command::ReadUpload { .. } => "read_upload",
            Command::DeleteUpload { .. } => "delete_upload",
            Command::SelectUpload { .. } => "select_upload",
            Command::SaveActiveUpload => "save_active_upload",
            Command::SetActiveUploadDirty => "set_active_upload_dirty",
            Command::CreateFile { .. } => "create_file",
            Command::UpdateFile { .. } => "update_file",
            Command::DeleteFile { .. } => "delete_file",
            Command::SetActiveFile { .. } => "set_active_file",
            Command::CreateHistory { .. } => "create_history",
            Command::DeleteHistory { .. } => "delete_history",
            Command::CreateFavorite { .. } => "create_favorite",
            Command::DeleteFavorite { .. } => "delete_favorite",
            Command::ShowError { .. } => "show_error",
            Command::ResetMessage => "reset_message",
        }
    }
}

/// Single source of truth for the editor's working set: the known bundles,
/// the active selection, the single live error, and the canonical URL.
/// Built for a single-threaded event loop; one command runs at a time,
/// enforced here by `&mut self`.
pub struct StateContainer<U, C> {
    uploads: Vec<FileBundle>,
    history: Vec<String>,
    favorites: Vec<String>,
    ad_hoc: Option<FileBundle>,
    selection: Selection,
    active_file_index: Option<usize>,
    error: Option<ErrorInfo>,
    display_error: bool,
    initialized: bool,
    interactive: bool,
    current_path: String,
    keygen: KeyGenerator,
    uploader: U,
    cache: C,
    navigator: Box<dyn Navigator>,
    observers: Vec<Box<dyn FnMut()>>,
}

impl<U: UploadService, C: ClientCache> StateContainer<U, C> {
    pub fn new(uploader: U, cache: C, keygen: KeyGenerator) -> Self {
        Self {
            uploads: Vec::new(),
            history: Vec::new(),
            favorites: Vec::new(),
            ad_hoc: None,
            selection: Selection::None,
            active_file_index: None,
            error: None,
            display_error: false,
            initialized: false,
            interactive: true,
            current_path: "/".to_string(),
            keygen,
            uploader,
            cache,
            navigator: Box::new(NoopNavigator),
            observers: Vec::new(),
        }
    }

    pub fn with_navigator(mut self, navigator: impl Navigator + 'static) -> Self {
        self.navigator = Box::new(navigator);
        self
    }

    /// Marks this container as a non-interactive snapshot: state changes
    /// never touch the URL.
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    /// Registers a change listener; listeners run in registration order
    /// after every observable state change.
    pub fn on_change(&mut self, observer: impl FnMut() + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn uploads(&self) -> &[FileBundle] {
        &self.uploads
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn favorites(&self) -> &[String] {
        &self.favorites
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn display_error(&self) -> bool {
        self.display_error
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn active_file_index(&self) -> Option<usize> {
        self.active_file_index
    }

    pub fn ad_hoc_bundle(&self) -> Option<&FileBundle> {
        self.ad_hoc.as_ref()
    }

    /// The canonical path last derived from the active selection.
    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn active_upload(&self) -> Option<&FileBundle> {
        if let Some(bundle) = self.ad_hoc.as_ref() {
            return Some(bundle);
        }
        match self.selection {
            Selection::List(index) => self.uploads.get(index),
            _ => None,
        }
    }

    fn active_upload_mut(&mut self) -> Option<&mut FileBundle> {
        if let Some(bundle) = self.ad_hoc.as_mut() {
            return Some(bundle);
        }
        match self.selection {
            Selection::List(index) => self.uploads.get_mut(index),
            _ => None,
        }
    }

    pub fn active_file(&self) -> Option<&FileData> {
        let bundle = self.active_upload()?;
        self.active_file_index
            .and_then(|index| bundle.files.get(index))
    }

    /// The dispatch gate. Runs the command, converts any raised failure
    /// into the "Unhandled Exception" error, and propagates on change.
    /// Returns whether observable state changed.
    pub async fn dispatch(&mut self, command: Command) -> bool {
        self.dispatch_with(command, true).await
    }

    /// Dispatch without URL synchronization; listeners still run.
    pub async fn dispatch_no_nav(&mut self, command: Command) -> bool {
        self.dispatch_with(command, false).await
    }

    async fn dispatch_with(&mut self, command: Command, navigate: bool) -> bool {
        debug!(command = command.name(), "dispatching");
        let changed = match self.apply(command).await {
            Ok(changed) => changed,
            Err(err) => self.show_error("Unhandled Exception", err.to_string()),
        };
        if changed {
            self.propagate(navigate);
        }
        changed
    }

    async fn apply(&mut self, command: Command) -> Result<bool, StateError> {
        match command {
            Command::Initialize => self.initialize().await,
            Command::CreateUpload { set_active } => self.create_upload(set_active).await,
            Command::InsertUpload { bundle, set_active } => {
                self.insert_upload(bundle, set_active).await
            }
            Command::ReadUpload { server_id } => self.read_upload(&server_id).await,
            Command::DeleteUpload { id } => self.delete_upload(&id).await,
            Command::SelectUpload { index } => self.select_upload(index),
            Command::SaveActiveUpload => self.save_active_upload().await,
            Command::SetActiveUploadDirty => self.set_active_upload_dirty().await,
            Command::CreateFile { filename, set_active } => {
                self.create_file(&filename, set_active).await
            }
            Command::UpdateFile { id, contents } => self.update_file(&id, &contents).await,
            Command::DeleteFile { id } => self.delete_file(&id).await,
            Command::SetActiveFile { index } => self.set_active_file(index),
            Command::CreateHistory { server_id } => self.create_history(&server_id).await,
            Command::DeleteHistory { server_id } => self.delete_history(&server_id).await,
            Command::CreateFavorite { server_id } => self.create_favorite(&server_id).await,
            Command::DeleteFavorite { server_id } => self.delete_favorite(&server_id).await,
            Command::ShowError { title, message } => Ok(self.show_error(title, message)),
            Command::ResetMessage => Ok(self.reset_message()),
        }
    }

    /// Loads the persisted lists. Runs once at startup; calling it again
    /// re-reads and overwrites in-memory state.
    async fn initialize(&mut self) -> Result<bool, StateError> {
        self.uploads = self.cache.get_list(UPLOAD_LIST_KEY).await;
        self.history = self.cache.get_list(HISTORY_LIST_KEY).await;
        self.favorites = self.cache.get_list(FAVORITES_LIST_KEY).await;
        self.initialized = true;
        Ok(true)
    }

    fn ensure_initialized(&self) -> Result<(), StateError> {
        if self.initialized {
            Ok(())
        } else {
            Err(StateError::NotInitialized)
        }
    }

    async fn create_upload(&mut self, set_active: bool) -> Result<bool, StateError> {
        let bundle = FileBundle::new(self.keygen.generate_id(), self.keygen.generate_id());
        self.insert_upload(bundle, set_active).await
    }

    async fn insert_upload(
        &mut self,
        mut bundle: FileBundle,
        set_active: bool,
    ) -> Result<bool, StateError> {
        self.ensure_initialized()?;

        let existing = self.uploads.iter().position(|u| u.id == bundle.id);
        if existing.is_some() {
            // Local ids must stay unique; the incoming bundle gets
            // renumbered, not the resident one.
            bundle.id = self.keygen.generate_id();
        }
        let index = existing.unwrap_or(0);

        self.uploads.insert(index, bundle);
        self.uploads.truncate(MAX_LIST_ENTRIES);
        self.persist_uploads().await;

        if set_active {
            self.selection = Selection::None;
            self.select_upload(Some(index))?;
        }
        Ok(true)
    }

    async fn read_upload(&mut self, server_id: &str) -> Result<bool, StateError> {
        self.ensure_initialized()?;

        let bundle = match self.uploader.read_bundle(server_id).await {
            Ok(bundle) => bundle,
            Err(err) => {
                return Ok(
                    self.show_error(format!("Unable to load {server_id}"), err.to_string())
                );
            }
        };

        if let Some(index) = self.uploads.iter().position(|u| u.id == bundle.id) {
            // Already adopted locally; just select it.
            return self.select_upload(Some(index));
        }

        // Unknown bundle: hold it in the single ad-hoc slot until the user
        // mutates it or saves it as their own.
        self.ad_hoc = Some(bundle);
        self.selection = Selection::AdHoc;
        self.active_file_index = Some(0);
        self.create_history(server_id).await?;
        Ok(true)
    }

    async fn delete_upload(&mut self, id: &str) -> Result<bool, StateError> {
        self.ensure_initialized()?;

        let index = self
            .uploads
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| StateError::UnknownUpload(id.to_string()))?;

        self.uploads.remove(index);
        self.persist_uploads().await;

        if self.uploads.is_empty() {
            self.active_file_index = None;
            self.selection = Selection::None;
            self.ad_hoc = None;
            return Ok(true);
        }

        let neighbor = index.min(self.uploads.len() - 1);
        // The bundle at this index changed, so reselect unconditionally.
        self.selection = Selection::None;
        self.select_upload(Some(neighbor))?;
        Ok(true)
    }

    fn select_upload(&mut self, index: Option<usize>) -> Result<bool, StateError> {
        let target = match index {
            None => Selection::None,
            Some(i) => Selection::List(i),
        };
        if self.selection == target {
            return Ok(false);
        }

        match index {
            None => {
                self.selection = Selection::None;
                self.active_file_index = None;
                self.ad_hoc = None;
                Ok(true)
            }
            Some(i) => {
                if i >= self.uploads.len() {
                    return Err(StateError::IndexOutOfRange(i));
                }
                self.selection = Selection::List(i);
                // Ad-hoc bundles are single-use; leaving one drops it.
                self.ad_hoc = None;
                self.active_file_index = if self.uploads[i].files.is_empty() {
                    None
                } else {
                    Some(0)
                };
                Ok(true)
            }
        }
    }

    async fn save_active_upload(&mut self) -> Result<bool, StateError> {
        self.ensure_initialized()?;
        let active = self.active_upload().ok_or(StateError::NoActiveUpload)?;

        // Already durably saved; nothing to send.
        if active.last_server_id.is_some() {
            return Ok(false);
        }

        if active.total_len() > MAX_BUNDLE_CHARS {
            return Ok(self.show_error(
                "File length limit exceeded",
                format!("Bundles are limited to {MAX_BUNDLE_CHARS} characters of content"),
            ));
        }

        let bundle = active.clone();
        let server_id = match self.uploader.save_bundle(&bundle).await {
            Ok(server_id) => server_id,
            Err(err) => {
                return Ok(
                    self.show_error(format!("Failed to save {}", bundle.id), err.to_string())
                );
            }
        };
        debug!(bundle = %bundle.id, server_id = %server_id, "bundle saved");

        if let Some(mut adopted) = self.ad_hoc.take() {
            // Promote out of the ad-hoc slot under a fresh local id.
            adopted.last_server_id = Some(server_id);
            adopted.id = self.keygen.generate_id();
            self.selection = Selection::None;
            self.insert_upload(adopted, true).await?;
        } else {
            if let Some(active) = self.active_upload_mut() {
                active.last_server_id = Some(server_id);
            }
            self.persist_uploads().await;
        }
        Ok(true)
    }

    /// Out-of-band dirty hook for the editor. Editing implies adoption, so
    /// an ad-hoc active bundle is promoted first.
    async fn set_active_upload_dirty(&mut self) -> Result<bool, StateError> {
        self.active_upload().ok_or(StateError::NoActiveUpload)?;
        self.mark_active_dirty().await
    }

    /// Shared dirty-marking path for every content mutation: promotes an
    /// ad-hoc active bundle, then clears `last_server_id` at most once.
    async fn mark_active_dirty(&mut self) -> Result<bool, StateError> {
        if let Some(mut adopted) = self.ad_hoc.take() {
            // A fresh local id keeps the promoted bundle from shadowing a
            // later re-read of the same server content.
            adopted.id = self.keygen.generate_id();
            adopted.last_server_id = None;
            let file_index = self.active_file_index;
            self.selection = Selection::None;
            self.insert_upload(adopted, true).await?;
            // Keep the file the user was editing selected.
            if let Some(index) = file_index {
                let len = self.active_upload().map(|u| u.files.len()).unwrap_or(0);
                if index < len {
                    self.active_file_index = Some(index);
                }
            }
            return Ok(true);
        }

        let active = self.active_upload_mut().ok_or(StateError::NoActiveUpload)?;
        if active.last_server_id.is_none() {
            return Ok(false);
        }
        active.last_server_id = None;
        Ok(true)
    }

    async fn create_file(&mut self, filename: &str, set_active: bool) -> Result<bool, StateError> {
        let active = self.active_upload().ok_or(StateError::NoActiveUpload)?;

        if active.files.iter().any(|f| f.filename == filename) {
            return Ok(self.show_error(
                "Name Conflict",
                format!("The current set already contains a file named {filename}"),
            ));
        }

        let file = FileData::new(self.keygen.generate_id(), filename, "");
        self.active_upload_mut()
            .ok_or(StateError::NoActiveUpload)?
            .files
            .push(file);
        self.mark_active_dirty().await?;

        if set_active {
            let len = self
                .active_upload()
                .map(|u| u.files.len())
                .ok_or(StateError::NoActiveUpload)?;
            self.active_file_index = Some(len - 1);
        }
        Ok(true)
    }

    async fn update_file(&mut self, id: &str, contents: &str) -> Result<bool, StateError> {
        let active = self.active_upload().ok_or(StateError::NoActiveUpload)?;

        let Some(index) = active.files.iter().position(|f| f.id == id) else {
            return Ok(false);
        };
        // Identical content is a true no-op: no dirty flag, no listeners.
        if active.files[index].data == contents {
            return Ok(false);
        }

        let updated = active.files[index].with_data(contents);
        self.active_upload_mut()
            .ok_or(StateError::NoActiveUpload)?
            .files[index] = updated;
        self.mark_active_dirty().await?;
        Ok(true)
    }

    async fn delete_file(&mut self, id: &str) -> Result<bool, StateError> {
        let active = self.active_upload().ok_or(StateError::NoActiveUpload)?;

        let Some(index) = active.files.iter().position(|f| f.id == id) else {
            return Ok(false);
        };

        self.active_upload_mut()
            .ok_or(StateError::NoActiveUpload)?
            .files
            .remove(index);
        self.mark_active_dirty().await?;

        let len = self.active_upload().map(|u| u.files.len()).unwrap_or(0);
        self.active_file_index = if len == 0 {
            None
        } else {
            Some(index.saturating_sub(1).min(len - 1))
        };
        Ok(true)
    }

    fn set_active_file(&mut self, index: Option<usize>) -> Result<bool, StateError> {
        match index {
            // The clear sentinel is always accepted.
            None => {
                if self.active_file_index.is_none() {
                    return Ok(false);
                }
                self.active_file_index = None;
                Ok(true)
            }
            Some(i) => {
                let active = self.active_upload().ok_or(StateError::NoActiveUpload)?;
                // A positive out-of-range index is inert, not an error:
                // callers may race against a file list that just shrank.
                if i >= active.files.len() {
                    return Ok(false);
                }
                if self.active_file_index == Some(i) {
                    return Ok(false);
                }
                self.active_file_index = Some(i);
                Ok(true)
            }
        }
    }

    async fn create_history(&mut self, server_id: &str) -> Result<bool, StateError> {
        self.ensure_initialized()?;
        if self.history.iter().any(|h| h == server_id) {
            return Ok(false);
        }
        self.history.insert(0, server_id.to_string());
        self.history.truncate(MAX_LIST_ENTRIES);
        self.cache.set_list(HISTORY_LIST_KEY, &self.history).await;
        Ok(true)
    }

    async fn delete_history(&mut self, server_id: &str) -> Result<bool, StateError> {
        self.ensure_initialized()?;
        let Some(index) = self.history.iter().position(|h| h == server_id) else {
            return Ok(false);
        };
        self.history.remove(index);
        self.cache.set_list(HISTORY_LIST_KEY, &self.history).await;
        Ok(true)
    }

    async fn create_favorite(&mut self, server_id: &str) -> Result<bool, StateError> {
        self.ensure_initialized()?;
        if self.favorites.iter().any(|f| f == server_id) {
            return Ok(false);
        }
        self.favorites.insert(0, server_id.to_string());
        self.favorites.truncate(MAX_LIST_ENTRIES);
        self.cache
            .set_list(FAVORITES_LIST_KEY, &self.favorites)
            .await;
        Ok(true)
    }

    async fn delete_favorite(&mut self, server_id: &str) -> Result<bool, StateError> {
        self.ensure_initialized()?;
        let Some(index) = self.favorites.iter().position(|f| f == server_id) else {
            return Ok(false);
        };
        self.favorites.remove(index);
        self.cache
            .set_list(FAVORITES_LIST_KEY, &self.favorites)
            .await;
        Ok(true)
    }

    pub fn show_error(&mut self, title: impl Into<String>, message: impl Into<String>) -> bool {
        self.error = Some(ErrorInfo::new(title, message));
        self.display_error = true;
        true
    }

    pub fn reset_message(&mut self) -> bool {
        let changed = self.error.is_some() || self.display_error;
        self.error = None;
        self.display_error = false;
        changed
    }

    async fn persist_uploads(&mut self) {
        self.cache.set_list(UPLOAD_LIST_KEY, &self.uploads).await;
    }

    /// Derives the canonical URL from the current selection and pushes it
    /// when it differs from the last derived one, then runs the listeners.
    /// Listener panics are not caught: they indicate a UI bug, not a
    /// recoverable data error.
    fn propagate(&mut self, navigate: bool) {
        if navigate && self.interactive {
            let target = self.desired_path();
            if target != self.current_path {
                self.current_path = target.clone();
                self.navigator.push_state(&target);
            }
        }

        let mut observers = std::mem::take(&mut self.observers);
        for notify in observers.iter_mut() {
            notify();
        }
        // Listeners registered during notification land behind the rest.
        observers.extend(self.observers.drain(..));
        self.observers = observers;
    }

    fn desired_path(&self) -> String {
        let Some(active) = self.active_upload() else {
            return "/".to_string();
        };
        // Unsaved work has no stable URL.
        let Some(server_id) = active.last_server_id.as_deref() else {
            return "/".to_string();
        };
        match self.active_file_index {
            Some(index) => format!("/{server_id}/{index}"),
            None => format!("/{server_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemCache;
    use crate::upload::UploadError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ScriptedUploader {
        reads: Arc<Mutex<VecDeque<Result<FileBundle, UploadError>>>>,
        saves: Arc<Mutex<VecDeque<Result<String, UploadError>>>>,
        read_calls: Arc<AtomicUsize>,
        save_calls: Arc<AtomicUsize>,
    }

    impl ScriptedUploader {
        fn script_read(&self, result: Result<FileBundle, UploadError>) {
            self.reads.lock().unwrap().push_back(result);
        }

        fn script_save(&self, result: Result<String, UploadError>) {
            self.saves.lock().unwrap().push_back(result);
        }

        fn save_calls(&self) -> usize {
            self.save_calls.load(Ordering::SeqCst)
        }
    }

    impl UploadService for ScriptedUploader {
        async fn read_bundle(&self, server_id: &str) -> Result<FileBundle, UploadError> {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            self.reads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(UploadError::NotFound(server_id.to_string())))
        }

        async fn save_bundle(&self, _bundle: &FileBundle) -> Result<String, UploadError> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            self.saves
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(UploadError::Transport("unscripted save".to_string())))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNavigator {
        pushes: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNavigator {
        fn pushes(&self) -> Vec<String> {
            self.pushes.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn push_state(&mut self, path: &str) {
            self.pushes.lock().unwrap().push(path.to_string());
        }
    }

    type TestContainer = StateContainer<ScriptedUploader, MemCache>;

    async fn container() -> (TestContainer, ScriptedUploader, RecordingNavigator) {
        let uploader = ScriptedUploader::default();
        let navigator = RecordingNavigator::default();
        let mut container = StateContainer::new(uploader.clone(), MemCache::new(), KeyGenerator)
            .with_navigator(navigator.clone());
        container.dispatch(Command::Initialize).await;
        (container, uploader, navigator)
    }

    fn server_bundle(id: &str, server_id: &str) -> FileBundle {
        let mut bundle = FileBundle::new(id, "serverfileaa");
        bundle.files[0] = bundle.files[0].with_data("remote content");
        bundle.last_server_id = Some(server_id.to_string());
        bundle
    }

    #[tokio::test]
    async fn upload_list_never_exceeds_ten_and_keeps_most_recent() {
        let (mut container, _, _) = container().await;
        for _ in 0..12 {
            container
                .dispatch(Command::CreateUpload { set_active: false })
                .await;
        }
        assert_eq!(container.uploads().len(), MAX_LIST_ENTRIES);

        // The most recent insertion sits at the front.
        let newest = container.uploads()[0].id.clone();
        container
            .dispatch(Command::CreateUpload { set_active: false })
            .await;
        assert_eq!(container.uploads()[1].id, newest);
        assert_eq!(container.uploads().len(), MAX_LIST_ENTRIES);
    }

    #[tokio::test]
    async fn create_upload_activates_first_file() {
        let (mut container, _, _) = container().await;
        let changed = container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        assert!(changed);
        assert_eq!(container.uploads().len(), 1);
        assert_eq!(container.selection(), Selection::List(0));
        assert_eq!(container.active_file_index(), Some(0));
        assert!(container.uploads()[0].last_server_id.is_none());
    }

    #[tokio::test]
    async fn save_sets_server_id_without_duplicating_the_bundle() {
        let (mut container, uploader, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        uploader.script_save(Ok("abc123".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;

        assert_eq!(container.uploads().len(), 1);
        assert_eq!(
            container.uploads()[0].last_server_id.as_deref(),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn second_save_of_unchanged_bundle_makes_no_network_call() {
        let (mut container, uploader, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        uploader.script_save(Ok("abc123".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;
        let changed = container.dispatch(Command::SaveActiveUpload).await;

        assert!(!changed);
        assert_eq!(uploader.save_calls(), 1);
    }

    #[tokio::test]
    async fn edit_after_save_clears_server_id_and_resaves() {
        let (mut container, uploader, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        uploader.script_save(Ok("first0000000".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;

        let file_id = container.active_file().unwrap().id.clone();
        container
            .dispatch(Command::UpdateFile {
                id: file_id,
                contents: "edited".to_string(),
            })
            .await;
        assert!(container.uploads()[0].last_server_id.is_none());

        uploader.script_save(Ok("second000000".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;
        assert_eq!(
            container.uploads()[0].last_server_id.as_deref(),
            Some("second000000")
        );
        assert_eq!(uploader.save_calls(), 2);
    }

    #[tokio::test]
    async fn identical_update_is_a_true_noop() {
        let (mut container, uploader, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        uploader.script_save(Ok("abc123".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        container.on_change(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let file_id = container.active_file().unwrap().id.clone();
        let changed = container
            .dispatch(Command::UpdateFile {
                id: file_id,
                contents: String::new(),
            })
            .await;

        assert!(!changed);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(
            container.uploads()[0].last_server_id.as_deref(),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn oversized_bundle_is_rejected_before_any_network_call() {
        let (mut container, uploader, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        let file_id = container.active_file().unwrap().id.clone();
        container
            .dispatch(Command::UpdateFile {
                id: file_id,
                contents: "x".repeat(400_000),
            })
            .await;
        container.dispatch(Command::SaveActiveUpload).await;

        let error = container.error().unwrap();
        assert_eq!(error.title, "File length limit exceeded");
        assert_eq!(uploader.save_calls(), 0);
    }

    #[tokio::test]
    async fn select_current_index_is_unchanged_and_does_not_navigate() {
        let (mut container, _, navigator) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        let before = navigator.pushes().len();
        let changed = container
            .dispatch(Command::SelectUpload { index: Some(0) })
            .await;

        assert!(!changed);
        assert_eq!(navigator.pushes().len(), before);
    }

    #[tokio::test]
    async fn deleting_the_only_upload_clears_all_selection() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        let id = container.uploads()[0].id.clone();

        container.dispatch(Command::DeleteUpload { id }).await;

        assert!(container.uploads().is_empty());
        assert_eq!(container.selection(), Selection::None);
        assert_eq!(container.active_file_index(), None);
        assert!(container.active_upload().is_none());
    }

    #[tokio::test]
    async fn deleting_an_upload_selects_a_clamped_neighbor() {
        let (mut container, _, _) = container().await;
        for _ in 0..3 {
            container
                .dispatch(Command::CreateUpload { set_active: true })
                .await;
        }
        // Newest first: delete the tail entry, selection clamps to index 1.
        let tail = container.uploads()[2].id.clone();
        container.dispatch(Command::DeleteUpload { id: tail }).await;

        assert_eq!(container.uploads().len(), 2);
        assert_eq!(container.selection(), Selection::List(1));
        assert_eq!(container.active_file_index(), Some(0));
    }

    #[tokio::test]
    async fn deleting_an_unknown_upload_surfaces_unhandled_exception() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        container
            .dispatch(Command::DeleteUpload {
                id: "nosuchbundle".to_string(),
            })
            .await;

        let error = container.error().unwrap();
        assert_eq!(error.title, "Unhandled Exception");
        assert_eq!(container.uploads().len(), 1);
    }

    #[tokio::test]
    async fn read_failure_keeps_current_selection() {
        let (mut container, uploader, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        let selection = container.selection();

        uploader.script_read(Err(UploadError::Transport(
            "server responded with 500".to_string(),
        )));
        container
            .dispatch(Command::ReadUpload {
                server_id: "xyz".to_string(),
            })
            .await;

        let error = container.error().unwrap();
        assert_eq!(error.title, "Unable to load xyz");
        assert_eq!(container.selection(), selection);
        assert!(container.history().is_empty());
    }

    #[tokio::test]
    async fn read_of_unknown_bundle_lands_in_the_ad_hoc_slot() {
        let (mut container, uploader, _) = container().await;

        uploader.script_read(Ok(server_bundle("remotebundle", "srvid1234567")));
        container
            .dispatch(Command::ReadUpload {
                server_id: "srvid1234567".to_string(),
            })
            .await;

        assert_eq!(container.selection(), Selection::AdHoc);
        assert_eq!(container.active_file_index(), Some(0));
        assert!(container.uploads().is_empty());
        assert_eq!(container.history(), ["srvid1234567".to_string()]);
        assert_eq!(
            container.active_upload().unwrap().last_server_id.as_deref(),
            Some("srvid1234567")
        );
    }

    #[tokio::test]
    async fn mutating_an_ad_hoc_bundle_promotes_it_under_a_fresh_id() {
        let (mut container, uploader, _) = container().await;

        uploader.script_read(Ok(server_bundle("remotebundle", "srvid1234567")));
        container
            .dispatch(Command::ReadUpload {
                server_id: "srvid1234567".to_string(),
            })
            .await;

        let file_id = container.active_file().unwrap().id.clone();
        container
            .dispatch(Command::UpdateFile {
                id: file_id,
                contents: "my own edit".to_string(),
            })
            .await;

        assert!(container.ad_hoc_bundle().is_none());
        assert_eq!(container.uploads().len(), 1);
        assert_eq!(container.selection(), Selection::List(0));
        // Promotion mints a new client-local id and dirties the bundle.
        assert_ne!(container.uploads()[0].id, "remotebundle");
        assert!(container.uploads()[0].last_server_id.is_none());
        assert_eq!(container.uploads()[0].files[0].data, "my own edit");
    }

    #[tokio::test]
    async fn saving_an_ad_hoc_bundle_promotes_it_into_the_list() {
        let (mut container, uploader, _) = container().await;

        uploader.script_read(Ok(server_bundle("remotebundle", "srvid1234567")));
        container
            .dispatch(Command::ReadUpload {
                server_id: "srvid1234567".to_string(),
            })
            .await;
        // Dirty it so the save is not short-circuited.
        container.dispatch(Command::SetActiveUploadDirty).await;

        uploader.script_save(Ok("newsrvid0000".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;

        assert!(container.ad_hoc_bundle().is_none());
        assert_eq!(container.uploads().len(), 1);
        assert_eq!(
            container.uploads()[0].last_server_id.as_deref(),
            Some("newsrvid0000")
        );
        assert_eq!(container.selection(), Selection::List(0));
    }

    #[tokio::test]
    async fn reading_a_locally_known_bundle_selects_it_without_history() {
        let (mut container, uploader, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: false })
            .await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        let known_id = container.uploads()[1].id.clone();

        let mut remote = server_bundle(&known_id, "srvid1234567");
        remote.files[0] = remote.files[0].with_data("server copy");
        uploader.script_read(Ok(remote));
        container
            .dispatch(Command::ReadUpload {
                server_id: "srvid1234567".to_string(),
            })
            .await;

        assert_eq!(container.selection(), Selection::List(1));
        assert!(container.history().is_empty());
        assert!(container.ad_hoc_bundle().is_none());
    }

    #[tokio::test]
    async fn insert_with_colliding_id_renumbers_the_incoming_bundle() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: false })
            .await;
        let resident = container.uploads()[0].id.clone();

        let incoming = FileBundle::new(resident.clone(), "incomingfile");
        container
            .dispatch(Command::InsertUpload {
                bundle: incoming,
                set_active: false,
            })
            .await;

        assert_eq!(container.uploads().len(), 2);
        let ids: Vec<_> = container.uploads().iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids.iter().filter(|id| **id == resident).count(), 1);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn set_active_file_sentinel_always_wins_but_overflow_is_inert() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        assert_eq!(container.active_file_index(), Some(0));

        // Positive out-of-range index does nothing.
        let changed = container
            .dispatch(Command::SetActiveFile { index: Some(5) })
            .await;
        assert!(!changed);
        assert_eq!(container.active_file_index(), Some(0));

        // The clear sentinel is always accepted.
        let changed = container
            .dispatch(Command::SetActiveFile { index: None })
            .await;
        assert!(changed);
        assert_eq!(container.active_file_index(), None);
    }

    #[tokio::test]
    async fn create_file_rejects_duplicate_filenames() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        container
            .dispatch(Command::CreateFile {
                filename: "lib.rs".to_string(),
                set_active: true,
            })
            .await;
        container
            .dispatch(Command::CreateFile {
                filename: "lib.rs".to_string(),
                set_active: true,
            })
            .await;

        assert_eq!(container.error().unwrap().title, "Name Conflict");
        assert_eq!(container.active_upload().unwrap().files.len(), 2);
    }

    #[tokio::test]
    async fn delete_file_selects_the_clamped_neighbor() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        for name in ["a.rs", "b.rs"] {
            container
                .dispatch(Command::CreateFile {
                    filename: name.to_string(),
                    set_active: true,
                })
                .await;
        }
        let files = &container.active_upload().unwrap().files;
        assert_eq!(files.len(), 3);
        let middle = files[1].id.clone();

        container.dispatch(Command::DeleteFile { id: middle }).await;
        assert_eq!(container.active_file_index(), Some(0));
        assert_eq!(container.active_upload().unwrap().files.len(), 2);
    }

    #[tokio::test]
    async fn deleting_the_last_file_clears_the_active_file() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        let only = container.active_file().unwrap().id.clone();

        container.dispatch(Command::DeleteFile { id: only }).await;
        assert_eq!(container.active_file_index(), None);
        assert!(container.active_upload().unwrap().files.is_empty());
    }

    #[tokio::test]
    async fn history_is_capped_and_deduplicated() {
        let (mut container, _, _) = container().await;
        for i in 0..12 {
            container
                .dispatch(Command::CreateHistory {
                    server_id: format!("entry{i}"),
                })
                .await;
        }
        let changed = container
            .dispatch(Command::CreateHistory {
                server_id: "entry11".to_string(),
            })
            .await;

        assert!(!changed);
        assert_eq!(container.history().len(), MAX_LIST_ENTRIES);
        assert_eq!(container.history()[0], "entry11");

        container
            .dispatch(Command::DeleteHistory {
                server_id: "entry11".to_string(),
            })
            .await;
        assert_eq!(container.history().len(), MAX_LIST_ENTRIES - 1);
        assert_ne!(container.history()[0], "entry11");
    }

    #[tokio::test]
    async fn favorites_follow_the_same_list_rules() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::CreateFavorite {
                server_id: "favone".to_string(),
            })
            .await;
        let changed = container
            .dispatch(Command::CreateFavorite {
                server_id: "favone".to_string(),
            })
            .await;

        assert!(!changed);
        assert_eq!(container.favorites(), ["favone".to_string()]);

        container
            .dispatch(Command::DeleteFavorite {
                server_id: "favone".to_string(),
            })
            .await;
        assert!(container.favorites().is_empty());
    }

    #[tokio::test]
    async fn navigation_follows_save_and_dirty_transitions() {
        let (mut container, uploader, navigator) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        // Unsaved work keeps the root path.
        assert_eq!(container.current_path(), "/");
        assert!(navigator.pushes().is_empty());

        uploader.script_save(Ok("abc123abc123".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;
        assert_eq!(container.current_path(), "/abc123abc123/0");
        assert_eq!(navigator.pushes(), vec!["/abc123abc123/0".to_string()]);

        // Dirtying drops the bundle back to the root path.
        container.dispatch(Command::SetActiveUploadDirty).await;
        assert_eq!(container.current_path(), "/");
        assert_eq!(
            navigator.pushes(),
            vec!["/abc123abc123/0".to_string(), "/".to_string()]
        );
    }

    #[tokio::test]
    async fn redundant_propagation_never_renavigates() {
        let (mut container, uploader, navigator) = container().await;
        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;
        uploader.script_save(Ok("abc123abc123".to_string()));
        container.dispatch(Command::SaveActiveUpload).await;
        let before = navigator.pushes().len();

        // Error display changes state but re-derives the same URL.
        container
            .dispatch(Command::ShowError {
                title: "t".to_string(),
                message: "m".to_string(),
            })
            .await;
        container.dispatch(Command::ResetMessage).await;

        assert_eq!(navigator.pushes().len(), before);
    }

    #[tokio::test]
    async fn dispatch_no_nav_skips_url_sync_but_notifies() {
        let (mut container, _, navigator) = container().await;
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        container.on_change(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        container
            .dispatch_no_nav(Command::CreateUpload { set_active: true })
            .await;

        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(navigator.pushes().is_empty());
    }

    #[tokio::test]
    async fn commands_before_initialize_surface_unhandled_exception() {
        let uploader = ScriptedUploader::default();
        let mut container = StateContainer::new(uploader, MemCache::new(), KeyGenerator);

        container
            .dispatch(Command::CreateUpload { set_active: true })
            .await;

        assert_eq!(container.error().unwrap().title, "Unhandled Exception");
        assert!(container.uploads().is_empty());
    }

    #[tokio::test]
    async fn initialize_loads_persisted_lists() {
        let mut cache = MemCache::new();
        cache
            .set_list(UPLOAD_LIST_KEY, &[FileBundle::new("persisted000", "f")])
            .await;
        cache
            .set_list(HISTORY_LIST_KEY, &["pasthistory0".to_string()])
            .await;

        let mut container = StateContainer::new(ScriptedUploader::default(), cache, KeyGenerator);
        container.dispatch(Command::Initialize).await;

        assert_eq!(container.uploads().len(), 1);
        assert_eq!(container.uploads()[0].id, "persisted000");
        assert_eq!(container.history(), ["pasthistory0".to_string()]);
        assert!(container.is_initialized());
    }

    #[tokio::test]
    async fn a_new_error_replaces_the_previous_one() {
        let (mut container, _, _) = container().await;
        container
            .dispatch(Command::ShowError {
                title: "first".to_string(),
                message: "one".to_string(),
            })
            .await;
        container
            .dispatch(Command::ShowError {
                title: "second".to_string(),
                message: "two".to_string(),
            })
            .await;

        assert_eq!(container.error().unwrap().title, "second");
        assert!(container.display_error());

        container.dispatch(Command::ResetMessage).await;
        assert!(container.error().is_none());
        assert!(!container.display_error());
    }
}
