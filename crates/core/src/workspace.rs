use std::fmt;

use thiserror::Error;

use crate::job::QueryJob;
use crate::labels;
use crate::lifecycle::PollHandle;
use crate::log_buffer::LogBuffer;
use crate::metadata::MetadataTree;
use crate::progress::ProgressReport;
use crate::result_table::ResultTable;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(String);

impl TabId {
    #[must_use]
    pub fn from_index(index: u64) -> Self {
        Self(format!("tab{index}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    #[error("no tab `{0}` in the workspace")]
    UnknownTab(TabId),
    #[error("tab `{0}` cannot be closed")]
    NotCloseable(TabId),
}

/// One independent query session: editor, selectors, job, log and result panel.
#[derive(Debug)]
pub struct WorkspaceTab {
    id: TabId,
    name: String,
    closeable: bool,
    pub editor_text: String,
    selected_app: Option<String>,
    selected_version: Option<String>,
    pub(crate) active_job: Option<QueryJob>,
    pub(crate) poll: Option<PollHandle>,
    pub(crate) in_flight: bool,
    pub(crate) log: LogBuffer,
    pub(crate) progress: Option<ProgressReport>,
    pub(crate) elapsed_label: String,
    pub(crate) result: Option<ResultTable>,
    result_page: usize,
    pub(crate) notice: Option<String>,
}

impl WorkspaceTab {
    fn new(id: TabId, closeable: bool, log_capacity: usize) -> Self {
        Self {
            id,
            name: labels::WORKSPACE_TAB_NAME.to_string(),
            closeable,
            editor_text: String::new(),
            selected_app: None,
            selected_version: None,
            active_job: None,
            poll: None,
            in_flight: false,
            log: LogBuffer::new(log_capacity),
            progress: None,
            elapsed_label: String::new(),
            result: None,
            result_page: 0,
            notice: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &TabId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_closeable(&self) -> bool {
        self.closeable
    }

    #[must_use]
    pub fn selected_app(&self) -> Option<&str> {
        self.selected_app.as_deref()
    }

    #[must_use]
    pub fn selected_version(&self) -> Option<&str> {
        self.selected_version.as_deref()
    }

    #[must_use]
    pub fn app_label(&self) -> &str {
        self.selected_app().unwrap_or(labels::APP_PLACEHOLDER)
    }

    #[must_use]
    pub fn version_label(&self) -> &str {
        self.selected_version()
            .unwrap_or(labels::VERSION_PLACEHOLDER)
    }

    #[must_use]
    pub fn active_job(&self) -> Option<&QueryJob> {
        self.active_job.as_ref()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poll.as_ref().is_some_and(PollHandle::is_active)
    }

    #[must_use]
    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// `None` while no progress bar should be shown.
    #[must_use]
    pub fn progress(&self) -> Option<ProgressReport> {
        self.progress
    }

    #[must_use]
    pub fn elapsed_label(&self) -> &str {
        &self.elapsed_label
    }

    #[must_use]
    pub fn result(&self) -> Option<&ResultTable> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn result_page(&self) -> usize {
        self.result_page
    }

    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn select_app(&mut self, app: Option<String>, tree: Option<&MetadataTree>) {
        self.selected_version = match (&app, tree) {
            (Some(app), Some(tree)) => tree.version_names(app).into_iter().next(),
            _ => None,
        };
        self.selected_app = app;
    }

    pub fn select_version(&mut self, version: Option<String>) {
        self.selected_version = version;
    }

    /// Points the selectors at the first app and version when they are unset or stale.
    pub fn sync_selectors(&mut self, tree: &MetadataTree) {
        let apps = tree.app_names();
        let app_known = self
            .selected_app
            .as_ref()
            .is_some_and(|app| apps.contains(app));
        if !app_known {
            self.select_app(apps.into_iter().next(), Some(tree));
            return;
        }

        let versions = self
            .selected_app
            .as_deref()
            .map(|app| tree.version_names(app))
            .unwrap_or_default();
        let version_known = self
            .selected_version
            .as_ref()
            .is_some_and(|version| versions.contains(version));
        if !version_known {
            self.selected_version = versions.into_iter().next();
        }
    }

    /// Adds a tree fragment after the current editor text, separated by a space.
    pub fn append_to_editor(&mut self, fragment: &str) {
        self.editor_text.push(' ');
        self.editor_text.push_str(fragment);
    }

    /// Replaces the editor text and, when given, the selectors (loading a saved query).
    pub fn load_query(&mut self, query: &str, app: Option<&str>, version: Option<&str>) {
        self.editor_text = query.to_string();
        if let Some(app) = app {
            self.selected_app = Some(app.to_string());
        }
        if let Some(version) = version {
            self.selected_version = Some(version.to_string());
        }
    }

    pub fn next_result_page(&mut self, page_size: usize) {
        let Some(result) = &self.result else {
            return;
        };
        let last = result.page_count(page_size).saturating_sub(1);
        self.result_page = (self.result_page + 1).min(last);
    }

    pub fn previous_result_page(&mut self) {
        self.result_page = self.result_page.saturating_sub(1);
    }

    pub(crate) fn reset_for_submission(&mut self) {
        self.log.clear();
        self.progress = None;
        self.elapsed_label.clear();
        self.result = None;
        self.result_page = 0;
    }

    pub(crate) fn set_result(&mut self, result: ResultTable) {
        self.result = Some(result);
        self.result_page = 0;
    }

    pub(crate) fn take_poll(&mut self) -> Option<PollHandle> {
        self.poll.take()
    }
}

/// Registry of open tabs. `tab0` always exists; closing a tab drops its poll handle,
/// which stops its timers.
#[derive(Debug)]
pub struct Workspace {
    tabs: Vec<WorkspaceTab>,
    active: usize,
    next_index: u64,
    log_capacity: usize,
}

impl Workspace {
    #[must_use]
    pub fn new(log_capacity: usize) -> Self {
        Self {
            tabs: vec![WorkspaceTab::new(TabId::from_index(0), false, log_capacity)],
            active: 0,
            next_index: 1,
            log_capacity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn tabs(&self) -> impl Iterator<Item = &WorkspaceTab> {
        self.tabs.iter()
    }

    #[must_use]
    pub fn tab(&self, id: &TabId) -> Option<&WorkspaceTab> {
        self.tabs.iter().find(|tab| &tab.id == id)
    }

    pub fn tab_mut(&mut self, id: &TabId) -> Option<&mut WorkspaceTab> {
        self.tabs.iter_mut().find(|tab| &tab.id == id)
    }

    #[must_use]
    pub fn active_tab(&self) -> &WorkspaceTab {
        &self.tabs[self.active]
    }

    pub fn active_tab_mut(&mut self) -> &mut WorkspaceTab {
        &mut self.tabs[self.active]
    }

    #[must_use]
    pub fn active_id(&self) -> TabId {
        self.active_tab().id.clone()
    }

    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Opens a closeable tab, copying the selectors of the current tab, and activates it.
    pub fn open_tab(&mut self, initial_text: Option<&str>) -> TabId {
        let id = TabId::from_index(self.next_index);
        self.next_index += 1;

        let mut tab = WorkspaceTab::new(id.clone(), true, self.log_capacity);
        let current = self.active_tab();
        tab.selected_app.clone_from(&current.selected_app);
        tab.selected_version.clone_from(&current.selected_version);
        if let Some(text) = initial_text {
            tab.editor_text = text.to_string();
        }

        self.tabs.push(tab);
        self.active = self.tabs.len() - 1;
        tracing::debug!(tab = %id, "opened workspace tab");
        id
    }

    pub fn select(&mut self, id: &TabId) -> Result<(), WorkspaceError> {
        let index = self
            .tabs
            .iter()
            .position(|tab| &tab.id == id)
            .ok_or_else(|| WorkspaceError::UnknownTab(id.clone()))?;
        self.active = index;
        Ok(())
    }

    pub fn select_next(&mut self) {
        self.active = (self.active + 1) % self.tabs.len();
    }

    pub fn select_previous(&mut self) {
        self.active = self
            .active
            .checked_sub(1)
            .unwrap_or(self.tabs.len() - 1);
    }

    pub(crate) fn remove_tab(&mut self, id: &TabId) -> Result<WorkspaceTab, WorkspaceError> {
        let index = self
            .tabs
            .iter()
            .position(|tab| &tab.id == id)
            .ok_or_else(|| WorkspaceError::UnknownTab(id.clone()))?;
        if !self.tabs[index].closeable {
            return Err(WorkspaceError::NotCloseable(id.clone()));
        }

        let removed = self.tabs.remove(index);
        if self.active >= index && self.active > 0 {
            self.active -= 1;
        }
        tracing::debug!(tab = %id, "closed workspace tab");
        Ok(removed)
    }

    pub(crate) fn closeable_ids(&self) -> Vec<TabId> {
        self.tabs
            .iter()
            .filter(|tab| tab.closeable)
            .map(|tab| tab.id.clone())
            .collect()
    }

    pub fn sync_selectors(&mut self, tree: &MetadataTree) {
        for tab in &mut self.tabs {
            tab.sync_selectors(tree);
        }
    }
}
