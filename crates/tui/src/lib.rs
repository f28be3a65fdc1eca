use std::collections::BTreeSet;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Gauge, Paragraph, Row, Table, Wrap};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::runtime::Runtime;
use whaleminer_adapters::export::export_table;
use whaleminer_adapters::http::{HttpClientError, HttpConsoleClient};
use whaleminer_core::collectors::{
    Collector, CollectorApi, CollectorBoard, COLLECTOR_COLUMNS,
};
use whaleminer_core::config::ConsoleConfig;
use whaleminer_core::download::{download_file_name, ResultDownloadApi};
use whaleminer_core::history::{HistoryApi, HistoryEntry, HISTORY_COLUMNS};
use whaleminer_core::job::JobApi;
use whaleminer_core::labels;
use whaleminer_core::lifecycle::{
    AppliedEvent, LifecycleConfig, QueryLifecycleController, TabEventReceiver,
};
use whaleminer_core::metadata::{MetadataApi, MetadataCache, MetadataTree, TreeRow};
use whaleminer_core::progress::format_percent;
use whaleminer_core::result_table::ResultTable;
use whaleminer_core::saved_queries::{SavedQuery, SavedQueryApi, SavedQueryBook};

const TICK_RATE: Duration = Duration::from_millis(120);
const LOG_PANE_HEIGHT: u16 = 8;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Client(#[from] HttpClientError),
}

/// Everything the console talks to, as one bound.
pub trait ConsoleBackend:
    JobApi + MetadataApi + SavedQueryApi + HistoryApi + CollectorApi + ResultDownloadApi + 'static
{
}

impl<T> ConsoleBackend for T where
    T: JobApi + MetadataApi + SavedQueryApi + HistoryApi + CollectorApi + ResultDownloadApi + 'static
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Tree,
    Editor,
    Results,
    Log,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Self::Tree => Self::Editor,
            Self::Editor => Self::Results,
            Self::Results => Self::Log,
            Self::Log => Self::Tree,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Tree => "元数据",
            Self::Editor => "SQL",
            Self::Results => "查询结果",
            Self::Log => "日志",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Navigate,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    Run,
    NewTab,
    CloseTab,
    CloseAllTabs,
    PreviousTab,
    NextTab,
    CycleApp,
    CycleVersion,
    RefreshMetadata,
    SaveQuery,
    OpenSaved,
    OpenHistory,
    OpenCollectors,
    Download,
    Export,
    Enter,
    Dismiss,
    Preview,
    Create,
    Edit,
    Delete,
    Navigate(DirectionKey),
    Input(char),
    Backspace,
    Tick,
}

#[derive(Debug, Clone, PartialEq)]
enum Overlay {
    Saved { entries: Vec<SavedQuery>, cursor: usize },
    History { entries: Vec<HistoryEntry>, cursor: usize },
    Collectors { entries: Vec<Collector>, cursor: usize },
    Samples { title: String, table: Option<ResultTable> },
}

#[derive(Debug, Clone, PartialEq)]
enum PromptPurpose {
    SaveQuery,
    NewCollector,
    EditCollector(Collector),
}

#[derive(Debug, Clone, PartialEq)]
struct Prompt {
    purpose: PromptPurpose,
    fields: Vec<(&'static str, String)>,
    active: usize,
}

impl Prompt {
    fn save_query() -> Self {
        Self {
            purpose: PromptPurpose::SaveQuery,
            fields: vec![(labels::ENTER_NAME, String::new())],
            active: 0,
        }
    }

    fn collector(purpose: PromptPurpose, name: &str, url: &str) -> Self {
        Self {
            purpose,
            fields: vec![
                (labels::COLLECTOR_NAME_REQUIRED, name.to_string()),
                (labels::COLLECTOR_URL_REQUIRED, url.to_string()),
            ],
            active: 0,
        }
    }

    fn value(&self, index: usize) -> &str {
        self.fields.get(index).map_or("", |(_, value)| value.as_str())
    }

    fn active_value_mut(&mut self) -> Option<&mut String> {
        self.fields.get_mut(self.active).map(|(_, value)| value)
    }

    fn next_field(&mut self) {
        self.active = (self.active + 1) % self.fields.len().max(1);
    }

    fn title(&self) -> &'static str {
        match self.purpose {
            PromptPurpose::SaveQuery => labels::SAVED_TITLE,
            PromptPurpose::NewCollector => "添加收集器",
            PromptPurpose::EditCollector(_) => "修改路径",
        }
    }
}

struct TuiApp<B: ConsoleBackend> {
    runtime: Runtime,
    backend: Arc<B>,
    controller: QueryLifecycleController<B>,
    events: TabEventReceiver,
    metadata: MetadataCache<Arc<B>>,
    tree: Option<Arc<MetadataTree>>,
    expanded: BTreeSet<Vec<String>>,
    tree_cursor: usize,
    pane: Pane,
    overlay: Option<Overlay>,
    prompt: Option<Prompt>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
    page_size: usize,
    output_dir: PathBuf,
}

impl<B: ConsoleBackend> TuiApp<B> {
    fn new(runtime: Runtime, backend: Arc<B>, config: &ConsoleConfig, output_dir: PathBuf) -> Self {
        let (controller, events) = QueryLifecycleController::new(
            Arc::clone(&backend),
            LifecycleConfig::from_console(config),
        );
        Self {
            runtime,
            metadata: MetadataCache::new(Arc::clone(&backend), config.metadata_ttl()),
            backend,
            controller,
            events,
            tree: None,
            expanded: BTreeSet::new(),
            tree_cursor: 0,
            pane: Pane::Editor,
            overlay: None,
            prompt: None,
            show_help: false,
            should_quit: false,
            status_line: labels::LOADING.to_string(),
            page_size: config.page_size.max(1),
            output_dir,
        }
    }

    fn input_mode(&self) -> InputMode {
        if self.prompt.is_some() || (self.pane == Pane::Editor && self.overlay.is_none()) {
            InputMode::Text
        } else {
            InputMode::Navigate
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::Tick => self.on_tick(),
            Msg::Dismiss => self.dismiss(),
            _ if self.prompt.is_some() => self.handle_prompt(msg),
            _ if self.overlay.is_some() => self.handle_overlay(msg),
            _ => self.handle_workspace(msg),
        }
    }

    fn handle_workspace(&mut self, msg: Msg) {
        match msg {
            Msg::NextPane => self.pane = self.pane.next(),
            Msg::Run => self.run_query(),
            Msg::NewTab => {
                let tab = self.controller.workspace_mut().open_tab(None);
                self.status_line = format!("Opened {tab}");
            }
            Msg::CloseTab => {
                let tab = self.controller.workspace().active_id();
                if let Err(error) = self.controller.close_tab(&tab) {
                    self.status_line = error.to_string();
                }
            }
            Msg::CloseAllTabs => self.controller.close_all_tabs(),
            Msg::PreviousTab => self.controller.workspace_mut().select_previous(),
            Msg::NextTab => self.controller.workspace_mut().select_next(),
            Msg::CycleApp => self.cycle_app(),
            Msg::CycleVersion => self.cycle_version(),
            Msg::RefreshMetadata => self.load_metadata(true),
            Msg::SaveQuery => self.prompt = Some(Prompt::save_query()),
            Msg::OpenSaved => self.open_saved(),
            Msg::OpenHistory => self.open_history(),
            Msg::OpenCollectors => self.open_collectors(),
            Msg::Download => {
                let url = self
                    .controller
                    .workspace()
                    .active_tab()
                    .result()
                    .and_then(ResultTable::download_url)
                    .map(str::to_string);
                self.download(url.as_deref());
            }
            Msg::Export => self.export_result(),
            Msg::Enter => self.activate(),
            Msg::Preview => self.preview_samples(),
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Input(character) => {
                if self.pane == Pane::Editor {
                    self.active_editor_mut().push(character);
                }
            }
            Msg::Backspace => {
                if self.pane == Pane::Editor {
                    self.active_editor_mut().pop();
                }
            }
            Msg::Create
            | Msg::Edit
            | Msg::Delete
            | Msg::Quit
            | Msg::ToggleHelp
            | Msg::Dismiss
            | Msg::Tick => {}
        }
    }

    fn on_tick(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            let tab = event.tab_id.clone();
            match self.controller.apply(event) {
                Some(AppliedEvent::Succeeded) => {
                    let caption = self
                        .controller
                        .workspace()
                        .tab(&tab)
                        .and_then(|tab| tab.result().map(ResultTable::caption));
                    if let Some(caption) = caption {
                        self.status_line = format!("{tab}: {caption}");
                    }
                }
                Some(AppliedEvent::Failed) => {
                    self.status_line = format!("{tab}: {}", labels::STATUS_FAILED);
                }
                Some(_) | None => {}
            }
        }
    }

    fn dismiss(&mut self) {
        if self.prompt.take().is_some() {
            return;
        }
        if self.overlay.take().is_some() {
            return;
        }
        self.show_help = false;
    }

    fn active_editor_mut(&mut self) -> &mut String {
        &mut self.controller.workspace_mut().active_tab_mut().editor_text
    }

    fn load_metadata(&mut self, force: bool) {
        let loaded = if force {
            self.runtime.block_on(self.metadata.refresh())
        } else {
            self.runtime.block_on(self.metadata.tree())
        };
        match loaded {
            Ok(tree) => {
                self.controller.workspace_mut().sync_selectors(&tree);
                self.tree = Some(tree);
                self.tree_cursor = 0;
                self.status_line = String::new();
            }
            Err(error) => {
                tracing::warn!(%error, "metadata load failed");
                self.status_line = error.user_message();
            }
        }
    }

    fn run_query(&mut self) {
        let tab = self.controller.workspace().active_tab();
        let tab_id = tab.id().clone();
        let app = tab.selected_app().map(str::to_string);
        let version = tab.selected_version().map(str::to_string);
        let sql = tab.editor_text.clone();

        let submitted = self.runtime.block_on(self.controller.submit(
            &tab_id,
            app.as_deref(),
            version.as_deref(),
            &sql,
        ));
        match submitted {
            Ok(handle) => {
                self.pane = Pane::Results;
                self.status_line = format!("{}: {}", handle.tab_id, labels::LOADING);
            }
            Err(error) => self.status_line = error.user_message(),
        }
    }

    fn cycle_app(&mut self) {
        let Some(tree) = self.tree.clone() else {
            self.status_line = labels::SELECT_APP.to_string();
            return;
        };
        let apps = tree.app_names();
        let tab = self.controller.workspace_mut().active_tab_mut();
        let next = next_choice(&apps, tab.selected_app());
        tab.select_app(next, Some(tree.as_ref()));
    }

    fn cycle_version(&mut self) {
        let Some(tree) = self.tree.clone() else {
            self.status_line = labels::SELECT_VERSION.to_string();
            return;
        };
        let tab = self.controller.workspace_mut().active_tab_mut();
        let Some(app) = tab.selected_app().map(str::to_string) else {
            self.status_line = labels::SELECT_APP.to_string();
            return;
        };
        let versions = tree.version_names(&app);
        let next = next_choice(&versions, tab.selected_version());
        tab.select_version(next);
    }

    fn tree_rows(&self) -> Vec<TreeRow> {
        self.tree
            .as_ref()
            .map(|tree| tree.visible_rows(&self.expanded))
            .unwrap_or_default()
    }

    fn navigate(&mut self, direction: DirectionKey) {
        match self.pane {
            Pane::Tree => self.navigate_tree(direction),
            Pane::Results => {
                let tab = self.controller.workspace_mut().active_tab_mut();
                match direction {
                    DirectionKey::Up | DirectionKey::Left => tab.previous_result_page(),
                    DirectionKey::Down | DirectionKey::Right => {
                        tab.next_result_page(self.page_size);
                    }
                }
            }
            Pane::Editor | Pane::Log => {}
        }
    }

    fn navigate_tree(&mut self, direction: DirectionKey) {
        let rows = self.tree_rows();
        if rows.is_empty() {
            self.status_line = labels::NO_RECORDS.to_string();
            return;
        }
        self.tree_cursor = self.tree_cursor.min(rows.len() - 1);
        let row = &rows[self.tree_cursor];

        match direction {
            DirectionKey::Up => self.tree_cursor = self.tree_cursor.saturating_sub(1),
            DirectionKey::Down => self.tree_cursor = (self.tree_cursor + 1).min(rows.len() - 1),
            DirectionKey::Right => {
                if row.expandable {
                    self.expanded.insert(row.path.clone());
                }
            }
            DirectionKey::Left => {
                if row.expanded {
                    self.expanded.remove(&row.path);
                } else if let Some(parent) = rows
                    .iter()
                    .position(|candidate| candidate.path == row.path[..row.path.len() - 1])
                {
                    self.tree_cursor = parent;
                }
            }
        }
    }

    fn activate(&mut self) {
        match self.pane {
            Pane::Tree => {
                let rows = self.tree_rows();
                let Some(row) = rows.get(self.tree_cursor) else {
                    return;
                };
                let fragment = self
                    .tree
                    .as_ref()
                    .and_then(|tree| tree.identifier_fragment(&row.path));
                match fragment {
                    Some(fragment) => {
                        self.controller
                            .workspace_mut()
                            .active_tab_mut()
                            .append_to_editor(&fragment);
                        self.status_line = format!("+ {fragment}");
                    }
                    None if row.expanded => {
                        self.expanded.remove(&row.path);
                    }
                    None => {
                        self.expanded.insert(row.path.clone());
                    }
                }
            }
            Pane::Editor => self.active_editor_mut().push('\n'),
            Pane::Results | Pane::Log => {}
        }
    }

    fn preview_samples(&mut self) {
        if self.pane != Pane::Tree {
            return;
        }
        let rows = self.tree_rows();
        let Some(row) = rows.get(self.tree_cursor) else {
            return;
        };
        let Some(tree) = &self.tree else {
            return;
        };
        let table = match tree.sample_preview(&row.path) {
            Ok(table) => Some(table),
            Err(error) => {
                self.status_line = error.user_message().to_string();
                None
            }
        };
        self.overlay = Some(Overlay::Samples {
            title: format!("{} {}", labels::SAMPLES_TITLE, row.label),
            table,
        });
    }

    fn open_saved(&mut self) {
        let book = SavedQueryBook::new(Arc::clone(&self.backend));
        match self.runtime.block_on(book.list()) {
            Ok(entries) => {
                if entries.is_empty() {
                    self.status_line = labels::SAVED_EMPTY.to_string();
                }
                self.overlay = Some(Overlay::Saved { entries, cursor: 0 });
            }
            Err(error) => self.status_line = error.user_message(),
        }
    }

    fn open_history(&mut self) {
        match self.runtime.block_on(self.backend.list_jobs()) {
            Ok(entries) => self.overlay = Some(Overlay::History { entries, cursor: 0 }),
            Err(error) => self.status_line = error.user_message(),
        }
    }

    fn open_collectors(&mut self) {
        let board = CollectorBoard::new(Arc::clone(&self.backend));
        match self.runtime.block_on(board.list()) {
            Ok(entries) => self.overlay = Some(Overlay::Collectors { entries, cursor: 0 }),
            Err(error) => self.status_line = error.user_message(),
        }
    }

    fn handle_overlay(&mut self, msg: Msg) {
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        match (overlay, msg) {
            (
                Overlay::Saved { entries, cursor },
                Msg::Navigate(direction),
            ) => move_cursor(cursor, entries.len(), direction),
            (
                Overlay::History { entries, cursor },
                Msg::Navigate(direction),
            ) => move_cursor(cursor, entries.len(), direction),
            (
                Overlay::Collectors { entries, cursor },
                Msg::Navigate(direction),
            ) => move_cursor(cursor, entries.len(), direction),
            (Overlay::Saved { entries, cursor }, Msg::Enter) => {
                if let Some(saved) = entries.get(*cursor).cloned() {
                    self.controller
                        .workspace_mut()
                        .active_tab_mut()
                        .load_query(&saved.query, Some(saved.app.as_str()), Some(saved.version.as_str()));
                    self.overlay = None;
                    self.pane = Pane::Editor;
                }
            }
            (Overlay::Saved { entries, cursor }, Msg::Delete) => {
                if let Some(id) = entries.get(*cursor).map(|saved| saved.id.clone()) {
                    let book = SavedQueryBook::new(Arc::clone(&self.backend));
                    let deleted = self.runtime.block_on(book.delete(&id));
                    self.status_line = match deleted {
                        Ok(message) => message.to_string(),
                        Err(error) => error.user_message(),
                    };
                    self.open_saved();
                }
            }
            (Overlay::History { entries, cursor }, Msg::Enter) => {
                if let Some(entry) = entries.get(*cursor) {
                    let query = entry.query.clone();
                    self.controller
                        .workspace_mut()
                        .active_tab_mut()
                        .load_query(&query, None, None);
                    self.overlay = None;
                    self.pane = Pane::Editor;
                }
            }
            (Overlay::History { entries, cursor }, Msg::Download) => {
                let url = entries
                    .get(*cursor)
                    .and_then(HistoryEntry::download_url)
                    .map(str::to_string);
                self.download(url.as_deref());
            }
            (Overlay::Collectors { .. }, Msg::Create) => {
                self.prompt = Some(Prompt::collector(PromptPurpose::NewCollector, "", ""));
            }
            (Overlay::Collectors { entries, cursor }, Msg::Edit) => {
                if let Some(collector) = entries.get(*cursor).cloned() {
                    if collector.is_editable() {
                        let (name, url) = (collector.name.clone(), collector.url.clone());
                        self.prompt = Some(Prompt::collector(
                            PromptPurpose::EditCollector(collector),
                            &name,
                            &url,
                        ));
                    } else {
                        self.status_line = labels::COLLECTOR_NOT_EDITABLE.to_string();
                    }
                }
            }
            (Overlay::Collectors { entries, cursor }, Msg::Delete) => {
                if let Some(id) = entries.get(*cursor).map(|collector| collector.id.clone()) {
                    let board = CollectorBoard::new(Arc::clone(&self.backend));
                    if let Err(error) = self.runtime.block_on(board.delete(&id)) {
                        self.status_line = error.user_message();
                    }
                    self.open_collectors();
                }
            }
            _ => {}
        }
    }

    fn handle_prompt(&mut self, msg: Msg) {
        let Some(prompt) = self.prompt.as_mut() else {
            return;
        };
        match msg {
            Msg::Input(character) => {
                if let Some(value) = prompt.active_value_mut() {
                    value.push(character);
                }
            }
            Msg::Backspace => {
                if let Some(value) = prompt.active_value_mut() {
                    value.pop();
                }
            }
            Msg::NextPane => prompt.next_field(),
            Msg::Enter => self.submit_prompt(),
            _ => {}
        }
    }

    fn submit_prompt(&mut self) {
        let Some(prompt) = self.prompt.clone() else {
            return;
        };
        let outcome = match &prompt.purpose {
            PromptPurpose::SaveQuery => {
                let tab = self.controller.workspace().active_tab();
                let book = SavedQueryBook::new(Arc::clone(&self.backend));
                self.runtime
                    .block_on(book.save(
                        prompt.value(0),
                        tab.selected_app(),
                        tab.selected_version(),
                        &tab.editor_text,
                    ))
                    .map(str::to_string)
                    .map_err(|error| error.user_message())
            }
            PromptPurpose::NewCollector => {
                let board = CollectorBoard::new(Arc::clone(&self.backend));
                self.runtime
                    .block_on(board.create(prompt.value(0), prompt.value(1)))
                    .map(str::to_string)
                    .map_err(|error| error.user_message())
            }
            PromptPurpose::EditCollector(collector) => {
                let board = CollectorBoard::new(Arc::clone(&self.backend));
                self.runtime
                    .block_on(board.update(collector, prompt.value(0), prompt.value(1)))
                    .map(|()| String::new())
                    .map_err(|error| error.user_message())
            }
        };

        match outcome {
            Ok(message) => {
                self.status_line = message;
                self.prompt = None;
                if matches!(self.overlay, Some(Overlay::Collectors { .. })) {
                    self.open_collectors();
                }
            }
            Err(message) => self.status_line = message,
        }
    }

    fn download(&mut self, url: Option<&str>) {
        let Some(url) = url else {
            self.status_line = labels::NO_DOWNLOAD.to_string();
            return;
        };
        let destination = self.output_dir.join(download_file_name(url));
        match self
            .runtime
            .block_on(self.backend.download_result(url, &destination))
        {
            Ok(bytes) => {
                self.status_line = format!("{} ({bytes} B)", destination.display());
            }
            Err(error) => {
                tracing::warn!(%error, "result download failed");
                self.status_line = error.user_message();
            }
        }
    }

    fn export_result(&mut self) {
        let tab = self.controller.workspace().active_tab();
        let Some(table) = tab.result() else {
            self.status_line = labels::NO_RECORDS.to_string();
            return;
        };
        let path = self.output_dir.join(format!("whaleminer-{}.csv", tab.id()));
        self.status_line = match export_table(&path, table) {
            Ok(rows) => format!("{} ({rows})", path.display()),
            Err(error) => error.to_string(),
        };
    }
}

fn next_choice(choices: &[String], current: Option<&str>) -> Option<String> {
    let position = current.and_then(|current| choices.iter().position(|choice| choice == current));
    let next = position.map_or(0, |index| (index + 1) % choices.len().max(1));
    choices.get(next).cloned()
}

fn move_cursor(cursor: &mut usize, len: usize, direction: DirectionKey) {
    if len == 0 {
        return;
    }
    match direction {
        DirectionKey::Up | DirectionKey::Left => *cursor = cursor.saturating_sub(1),
        DirectionKey::Down | DirectionKey::Right => *cursor = (*cursor + 1).min(len - 1),
    }
}

/// Opens the terminal console against the configured service.
pub fn run(config: &ConsoleConfig, output_dir: PathBuf) -> Result<(), TuiError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let backend = Arc::new(HttpConsoleClient::from_config(config)?);
    let mut app = TuiApp::new(runtime, backend, config, output_dir);
    app.load_metadata(false);

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<B: ConsoleBackend>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp<B>,
) -> Result<(), TuiError> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.input_mode()) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn pane_block<B: ConsoleBackend>(app: &TuiApp<B>, pane: Pane) -> Block<'static> {
    let style = if app.pane == pane {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(style)
        .title(pane.title())
}

fn render<B: ConsoleBackend>(frame: &mut Frame<'_>, app: &TuiApp<B>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(28), Constraint::Percentage(72)])
        .split(chunks[1]);
    render_tree(frame, app, columns[0]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(LOG_PANE_HEIGHT),
        ])
        .split(columns[1]);
    let tab = app.controller.workspace().active_tab();

    let editor = Paragraph::new(tab.editor_text.as_str())
        .wrap(Wrap { trim: false })
        .block(pane_block(app, Pane::Editor));
    frame.render_widget(editor, right[0]);

    match tab.progress() {
        Some(report) => {
            let gauge = Gauge::default()
                .block(Block::default().borders(Borders::ALL).title(tab.elapsed_label()))
                .gauge_style(Style::default().fg(Color::Cyan))
                .percent(u16::from(report.displayed))
                .label(format_percent(report.displayed));
            frame.render_widget(gauge, right[1]);
        }
        None => {
            let idle = Paragraph::new(tab.elapsed_label())
                .block(Block::default().borders(Borders::ALL));
            frame.render_widget(idle, right[1]);
        }
    }

    render_result(frame, app, tab.result(), tab.result_page(), right[2]);

    let log_height = usize::from(LOG_PANE_HEIGHT.saturating_sub(2));
    let log_lines = tab
        .log()
        .tail(log_height)
        .into_iter()
        .map(Line::from)
        .collect::<Vec<_>>();
    frame.render_widget(
        Paragraph::new(log_lines).block(pane_block(app, Pane::Log)),
        right[3],
    );

    let status = tab.notice().unwrap_or(app.status_line.as_str());
    let footer = Paragraph::new(vec![
        Line::from("Ctrl+R 运行 | Ctrl+T 新建 | Ctrl+W 关闭 | Ctrl+S 保存 | Ctrl+O 常用 | Ctrl+Y 历史 | Ctrl+L 收集器 | F1 帮助"),
        Line::from(Span::styled(
            status.to_string(),
            Style::default().fg(Color::LightRed),
        )),
    ])
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[2]);

    if let Some(overlay) = &app.overlay {
        render_overlay(frame, overlay, app.page_size);
    }
    if let Some(prompt) = &app.prompt {
        render_prompt(frame, prompt);
    }
    if app.show_help {
        render_help_popup(frame);
    }
}

fn render_header<B: ConsoleBackend>(frame: &mut Frame<'_>, app: &TuiApp<B>, area: Rect) {
    let workspace = app.controller.workspace();
    let mut spans = Vec::new();
    for (index, tab) in workspace.tabs().enumerate() {
        let marker = if tab.is_in_flight() { "*" } else { "" };
        let label = if index == 0 {
            format!(" {}{marker} ", tab.name())
        } else {
            format!(" {} {index}{marker} ", tab.name())
        };
        let style = if index == workspace.active_index() {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        spans.push(Span::styled(label, style));
        spans.push(Span::raw("|"));
    }
    let tab = workspace.active_tab();
    spans.push(Span::raw(format!(
        " {} / {}",
        tab.app_label(),
        tab.version_label()
    )));

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("WhaleMiner"));
    frame.render_widget(header, area);
}

fn render_tree<B: ConsoleBackend>(frame: &mut Frame<'_>, app: &TuiApp<B>, area: Rect) {
    let rows = app.tree_rows();
    let visible = usize::from(area.height.saturating_sub(2)).max(1);
    let start = app.tree_cursor.saturating_sub(visible.saturating_sub(1));

    let lines = if rows.is_empty() {
        vec![Line::from(labels::LOADING)]
    } else {
        rows.iter()
            .enumerate()
            .skip(start)
            .take(visible)
            .map(|(index, row)| {
                let fold = match (row.expandable, row.expanded) {
                    (true, true) => "▾",
                    (true, false) => "▸",
                    (false, _) => " ",
                };
                let text = format!(
                    "{}{fold} {} ({})",
                    "  ".repeat(row.depth),
                    row.label,
                    row.type_label
                );
                if index == app.tree_cursor && app.pane == Pane::Tree {
                    Line::from(Span::styled(
                        text,
                        Style::default().add_modifier(Modifier::REVERSED),
                    ))
                } else {
                    Line::from(text)
                }
            })
            .collect()
    };

    frame.render_widget(
        Paragraph::new(lines).block(pane_block(app, Pane::Tree)),
        area,
    );
}

fn render_result<B: ConsoleBackend>(
    frame: &mut Frame<'_>,
    app: &TuiApp<B>,
    result: Option<&ResultTable>,
    page: usize,
    area: Rect,
) {
    let block = pane_block(app, Pane::Results);
    let Some(result) = result else {
        frame.render_widget(Paragraph::new("").block(block), area);
        return;
    };
    let title = format!(
        "{} | {} | {}",
        Pane::Results.title(),
        result.caption(),
        result.page_info(page, app.page_size)
    );
    frame.render_widget(
        result_widget(result, page, app.page_size).block(block.title(title)),
        area,
    );
}

fn result_widget(result: &ResultTable, page: usize, page_size: usize) -> Table<'static> {
    let widths = vec![Constraint::Fill(1); result.titles().len().max(1)];
    let header = Row::new(result.titles().iter().cloned().map(Cell::from))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = result
        .page(page, page_size)
        .iter()
        .map(|row| Row::new(row.iter().cloned().map(Cell::from)))
        .collect::<Vec<_>>();
    Table::new(rows, widths).header(header)
}

fn render_overlay(frame: &mut Frame<'_>, overlay: &Overlay, page_size: usize) {
    let area = centered_rect(80, 70, frame.area());
    frame.render_widget(Clear, area);
    match overlay {
        Overlay::Saved { entries, cursor } => {
            let lines = if entries.is_empty() {
                vec![Line::from(labels::SAVED_EMPTY)]
            } else {
                entries
                    .iter()
                    .enumerate()
                    .map(|(index, saved)| {
                        cursor_line(
                            index == *cursor,
                            format!(
                                "{} | {} / {} | {}",
                                saved.name, saved.app, saved.version, saved.query
                            ),
                        )
                    })
                    .collect()
            };
            let title = format!("{} (Enter 载入, d 删除)", labels::SAVED_TITLE);
            frame.render_widget(
                Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title)),
                area,
            );
        }
        Overlay::History { entries, cursor } => {
            let mut lines = vec![Line::from(HISTORY_COLUMNS.join(" | "))];
            lines.extend(entries.iter().enumerate().map(|(index, entry)| {
                cursor_line(index == *cursor, entry.cells().join(" | "))
            }));
            let title = format!("{} (Enter 载入, Ctrl+D 下载)", labels::HISTORY_TITLE);
            frame.render_widget(
                Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title)),
                area,
            );
        }
        Overlay::Collectors { entries, cursor } => {
            let mut lines = vec![Line::from(COLLECTOR_COLUMNS.join(" | "))];
            lines.extend(entries.iter().enumerate().map(|(index, collector)| {
                cursor_line(index == *cursor, collector.cells().join(" | "))
            }));
            let title = format!("{} (n 添加, e 修改路径, d 删除)", labels::COLLECTORS_TITLE);
            frame.render_widget(
                Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title)),
                area,
            );
        }
        Overlay::Samples { title, table } => {
            let block = Block::default().borders(Borders::ALL).title(title.clone());
            match table {
                Some(table) => {
                    frame.render_widget(result_widget(table, 0, page_size).block(block), area);
                }
                None => frame.render_widget(Paragraph::new(labels::NO_SAMPLES).block(block), area),
            }
        }
    }
}

fn cursor_line(selected: bool, text: String) -> Line<'static> {
    if selected {
        Line::from(Span::styled(
            format!("> {text}"),
            Style::default().add_modifier(Modifier::REVERSED),
        ))
    } else {
        Line::from(format!("  {text}"))
    }
}

fn render_prompt(frame: &mut Frame<'_>, prompt: &Prompt) {
    let area = centered_rect(50, 30, frame.area());
    frame.render_widget(Clear, area);
    let lines = prompt
        .fields
        .iter()
        .enumerate()
        .map(|(index, (label, value))| {
            let marker = if index == prompt.active { ">" } else { " " };
            Line::from(format!("{marker} {label}: {value}"))
        })
        .collect::<Vec<_>>();
    frame.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(prompt.title()),
        ),
        area,
    );
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Ctrl+Q: quit"),
        Line::from("F1: toggle help"),
        Line::from("Tab: cycle panes (tree, editor, results, log)"),
        Line::from("Ctrl+R: run the active tab's query"),
        Line::from("Ctrl+T / Ctrl+W / Ctrl+K: new tab, close tab, close all tabs"),
        Line::from("F2 / F3 or [ / ]: previous / next tab"),
        Line::from("F5: reload metadata   F6 / F7: cycle app / version"),
        Line::from("Tree: arrows to move and fold, Enter inserts identifier, p previews samples"),
        Line::from("Results: arrows to page"),
        Line::from("Ctrl+S save | Ctrl+O saved | Ctrl+Y history | Ctrl+L collectors"),
        Line::from("Ctrl+D download result | Ctrl+E export result as CSV"),
        Line::from("Esc: close popup"),
    ])
    .alignment(Alignment::Left)
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, mode: InputMode) -> Option<Msg> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('q') => Some(Msg::Quit),
            KeyCode::Char('r') => Some(Msg::Run),
            KeyCode::Char('t') => Some(Msg::NewTab),
            KeyCode::Char('w') => Some(Msg::CloseTab),
            KeyCode::Char('k') => Some(Msg::CloseAllTabs),
            KeyCode::Char('s') => Some(Msg::SaveQuery),
            KeyCode::Char('o') => Some(Msg::OpenSaved),
            KeyCode::Char('y') => Some(Msg::OpenHistory),
            KeyCode::Char('l') => Some(Msg::OpenCollectors),
            KeyCode::Char('d') => Some(Msg::Download),
            KeyCode::Char('e') => Some(Msg::Export),
            _ => None,
        };
    }

    match key.code {
        KeyCode::F(1) => return Some(Msg::ToggleHelp),
        KeyCode::F(2) => return Some(Msg::PreviousTab),
        KeyCode::F(3) => return Some(Msg::NextTab),
        KeyCode::F(5) => return Some(Msg::RefreshMetadata),
        KeyCode::F(6) => return Some(Msg::CycleApp),
        KeyCode::F(7) => return Some(Msg::CycleVersion),
        KeyCode::Esc => return Some(Msg::Dismiss),
        KeyCode::Tab => return Some(Msg::NextPane),
        KeyCode::Enter => return Some(Msg::Enter),
        KeyCode::Backspace => return Some(Msg::Backspace),
        KeyCode::Up => return Some(Msg::Navigate(DirectionKey::Up)),
        KeyCode::Down => return Some(Msg::Navigate(DirectionKey::Down)),
        _ => {}
    }

    match mode {
        InputMode::Text => match key.code {
            KeyCode::Char(character) => Some(Msg::Input(character)),
            _ => None,
        },
        InputMode::Navigate => match key.code {
            KeyCode::Char('q') => Some(Msg::Quit),
            KeyCode::Char('?') => Some(Msg::ToggleHelp),
            KeyCode::Char('[') => Some(Msg::PreviousTab),
            KeyCode::Char(']') => Some(Msg::NextTab),
            KeyCode::Char('p') => Some(Msg::Preview),
            KeyCode::Char('n') => Some(Msg::Create),
            KeyCode::Char('e') => Some(Msg::Edit),
            KeyCode::Char('d') => Some(Msg::Delete),
            KeyCode::Char('k') => Some(Msg::Navigate(DirectionKey::Up)),
            KeyCode::Char('j') => Some(Msg::Navigate(DirectionKey::Down)),
            KeyCode::Left | KeyCode::Char('h') => Some(Msg::Navigate(DirectionKey::Left)),
            KeyCode::Right | KeyCode::Char('l') => Some(Msg::Navigate(DirectionKey::Right)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use serde_json::json;
    use tempfile::TempDir;
    use whaleminer_core::api::ApiError;
    use whaleminer_core::collectors::{Collector, CollectorApi, CollectorForm};
    use whaleminer_core::config::ConsoleConfig;
    use whaleminer_core::download::{DownloadError, ResultDownloadApi};
    use whaleminer_core::history::{HistoryApi, HistoryEntry};
    use whaleminer_core::job::{JobApi, JobId, JobRequest, JobSnapshot, SubmitOutcome};
    use whaleminer_core::metadata::{MetadataApi, MetadataTree};
    use whaleminer_core::saved_queries::{NewSavedQuery, SavedQuery, SavedQueryApi};

    use super::{
        map_key_event, next_choice, DirectionKey, InputMode, Msg, Overlay, Pane, TuiApp,
    };

    #[derive(Debug, Default)]
    struct FakeConsole {
        submits: AtomicUsize,
        saved: Mutex<Vec<NewSavedQuery>>,
    }

    #[async_trait::async_trait]
    impl JobApi for FakeConsole {
        async fn submit_job(&self, _request: &JobRequest) -> SubmitOutcome {
            self.submits.fetch_add(1, Ordering::SeqCst);
            SubmitOutcome::Conflict {
                error: "syntax error".to_string(),
            }
        }

        async fn fetch_job(&self, _job_id: &JobId) -> Result<JobSnapshot, ApiError> {
            Err(ApiError::NotFound)
        }
    }

    #[async_trait::async_trait]
    impl MetadataApi for FakeConsole {
        async fn fetch_tree(&self) -> Result<MetadataTree, ApiError> {
            Ok(serde_json::from_value(json!([
                {"name": "Shop", "type": "namespace", "children": [
                    {"name": "v1", "type": "namespace", "children": [
                        {"name": "db", "type": "namespace", "children": [
                            {"name": "orders", "type": "table", "children": [
                                {"name": "id", "type": "int"}
                            ]}
                        ]}
                    ]},
                    {"name": "v2", "type": "namespace"}
                ]},
                {"name": "Game", "type": "namespace", "children": [
                    {"name": "beta", "type": "namespace"}
                ]}
            ]))
            .expect("tree decodes"))
        }
    }

    #[async_trait::async_trait]
    impl SavedQueryApi for FakeConsole {
        async fn create_saved(&self, query: &NewSavedQuery) -> Result<(), ApiError> {
            self.saved.lock().expect("saved lock").push(query.clone());
            Ok(())
        }

        async fn list_saved(&self) -> Result<Vec<SavedQuery>, ApiError> {
            Ok(vec![SavedQuery {
                id: "1".to_string(),
                name: "daily".to_string(),
                app: "Game".to_string(),
                version: "beta".to_string(),
                db: String::new(),
                query: "select 2".to_string(),
            }])
        }

        async fn delete_saved(&self, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl HistoryApi for FakeConsole {
        async fn list_jobs(&self) -> Result<Vec<HistoryEntry>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl CollectorApi for FakeConsole {
        async fn list_collectors(&self) -> Result<Vec<Collector>, ApiError> {
            Ok(Vec::new())
        }

        async fn create_collector(&self, _form: &CollectorForm) -> Result<(), ApiError> {
            Ok(())
        }

        async fn update_collector(&self, _id: &str, _form: &CollectorForm) -> Result<(), ApiError> {
            Ok(())
        }

        async fn delete_collector(&self, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ResultDownloadApi for FakeConsole {
        async fn download_result(
            &self,
            _url: &str,
            _destination: &Path,
        ) -> Result<u64, DownloadError> {
            Ok(0)
        }
    }

    fn app(output_dir: PathBuf) -> TuiApp<FakeConsole> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime builds");
        let mut app = TuiApp::new(
            runtime,
            Arc::new(FakeConsole::default()),
            &ConsoleConfig::default(),
            output_dir,
        );
        app.load_metadata(false);
        app
    }

    fn type_text(app: &mut TuiApp<FakeConsole>, text: &str) {
        for character in text.chars() {
            app.handle(Msg::Input(character));
        }
    }

    #[test]
    fn pane_cycles_in_expected_order() {
        assert_eq!(Pane::Tree.next(), Pane::Editor);
        assert_eq!(Pane::Editor.next(), Pane::Results);
        assert_eq!(Pane::Results.next(), Pane::Log);
        assert_eq!(Pane::Log.next(), Pane::Tree);
    }

    #[test]
    fn control_keys_work_in_every_mode() {
        for mode in [InputMode::Text, InputMode::Navigate] {
            assert_eq!(
                map_key_event(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::CONTROL), mode),
                Some(Msg::Run)
            );
            assert_eq!(
                map_key_event(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL), mode),
                Some(Msg::Quit)
            );
            assert_eq!(
                map_key_event(KeyEvent::new(KeyCode::F(6), KeyModifiers::NONE), mode),
                Some(Msg::CycleApp)
            );
        }
    }

    #[test]
    fn plain_letters_type_in_text_mode_and_navigate_otherwise() {
        let q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(map_key_event(q, InputMode::Text), Some(Msg::Input('q')));
        assert_eq!(map_key_event(q, InputMode::Navigate), Some(Msg::Quit));

        let j = KeyEvent::new(KeyCode::Char('j'), KeyModifiers::NONE);
        assert_eq!(
            map_key_event(j, InputMode::Navigate),
            Some(Msg::Navigate(DirectionKey::Down))
        );
    }

    #[test]
    fn selectors_cycle_through_choices() {
        let choices = vec!["a".to_string(), "b".to_string()];
        assert_eq!(next_choice(&choices, None), Some("a".to_string()));
        assert_eq!(next_choice(&choices, Some("a")), Some("b".to_string()));
        assert_eq!(next_choice(&choices, Some("b")), Some("a".to_string()));
        assert_eq!(next_choice(&[], Some("a")), None);
    }

    #[test]
    fn metadata_load_fills_selectors_and_app_cycle_resets_version() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());

        let tab = app.controller.workspace().active_tab();
        assert_eq!(tab.selected_app(), Some("Shop"));
        assert_eq!(tab.selected_version(), Some("v1"));

        app.handle(Msg::CycleVersion);
        assert_eq!(
            app.controller.workspace().active_tab().selected_version(),
            Some("v2")
        );
        app.handle(Msg::CycleApp);
        let tab = app.controller.workspace().active_tab();
        assert_eq!(tab.selected_app(), Some("Game"));
        assert_eq!(tab.selected_version(), Some("beta"));
    }

    #[test]
    fn empty_editor_run_shows_validation_notice_without_request() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());

        app.handle(Msg::Run);

        assert_eq!(app.status_line, "请输入sql语句");
        assert_eq!(app.backend.submits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejected_query_surfaces_syntax_notice() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());
        type_text(&mut app, "selec 1");

        app.handle(Msg::Run);

        assert_eq!(app.backend.submits.load(Ordering::SeqCst), 1);
        assert_eq!(
            app.controller.workspace().active_tab().notice(),
            Some("参数错误,查询不符合sql的语法:syntax error")
        );
    }

    #[test]
    fn tree_enter_appends_quoted_identifier() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());
        type_text(&mut app, "select * from");
        app.pane = Pane::Tree;

        for _ in 0..3 {
            app.handle(Msg::Navigate(DirectionKey::Right));
            app.handle(Msg::Navigate(DirectionKey::Down));
        }
        app.handle(Msg::Enter);

        assert_eq!(
            app.controller.workspace().active_tab().editor_text,
            "select * from `v1`.`db`.`orders`"
        );
    }

    #[test]
    fn saved_query_loads_into_editor_and_selectors() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());

        app.handle(Msg::OpenSaved);
        assert!(matches!(app.overlay, Some(Overlay::Saved { .. })));
        app.handle(Msg::Enter);

        let tab = app.controller.workspace().active_tab();
        assert!(app.overlay.is_none());
        assert_eq!(tab.editor_text, "select 2");
        assert_eq!(tab.selected_app(), Some("Game"));
        assert_eq!(tab.selected_version(), Some("beta"));
    }

    #[test]
    fn save_prompt_submits_named_query() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());
        type_text(&mut app, "select 1");

        app.handle(Msg::SaveQuery);
        type_text(&mut app, "daily");
        app.handle(Msg::Enter);

        assert!(app.prompt.is_none());
        assert_eq!(app.status_line, "保存成功");
        let saved = app.backend.saved.lock().expect("saved lock");
        assert_eq!(saved[0].name, "daily");
        assert_eq!(saved[0].query, "select 1");
    }

    #[test]
    fn tabs_open_and_close_around_workspace() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());

        app.handle(Msg::NewTab);
        app.handle(Msg::NewTab);
        assert_eq!(app.controller.workspace().len(), 3);
        app.handle(Msg::CloseTab);
        assert_eq!(app.controller.workspace().len(), 2);
        app.handle(Msg::CloseAllTabs);
        assert_eq!(app.controller.workspace().len(), 1);
        app.handle(Msg::CloseTab);
        assert_eq!(app.controller.workspace().len(), 1);
    }

    #[test]
    fn download_without_result_reports_nothing_to_fetch() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut app = app(temp_dir.path().to_path_buf());

        app.handle(Msg::Download);

        assert_eq!(app.status_line, "无可下载的记录");
    }
}
