use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Clear, Gauge, List, ListItem, ListState, Padding, Paragraph, Tabs, Wrap,
};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::admin::{self, UserQuery};
use crate::api::{self, ApiError, Profile, Role, UploadRequest, User, Video};
use crate::assets;
use crate::data::{ProgressFn, Services};
use crate::download::{self, Progress};
use crate::feed::{Gesture, NavKey, Navigator, ReplyView, Slot, Transition};
use crate::mutation::{self, Pending};
use crate::playback::{self, Coordinator};
use crate::policy::{self, PolicyError};
use crate::session;
use crate::storage;
use crate::theme::{Palette, ThemeStore};
use crate::video::PlayerError;

const TICK_RATE: Duration = Duration::from_millis(120);
const TOAST_TTL: Duration = Duration::from_secs(4);
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const DESCRIPTION_LINES: usize = 6;

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn contains(area: Rect, (column, row): (u16, u16)) -> bool {
    column >= area.x
        && column < area.x.saturating_add(area.width)
        && row >= area.y
        && row < area.y.saturating_add(area.height)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Screen {
    Feed,
    Profile,
    Upload,
    Admin,
    Auth,
}

impl Screen {
    const TABS: [Screen; 4] = [Screen::Feed, Screen::Profile, Screen::Upload, Screen::Admin];

    fn title(self) -> &'static str {
        match self {
            Screen::Feed => "1 Feed",
            Screen::Profile => "2 Profile",
            Screen::Upload => "3 Upload",
            Screen::Admin => "4 Admin",
            Screen::Auth => "Sign in",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ToastKind {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug)]
struct Toast {
    message: String,
    kind: ToastKind,
    shown_at: Instant,
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= TICK_RATE {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum AuthMode {
    #[default]
    Login,
    Register,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum AuthField {
    Username,
    Email,
    Password,
    Confirm,
    Submit,
}

impl AuthMode {
    fn fields(self) -> &'static [AuthField] {
        match self {
            AuthMode::Login => &[AuthField::Email, AuthField::Password, AuthField::Submit],
            AuthMode::Register => &[
                AuthField::Username,
                AuthField::Email,
                AuthField::Password,
                AuthField::Confirm,
                AuthField::Submit,
            ],
        }
    }

    fn title(self) -> &'static str {
        match self {
            AuthMode::Login => "Sign in",
            AuthMode::Register => "Create account",
        }
    }
}

impl AuthField {
    fn label(self) -> &'static str {
        match self {
            AuthField::Username => "Username",
            AuthField::Email => "Email",
            AuthField::Password => "Password",
            AuthField::Confirm => "Confirm password",
            AuthField::Submit => "Submit",
        }
    }

    fn is_secret(self) -> bool {
        matches!(self, AuthField::Password | AuthField::Confirm)
    }
}

#[derive(Default)]
struct AuthForm {
    mode: AuthMode,
    active: usize,
    username: String,
    email: String,
    password: String,
    confirm: String,
    error: Option<String>,
    pending: bool,
}

impl AuthForm {
    fn field(&self) -> AuthField {
        let fields = self.mode.fields();
        fields[self.active.min(fields.len() - 1)]
    }

    fn next(&mut self) {
        self.active = (self.active + 1) % self.mode.fields().len();
    }

    fn previous(&mut self) {
        let len = self.mode.fields().len();
        self.active = (self.active + len - 1) % len;
    }

    fn value(&self, field: AuthField) -> &str {
        match field {
            AuthField::Username => &self.username,
            AuthField::Email => &self.email,
            AuthField::Password => &self.password,
            AuthField::Confirm => &self.confirm,
            AuthField::Submit => "",
        }
    }

    fn active_value_mut(&mut self) -> Option<&mut String> {
        match self.field() {
            AuthField::Username => Some(&mut self.username),
            AuthField::Email => Some(&mut self.email),
            AuthField::Password => Some(&mut self.password),
            AuthField::Confirm => Some(&mut self.confirm),
            AuthField::Submit => None,
        }
    }

    fn insert_char(&mut self, ch: char) {
        if let Some(value) = self.active_value_mut() {
            value.push(ch);
        }
        self.error = None;
    }

    fn backspace(&mut self) {
        if let Some(value) = self.active_value_mut() {
            value.pop();
        }
        self.error = None;
    }

    fn switch_mode(&mut self) {
        self.mode = match self.mode {
            AuthMode::Login => AuthMode::Register,
            AuthMode::Register => AuthMode::Login,
        };
        self.active = 0;
        self.error = None;
    }

    fn clear_secrets(&mut self) {
        self.password.clear();
        self.confirm.clear();
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum UploadField {
    #[default]
    Path,
    Description,
    Submit,
}

impl UploadField {
    fn next(self) -> Self {
        match self {
            UploadField::Path => UploadField::Description,
            UploadField::Description => UploadField::Submit,
            UploadField::Submit => UploadField::Path,
        }
    }

    fn previous(self) -> Self {
        match self {
            UploadField::Path => UploadField::Submit,
            UploadField::Description => UploadField::Path,
            UploadField::Submit => UploadField::Description,
        }
    }
}

#[derive(Default)]
struct UploadForm {
    active: UploadField,
    path: String,
    description: String,
    reply_to: Option<String>,
    error: Option<String>,
    progress: Option<u8>,
    request_id: Option<u64>,
    cancel: Option<Arc<AtomicBool>>,
}

impl UploadForm {
    fn for_parent(reply_to: Option<String>) -> Self {
        Self {
            reply_to,
            ..Self::default()
        }
    }

    fn in_flight(&self) -> bool {
        self.request_id.is_some()
    }

    fn active_value_mut(&mut self) -> Option<&mut String> {
        match self.active {
            UploadField::Path => Some(&mut self.path),
            UploadField::Description => Some(&mut self.description),
            UploadField::Submit => None,
        }
    }

    fn finish(&mut self) {
        self.request_id = None;
        self.cancel = None;
        self.progress = None;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
enum ProfileTab {
    #[default]
    Posts,
    Replies,
    Liked,
}

impl ProfileTab {
    const ALL: [ProfileTab; 3] = [ProfileTab::Posts, ProfileTab::Replies, ProfileTab::Liked];

    fn title(self) -> &'static str {
        match self {
            ProfileTab::Posts => "Posts",
            ProfileTab::Replies => "Replies",
            ProfileTab::Liked => "Liked",
        }
    }

    fn index(self) -> usize {
        match self {
            ProfileTab::Posts => 0,
            ProfileTab::Replies => 1,
            ProfileTab::Liked => 2,
        }
    }

    /// The liked tab only exists on the signed-in user's own profile.
    fn step(self, forward: bool, own: bool) -> Self {
        let tabs: &[ProfileTab] = if own {
            &ProfileTab::ALL
        } else {
            &ProfileTab::ALL[..2]
        };
        let current = tabs.iter().position(|tab| *tab == self).unwrap_or(0);
        let next = if forward {
            (current + 1) % tabs.len()
        } else {
            (current + tabs.len() - 1) % tabs.len()
        };
        tabs[next]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ProfileEdit {
    Username(String),
    Image(String),
}

#[derive(Default)]
struct ProfileView {
    username: String,
    profile: Option<Profile>,
    liked: Vec<Video>,
    tab: ProfileTab,
    selected: usize,
    edit: Option<ProfileEdit>,
    request_id: Option<u64>,
    liked_request: Option<u64>,
    edit_request: Option<u64>,
}

impl ProfileView {
    fn for_user(username: String) -> Self {
        Self {
            username,
            ..Self::default()
        }
    }

    fn is_own(&self, me: Option<&User>) -> bool {
        match (me, &self.profile) {
            (Some(me), Some(profile)) => profile.user.id == me.id,
            (Some(me), None) => me.username == self.username,
            (None, _) => false,
        }
    }

    fn items(&self) -> &[Video] {
        match self.tab {
            ProfileTab::Liked => &self.liked,
            ProfileTab::Posts => self
                .profile
                .as_ref()
                .map(|profile| profile.videos.as_slice())
                .unwrap_or_default(),
            ProfileTab::Replies => self
                .profile
                .as_ref()
                .map(|profile| profile.replies.as_slice())
                .unwrap_or_default(),
        }
    }

    fn list_mut(&mut self, tab: ProfileTab) -> Option<&mut Vec<Video>> {
        match tab {
            ProfileTab::Liked => Some(&mut self.liked),
            ProfileTab::Posts => self.profile.as_mut().map(|profile| &mut profile.videos),
            ProfileTab::Replies => self.profile.as_mut().map(|profile| &mut profile.replies),
        }
    }

    fn selected_item(&self) -> Option<&Video> {
        self.items().get(self.selected)
    }

    fn clamp_selection(&mut self) {
        let len = self.items().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    fn move_selection(&mut self, step: isize) {
        let len = self.items().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = (self.selected as isize + step).clamp(0, len as isize - 1);
        self.selected = next as usize;
    }
}

#[derive(Default)]
struct AdminView {
    users: Vec<User>,
    query: UserQuery,
    visible: Vec<usize>,
    selected: usize,
    marked: HashSet<String>,
    searching: bool,
    request_id: Option<u64>,
}

impl AdminView {
    fn refresh(&mut self) {
        self.visible = admin::visible_users(&self.users, &self.query);
        let users = &self.users;
        self.marked
            .retain(|id| users.iter().any(|user| &user.id == id));
        self.selected = self.selected.min(self.visible.len().saturating_sub(1));
    }

    fn selected_user(&self) -> Option<&User> {
        self.visible
            .get(self.selected)
            .and_then(|&index| self.users.get(index))
    }

    fn move_selection(&mut self, step: isize) {
        if self.visible.is_empty() {
            self.selected = 0;
            return;
        }
        let last = self.visible.len() as isize - 1;
        self.selected = (self.selected as isize + step).clamp(0, last) as usize;
    }

    fn toggle_mark(&mut self) {
        let Some(id) = self.selected_user().map(|user| user.id.clone()) else {
            return;
        };
        if !self.marked.remove(&id) {
            self.marked.insert(id);
        }
    }

    /// Marks every visible user, or clears the marks when all of them are marked already.
    fn toggle_all(&mut self) {
        let visible: Vec<String> = self
            .visible
            .iter()
            .filter_map(|&index| self.users.get(index))
            .map(|user| user.id.clone())
            .collect();
        if !visible.is_empty() && visible.iter().all(|id| self.marked.contains(id)) {
            self.marked.clear();
        } else {
            self.marked.extend(visible);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum ConfirmAction {
    DeleteVideo {
        video_id: String,
        parent_id: Option<String>,
    },
    DeleteUsers {
        ids: Vec<String>,
    },
    ChangeRole {
        user_id: String,
        role: Role,
    },
    Logout,
}

struct Modal {
    action: ConfirmAction,
    message: String,
}

struct DownloadJob {
    rx: Receiver<Progress>,
    last: Option<Progress>,
}

/// Where a rollback snapshot has to be restored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Feed,
    Profile(ProfileTab),
    Users,
}

struct PendingMutation {
    label: String,
    snapshots: Vec<(Scope, Pending)>,
}

enum AsyncResponse {
    Feed {
        request_id: u64,
        result: Result<Vec<Video>>,
    },
    Like {
        request_id: u64,
        video_id: String,
        user_id: String,
        result: Result<bool>,
    },
    Mutation {
        request_id: u64,
        result: Result<()>,
    },
    UserDeletes {
        request_id: u64,
        failed: Vec<(String, String)>,
    },
    Auth {
        result: Result<User>,
    },
    Profile {
        request_id: u64,
        result: Result<Profile>,
    },
    Liked {
        request_id: u64,
        result: Result<Vec<Video>>,
    },
    UploadProgress {
        request_id: u64,
        percent: u8,
    },
    Upload {
        request_id: u64,
        reply_to: Option<String>,
        result: Result<Video>,
    },
    Username {
        request_id: u64,
        result: Result<String>,
    },
    ProfileImage {
        request_id: u64,
        result: Result<String>,
    },
    Users {
        request_id: u64,
        result: Result<Vec<User>>,
    },
    Session {
        request_id: u64,
        result: Result<Option<User>>,
    },
}

fn api_error(err: &anyhow::Error) -> Option<&ApiError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ApiError>())
}

/// Short text for the status line: the server's own message when it sent one.
fn describe(err: &anyhow::Error) -> String {
    match api_error(err) {
        Some(ApiError::Rejected { message, .. }) if !message.is_empty() => message.clone(),
        _ => format!("{err:#}"),
    }
}

fn was_cancelled(err: &anyhow::Error) -> bool {
    matches!(api_error(err), Some(ApiError::Cancelled))
}

fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim();
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB {
        format!("{:.1} MB", bytes as f64 / MB)
    } else {
        format!("{} KB", bytes / 1024)
    }
}

pub struct Options {
    pub services: Services,
    pub session: Arc<session::Context>,
    pub theme: Arc<ThemeStore>,
    pub store: Arc<storage::Store>,
    pub downloads: Option<Arc<download::Manager>>,
    pub playback: Coordinator,
    pub base_url: String,
    pub status_message: String,
    pub load_feed_on_start: bool,
}

pub struct Model {
    services: Services,
    session: Arc<session::Context>,
    theme: Arc<ThemeStore>,
    store: Arc<storage::Store>,
    downloads: Option<Arc<download::Manager>>,
    playback: Coordinator,
    base_url: String,
    screen: Screen,
    nav: Navigator,
    feed_request: Option<u64>,
    session_request: Option<u64>,
    status_message: String,
    toast: Option<Toast>,
    modal: Option<Modal>,
    auth_form: AuthForm,
    upload: UploadForm,
    profile: ProfileView,
    admin: AdminView,
    pending: HashMap<u64, PendingMutation>,
    download_jobs: HashMap<String, DownloadJob>,
    downloaded: HashSet<String>,
    drag_start: Option<((u16, u16), Instant)>,
    main_area: Cell<Rect>,
    reply_area: Cell<Rect>,
    spinner: Spinner,
    needs_redraw: bool,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let downloaded = match opts.store.downloaded_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                log::warn!("could not read downloaded videos: {err:#}");
                HashSet::new()
            }
        };
        let mut model = Self {
            services: opts.services,
            session: opts.session,
            theme: opts.theme,
            store: opts.store,
            downloads: opts.downloads,
            playback: opts.playback,
            base_url: opts.base_url,
            screen: Screen::Feed,
            nav: Navigator::default(),
            feed_request: None,
            session_request: None,
            status_message: opts.status_message,
            toast: None,
            modal: None,
            auth_form: AuthForm::default(),
            upload: UploadForm::default(),
            profile: ProfileView::default(),
            admin: AdminView::default(),
            pending: HashMap::new(),
            download_jobs: HashMap::new(),
            downloaded,
            drag_start: None,
            main_area: Cell::new(Rect::default()),
            reply_area: Cell::new(Rect::default()),
            spinner: Spinner::new(),
            needs_redraw: true,
            response_tx,
            response_rx,
            next_request_id: 1,
        };
        if opts.load_feed_on_start {
            model.reload_feed();
        }
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        if let Err(err) = self.playback.pause_all() {
            log::debug!("pausing players on exit: {err}");
        }
        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = TICK_RATE
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {err:#}");
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(..) => self.mark_dirty(),
                    _ => {}
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= TICK_RATE {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
                if self
                    .toast
                    .as_ref()
                    .is_some_and(|toast| toast.shown_at.elapsed() >= TOAST_TTL)
                {
                    self.toast = None;
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.feed_request.is_some()
            || self.session_request.is_some()
            || self.profile.request_id.is_some()
            || self.profile.edit_request.is_some()
            || self.admin.request_id.is_some()
            || self.upload.in_flight()
            || self.auth_form.pending
            || !self.pending.is_empty()
            || !self.download_jobs.is_empty()
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn show_toast(&mut self, kind: ToastKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            ToastKind::Error => log::warn!("{message}"),
            _ => log::info!("{message}"),
        }
        self.toast = Some(Toast {
            message,
            kind,
            shown_at: Instant::now(),
        });
        self.mark_dirty();
    }

    /// Reports a failed permission or validation check. Signed-out users are sent to the
    /// sign-in form.
    fn deny(&mut self, err: PolicyError) {
        if err == PolicyError::NotSignedIn {
            self.open_auth(AuthMode::Login);
        }
        self.show_toast(ToastKind::Error, capitalize(&err.to_string()));
    }

    fn report_player(&mut self, result: Result<(), PlayerError>) {
        match result {
            Ok(()) => {}
            Err(PlayerError::Unsupported(what)) => log::debug!("player lacks {what}"),
            Err(err) => self.show_toast(ToastKind::Error, format!("Player error: {err}")),
        }
    }

    fn current_user(&self) -> Option<User> {
        self.session.current_user()
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.modal.is_some() {
            self.handle_modal_key(code);
            self.mark_dirty();
            return Ok(false);
        }

        if self.is_typing() {
            self.handle_text_key(code);
            self.mark_dirty();
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('1') => self.show_feed(),
            KeyCode::Char('2') => self.open_own_profile(),
            KeyCode::Char('3') => self.open_upload(None),
            KeyCode::Char('4') => self.open_admin(),
            KeyCode::Char('t') => self.toggle_theme(),
            _ => match self.screen {
                Screen::Feed => self.handle_feed_key(code),
                Screen::Profile => self.handle_profile_key(code),
                Screen::Upload => self.handle_upload_key(code),
                Screen::Admin => self.handle_admin_key(code),
                Screen::Auth => self.handle_auth_key(code),
            },
        }
        self.mark_dirty();
        Ok(false)
    }

    /// True while a text field has the keyboard, so letters and digits are not shortcuts.
    fn is_typing(&self) -> bool {
        match self.screen {
            Screen::Auth => self.auth_form.field() != AuthField::Submit,
            Screen::Upload => self.upload.active != UploadField::Submit,
            Screen::Profile => self.profile.edit.is_some(),
            Screen::Admin => self.admin.searching,
            Screen::Feed => false,
        }
    }

    fn handle_text_key(&mut self, code: KeyCode) {
        match self.screen {
            Screen::Auth => match code {
                KeyCode::Esc => self.leave_auth(),
                KeyCode::Tab | KeyCode::Down => self.auth_form.next(),
                KeyCode::BackTab | KeyCode::Up => self.auth_form.previous(),
                KeyCode::Enter => {
                    if self.auth_form.active + 2 >= self.auth_form.mode.fields().len() {
                        self.submit_auth();
                    } else {
                        self.auth_form.next();
                    }
                }
                KeyCode::Backspace => self.auth_form.backspace(),
                KeyCode::Char(ch) => self.auth_form.insert_char(ch),
                _ => {}
            },
            Screen::Upload => match code {
                KeyCode::Esc => self.leave_upload(),
                KeyCode::Tab | KeyCode::Down | KeyCode::Enter => {
                    self.upload.active = self.upload.active.next();
                }
                KeyCode::BackTab | KeyCode::Up => {
                    self.upload.active = self.upload.active.previous();
                }
                KeyCode::Backspace => {
                    if let Some(value) = self.upload.active_value_mut() {
                        value.pop();
                    }
                    self.upload.error = None;
                }
                KeyCode::Char(ch) => {
                    if let Some(value) = self.upload.active_value_mut() {
                        value.push(ch);
                    }
                    self.upload.error = None;
                }
                _ => {}
            },
            Screen::Profile => match code {
                KeyCode::Esc => {
                    self.profile.edit = None;
                    self.status_message = "Edit cancelled.".to_string();
                }
                KeyCode::Enter => self.submit_profile_edit(),
                KeyCode::Backspace => {
                    if let Some(ProfileEdit::Username(value) | ProfileEdit::Image(value)) =
                        self.profile.edit.as_mut()
                    {
                        value.pop();
                    }
                }
                KeyCode::Char(ch) => {
                    if let Some(ProfileEdit::Username(value) | ProfileEdit::Image(value)) =
                        self.profile.edit.as_mut()
                    {
                        value.push(ch);
                    }
                }
                _ => {}
            },
            Screen::Admin => match code {
                KeyCode::Esc | KeyCode::Enter => self.admin.searching = false,
                KeyCode::Backspace => {
                    self.admin.query.search.pop();
                    self.admin.refresh();
                }
                KeyCode::Char(ch) => {
                    self.admin.query.search.push(ch);
                    self.admin.selected = 0;
                    self.admin.refresh();
                }
                _ => {}
            },
            Screen::Feed => {}
        }
    }

    fn handle_modal_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                if let Some(modal) = self.modal.take() {
                    self.confirm(modal.action);
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.modal = None;
                self.status_message = "Cancelled.".to_string();
            }
            _ => {}
        }
    }

    fn confirm(&mut self, action: ConfirmAction) {
        match action {
            ConfirmAction::DeleteVideo {
                video_id,
                parent_id,
            } => self.delete_video(video_id, parent_id),
            ConfirmAction::DeleteUsers { ids } => self.delete_users(ids),
            ConfirmAction::ChangeRole { user_id, role } => self.change_role(user_id, role),
            ConfirmAction::Logout => self.logout(),
        }
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        if self.modal.is_some() {
            return;
        }
        if self.screen != Screen::Feed {
            let step = match event.kind {
                MouseEventKind::ScrollDown => 1,
                MouseEventKind::ScrollUp => -1,
                _ => return,
            };
            match self.screen {
                Screen::Profile => self.profile.move_selection(step),
                Screen::Admin => self.admin.move_selection(step),
                _ => return,
            }
            self.mark_dirty();
            return;
        }

        let at = Instant::now();
        match event.kind {
            MouseEventKind::ScrollDown => self.apply_gesture(Gesture::wheel_notch(true, at)),
            MouseEventKind::ScrollUp => self.apply_gesture(Gesture::wheel_notch(false, at)),
            MouseEventKind::Down(MouseButton::Left) => {
                self.drag_start = Some(((event.column, event.row), at));
                return;
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let Some((start, started)) = self.drag_start.take() else {
                    return;
                };
                let end = (event.column, event.row);
                if start == end {
                    self.click_at(end);
                } else {
                    let elapsed = at.saturating_duration_since(started);
                    self.apply_gesture(Gesture::from_drag(start, end, elapsed));
                }
            }
            _ => return,
        }
        self.mark_dirty();
    }

    fn click_at(&mut self, position: (u16, u16)) {
        if contains(self.main_area.get(), position) {
            self.activate_slot(Slot::Main);
        } else if contains(self.reply_area.get(), position) {
            self.activate_slot(Slot::Reply);
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Model {
    fn show_feed(&mut self) {
        self.screen = Screen::Feed;
        self.status_message = if self.nav.is_empty() {
            "Feed is empty. Press R to refresh.".to_string()
        } else {
            self.position_status()
        };
    }

    fn reload_feed(&mut self) {
        let request_id = self.next_request_id();
        self.feed_request = Some(request_id);
        self.status_message = "Loading feed…".to_string();
        let service = Arc::clone(&self.services.feed);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.load_feed();
            let _ = tx.send(AsyncResponse::Feed { request_id, result });
        });
        self.mark_dirty();
    }

    fn handle_feed_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Up | KeyCode::Char('k') => self.apply_gesture(Gesture::Key(NavKey::Up)),
            KeyCode::Down | KeyCode::Char('j') => self.apply_gesture(Gesture::Key(NavKey::Down)),
            KeyCode::Left => self.apply_gesture(Gesture::Key(NavKey::Left)),
            KeyCode::Right => self.apply_gesture(Gesture::Key(NavKey::Right)),
            KeyCode::Esc => self.apply_gesture(Gesture::Key(NavKey::Escape)),
            KeyCode::Enter => self.activate_slot(Slot::Main),
            KeyCode::Tab => {
                let slot = self.nav.focus().active().map_or(Slot::Reply, Slot::other);
                self.activate_slot(slot);
            }
            KeyCode::Char('f') => self.toggle_expanded(),
            KeyCode::Char(' ') => self.toggle_playback(),
            KeyCode::Char('m') => {
                let result = self.playback.toggle_mute();
                match result {
                    Ok(muted) => {
                        self.status_message =
                            if muted { "Muted." } else { "Sound on." }.to_string();
                    }
                    Err(err) => self.report_player(Err(err)),
                }
            }
            KeyCode::Char('[') | KeyCode::Char(']') => {
                let slot = self.focused_slot();
                match self.playback.step_speed(slot, code == KeyCode::Char(']')) {
                    Ok(speed) => self.status_message = format!("Speed {speed:.2}x"),
                    Err(err) => self.report_player(Err(err)),
                }
            }
            KeyCode::Char(',') | KeyCode::Char('.') => {
                let slot = self.focused_slot();
                let seconds = if code == KeyCode::Char('.') {
                    playback::SEEK_STEP_SECS
                } else {
                    -playback::SEEK_STEP_SECS
                };
                let result = self.playback.seek_relative(slot, seconds);
                self.report_player(result);
            }
            KeyCode::Char('0') => {
                let slot = self.focused_slot();
                let result = self.playback.seek_to(slot, 0.0);
                self.report_player(result);
            }
            KeyCode::Char('p') => {
                let slot = self.focused_slot();
                match self.playback.toggle_pip(slot) {
                    Ok(true) => self.status_message = "Picture-in-picture on.".to_string(),
                    Ok(false) => self.status_message = "Picture-in-picture off.".to_string(),
                    Err(err) => self.report_player(Err(err)),
                }
            }
            KeyCode::Char('l') => self.like_target(),
            KeyCode::Char('r') => self.reply_to_active(),
            KeyCode::Char('d') => self.download_target(),
            KeyCode::Char('s') => {
                if let Some(video) = self.target_video() {
                    let url = assets::video_share_url(&self.base_url, &video.id);
                    self.share(url);
                }
            }
            KeyCode::Char('x') | KeyCode::Delete => {
                if let Some(video) = self.target_video().cloned() {
                    let parent = self.nav.parent_of(&video.id).cloned();
                    self.request_delete(&video, parent.as_ref());
                }
            }
            KeyCode::Char('o') => {
                if let Some(username) = self
                    .target_video()
                    .map(|video| video.user.username.clone())
                    .filter(|name| !name.is_empty())
                {
                    self.open_profile(username);
                }
            }
            KeyCode::Char('R') => self.reload_feed(),
            _ => {}
        }
    }

    fn focused_slot(&self) -> Slot {
        self.nav.focus().active().unwrap_or(Slot::Main)
    }

    /// The reply when the reply player has focus, otherwise the main video.
    fn target_video(&self) -> Option<&Video> {
        match self.nav.focus().active() {
            Some(Slot::Reply) => self.nav.active_reply(),
            _ => self.nav.active_video(),
        }
    }

    fn active_ids(&self) -> (Option<String>, Option<String>) {
        (
            self.nav.active_video().map(|video| video.id.clone()),
            self.nav.active_reply().map(|video| video.id.clone()),
        )
    }

    fn resync_if_moved(&mut self, before: (Option<String>, Option<String>)) {
        if self.active_ids() != before {
            let result = self.playback.sync(&self.nav);
            self.report_player(result);
        }
    }

    fn apply_gesture(&mut self, gesture: Gesture) {
        let transition = self.nav.handle(gesture);
        self.after_transition(transition);
    }

    fn after_transition(&mut self, transition: Transition) {
        if transition == Transition::None {
            return;
        }
        let result = self.playback.on_transition(transition, &self.nav);
        self.report_player(result);
        self.status_message = match transition {
            Transition::Collapsed => "Player collapsed.".to_string(),
            _ => self.position_status(),
        };
    }

    fn position_status(&self) -> String {
        let Some(index) = self.nav.active_video_index() else {
            return "No videos.".to_string();
        };
        let mut status = format!("Video {}/{}", index + 1, self.nav.len());
        if let ReplyView::Active { index, total, .. } = self.nav.reply_view() {
            status.push_str(&format!(" · reply {}/{}", index + 1, total));
        }
        status
    }

    fn activate_slot(&mut self, slot: Slot) {
        if !self.nav.activate(slot) {
            self.status_message = match slot {
                Slot::Main => "Nothing to play.".to_string(),
                Slot::Reply => "No replies yet. Press r to reply.".to_string(),
            };
            return;
        }
        let result = self
            .playback
            .activate(slot)
            .and_then(|()| self.playback.apply_focus(self.nav.focus()));
        self.report_player(result);
    }

    fn toggle_playback(&mut self) {
        let slot = self.focused_slot();
        if self.playback.is_playing(slot) {
            let result = self.playback.pause(slot);
            self.report_player(result);
            self.status_message = "Paused.".to_string();
        } else {
            self.activate_slot(slot);
        }
    }

    fn toggle_expanded(&mut self) {
        if self.nav.focus().is_expanded() {
            self.apply_gesture(Gesture::Key(NavKey::Escape));
            return;
        }
        let slot = self.focused_slot();
        if !self.nav.expand(slot) {
            self.status_message = "Nothing to expand.".to_string();
            return;
        }
        let result = self
            .playback
            .activate(slot)
            .and_then(|()| self.playback.apply_focus(self.nav.focus()));
        self.report_player(result);
        self.status_message = "Expanded. Esc or scroll to collapse.".to_string();
    }

    fn like_target(&mut self) {
        let user = self.current_user();
        if let Err(err) = policy::can_like(user.as_ref()) {
            self.deny(err);
            return;
        }
        let Some(user) = user else {
            return;
        };
        let Some(video_id) = self.target_video().map(|video| video.id.clone()) else {
            self.status_message = "Nothing to like.".to_string();
            return;
        };
        let Some(snapshot) = mutation::apply_like(&mut self.nav, &video_id, &user.id) else {
            return;
        };
        let request_id = self.next_request_id();
        self.pending.insert(
            request_id,
            PendingMutation {
                label: "Like".to_string(),
                snapshots: vec![(Scope::Feed, snapshot)],
            },
        );

        let service = Arc::clone(&self.services.interaction);
        let tx = self.response_tx.clone();
        let user_id = user.id;
        thread::spawn(move || {
            let result = service.toggle_like(&video_id);
            let _ = tx.send(AsyncResponse::Like {
                request_id,
                video_id,
                user_id,
                result,
            });
        });
    }

    fn reply_to_active(&mut self) {
        let user = self.current_user();
        if let Err(err) = policy::can_reply(user.as_ref()) {
            self.deny(err);
            return;
        }
        let Some(parent) = self.nav.active_video().map(|video| video.id.clone()) else {
            self.status_message = "Nothing to reply to.".to_string();
            return;
        };
        self.open_upload(Some(parent));
    }

    fn download_target(&mut self) {
        let Some(video) = self.target_video().cloned() else {
            self.status_message = "Nothing to download.".to_string();
            return;
        };
        match self.store.is_downloaded(&video.id) {
            Ok(true) => {
                self.downloaded.insert(video.id.clone());
                self.status_message = match self.store.get_download(&video.id) {
                    Ok(Some(record)) => format!("Already downloaded as {}.", record.file_name),
                    _ => "Already downloaded.".to_string(),
                };
                return;
            }
            Ok(false) => {}
            Err(err) => log::warn!("download lookup for {} failed: {err:#}", video.id),
        }
        if self.download_jobs.contains_key(&video.id) {
            self.status_message = "Download already running.".to_string();
            return;
        }
        let Some(manager) = self.downloads.clone() else {
            self.show_toast(ToastKind::Error, "Downloads are not available.");
            return;
        };
        let url = assets::resolve(&self.base_url, &video.video_url);
        if url.is_empty() {
            self.show_toast(ToastKind::Error, "This video has no media file.");
            return;
        }
        let rx = manager.enqueue(download::Request {
            video_id: video.id.clone(),
            url,
        });
        self.download_jobs
            .insert(video.id.clone(), DownloadJob { rx, last: None });
        self.status_message = "Downloading…".to_string();
    }

    fn poll_downloads(&mut self) -> bool {
        let mut changed = false;
        let mut finished = Vec::new();
        for (id, job) in self.download_jobs.iter_mut() {
            loop {
                match job.rx.try_recv() {
                    Ok(progress) => {
                        changed = true;
                        job.last = Some(progress);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        finished.push(id.clone());
                        break;
                    }
                }
            }
            if matches!(job.last, Some(Progress::Done(_)) | Some(Progress::Failed(_))) {
                finished.push(id.clone());
            }
        }
        finished.sort();
        finished.dedup();

        for id in finished {
            let Some(job) = self.download_jobs.remove(&id) else {
                continue;
            };
            changed = true;
            match job.last {
                Some(Progress::Done(record)) => {
                    self.downloaded.insert(id);
                    self.show_toast(ToastKind::Success, format!("Saved {}", record.file_path));
                }
                Some(Progress::Failed(message)) => {
                    self.show_toast(ToastKind::Error, format!("Download failed: {message}"));
                }
                _ => self.show_toast(ToastKind::Error, "Download stopped unexpectedly."),
            }
        }
        changed
    }

    fn download_label(&self, video_id: &str) -> Option<String> {
        if let Some(job) = self.download_jobs.get(video_id) {
            return Some(match &job.last {
                Some(Progress::Percent(percent)) => format!("⬇ {percent}%"),
                Some(Progress::Indeterminate { bytes }) => {
                    format!("⬇ {} {}", self.spinner.frame(), format_bytes(*bytes))
                }
                _ => "⬇ queued".to_string(),
            });
        }
        self.downloaded
            .contains(video_id)
            .then(|| "✔ downloaded".to_string())
    }

    fn share(&mut self, url: String) {
        let copied = arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(url.clone()));
        match copied {
            Ok(()) => self.show_toast(ToastKind::Success, format!("Link copied: {url}")),
            Err(err) => {
                log::debug!("clipboard unavailable: {err}");
                self.status_message = format!("Share link: {url}");
            }
        }
    }

    fn request_delete(&mut self, video: &Video, parent: Option<&Video>) {
        let user = self.current_user();
        let check = match parent {
            Some(parent) => policy::can_delete_reply(user.as_ref(), video, parent),
            None => policy::can_delete_video(user.as_ref(), video),
        };
        if let Err(err) = check {
            self.deny(err);
            return;
        }
        let parent_id = parent
            .map(|parent| parent.id.clone())
            .or_else(|| video.reply_to.clone());
        let what = if parent_id.is_some() { "reply" } else { "video" };
        self.modal = Some(Modal {
            action: ConfirmAction::DeleteVideo {
                video_id: video.id.clone(),
                parent_id,
            },
            message: format!("Delete this {what}? This cannot be undone."),
        });
    }

    fn delete_video(&mut self, video_id: String, parent_id: Option<String>) {
        let before = self.active_ids();
        let mut snapshots = Vec::new();
        let removed = match parent_id.as_deref() {
            Some(parent) => mutation::apply_delete_reply(&mut self.nav, parent, &video_id),
            None => mutation::apply_delete_video(&mut self.nav, &video_id),
        };
        if let Some(snapshot) = removed {
            snapshots.push((Scope::Feed, snapshot));
        }
        for tab in ProfileTab::ALL {
            if let Some(list) = self.profile.list_mut(tab) {
                if let Some(snapshot) = mutation::apply_remove_from_list(list, &video_id) {
                    snapshots.push((Scope::Profile(tab), snapshot));
                }
            }
        }
        self.profile.clamp_selection();
        self.resync_if_moved(before);

        let request_id = self.next_request_id();
        let label = if parent_id.is_some() {
            "Reply deleted"
        } else {
            "Video deleted"
        };
        self.pending.insert(
            request_id,
            PendingMutation {
                label: label.to_string(),
                snapshots,
            },
        );
        let service = Arc::clone(&self.services.interaction);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.delete_video(&video_id);
            let _ = tx.send(AsyncResponse::Mutation { request_id, result });
        });
    }

    fn rollback(&mut self, pending: PendingMutation) {
        let before = self.active_ids();
        for (scope, snapshot) in pending.snapshots {
            match scope {
                Scope::Feed => snapshot.restore_feed(&mut self.nav),
                Scope::Profile(tab) => {
                    if let Some(list) = self.profile.list_mut(tab) {
                        snapshot.restore_list(list);
                    }
                }
                Scope::Users => {
                    snapshot.restore_users(&mut self.admin.users);
                    self.admin.refresh();
                }
            }
        }
        self.profile.clamp_selection();
        self.resync_if_moved(before);
    }
}

impl Model {
    fn open_auth(&mut self, mode: AuthMode) {
        self.screen = Screen::Auth;
        self.auth_form.mode = mode;
        self.auth_form.active = 0;
        self.auth_form.error = None;
        self.status_message = format!("{}.", mode.title());
    }

    fn leave_auth(&mut self) {
        self.auth_form.clear_secrets();
        self.auth_form.error = None;
        self.show_feed();
    }

    fn handle_auth_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Enter => self.submit_auth(),
            KeyCode::Char('s') => self.auth_form.switch_mode(),
            KeyCode::Tab | KeyCode::Down => self.auth_form.next(),
            KeyCode::BackTab | KeyCode::Up => self.auth_form.previous(),
            KeyCode::Esc => self.leave_auth(),
            _ => {}
        }
    }

    fn submit_auth(&mut self) {
        if self.auth_form.pending {
            return;
        }
        let mode = self.auth_form.mode;
        let username = self.auth_form.username.clone();
        let email = self.auth_form.email.clone();
        let password = self.auth_form.password.clone();
        let confirm = self.auth_form.confirm.clone();
        let check = match mode {
            AuthMode::Login => policy::validate_login(&email, &password),
            AuthMode::Register => {
                policy::validate_registration(&username, &email, &password, &confirm)
            }
        };
        if let Err(err) = check {
            self.auth_form.error = Some(capitalize(&err.to_string()));
            return;
        }

        self.auth_form.pending = true;
        self.auth_form.error = None;
        self.status_message = "Signing in…".to_string();

        let session = Arc::clone(&self.session);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = match mode {
                AuthMode::Login => session.login(&email, &password),
                AuthMode::Register => session.register(&username, &email, &password, &confirm),
            };
            let _ = tx.send(AsyncResponse::Auth { result });
        });
    }

    fn logout(&mut self) {
        if let Err(err) = self.session.logout() {
            self.show_toast(ToastKind::Error, format!("Sign out failed: {err:#}"));
            return;
        }
        self.admin = AdminView::default();
        self.profile.liked.clear();
        self.profile.edit = None;
        if self.upload.in_flight() {
            if let Some(cancel) = &self.upload.cancel {
                cancel.store(true, Ordering::SeqCst);
            }
        }
        self.show_feed();
        self.show_toast(ToastKind::Info, "Signed out.");
    }

    fn toggle_theme(&mut self) {
        match self.theme.toggle() {
            Ok(theme) => self.status_message = format!("Theme: {theme}"),
            Err(err) => self.show_toast(ToastKind::Error, format!("Could not save theme: {err:#}")),
        }
    }

    fn open_upload(&mut self, reply_to: Option<String>) {
        if self.upload.in_flight() {
            self.screen = Screen::Upload;
            self.status_message = "An upload is already running.".to_string();
            return;
        }
        let user = self.current_user();
        let check = match reply_to {
            Some(_) => policy::can_reply(user.as_ref()),
            None => policy::can_upload(user.as_ref()),
        };
        if let Err(err) = check {
            self.deny(err);
            return;
        }
        if reply_to.is_some() || self.upload.reply_to.is_some() {
            self.upload = UploadForm::for_parent(reply_to);
        }
        self.screen = Screen::Upload;
        self.status_message = match &self.upload.reply_to {
            Some(_) => "Record your reply and pick the file.".to_string(),
            None => "Pick a video file to share.".to_string(),
        };
    }

    fn leave_upload(&mut self) {
        if self.upload.in_flight() {
            self.cancel_upload();
        } else {
            self.show_feed();
        }
    }

    fn handle_upload_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Enter => self.submit_upload(),
            KeyCode::Char('c') => self.cancel_upload(),
            KeyCode::Tab | KeyCode::Down => self.upload.active = self.upload.active.next(),
            KeyCode::BackTab | KeyCode::Up => {
                self.upload.active = self.upload.active.previous();
            }
            KeyCode::Esc => self.leave_upload(),
            _ => {}
        }
    }

    fn submit_upload(&mut self) {
        if self.upload.in_flight() {
            self.status_message = "Upload already in progress.".to_string();
            return;
        }
        let file = match policy::validate_video_file(&expand_home(&self.upload.path)) {
            Ok(file) => file,
            Err(err) => {
                self.upload.error = Some(capitalize(&err.to_string()));
                return;
            }
        };
        let request = UploadRequest {
            path: file.path,
            description: self.upload.description.trim().to_string(),
            reply_to: self.upload.reply_to.clone(),
            mime: file.mime.to_string(),
        };

        let request_id = self.next_request_id();
        let cancel = Arc::new(AtomicBool::new(false));
        self.upload.request_id = Some(request_id);
        self.upload.cancel = Some(Arc::clone(&cancel));
        self.upload.progress = Some(0);
        self.upload.error = None;
        self.status_message = format!("Uploading {}…", format_bytes(file.size));

        let service = Arc::clone(&self.services.upload);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let progress_tx = tx.clone();
            let mut last = None;
            let on_progress: ProgressFn = Box::new(move |done, total| {
                let percent = api::percent(done, total);
                if last != Some(percent) {
                    last = Some(percent);
                    let _ = progress_tx.send(AsyncResponse::UploadProgress {
                        request_id,
                        percent,
                    });
                }
            });
            let result = service.upload(&request, cancel, on_progress);
            let _ = tx.send(AsyncResponse::Upload {
                request_id,
                reply_to: request.reply_to,
                result,
            });
        });
    }

    fn cancel_upload(&mut self) {
        match &self.upload.cancel {
            Some(cancel) => {
                cancel.store(true, Ordering::SeqCst);
                self.status_message = "Cancelling upload…".to_string();
            }
            None => self.status_message = "No upload to cancel.".to_string(),
        }
    }

    fn open_profile(&mut self, username: String) {
        if self.profile.username != username {
            self.profile = ProfileView::for_user(username);
        }
        self.screen = Screen::Profile;
        self.load_profile();
    }

    fn open_own_profile(&mut self) {
        match self.current_user() {
            Some(user) => self.open_profile(user.username),
            None => self.open_auth(AuthMode::Login),
        }
    }

    fn load_profile(&mut self) {
        let request_id = self.next_request_id();
        self.profile.request_id = Some(request_id);
        self.status_message = format!("Loading @{}…", self.profile.username);
        let service = Arc::clone(&self.services.profile);
        let tx = self.response_tx.clone();
        let username = self.profile.username.clone();
        thread::spawn(move || {
            let result = service.load_profile(&username);
            let _ = tx.send(AsyncResponse::Profile { request_id, result });
        });

        let me = self.current_user();
        if self.profile.is_own(me.as_ref()) {
            let request_id = self.next_request_id();
            self.profile.liked_request = Some(request_id);
            let service = Arc::clone(&self.services.profile);
            let tx = self.response_tx.clone();
            thread::spawn(move || {
                let result = service.liked_videos();
                let _ = tx.send(AsyncResponse::Liked { request_id, result });
            });

            if self.session_request.is_none() {
                let request_id = self.next_request_id();
                self.session_request = Some(request_id);
                let session = Arc::clone(&self.session);
                let tx = self.response_tx.clone();
                thread::spawn(move || {
                    let result = session.refetch();
                    let _ = tx.send(AsyncResponse::Session { request_id, result });
                });
            }
        }
    }

    fn handle_profile_key(&mut self, code: KeyCode) {
        let me = self.current_user();
        let own = self.profile.is_own(me.as_ref());
        match code {
            KeyCode::Right | KeyCode::Tab => {
                self.profile.tab = self.profile.tab.step(true, own);
                self.profile.selected = 0;
            }
            KeyCode::Left | KeyCode::BackTab => {
                self.profile.tab = self.profile.tab.step(false, own);
                self.profile.selected = 0;
            }
            KeyCode::Down | KeyCode::Char('j') => self.profile.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.profile.move_selection(-1),
            KeyCode::Enter => self.open_selected_in_feed(),
            KeyCode::Char('x') | KeyCode::Delete => {
                if self.profile.tab == ProfileTab::Liked {
                    self.status_message = "Liked videos cannot be deleted here.".to_string();
                    return;
                }
                if let Some(video) = self.profile.selected_item().cloned() {
                    let parent = video
                        .reply_to
                        .as_deref()
                        .and_then(|parent| self.nav.find(parent))
                        .cloned();
                    self.request_delete(&video, parent.as_ref());
                }
            }
            KeyCode::Char('e') if own => {
                let current = self.profile.username.clone();
                self.profile.edit = Some(ProfileEdit::Username(current));
                self.status_message = "New username, Enter to save.".to_string();
            }
            KeyCode::Char('i') if own => {
                self.profile.edit = Some(ProfileEdit::Image(String::new()));
                self.status_message = "Path to an image (max 5 MB), Enter to upload.".to_string();
            }
            KeyCode::Char('s') => {
                let url = assets::profile_share_url(&self.base_url, &self.profile.username);
                self.share(url);
            }
            KeyCode::Char('X') if own => {
                self.modal = Some(Modal {
                    action: ConfirmAction::Logout,
                    message: "Sign out of Otogram?".to_string(),
                });
            }
            KeyCode::Char('R') => self.load_profile(),
            KeyCode::Esc => self.show_feed(),
            _ => {}
        }
    }

    /// Jumps the feed to the selected profile item; replies open under their parent.
    fn open_selected_in_feed(&mut self) {
        let Some(video) = self.profile.selected_item().cloned() else {
            return;
        };
        let known = match video.reply_to.as_deref() {
            Some(parent) => self
                .nav
                .find(parent)
                .is_some_and(|parent| parent.replies.iter().any(|reply| reply.id == video.id)),
            None => self.nav.videos().iter().any(|item| item.id == video.id),
        };
        if !known {
            self.status_message = "That video is not in the current feed.".to_string();
            return;
        }
        let transition = match video.reply_to.as_deref() {
            Some(parent) => self.nav.jump_to_reply(parent, &video.id),
            None => self.nav.jump_to(&video.id),
        };
        self.screen = Screen::Feed;
        self.after_transition(transition);
        if video.reply_to.is_some() {
            self.activate_slot(Slot::Reply);
        }
        self.status_message = self.position_status();
    }

    fn submit_profile_edit(&mut self) {
        let Some(edit) = self.profile.edit.clone() else {
            return;
        };
        if self.profile.edit_request.is_some() {
            self.status_message = "Still saving the previous change.".to_string();
            return;
        }
        let service = Arc::clone(&self.services.profile);
        let tx = self.response_tx.clone();
        match edit {
            ProfileEdit::Username(name) => {
                let name = name.trim().to_string();
                if let Err(err) = policy::validate_username(&name) {
                    self.show_toast(ToastKind::Error, capitalize(&err.to_string()));
                    return;
                }
                if name == self.profile.username {
                    self.profile.edit = None;
                    return;
                }
                let request_id = self.next_request_id();
                self.profile.edit_request = Some(request_id);
                thread::spawn(move || {
                    let result = service.update_username(&name);
                    let _ = tx.send(AsyncResponse::Username { request_id, result });
                });
            }
            ProfileEdit::Image(path) => {
                let image = match policy::validate_profile_image(&expand_home(&path)) {
                    Ok(image) => image,
                    Err(err) => {
                        self.show_toast(ToastKind::Error, capitalize(&err.to_string()));
                        return;
                    }
                };
                let request_id = self.next_request_id();
                self.profile.edit_request = Some(request_id);
                thread::spawn(move || {
                    let result =
                        service.update_profile_image(&image.file_name, image.mime, image.bytes);
                    let _ = tx.send(AsyncResponse::ProfileImage { request_id, result });
                });
            }
        }
        self.profile.edit = None;
        self.status_message = "Saving…".to_string();
    }

    fn open_admin(&mut self) {
        let user = self.current_user();
        if let Err(err) = policy::can_administer(user.as_ref()) {
            self.deny(err);
            return;
        }
        self.screen = Screen::Admin;
        self.load_users();
    }

    fn load_users(&mut self) {
        let request_id = self.next_request_id();
        self.admin.request_id = Some(request_id);
        self.status_message = "Loading users…".to_string();
        let service = Arc::clone(&self.services.admin);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.list_users();
            let _ = tx.send(AsyncResponse::Users { request_id, result });
        });
    }

    fn handle_admin_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Down | KeyCode::Char('j') => self.admin.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.admin.move_selection(-1),
            KeyCode::Char('/') => {
                self.admin.searching = true;
                self.status_message = "Type to search, Enter when done.".to_string();
            }
            KeyCode::Char('f') => {
                self.admin.query.cycle_role();
                self.admin.refresh();
            }
            KeyCode::Char('o') => {
                self.admin.query.sort = self.admin.query.sort.next();
                self.admin.refresh();
            }
            KeyCode::Char('v') => {
                self.admin.query.descending = !self.admin.query.descending;
                self.admin.refresh();
            }
            KeyCode::Char(' ') => self.admin.toggle_mark(),
            KeyCode::Char('a') => self.admin.toggle_all(),
            KeyCode::Char('r') => {
                let me = self.current_user();
                let Some(user) = self.admin.selected_user().cloned() else {
                    return;
                };
                if me.is_some_and(|me| me.id == user.id) {
                    self.status_message = "You cannot change your own role.".to_string();
                    return;
                }
                let role = next_role(user.role);
                self.modal = Some(Modal {
                    action: ConfirmAction::ChangeRole {
                        user_id: user.id.clone(),
                        role,
                    },
                    message: format!(
                        "Change @{} from {} to {}?",
                        user.username,
                        user.role.display_name(),
                        role.display_name()
                    ),
                });
            }
            KeyCode::Char('x') | KeyCode::Delete => self.request_delete_users(),
            KeyCode::Enter => {
                if let Some(username) = self.admin.selected_user().map(|user| user.username.clone())
                {
                    self.open_profile(username);
                }
            }
            KeyCode::Char('R') => self.load_users(),
            KeyCode::Esc => {
                if !self.admin.query.search.is_empty() {
                    self.admin.query.search.clear();
                    self.admin.refresh();
                } else {
                    self.show_feed();
                }
            }
            _ => {}
        }
    }

    fn request_delete_users(&mut self) {
        let me = self.current_user();
        let mut ids: Vec<String> = if self.admin.marked.is_empty() {
            self.admin
                .selected_user()
                .map(|user| vec![user.id.clone()])
                .unwrap_or_default()
        } else {
            self.admin.marked.iter().cloned().collect()
        };
        if let Some(me) = me {
            if ids.iter().any(|id| *id == me.id) {
                ids.retain(|id| *id != me.id);
                self.status_message = "Your own account was left out.".to_string();
            }
        }
        if ids.is_empty() {
            return;
        }
        let message = match ids.as_slice() {
            [single] => {
                let name = self
                    .admin
                    .users
                    .iter()
                    .find(|user| &user.id == single)
                    .map(|user| user.username.clone())
                    .unwrap_or_else(|| single.clone());
                format!("Delete @{name}? Their account cannot be restored.")
            }
            many => format!("Delete {} users? This cannot be undone.", many.len()),
        };
        self.modal = Some(Modal {
            action: ConfirmAction::DeleteUsers { ids },
            message,
        });
    }

    fn change_role(&mut self, user_id: String, role: Role) {
        let Some(snapshot) = mutation::apply_role_change(&mut self.admin.users, &user_id, role)
        else {
            return;
        };
        self.admin.refresh();
        let request_id = self.next_request_id();
        self.pending.insert(
            request_id,
            PendingMutation {
                label: "Role updated".to_string(),
                snapshots: vec![(Scope::Users, snapshot)],
            },
        );
        let service = Arc::clone(&self.services.admin);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.update_role(&user_id, role);
            let _ = tx.send(AsyncResponse::Mutation { request_id, result });
        });
    }

    fn delete_users(&mut self, ids: Vec<String>) {
        let Some(snapshot) = mutation::apply_delete_users(&mut self.admin.users, &ids) else {
            return;
        };
        for id in &ids {
            self.admin.marked.remove(id);
        }
        self.admin.refresh();
        let request_id = self.next_request_id();
        self.pending.insert(
            request_id,
            PendingMutation {
                label: format!("Deleted {} user(s)", ids.len()),
                snapshots: vec![(Scope::Users, snapshot)],
            },
        );
        let service = Arc::clone(&self.services.admin);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let failed = ids
                .into_iter()
                .filter_map(|id| match service.delete_user(&id) {
                    Ok(()) => None,
                    Err(err) => Some((id, describe(&err))),
                })
                .collect();
            let _ = tx.send(AsyncResponse::UserDeletes { request_id, failed });
        });
    }
}

fn next_role(role: Role) -> Role {
    let index = Role::ALL.iter().position(|r| *r == role).unwrap_or(0);
    Role::ALL[(index + 1) % Role::ALL.len()]
}

impl Model {
    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        if self.poll_downloads() {
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Feed { request_id, result } => {
                if self.feed_request != Some(request_id) {
                    return;
                }
                self.feed_request = None;
                match result {
                    Ok(videos) => {
                        let count = videos.len();
                        let before = self.active_ids();
                        self.nav.replace_videos(videos);
                        self.resync_if_moved(before);
                        self.status_message = if count == 0 {
                            "No videos yet. Be the first to upload (3).".to_string()
                        } else {
                            self.position_status()
                        };
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load feed: {}", describe(&err));
                        self.show_toast(ToastKind::Error, "Could not load the feed.");
                    }
                }
            }
            AsyncResponse::Like {
                request_id,
                video_id,
                user_id,
                result,
            } => {
                let Some(pending) = self.pending.remove(&request_id) else {
                    return;
                };
                match result {
                    Ok(liked) => mutation::reconcile_like(&mut self.nav, &video_id, &user_id, liked),
                    Err(err) => {
                        self.rollback(pending);
                        self.show_toast(ToastKind::Error, format!("Like failed: {}", describe(&err)));
                    }
                }
            }
            AsyncResponse::Mutation { request_id, result } => {
                let Some(pending) = self.pending.remove(&request_id) else {
                    return;
                };
                match result {
                    Ok(()) => {
                        let label = pending.label;
                        self.show_toast(ToastKind::Success, format!("{label}."));
                    }
                    Err(err) => {
                        let label = pending.label.clone();
                        self.rollback(pending);
                        self.show_toast(
                            ToastKind::Error,
                            format!("{label} failed: {}", describe(&err)),
                        );
                    }
                }
            }
            AsyncResponse::UserDeletes { request_id, failed } => {
                let Some(pending) = self.pending.remove(&request_id) else {
                    return;
                };
                if failed.is_empty() {
                    self.show_toast(ToastKind::Success, format!("{}.", pending.label));
                    return;
                }
                let failed_ids: HashSet<&str> = failed.iter().map(|(id, _)| id.as_str()).collect();
                for (scope, snapshot) in pending.snapshots {
                    let snapshot = match snapshot {
                        Pending::RemovedUsers { removed } => Pending::RemovedUsers {
                            removed: removed
                                .into_iter()
                                .filter(|(_, user)| failed_ids.contains(user.id.as_str()))
                                .collect(),
                        },
                        other => other,
                    };
                    if scope == Scope::Users {
                        snapshot.restore_users(&mut self.admin.users);
                    }
                }
                self.admin.refresh();
                let (_, reason) = &failed[0];
                self.show_toast(
                    ToastKind::Error,
                    format!("{} user(s) could not be deleted: {reason}", failed.len()),
                );
            }
            AsyncResponse::Auth { result } => {
                self.auth_form.pending = false;
                match result {
                    Ok(user) => {
                        self.auth_form.clear_secrets();
                        self.auth_form.error = None;
                        self.show_feed();
                        self.show_toast(ToastKind::Success, format!("Welcome, {}!", user.username));
                    }
                    Err(err) => {
                        self.auth_form.error = Some(describe(&err));
                        self.status_message = "Sign in failed.".to_string();
                    }
                }
            }
            AsyncResponse::Profile { request_id, result } => {
                if self.profile.request_id != Some(request_id) {
                    return;
                }
                self.profile.request_id = None;
                match result {
                    Ok(profile) => {
                        self.status_message = format!(
                            "@{} · {} videos · {} replies",
                            profile.user.username,
                            profile.stats.videos_count,
                            profile.stats.replies_count
                        );
                        self.profile.username = profile.user.username.clone();
                        self.profile.profile = Some(profile);
                        self.profile.clamp_selection();
                    }
                    Err(err) => {
                        self.status_message =
                            format!("Failed to load profile: {}", describe(&err));
                    }
                }
            }
            AsyncResponse::Liked { request_id, result } => {
                if self.profile.liked_request != Some(request_id) {
                    return;
                }
                self.profile.liked_request = None;
                match result {
                    Ok(videos) => {
                        self.profile.liked = videos;
                        self.profile.clamp_selection();
                    }
                    Err(err) => log::warn!("liked videos: {err:#}"),
                }
            }
            AsyncResponse::UploadProgress {
                request_id,
                percent,
            } => {
                if self.upload.request_id == Some(request_id) {
                    self.upload.progress = Some(percent);
                }
            }
            AsyncResponse::Upload {
                request_id,
                reply_to,
                result,
            } => {
                if self.upload.request_id != Some(request_id) {
                    return;
                }
                self.upload.finish();
                match result {
                    Ok(video) => self.adopt_upload(video, reply_to),
                    Err(err) if was_cancelled(&err) => {
                        self.upload.error = Some("Upload cancelled.".to_string());
                        self.status_message = "Upload cancelled.".to_string();
                    }
                    Err(err) => {
                        let message = describe(&err);
                        self.upload.error = Some(message.clone());
                        self.show_toast(ToastKind::Error, format!("Upload failed: {message}"));
                    }
                }
            }
            AsyncResponse::Username { request_id, result } => {
                if self.profile.edit_request != Some(request_id) {
                    return;
                }
                self.profile.edit_request = None;
                match result {
                    Ok(username) => {
                        let updated = self
                            .session
                            .update_user(|user| user.username = username.clone());
                        if let Some(profile) = self.profile.profile.as_mut() {
                            profile.user.username = username.clone();
                        }
                        if let Some(user) = updated {
                            self.rename_in_feed(&user);
                        }
                        self.profile.username = username.clone();
                        self.show_toast(ToastKind::Success, format!("You are now @{username}."));
                    }
                    Err(err) => self.show_toast(
                        ToastKind::Error,
                        format!("Username not changed: {}", describe(&err)),
                    ),
                }
            }
            AsyncResponse::ProfileImage { request_id, result } => {
                if self.profile.edit_request != Some(request_id) {
                    return;
                }
                self.profile.edit_request = None;
                match result {
                    Ok(url) => {
                        self.session
                            .update_user(|user| user.profile_image = url.clone());
                        if let Some(profile) = self.profile.profile.as_mut() {
                            profile.user.profile_image = url;
                        }
                        self.show_toast(ToastKind::Success, "Profile picture updated.");
                    }
                    Err(err) => self.show_toast(
                        ToastKind::Error,
                        format!("Profile picture not changed: {}", describe(&err)),
                    ),
                }
            }
            AsyncResponse::Session { request_id, result } => {
                if self.session_request != Some(request_id) {
                    return;
                }
                self.session_request = None;
                match result {
                    Ok(Some(user)) => self.rename_in_feed(&user),
                    Ok(None) => {
                        self.show_toast(ToastKind::Error, "Your session expired. Sign in again.")
                    }
                    Err(err) => log::warn!("refreshing the signed-in user: {err:#}"),
                }
            }
            AsyncResponse::Users { request_id, result } => {
                if self.admin.request_id != Some(request_id) {
                    return;
                }
                self.admin.request_id = None;
                match result {
                    Ok(users) => {
                        self.status_message = format!("{} users.", users.len());
                        self.admin.users = users;
                        self.admin.refresh();
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load users: {}", describe(&err));
                    }
                }
            }
        }
    }

    fn adopt_upload(&mut self, mut video: Video, reply_to: Option<String>) {
        let before = self.active_ids();
        let id = video.id.clone();
        let transition = match reply_to {
            Some(parent) => {
                video.reply_to.get_or_insert_with(|| parent.clone());
                let index = self
                    .nav
                    .find(&parent)
                    .map(|parent| parent.replies.len())
                    .unwrap_or(0);
                self.nav.insert_reply(&parent, index, video);
                self.nav.jump_to_reply(&parent, &id)
            }
            None => {
                self.nav.insert_video(0, video);
                self.nav.jump_to(&id)
            }
        };
        if transition == Transition::None {
            self.resync_if_moved(before);
        }
        self.upload = UploadForm::default();
        self.screen = Screen::Feed;
        self.after_transition(transition);
        self.show_toast(ToastKind::Success, "Video published.");
    }

    /// Keeps author names on loaded videos in step with a username change.
    fn rename_in_feed(&mut self, user: &User) {
        let ids: Vec<String> = self
            .nav
            .videos()
            .iter()
            .flat_map(|video| std::iter::once(video).chain(video.replies.iter()))
            .filter(|video| video.user.id == user.id)
            .map(|video| video.id.clone())
            .collect();
        for id in ids {
            if let Some(video) = self.nav.find_mut(&id) {
                video.user = user.as_ref();
            }
        }
    }
}

impl Model {
    fn draw(&mut self, frame: &mut Frame<'_>) {
        let palette = self.theme.palette();
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(palette.bg)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        frame.render_widget(self.header_line(&palette), layout[0]);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(palette.text_primary)
                .bg(palette.panel_focused_bg)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[1]);

        match self.screen {
            Screen::Feed => self.draw_feed(frame, layout[2], &palette),
            Screen::Profile => self.draw_profile(frame, layout[2], &palette),
            Screen::Upload => self.draw_upload(frame, layout[2], &palette),
            Screen::Admin => self.draw_admin(frame, layout[2], &palette),
            Screen::Auth => self.draw_auth(frame, layout[2], &palette),
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(palette.text_secondary)
                    .bg(palette.panel_bg)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[3]);

        if let Some(toast) = &self.toast {
            draw_toast(frame, layout[2], toast, &palette);
        }
        if let Some(modal) = &self.modal {
            draw_modal(frame, layout[2], modal, &palette);
        }
    }

    fn header_line(&self, palette: &Palette) -> Paragraph<'static> {
        let mut spans = vec![Span::styled(
            " Otogram ",
            Style::default()
                .fg(palette.bg)
                .bg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )];
        for screen in Screen::TABS {
            let style = if screen == self.screen {
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
            } else {
                Style::default().fg(palette.text_secondary)
            };
            spans.push(Span::raw("  "));
            spans.push(Span::styled(screen.title(), style));
        }
        let who = match self.current_user() {
            Some(user) => format!("   @{} ({})", user.username, user.role.display_name()),
            None => "   guest".to_string(),
        };
        spans.push(Span::styled(who, Style::default().fg(palette.text_primary)));
        if self.playback.muted() {
            spans.push(Span::styled("  🔇", Style::default().fg(palette.text_secondary)));
        }
        Paragraph::new(Line::from(spans)).style(Style::default().bg(palette.panel_bg))
    }

    fn panel_block(&self, title: String, focused: bool, palette: &Palette) -> Block<'static> {
        let border_style = if focused {
            Style::default().fg(palette.border_focused)
        } else {
            Style::default().fg(palette.border_idle)
        };
        let title_style = if focused {
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(palette.text_secondary)
        };
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(border_style)
            .style(Style::default().bg(palette.panel_bg))
            .padding(Padding::uniform(1))
    }

    fn draw_feed(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        if self.nav.is_empty() {
            self.main_area.set(Rect::default());
            self.reply_area.set(Rect::default());
            let message = if self.feed_request.is_some() {
                "Loading feed…"
            } else {
                "No videos yet. Press R to refresh or 3 to upload."
            };
            let empty = Paragraph::new(message)
                .alignment(Alignment::Center)
                .style(Style::default().fg(palette.text_secondary))
                .block(self.panel_block("Feed".to_string(), false, palette));
            frame.render_widget(empty, area);
            return;
        }

        let focus = self.nav.focus();
        let constraints = match focus.expanded() {
            Some(Slot::Main) => [Constraint::Percentage(100), Constraint::Percentage(0)],
            Some(Slot::Reply) => [Constraint::Percentage(0), Constraint::Percentage(100)],
            None => [Constraint::Percentage(60), Constraint::Percentage(40)],
        };
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(constraints)
            .split(area);
        self.main_area.set(chunks[0]);
        self.reply_area.set(chunks[1]);

        if chunks[0].width > 0 {
            let title = format!(
                "Video {}/{}",
                self.nav.active_video_index().map_or(0, |index| index + 1),
                self.nav.len()
            );
            self.draw_video_panel(frame, chunks[0], Slot::Main, self.nav.active_video(), title, palette);
        }
        if chunks[1].width > 0 {
            match self.nav.reply_view() {
                ReplyView::Empty => {
                    let block = self.panel_block(
                        "Replies".to_string(),
                        focus.active() == Some(Slot::Reply),
                        palette,
                    );
                    let empty = Paragraph::new("No replies yet.\nPress r to reply with a video.")
                        .alignment(Alignment::Center)
                        .style(Style::default().fg(palette.text_secondary))
                        .block(block);
                    frame.render_widget(empty, chunks[1]);
                }
                ReplyView::Active {
                    index,
                    total,
                    has_prev,
                    has_next,
                } => {
                    let prev = if has_prev { "◀ " } else { "  " };
                    let next = if has_next { " ▶" } else { "  " };
                    let title = format!("{prev}Reply {}/{total}{next}", index + 1);
                    self.draw_video_panel(
                        frame,
                        chunks[1],
                        Slot::Reply,
                        self.nav.active_reply(),
                        title,
                        palette,
                    );
                }
            }
        }
    }

    fn draw_video_panel(
        &self,
        frame: &mut Frame<'_>,
        area: Rect,
        slot: Slot,
        video: Option<&Video>,
        title: String,
        palette: &Palette,
    ) {
        let focused = self.nav.focus().active() == Some(slot);
        let block = self.panel_block(title, focused, palette);
        let inner_width = block.inner(area).width.max(1) as usize;
        let Some(video) = video else {
            frame.render_widget(block, area);
            return;
        };

        let me = self.current_user();
        let mut lines: Vec<Line<'static>> = Vec::new();
        let author = if video.user.username.is_empty() {
            "unknown".to_string()
        } else {
            video.user.username.clone()
        };
        lines.push(Line::from(vec![
            Span::styled(
                format!("@{author}"),
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {}", format_date(video.created_at)),
                Style::default().fg(palette.text_secondary),
            ),
        ]));
        lines.push(Line::from(""));

        let description = if video.description.trim().is_empty() {
            "(no description)".to_string()
        } else {
            video.description.trim().to_string()
        };
        let wrapped = wrap(&description, WrapOptions::new(inner_width));
        for (index, line) in wrapped.iter().enumerate() {
            if index == DESCRIPTION_LINES {
                lines.push(Line::from(Span::styled(
                    "…",
                    Style::default().fg(palette.text_secondary),
                )));
                break;
            }
            lines.push(Line::from(Span::styled(
                line.to_string(),
                Style::default().fg(palette.text_primary),
            )));
        }
        lines.push(Line::from(""));

        let liked = me.as_ref().is_some_and(|me| video.is_liked_by(&me.id));
        let heart = if liked { "♥" } else { "♡" };
        let like_style = if liked {
            Style::default().fg(palette.like).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(palette.text_secondary)
        };
        let mut counters = vec![
            Span::styled(format!("{heart} {}", video.likes.len()), like_style),
            Span::styled(
                format!("   {} views", video.views),
                Style::default().fg(palette.text_secondary),
            ),
        ];
        if slot == Slot::Main {
            counters.push(Span::styled(
                format!("   {} replies", video.replies.len()),
                Style::default().fg(palette.text_secondary),
            ));
        }
        lines.push(Line::from(counters));

        let state = if self.playback.loaded(slot).is_none() {
            "○ not loaded".to_string()
        } else if self.playback.is_playing(slot) {
            "▶ playing".to_string()
        } else {
            "⏸ paused".to_string()
        };
        let mut player = vec![Span::styled(state, Style::default().fg(palette.success))];
        let speed = self.playback.speed(slot);
        if (speed - 1.0).abs() > f64::EPSILON {
            player.push(Span::raw(format!("  {speed:.2}x")));
        }
        if self.playback.is_pip(slot) {
            player.push(Span::raw("  PiP"));
        }
        if self.nav.focus().expanded() == Some(slot) {
            player.push(Span::raw("  fullscreen"));
        }
        if let Some(label) = self.download_label(&video.id) {
            player.push(Span::styled(
                format!("  {label}"),
                Style::default().fg(palette.accent),
            ));
        }
        lines.push(Line::from(player));

        let body = Paragraph::new(Text::from(lines))
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(body, area);
    }

    fn draw_profile(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(7),
                Constraint::Length(1),
                Constraint::Min(0),
            ])
            .split(area);

        let me = self.current_user();
        let own = self.profile.is_own(me.as_ref());
        let mut header: Vec<Line<'static>> = Vec::new();
        match &self.profile.profile {
            Some(profile) => {
                header.push(Line::from(vec![
                    Span::styled(
                        format!("@{}", profile.user.username),
                        Style::default()
                            .fg(palette.accent)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        format!("  {}", profile.user.role.display_name()),
                        Style::default().fg(palette.text_secondary),
                    ),
                ]));
                header.push(Line::from(format!(
                    "{} videos · {} replies · {} likes received · joined {}",
                    profile.stats.videos_count,
                    profile.stats.replies_count,
                    profile.stats.total_likes,
                    format_date(profile.user.created_at)
                )));
                let avatar = assets::resolve_or(&self.base_url, &profile.user.profile_image, "no picture");
                header.push(Line::from(Span::styled(
                    truncate(&avatar, chunks[0].width.saturating_sub(4) as usize),
                    Style::default().fg(palette.text_secondary),
                )));
            }
            None => header.push(Line::from(format!("@{}", self.profile.username))),
        }
        if let Some(edit) = &self.profile.edit {
            let (label, value) = match edit {
                ProfileEdit::Username(value) => ("New username", value),
                ProfileEdit::Image(value) => ("Image path", value),
            };
            header.push(Line::from(vec![
                Span::styled(format!("{label}: "), Style::default().fg(palette.accent)),
                Span::styled(format!("{value}▏"), Style::default().fg(palette.text_primary)),
            ]));
        }
        let header_block = self.panel_block(
            if own { "My profile" } else { "Profile" }.to_string(),
            true,
            palette,
        );
        frame.render_widget(
            Paragraph::new(Text::from(header)).block(header_block),
            chunks[0],
        );

        let tab_count = if own { 3 } else { 2 };
        let titles: Vec<Line<'static>> = ProfileTab::ALL[..tab_count]
            .iter()
            .map(|tab| {
                let count = match (tab, &self.profile.profile) {
                    (ProfileTab::Posts, Some(profile)) => profile.videos.len(),
                    (ProfileTab::Replies, Some(profile)) => profile.replies.len(),
                    (ProfileTab::Liked, _) => self.profile.liked.len(),
                    _ => 0,
                };
                Line::from(format!("{} ({count})", tab.title()))
            })
            .collect();
        let tabs = Tabs::new(titles)
            .select(self.profile.tab.index())
            .style(Style::default().fg(palette.text_secondary).bg(palette.panel_bg))
            .highlight_style(
                Style::default()
                    .fg(palette.accent)
                    .add_modifier(Modifier::BOLD),
            );
        frame.render_widget(tabs, chunks[1]);

        let width = chunks[2].width.saturating_sub(4) as usize;
        let items: Vec<ListItem> = self
            .profile
            .items()
            .iter()
            .map(|video| {
                let description = if video.description.trim().is_empty() {
                    "(no description)"
                } else {
                    video.description.trim()
                };
                let text = format!(
                    "{}  ♥ {}  {}",
                    format_date(video.created_at),
                    video.likes.len(),
                    description
                );
                ListItem::new(truncate(&text, width))
            })
            .collect();
        let empty = items.is_empty();
        let list = List::new(items)
            .block(self.panel_block(self.profile.tab.title().to_string(), false, palette))
            .style(Style::default().fg(palette.text_primary))
            .highlight_style(
                Style::default()
                    .bg(palette.panel_selected_bg)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("› ");
        let mut state = ListState::default();
        if !empty {
            state.select(Some(self.profile.selected));
        }
        frame.render_stateful_widget(list, chunks[2], &mut state);
    }

    fn draw_upload(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let popup = centered_rect(70, 80, area);
        let title = if self.upload.reply_to.is_some() {
            "Reply with a video"
        } else {
            "Upload a video"
        };
        let block = self.panel_block(title.to_string(), true, palette);
        let inner = block.inner(popup);
        frame.render_widget(Clear, popup);
        frame.render_widget(block, popup);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(2),
                Constraint::Length(2),
                Constraint::Min(0),
            ])
            .split(inner);

        let context = match self
            .upload
            .reply_to
            .as_deref()
            .and_then(|parent| self.nav.find(parent))
        {
            Some(parent) => format!(
                "Replying to @{}: {}",
                parent.user.username,
                truncate(parent.description.trim(), 40)
            ),
            None => format!(
                "MP4, MOV, AVI or WebM up to {} MB.",
                policy::MAX_VIDEO_BYTES / (1024 * 1024)
            ),
        };
        frame.render_widget(
            Paragraph::new(context).style(Style::default().fg(palette.text_secondary)),
            chunks[0],
        );

        let fields = [
            (UploadField::Path, "File", &self.upload.path, chunks[1]),
            (
                UploadField::Description,
                "Description",
                &self.upload.description,
                chunks[2],
            ),
        ];
        for (field, label, value, chunk) in fields {
            let active = self.upload.active == field;
            let shown = if active {
                format!("{value}▏")
            } else {
                value.clone()
            };
            let input = Paragraph::new(shown)
                .style(Style::default().fg(palette.text_primary))
                .block(field_block(label, active, palette));
            frame.render_widget(input, chunk);
        }

        let submit_style = if self.upload.active == UploadField::Submit {
            Style::default()
                .fg(palette.bg)
                .bg(palette.accent)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(palette.accent)
        };
        let submit_label = if self.upload.in_flight() {
            "[ Uploading… c to cancel ]"
        } else {
            "[ Publish ]"
        };
        frame.render_widget(
            Paragraph::new(Span::styled(submit_label, submit_style)).alignment(Alignment::Center),
            chunks[3],
        );

        if let Some(percent) = self.upload.progress {
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(palette.accent).bg(palette.panel_focused_bg))
                .percent(u16::from(percent.min(100)));
            frame.render_widget(gauge, chunks[4]);
        }
        if let Some(error) = &self.upload.error {
            frame.render_widget(
                Paragraph::new(error.clone())
                    .style(Style::default().fg(palette.error))
                    .wrap(Wrap { trim: true }),
                chunks[5],
            );
        }
    }

    fn draw_admin(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(0),
            ])
            .split(area);

        let stats = admin::role_stats(&self.admin.users, Utc::now());
        let stats_line = Line::from(vec![
            Span::styled(
                format!("Total {} (+{} this week)", stats.total, stats.new_this_week),
                Style::default()
                    .fg(palette.text_primary)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    "   Admins {} ({}%)   Creators {} ({}%)   Users {} ({}%)",
                    stats.admins,
                    stats.share(stats.admins),
                    stats.creators,
                    stats.share(stats.creators),
                    stats.users,
                    stats.share(stats.users)
                ),
                Style::default().fg(palette.text_secondary),
            ),
        ]);
        frame.render_widget(
            Paragraph::new(stats_line).block(field_block("Users", false, palette)),
            chunks[0],
        );

        let search = if self.admin.searching {
            format!("{}▏", self.admin.query.search)
        } else if self.admin.query.search.is_empty() {
            "/ to search by name or email".to_string()
        } else {
            self.admin.query.search.clone()
        };
        let search_line = Line::from(vec![
            Span::styled(search, Style::default().fg(palette.text_primary)),
            Span::styled(
                format!(
                    "   {} · {} shown · {} selected",
                    self.admin.query.describe(),
                    self.admin.visible.len(),
                    self.admin.marked.len()
                ),
                Style::default().fg(palette.text_secondary),
            ),
        ]);
        frame.render_widget(
            Paragraph::new(search_line).block(field_block("Search", self.admin.searching, palette)),
            chunks[1],
        );

        let width = chunks[2].width.saturating_sub(4) as usize;
        let items: Vec<ListItem> = self
            .admin
            .visible
            .iter()
            .filter_map(|&index| self.admin.users.get(index))
            .map(|user| {
                let mark = if self.admin.marked.contains(&user.id) {
                    "[x]"
                } else {
                    "[ ]"
                };
                let role_style = match user.role {
                    Role::Admin => Style::default().fg(palette.error),
                    Role::Creator => Style::default().fg(palette.success),
                    Role::User => Style::default().fg(palette.text_secondary),
                };
                let text = truncate(
                    &format!(
                        "{mark} {:<20} {:<28} {}",
                        user.username,
                        user.email,
                        format_date(user.created_at)
                    ),
                    width.saturating_sub(10),
                );
                ListItem::new(Line::from(vec![
                    Span::raw(text),
                    Span::styled(format!("  {}", user.role.as_str()), role_style),
                ]))
            })
            .collect();
        let empty = items.is_empty();
        let list = List::new(items)
            .block(self.panel_block("Accounts".to_string(), !self.admin.searching, palette))
            .style(Style::default().fg(palette.text_primary))
            .highlight_style(
                Style::default()
                    .bg(palette.panel_selected_bg)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("› ");
        let mut state = ListState::default();
        if !empty {
            state.select(Some(self.admin.selected));
        }
        frame.render_stateful_widget(list, chunks[2], &mut state);
    }

    fn draw_auth(&self, frame: &mut Frame<'_>, area: Rect, palette: &Palette) {
        let popup = centered_rect(60, 80, area);
        let block = self.panel_block(self.auth_form.mode.title().to_string(), true, palette);
        let inner = block.inner(popup);
        frame.render_widget(Clear, popup);
        frame.render_widget(block, popup);

        let fields = self.auth_form.mode.fields();
        let mut constraints: Vec<Constraint> = fields
            .iter()
            .map(|field| match field {
                AuthField::Submit => Constraint::Length(2),
                _ => Constraint::Length(3),
            })
            .collect();
        constraints.push(Constraint::Min(0));
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(inner);

        let active = self.auth_form.field();
        for (field, chunk) in fields.iter().zip(chunks.iter()) {
            if *field == AuthField::Submit {
                let style = if active == AuthField::Submit {
                    Style::default()
                        .fg(palette.bg)
                        .bg(palette.accent)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(palette.accent)
                };
                let label = if self.auth_form.pending {
                    format!("[ {}… ]", self.auth_form.mode.title())
                } else {
                    format!("[ {} ]", self.auth_form.mode.title())
                };
                frame.render_widget(
                    Paragraph::new(Span::styled(label, style)).alignment(Alignment::Center),
                    *chunk,
                );
                continue;
            }
            let value = self.auth_form.value(*field);
            let mut shown = if field.is_secret() {
                "•".repeat(value.chars().count())
            } else {
                value.to_string()
            };
            if *field == active {
                shown.push('▏');
            }
            let input = Paragraph::new(shown)
                .style(Style::default().fg(palette.text_primary))
                .block(field_block(field.label(), *field == active, palette));
            frame.render_widget(input, *chunk);
        }

        let mut notes = Vec::new();
        if let Some(error) = &self.auth_form.error {
            notes.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(palette.error),
            )));
        }
        let switch = match self.auth_form.mode {
            AuthMode::Login => "No account yet? Move to the button and press s to register.",
            AuthMode::Register => "Already registered? Move to the button and press s to sign in.",
        };
        notes.push(Line::from(Span::styled(
            switch,
            Style::default().fg(palette.text_secondary),
        )));
        if let Some(area) = chunks.last() {
            frame.render_widget(
                Paragraph::new(Text::from(notes)).wrap(Wrap { trim: true }),
                *area,
            );
        }
    }

    fn footer_text(&self) -> String {
        if self.modal.is_some() {
            return "y/Enter confirm · n/Esc cancel".to_string();
        }
        let mut parts: Vec<&str> = Vec::new();
        match self.screen {
            Screen::Feed => {
                if self.nav.focus().is_expanded() {
                    parts.push("Esc/scroll collapse");
                } else {
                    parts.push("↑/↓ or scroll videos");
                    parts.push("←/→ replies");
                }
                parts.push("Enter/Tab play");
                parts.push("Space pause");
                parts.push("f expand");
                parts.push("m mute");
                parts.push("[ ] speed");
                parts.push(", . seek");
                parts.push("p PiP");
                parts.push("l like");
                parts.push("r reply");
                parts.push("d download");
                parts.push("s share");
                parts.push("x delete");
                parts.push("o author");
                parts.push("R refresh");
            }
            Screen::Profile => {
                if self.profile.edit.is_some() {
                    return "Type, Enter save · Esc cancel".to_string();
                }
                parts.push("←/→ tabs");
                parts.push("j/k move");
                parts.push("Enter open in feed");
                parts.push("x delete");
                parts.push("s share");
                let me = self.current_user();
                if self.profile.is_own(me.as_ref()) {
                    parts.push("e username");
                    parts.push("i picture");
                    parts.push("X sign out");
                }
                parts.push("Esc back");
            }
            Screen::Upload => {
                parts.push("Tab next field");
                parts.push("Enter on Publish uploads");
                if self.upload.in_flight() {
                    parts.push("c/Esc cancel upload");
                } else {
                    parts.push("Esc back");
                }
            }
            Screen::Admin => {
                if self.admin.searching {
                    return "Type to filter · Enter/Esc done".to_string();
                }
                parts.push("/ search");
                parts.push("f role filter");
                parts.push("o sort");
                parts.push("v order");
                parts.push("Space select");
                parts.push("a select all");
                parts.push("r change role");
                parts.push("x delete");
                parts.push("Enter profile");
            }
            Screen::Auth => {
                parts.push("Tab next field");
                parts.push("Enter submit");
                parts.push("Esc back");
            }
        }
        if !self.is_typing() {
            parts.push("t theme");
            parts.push("q quit");
        }
        parts.join(" · ")
    }
}

fn field_block(label: &str, active: bool, palette: &Palette) -> Block<'static> {
    let color = if active {
        palette.border_focused
    } else {
        palette.border_idle
    };
    Block::default()
        .title(Span::styled(
            label.to_string(),
            Style::default().fg(if active {
                palette.accent
            } else {
                palette.text_secondary
            }),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

fn draw_toast(frame: &mut Frame<'_>, area: Rect, toast: &Toast, palette: &Palette) {
    let width = (UnicodeWidthStr::width(toast.message.as_str()) as u16 + 4)
        .min(area.width.saturating_sub(2))
        .max(10);
    if area.height < 4 || area.width < width + 2 {
        return;
    }
    let rect = Rect {
        x: area.x + area.width - width - 1,
        y: area.y + area.height - 3,
        width,
        height: 3,
    };
    let color = match toast.kind {
        ToastKind::Info => palette.accent,
        ToastKind::Success => palette.success,
        ToastKind::Error => palette.error,
    };
    frame.render_widget(Clear, rect);
    frame.render_widget(
        Paragraph::new(toast.message.clone())
            .style(Style::default().fg(palette.text_primary))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color))
                    .style(Style::default().bg(palette.panel_focused_bg)),
            ),
        rect,
    );
}

fn draw_modal(frame: &mut Frame<'_>, area: Rect, modal: &Modal, palette: &Palette) {
    let popup = centered_rect(50, 30, area);
    frame.render_widget(Clear, popup);
    let body = Text::from(vec![
        Line::from(modal.message.clone()),
        Line::from(""),
        Line::from(Span::styled(
            "y confirm · n cancel",
            Style::default().fg(palette.text_secondary),
        )),
    ]);
    let dialog = Paragraph::new(body)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(palette.text_primary))
        .block(
            Block::default()
                .title(Span::styled(
                    "Confirm",
                    Style::default()
                        .fg(palette.error)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.error))
                .style(Style::default().bg(palette.panel_bg))
                .padding(Padding::uniform(1)),
        );
    frame.render_widget(dialog, popup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockBackend;
    use crate::theme::Theme;
    use crossterm::event::KeyModifiers;
    use ratatui::backend::TestBackend;

    fn model_with(backend: Arc<MockBackend>) -> Model {
        let store = Arc::new(storage::Store::open_in_memory().unwrap());
        let services = Services::mock(Arc::clone(&backend));
        let session = Arc::new(session::Context::new(
            Arc::clone(&store),
            Arc::clone(&services.auth),
        ));
        let theme = Arc::new(ThemeStore::load(Arc::clone(&store), Theme::Dark).unwrap());
        let (playback, _, _) = crate::playback::tests::recording_coordinator();
        let mut model = Model::new(Options {
            services,
            session,
            theme,
            store,
            downloads: None,
            playback,
            base_url: "http://otogram.test".to_string(),
            status_message: String::new(),
            load_feed_on_start: true,
        });
        settle(&mut model);
        model
    }

    fn settle(model: &mut Model) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            model.poll_async();
            if !model.is_loading() || Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn press(model: &mut Model, code: KeyCode) {
        model.handle_key(code).unwrap();
    }

    fn type_text(model: &mut Model, text: &str) {
        for ch in text.chars() {
            press(model, KeyCode::Char(ch));
        }
    }

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    fn render(model: &mut Model) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 36)).unwrap();
        terminal.draw(|frame| model.draw(frame)).unwrap();
        let buffer = terminal.backend().buffer();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn feed_loads_and_scroll_moves_one_video_per_notch() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        assert_eq!(model.nav.len(), 2);
        assert_eq!(model.nav.active_video_index(), Some(0));
        assert_eq!(model.status_message, "Video 1/2 · reply 1/1");

        model.handle_mouse(mouse(MouseEventKind::ScrollDown, 10, 10));
        assert_eq!(model.nav.active_video_index(), Some(1));
        // A second notch inside the cooldown is swallowed.
        model.handle_mouse(mouse(MouseEventKind::ScrollDown, 10, 10));
        assert_eq!(model.nav.active_video_index(), Some(1));

        press(&mut model, KeyCode::Up);
        assert_eq!(model.nav.active_video_index(), Some(0));
        press(&mut model, KeyCode::Up);
        assert_eq!(model.nav.active_video_index(), Some(0));
    }

    #[test]
    fn clicking_a_panel_activates_its_player() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        let screen = render(&mut model);
        assert!(screen.contains("@nour"));
        assert!(screen.contains("Welcome to Otogram"));

        let reply = model.reply_area.get();
        let point = (reply.x + 2, reply.y + 2);
        model.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), point.0, point.1));
        model.handle_mouse(mouse(MouseEventKind::Up(MouseButton::Left), point.0, point.1));
        assert_eq!(model.nav.focus().active(), Some(Slot::Reply));
        assert_eq!(model.target_video().map(|v| v.id.as_str()), Some("welcome-reply"));
    }

    #[test]
    fn liking_while_signed_out_opens_sign_in() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        press(&mut model, KeyCode::Char('l'));
        assert_eq!(model.screen, Screen::Auth);
        assert!(model.pending.is_empty());
        assert!(model
            .toast
            .as_ref()
            .is_some_and(|toast| toast.kind == ToastKind::Error));
    }

    #[test]
    fn like_shows_immediately_and_reaches_the_server() {
        let backend = Arc::new(MockBackend::default());
        let mut model = model_with(Arc::clone(&backend));
        model.session.login("nour@otogram.test", "password").unwrap();

        press(&mut model, KeyCode::Char('l'));
        assert!(model.nav.find("welcome").unwrap().is_liked_by("u1"));
        settle(&mut model);
        assert!(model.nav.find("welcome").unwrap().is_liked_by("u1"));
        let server = backend.videos();
        assert!(server[0].is_liked_by("u1"));
    }

    #[test]
    fn downloading_a_saved_video_starts_no_job() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        model
            .store
            .record_download(storage::DownloadRecord {
                video_id: "welcome".into(),
                file_path: "/tmp/otogram_welcome.mp4".into(),
                file_name: "otogram_welcome.mp4".into(),
                size_bytes: 3,
                checksum: "abc".into(),
                downloaded_at: chrono::Utc::now(),
            })
            .unwrap();

        press(&mut model, KeyCode::Char('d'));
        assert!(model.download_jobs.is_empty());
        assert!(model.downloaded.contains("welcome"));
        assert_eq!(
            model.status_message,
            "Already downloaded as otogram_welcome.mp4."
        );
    }

    #[test]
    fn second_download_request_waits_for_the_first() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        let (_tx, rx) = unbounded();
        model
            .download_jobs
            .insert("welcome".into(), DownloadJob { rx, last: None });

        press(&mut model, KeyCode::Char('d'));
        assert_eq!(model.download_jobs.len(), 1);
        assert_eq!(model.status_message, "Download already running.");
    }

    #[test]
    fn opening_own_profile_refreshes_the_signed_in_user() {
        let backend = Arc::new(MockBackend::default());
        let mut model = model_with(Arc::clone(&backend));
        model.session.login("nour@otogram.test", "password").unwrap();
        crate::data::ProfileService::update_username(backend.as_ref(), "nour_two").unwrap();

        press(&mut model, KeyCode::Char('2'));
        settle(&mut model);
        assert!(model.session_request.is_none());
        assert_eq!(model.current_user().unwrap().username, "nour_two");
        assert_eq!(model.nav.find("welcome").unwrap().user.username, "nour_two");
    }

    #[test]
    fn failed_like_is_rolled_back() {
        let backend = Arc::new(MockBackend::default());
        let mut model = model_with(Arc::clone(&backend));
        model.session.login("nour@otogram.test", "password").unwrap();

        backend.fail_next();
        press(&mut model, KeyCode::Char('l'));
        assert!(model.nav.find("welcome").unwrap().is_liked_by("u1"));
        settle(&mut model);
        let video = model.nav.find("welcome").unwrap();
        assert_eq!(video.likes, vec!["u2".to_string()]);
        let toast = model.toast.as_ref().unwrap();
        assert_eq!(toast.kind, ToastKind::Error);
        assert!(toast.message.contains("mock failure"));
    }

    #[test]
    fn upload_publishes_at_the_top_and_rejects_a_second_submit() {
        let backend = Arc::new(MockBackend::default());
        let mut model = model_with(Arc::clone(&backend));
        model.session.login("nour@otogram.test", "password").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"not much of a movie").unwrap();

        press(&mut model, KeyCode::Char('3'));
        assert_eq!(model.screen, Screen::Upload);
        type_text(&mut model, &clip.display().to_string());
        press(&mut model, KeyCode::Tab);
        type_text(&mut model, "first clip");
        press(&mut model, KeyCode::Tab);
        assert_eq!(model.upload.active, UploadField::Submit);
        assert!(render(&mut model).contains("Upload a video"));

        press(&mut model, KeyCode::Enter);
        assert!(model.upload.in_flight());
        press(&mut model, KeyCode::Enter);
        assert_eq!(model.status_message, "Upload already in progress.");

        settle(&mut model);
        assert_eq!(model.screen, Screen::Feed);
        assert_eq!(model.nav.len(), 3);
        let top = model.nav.active_video().unwrap();
        assert_eq!(top.description, "first clip");
        assert_eq!(top.user.username, "nour");
        assert_eq!(backend.videos().len(), 3);
    }

    #[test]
    fn upload_rejects_unsupported_files() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        model.session.login("nour@otogram.test", "password").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, b"hello").unwrap();

        press(&mut model, KeyCode::Char('3'));
        model.upload.path = notes.display().to_string();
        model.upload.active = UploadField::Submit;
        press(&mut model, KeyCode::Enter);
        assert!(!model.upload.in_flight());
        assert!(model.upload.error.as_deref().unwrap().contains(".txt"));
    }

    #[test]
    fn plain_users_cannot_upload() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        model.session.login("sam@otogram.test", "password").unwrap();
        press(&mut model, KeyCode::Char('3'));
        assert_eq!(model.screen, Screen::Feed);
        // Replies are open to everyone signed in.
        press(&mut model, KeyCode::Char('r'));
        assert_eq!(model.screen, Screen::Upload);
        assert_eq!(model.upload.reply_to.as_deref(), Some("welcome"));
    }

    #[test]
    fn bulk_delete_restores_only_the_users_that_failed() {
        let backend = Arc::new(MockBackend::default());
        let mut model = model_with(Arc::clone(&backend));
        model.session.login("root@otogram.test", "password").unwrap();

        press(&mut model, KeyCode::Char('4'));
        settle(&mut model);
        assert_eq!(model.screen, Screen::Admin);
        assert_eq!(model.admin.users.len(), 3);
        assert!(render(&mut model).contains("Total 3"));

        press(&mut model, KeyCode::Char('a'));
        press(&mut model, KeyCode::Char('x'));
        let Some(Modal {
            action: ConfirmAction::DeleteUsers { ids },
            ..
        }) = &model.modal
        else {
            panic!("expected a delete confirmation");
        };
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"u3".to_string()));

        backend.fail_next();
        press(&mut model, KeyCode::Char('y'));
        assert_eq!(model.admin.users.len(), 1);
        settle(&mut model);

        assert_eq!(model.admin.users.len(), 2);
        assert_eq!(backend.users().len(), 2);
        let local: HashSet<String> = model.admin.users.iter().map(|u| u.id.clone()).collect();
        let remote: HashSet<String> = backend.users().into_iter().map(|u| u.id).collect();
        assert_eq!(local, remote);
        assert_eq!(model.toast.as_ref().map(|t| t.kind), Some(ToastKind::Error));
    }

    #[test]
    fn role_change_is_confirmed_and_applied() {
        let backend = Arc::new(MockBackend::default());
        let mut model = model_with(Arc::clone(&backend));
        model.session.login("root@otogram.test", "password").unwrap();
        press(&mut model, KeyCode::Char('4'));
        settle(&mut model);

        model.admin.query.search = "sam".to_string();
        model.admin.refresh();
        assert_eq!(model.admin.selected_user().map(|u| u.id.as_str()), Some("u2"));

        press(&mut model, KeyCode::Char('r'));
        assert!(model.modal.is_some());
        press(&mut model, KeyCode::Char('y'));
        assert_eq!(model.admin.selected_user().map(|u| u.role), Some(Role::Creator));
        settle(&mut model);
        let sam = backend.users().into_iter().find(|u| u.id == "u2").unwrap();
        assert_eq!(sam.role, Role::Creator);
    }

    #[test]
    fn non_admins_are_kept_out_of_the_console() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        model.session.login("nour@otogram.test", "password").unwrap();
        press(&mut model, KeyCode::Char('4'));
        assert_eq!(model.screen, Screen::Feed);
        assert!(model.admin.users.is_empty());
    }

    #[test]
    fn sign_in_form_submits_and_returns_to_the_feed() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        press(&mut model, KeyCode::Char('l'));
        assert_eq!(model.screen, Screen::Auth);
        type_text(&mut model, "sam@otogram.test");
        press(&mut model, KeyCode::Tab);
        type_text(&mut model, "password");
        assert!(!render(&mut model).contains("password"));
        press(&mut model, KeyCode::Enter);
        settle(&mut model);
        assert_eq!(model.screen, Screen::Feed);
        assert_eq!(model.current_user().map(|u| u.username), Some("sam".to_string()));
    }

    #[test]
    fn own_profile_lists_replies_and_deep_links_into_the_feed() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        model.session.login("sam@otogram.test", "password").unwrap();

        press(&mut model, KeyCode::Char('2'));
        settle(&mut model);
        assert_eq!(model.screen, Screen::Profile);
        assert!(model.profile.items().is_empty());
        assert_eq!(model.profile.liked.len(), 1);
        assert!(render(&mut model).contains("Liked (1)"));

        press(&mut model, KeyCode::Right);
        assert_eq!(model.profile.tab, ProfileTab::Replies);
        assert_eq!(
            model.profile.selected_item().map(|v| v.id.as_str()),
            Some("welcome-reply")
        );
        press(&mut model, KeyCode::Enter);
        assert_eq!(model.screen, Screen::Feed);
        assert_eq!(model.nav.focus().active(), Some(Slot::Reply));
        assert_eq!(model.target_video().map(|v| v.id.as_str()), Some("welcome-reply"));
    }

    #[test]
    fn other_profiles_hide_the_liked_tab() {
        let mut model = model_with(Arc::new(MockBackend::default()));
        model.session.login("sam@otogram.test", "password").unwrap();
        press(&mut model, KeyCode::Char('o'));
        settle(&mut model);
        assert_eq!(model.profile.username, "nour");
        assert!(model.profile.liked_request.is_none());
        press(&mut model, KeyCode::Right);
        press(&mut model, KeyCode::Right);
        assert_eq!(model.profile.tab, ProfileTab::Posts);
    }

    #[test]
    fn renaming_updates_the_session_and_loaded_videos() {
        let backend = Arc::new(MockBackend::default());
        let mut model = model_with(Arc::clone(&backend));
        model.session.login("sam@otogram.test", "password").unwrap();
        press(&mut model, KeyCode::Char('2'));
        settle(&mut model);

        press(&mut model, KeyCode::Char('e'));
        assert_eq!(model.profile.edit, Some(ProfileEdit::Username("sam".into())));
        type_text(&mut model, "uel");
        press(&mut model, KeyCode::Enter);
        settle(&mut model);

        assert_eq!(model.current_user().map(|u| u.username), Some("samuel".into()));
        assert_eq!(model.nav.find("welcome-reply").unwrap().user.username, "samuel");
        assert_eq!(model.profile.username, "samuel");
    }

    #[test]
    fn truncate_respects_display_width() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(truncate("日本語テキスト", 5), "日本…");
    }
}
