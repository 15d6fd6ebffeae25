//! Feed navigation: which video and which reply are active, and how gestures move them.
//!
//! The navigator owns the loaded feed and a focus state machine for the two players. Every
//! input returns a [`Transition`] that the playback coordinator turns into player commands.
//! Indices are always kept in range, whatever the sequence of inputs or edits.

use std::time::{Duration, Instant};

use crate::api::Video;

pub const WHEEL_THRESHOLD: f64 = 50.0;
pub const WHEEL_COOLDOWN: Duration = Duration::from_millis(800);
/// Delta reported for one terminal wheel notch.
pub const WHEEL_NOTCH_DELTA: f64 = 100.0;
pub const SWIPE_THRESHOLD: f64 = 50.0;
/// Pseudo-pixels per millisecond.
pub const SWIPE_VELOCITY: f64 = 0.3;
pub const CELL_WIDTH_PX: f64 = 8.0;
pub const CELL_HEIGHT_PX: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Main,
    Reply,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::Main => Slot::Reply,
            Slot::Reply => Slot::Main,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Idle,
    MainActive,
    ReplyActive,
    MainExpanded,
    ReplyExpanded,
}

impl Focus {
    pub fn expanded(self) -> Option<Slot> {
        match self {
            Focus::MainExpanded => Some(Slot::Main),
            Focus::ReplyExpanded => Some(Slot::Reply),
            _ => None,
        }
    }

    pub fn is_expanded(self) -> bool {
        self.expanded().is_some()
    }

    pub fn active(self) -> Option<Slot> {
        match self {
            Focus::MainActive | Focus::MainExpanded => Some(Slot::Main),
            Focus::ReplyActive | Focus::ReplyExpanded => Some(Slot::Reply),
            Focus::Idle => None,
        }
    }

    fn collapsed(self) -> Focus {
        match self {
            Focus::MainExpanded => Focus::MainActive,
            Focus::ReplyExpanded => Focus::ReplyActive,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Up,
    Down,
    Left,
    Right,
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Wheel { delta_y: f64, at: Instant },
    /// Start minus end, so positive `dy` means the pointer moved up.
    Swipe { dx: f64, dy: f64, elapsed: Duration },
    Key(NavKey),
}

impl Gesture {
    pub fn wheel_notch(down: bool, at: Instant) -> Gesture {
        let delta_y = if down {
            WHEEL_NOTCH_DELTA
        } else {
            -WHEEL_NOTCH_DELTA
        };
        Gesture::Wheel { delta_y, at }
    }

    /// Builds a swipe from a mouse drag measured in terminal cells `(column, row)`.
    pub fn from_drag(start: (u16, u16), end: (u16, u16), elapsed: Duration) -> Gesture {
        let dx = (f64::from(start.0) - f64::from(end.0)) * CELL_WIDTH_PX;
        let dy = (f64::from(start.1) - f64::from(end.1)) * CELL_HEIGHT_PX;
        Gesture::Swipe { dx, dy, elapsed }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Video { from: usize, to: usize },
    Reply { from: usize, to: usize },
    Collapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyView {
    Empty,
    Active {
        index: usize,
        total: usize,
        has_prev: bool,
        has_next: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Vertical,
    Horizontal,
}

#[derive(Debug, Default)]
pub struct Navigator {
    videos: Vec<Video>,
    active_video: usize,
    active_reply: usize,
    focus: Focus,
    last_wheel: Option<Instant>,
}

impl Navigator {
    pub fn new(videos: Vec<Video>) -> Self {
        Navigator {
            videos,
            ..Navigator::default()
        }
    }

    pub fn videos(&self) -> &[Video] {
        &self.videos
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn main_expanded(&self) -> bool {
        self.focus == Focus::MainExpanded
    }

    pub fn reply_expanded(&self) -> bool {
        self.focus == Focus::ReplyExpanded
    }

    pub fn active_video_index(&self) -> Option<usize> {
        (!self.videos.is_empty()).then_some(self.active_video)
    }

    pub fn active_video(&self) -> Option<&Video> {
        self.videos.get(self.active_video)
    }

    /// `None` when the active video has no replies.
    pub fn active_reply_index(&self) -> Option<usize> {
        let total = self.reply_count();
        (total > 0).then_some(self.active_reply)
    }

    pub fn active_reply(&self) -> Option<&Video> {
        self.active_video()
            .and_then(|video| video.replies.get(self.active_reply))
    }

    pub fn reply_count(&self) -> usize {
        self.active_video()
            .map(|video| video.replies.len())
            .unwrap_or(0)
    }

    pub fn reply_view(&self) -> ReplyView {
        let total = self.reply_count();
        if total == 0 {
            return ReplyView::Empty;
        }
        ReplyView::Active {
            index: self.active_reply,
            total,
            has_prev: self.active_reply > 0,
            has_next: self.active_reply + 1 < total,
        }
    }

    pub fn handle(&mut self, gesture: Gesture) -> Transition {
        match gesture {
            Gesture::Wheel { delta_y, at } => self.handle_wheel(delta_y, at),
            Gesture::Swipe { dx, dy, elapsed } => self.handle_swipe(dx, dy, elapsed),
            Gesture::Key(key) => self.handle_key(key),
        }
    }

    fn handle_wheel(&mut self, delta_y: f64, at: Instant) -> Transition {
        if delta_y.abs() < WHEEL_THRESHOLD {
            return Transition::None;
        }
        if let Some(last) = self.last_wheel {
            if at.saturating_duration_since(last) < WHEEL_COOLDOWN {
                return Transition::None;
            }
        }
        self.last_wheel = Some(at);
        self.navigate_collapsing(if delta_y > 0.0 { 1 } else { -1 })
    }

    fn handle_swipe(&mut self, dx: f64, dy: f64, elapsed: Duration) -> Transition {
        let (axis, distance) = if dy.abs() > dx.abs() {
            (Axis::Vertical, dy)
        } else {
            (Axis::Horizontal, dx)
        };
        if distance == 0.0 {
            return Transition::None;
        }
        let millis = elapsed.as_secs_f64() * 1000.0;
        let velocity = distance.abs() / millis.max(1.0);
        if distance.abs() <= SWIPE_THRESHOLD && velocity <= SWIPE_VELOCITY {
            return Transition::None;
        }
        let step = if distance > 0.0 { 1 } else { -1 };
        match axis {
            Axis::Vertical => self.navigate_collapsing(step),
            Axis::Horizontal if self.focus.is_expanded() => Transition::None,
            Axis::Horizontal => self.move_reply(step),
        }
    }

    fn handle_key(&mut self, key: NavKey) -> Transition {
        match key {
            NavKey::Escape => self.collapse(),
            _ if self.focus.is_expanded() => Transition::None,
            NavKey::Down => self.move_video(1),
            NavKey::Up => self.move_video(-1),
            NavKey::Right => self.move_reply(1),
            NavKey::Left => self.move_reply(-1),
        }
    }

    fn navigate_collapsing(&mut self, step: isize) -> Transition {
        let was_expanded = self.focus.is_expanded();
        match self.move_video(step) {
            Transition::None if was_expanded => {
                self.focus = self.focus.collapsed();
                Transition::Collapsed
            }
            other => other,
        }
    }

    fn move_video(&mut self, step: isize) -> Transition {
        let total = self.videos.len();
        if total == 0 {
            return Transition::None;
        }
        let from = self.active_video;
        let to = clamp_step(from, step, total);
        if to == from {
            return Transition::None;
        }
        self.active_video = to;
        self.active_reply = 0;
        self.focus = Focus::Idle;
        Transition::Video { from, to }
    }

    fn move_reply(&mut self, step: isize) -> Transition {
        let total = self.reply_count();
        if total == 0 {
            return Transition::None;
        }
        let from = self.active_reply;
        let to = clamp_step(from, step, total);
        if to == from {
            return Transition::None;
        }
        self.active_reply = to;
        self.focus = Focus::Idle;
        Transition::Reply { from, to }
    }

    /// Marks `slot` as the playing cell. Fails when the slot has nothing loaded.
    pub fn activate(&mut self, slot: Slot) -> bool {
        if !self.slot_has_media(slot) {
            return false;
        }
        self.focus = match (slot, self.focus.expanded()) {
            (Slot::Main, Some(Slot::Main)) => Focus::MainExpanded,
            (Slot::Reply, Some(Slot::Reply)) => Focus::ReplyExpanded,
            (Slot::Main, _) => Focus::MainActive,
            (Slot::Reply, _) => Focus::ReplyActive,
        };
        true
    }

    pub fn expand(&mut self, slot: Slot) -> bool {
        if !self.slot_has_media(slot) {
            return false;
        }
        self.focus = match slot {
            Slot::Main => Focus::MainExpanded,
            Slot::Reply => Focus::ReplyExpanded,
        };
        true
    }

    pub fn collapse(&mut self) -> Transition {
        if !self.focus.is_expanded() {
            return Transition::None;
        }
        self.focus = self.focus.collapsed();
        Transition::Collapsed
    }

    /// Marks playback as stopped without touching indices.
    pub fn pause_all(&mut self) {
        self.focus = Focus::Idle;
    }

    fn slot_has_media(&self, slot: Slot) -> bool {
        match slot {
            Slot::Main => self.active_video().is_some(),
            Slot::Reply => self.active_reply().is_some(),
        }
    }

    /// Moves to the top-level video `id`. Unknown ids leave the navigator untouched.
    pub fn jump_to(&mut self, id: &str) -> Transition {
        let Some(to) = self.videos.iter().position(|video| video.id == id) else {
            return Transition::None;
        };
        let from = self.active_video;
        if to == from && self.active_reply == 0 {
            return Transition::None;
        }
        self.active_video = to;
        self.active_reply = 0;
        self.focus = Focus::Idle;
        Transition::Video { from, to }
    }

    /// Moves to `reply_id` under `parent_id`, falling back to the parent alone when the
    /// reply is gone.
    pub fn jump_to_reply(&mut self, parent_id: &str, reply_id: &str) -> Transition {
        let Some(to) = self.videos.iter().position(|video| video.id == parent_id) else {
            return Transition::None;
        };
        let reply = self.videos[to]
            .replies
            .iter()
            .position(|reply| reply.id == reply_id)
            .unwrap_or(0);
        let from = self.active_video;
        if to == from && reply == self.active_reply {
            return Transition::None;
        }
        self.active_video = to;
        self.active_reply = reply;
        self.focus = Focus::Idle;
        Transition::Video { from, to }
    }

    pub fn find(&self, id: &str) -> Option<&Video> {
        self.videos.iter().find_map(|video| {
            if video.id == id {
                Some(video)
            } else {
                video.replies.iter().find(|reply| reply.id == id)
            }
        })
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Video> {
        for video in self.videos.iter_mut() {
            if video.id == id {
                return Some(video);
            }
            if let Some(reply) = video.replies.iter_mut().find(|reply| reply.id == id) {
                return Some(reply);
            }
        }
        None
    }

    pub fn parent_of(&self, reply_id: &str) -> Option<&Video> {
        self.videos
            .iter()
            .find(|video| video.replies.iter().any(|reply| reply.id == reply_id))
    }

    /// Swaps in a freshly loaded feed, clamping both indices.
    pub fn replace_videos(&mut self, videos: Vec<Video>) -> Transition {
        let from = self.active_video;
        self.videos = videos;
        self.focus = Focus::Idle;
        if self.videos.is_empty() {
            self.active_video = 0;
            self.active_reply = 0;
            return Transition::None;
        }
        self.active_video = from.min(self.videos.len() - 1);
        let replies = self.reply_count();
        self.active_reply = self.active_reply.min(replies.saturating_sub(1));
        Transition::Video {
            from,
            to: self.active_video,
        }
    }

    /// Inserts `video` at `index` (clamped) without moving the active video.
    pub fn insert_video(&mut self, index: usize, video: Video) {
        let index = index.min(self.videos.len());
        if !self.videos.is_empty() && index <= self.active_video {
            self.active_video += 1;
        }
        self.videos.insert(index, video);
    }

    /// Removes a top-level video (and with it, its replies).
    pub fn remove_video(&mut self, id: &str) -> Option<(usize, Video)> {
        let index = self.videos.iter().position(|video| video.id == id)?;
        let removed = self.videos.remove(index);
        if index < self.active_video {
            self.active_video -= 1;
        } else if index == self.active_video {
            self.active_video = self.active_video.min(self.videos.len().saturating_sub(1));
            self.active_reply = 0;
            self.focus = Focus::Idle;
        }
        Some((index, removed))
    }

    pub fn insert_reply(&mut self, parent_id: &str, index: usize, reply: Video) -> bool {
        let active_parent = self.active_video().map(|video| video.id == parent_id);
        let Some(parent) = self.videos.iter_mut().find(|video| video.id == parent_id) else {
            return false;
        };
        let index = index.min(parent.replies.len());
        let had_replies = !parent.replies.is_empty();
        parent.replies.insert(index, reply);
        if active_parent == Some(true) && had_replies && index <= self.active_reply {
            self.active_reply += 1;
        }
        true
    }

    pub fn remove_reply(&mut self, parent_id: &str, reply_id: &str) -> Option<(usize, Video)> {
        let is_active_parent = self
            .active_video()
            .map(|video| video.id == parent_id)
            .unwrap_or(false);
        let parent = self.videos.iter_mut().find(|video| video.id == parent_id)?;
        let index = parent.replies.iter().position(|reply| reply.id == reply_id)?;
        let removed = parent.replies.remove(index);
        let remaining = parent.replies.len();
        if is_active_parent {
            if index < self.active_reply {
                self.active_reply -= 1;
            } else if index == self.active_reply {
                self.active_reply = self.active_reply.min(remaining.saturating_sub(1));
                if self.focus.active() == Some(Slot::Reply) {
                    self.focus = Focus::Idle;
                }
            }
        }
        Some((index, removed))
    }

    pub fn is_active_reply(&self, reply_id: &str) -> bool {
        self.active_reply().map(|reply| reply.id == reply_id) == Some(true)
    }
}

fn clamp_step(current: usize, step: isize, len: usize) -> usize {
    let last = len.saturating_sub(1) as isize;
    (current as isize + step).clamp(0, last) as usize
}
