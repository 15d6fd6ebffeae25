//! Two player cells, the main feed video and the active reply, kept in step with the
//! navigator. One mute flag covers both.

use crate::assets;
use crate::feed::{Focus, Navigator, Slot, Transition};
use crate::video::{PlayerBackend, PlayerError, VideoCommand};

pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 2.0;
pub const SPEED_STEP: f64 = 0.25;
pub const SEEK_STEP_SECS: f64 = 5.0;
const PIP_WINDOW_SCALE: f64 = 0.4;

struct Cell {
    backend: Box<dyn PlayerBackend>,
    loaded: Option<String>,
    playing: bool,
    speed: f64,
    fullscreen: bool,
    pip: bool,
}

impl Cell {
    fn new(backend: Box<dyn PlayerBackend>) -> Self {
        Cell {
            backend,
            loaded: None,
            playing: false,
            speed: 1.0,
            fullscreen: false,
            pip: false,
        }
    }
}

/// Keeps the main and reply players consistent with the navigator.
///
/// At most one cell plays at a time and mute is shared by both. Failures from a backend
/// are returned to the caller for the status line; the remaining cells are still updated.
pub struct Coordinator {
    main: Cell,
    reply: Cell,
    muted: bool,
    base_url: String,
}

impl Coordinator {
    pub fn new(
        base_url: impl Into<String>,
        main: Box<dyn PlayerBackend>,
        reply: Box<dyn PlayerBackend>,
    ) -> Self {
        Coordinator {
            main: Cell::new(main),
            reply: Cell::new(reply),
            muted: false,
            base_url: base_url.into(),
        }
    }

    fn cell(&mut self, slot: Slot) -> &mut Cell {
        match slot {
            Slot::Main => &mut self.main,
            Slot::Reply => &mut self.reply,
        }
    }

    fn cell_ref(&self, slot: Slot) -> &Cell {
        match slot {
            Slot::Main => &self.main,
            Slot::Reply => &self.reply,
        }
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn is_playing(&self, slot: Slot) -> bool {
        self.cell_ref(slot).playing
    }

    pub fn loaded(&self, slot: Slot) -> Option<&str> {
        self.cell_ref(slot).loaded.as_deref()
    }

    pub fn speed(&self, slot: Slot) -> f64 {
        self.cell_ref(slot).speed
    }

    pub fn is_pip(&self, slot: Slot) -> bool {
        self.cell_ref(slot).pip
    }

    /// Loads whatever the navigator currently shows, paused at the start.
    pub fn sync(&mut self, nav: &Navigator) -> Result<(), PlayerError> {
        let mut first_err = None;
        self.reset_both(&mut first_err);
        let main = nav.active_video().map(|video| video.video_url.clone());
        let reply = nav.active_reply().map(|video| video.video_url.clone());
        keep_first(&mut first_err, self.load(Slot::Main, main.as_deref()));
        keep_first(&mut first_err, self.load(Slot::Reply, reply.as_deref()));
        first_err.map_or(Ok(()), Err)
    }

    pub fn on_transition(&mut self, transition: Transition, nav: &Navigator) -> Result<(), PlayerError> {
        match transition {
            Transition::None => Ok(()),
            Transition::Collapsed => self.apply_focus(nav.focus()),
            Transition::Video { .. } => {
                let result = self.sync(nav);
                let focus = self.apply_focus(nav.focus());
                result.and(focus)
            }
            Transition::Reply { .. } => {
                let mut first_err = None;
                self.reset_both(&mut first_err);
                let reply = nav.active_reply().map(|video| video.video_url.clone());
                keep_first(&mut first_err, self.load(Slot::Reply, reply.as_deref()));
                keep_first(&mut first_err, self.apply_focus(nav.focus()));
                first_err.map_or(Ok(()), Err)
            }
        }
    }

    fn reset_both(&mut self, first_err: &mut Option<PlayerError>) {
        for slot in [Slot::Main, Slot::Reply] {
            keep_first(first_err, self.pause(slot));
            if self.cell_ref(slot).loaded.is_some() {
                keep_first(first_err, self.send(slot, VideoCommand::Seek(0.0)));
            }
        }
    }

    fn load(&mut self, slot: Slot, path: Option<&str>) -> Result<(), PlayerError> {
        let url = path
            .map(|path| assets::resolve(&self.base_url, path))
            .filter(|url| !url.is_empty());
        let muted = self.muted;
        let cell = self.cell(slot);
        if cell.loaded == url {
            return Ok(());
        }
        match url {
            Some(url) => {
                cell.backend.send(VideoCommand::LoadFile(url.clone()))?;
                cell.loaded = Some(url);
                cell.playing = false;
                cell.backend.send(VideoCommand::SetPause(true))?;
                cell.backend.send(VideoCommand::SetMute(muted))
            }
            None => {
                cell.loaded = None;
                cell.playing = false;
                cell.backend.send(VideoCommand::Stop)
            }
        }
    }

    fn send(&mut self, slot: Slot, command: VideoCommand) -> Result<(), PlayerError> {
        self.cell(slot).backend.send(command)
    }

    /// Plays `slot` and pauses the other cell if it was playing.
    pub fn activate(&mut self, slot: Slot) -> Result<(), PlayerError> {
        if self.cell_ref(slot).loaded.is_none() {
            return Ok(());
        }
        let other = slot.other();
        let mut first_err = None;
        if self.cell_ref(other).playing {
            keep_first(&mut first_err, self.pause(other));
        }
        keep_first(&mut first_err, self.send(slot, VideoCommand::SetPause(false)));
        self.cell(slot).playing = true;
        first_err.map_or(Ok(()), Err)
    }

    pub fn pause(&mut self, slot: Slot) -> Result<(), PlayerError> {
        let cell = self.cell(slot);
        cell.playing = false;
        cell.backend.send(VideoCommand::SetPause(true))
    }

    pub fn pause_all(&mut self) -> Result<(), PlayerError> {
        let main = self.pause(Slot::Main);
        let reply = self.pause(Slot::Reply);
        main.and(reply)
    }

    /// Returns whether `slot` is playing afterwards.
    pub fn toggle(&mut self, slot: Slot) -> Result<bool, PlayerError> {
        if self.cell_ref(slot).playing {
            self.pause(slot)?;
        } else {
            self.activate(slot)?;
        }
        Ok(self.cell_ref(slot).playing)
    }

    pub fn toggle_mute(&mut self) -> Result<bool, PlayerError> {
        self.set_muted(!self.muted)?;
        Ok(self.muted)
    }

    pub fn set_muted(&mut self, muted: bool) -> Result<(), PlayerError> {
        self.muted = muted;
        let main = self.send(Slot::Main, VideoCommand::SetMute(muted));
        let reply = self.send(Slot::Reply, VideoCommand::SetMute(muted));
        main.and(reply)
    }

    pub fn seek_relative(&mut self, slot: Slot, seconds: f64) -> Result<(), PlayerError> {
        self.send(slot, VideoCommand::SeekRelative(seconds))
    }

    pub fn seek_to(&mut self, slot: Slot, seconds: f64) -> Result<(), PlayerError> {
        self.send(slot, VideoCommand::Seek(seconds.max(0.0)))
    }

    pub fn set_speed(&mut self, slot: Slot, speed: f64) -> Result<f64, PlayerError> {
        let speed = (speed / SPEED_STEP).round() * SPEED_STEP;
        let speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.send(slot, VideoCommand::SetSpeed(speed))?;
        self.cell(slot).speed = speed;
        Ok(speed)
    }

    pub fn step_speed(&mut self, slot: Slot, faster: bool) -> Result<f64, PlayerError> {
        let current = self.cell_ref(slot).speed;
        let next = if faster {
            current + SPEED_STEP
        } else {
            current - SPEED_STEP
        };
        self.set_speed(slot, next)
    }

    /// Mirrors the navigator's expanded state onto the players' fullscreen flag.
    pub fn apply_focus(&mut self, focus: Focus) -> Result<(), PlayerError> {
        let mut first_err = None;
        for slot in [Slot::Main, Slot::Reply] {
            let want = focus.expanded() == Some(slot);
            if self.cell_ref(slot).fullscreen != want {
                match self.send(slot, VideoCommand::SetFullscreen(want)) {
                    Ok(()) => self.cell(slot).fullscreen = want,
                    Err(err) => keep_first(&mut first_err, Err(err)),
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn toggle_pip(&mut self, slot: Slot) -> Result<bool, PlayerError> {
        let enable = !self.cell_ref(slot).pip;
        let scale = if enable { PIP_WINDOW_SCALE } else { 1.0 };
        self.send(slot, VideoCommand::SetOntop(enable))?;
        self.send(slot, VideoCommand::SetWindowScale(scale))?;
        self.cell(slot).pip = enable;
        Ok(enable)
    }
}

fn keep_first(slot: &mut Option<PlayerError>, result: Result<(), PlayerError>) {
    if let Err(err) = result {
        log::warn!("player command failed: {err}");
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::Video;
    use crate::feed::{Gesture, NavKey};
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub type CommandLog = Arc<Mutex<Vec<VideoCommand>>>;

    pub struct RecordingBackend {
        pub log: CommandLog,
        pub unsupported: bool,
    }

    impl PlayerBackend for RecordingBackend {
        fn send(&mut self, command: VideoCommand) -> Result<(), PlayerError> {
            if self.unsupported && matches!(command, VideoCommand::SetOntop(_)) {
                return Err(PlayerError::Unsupported(command.capability()));
            }
            self.log.lock().push(command);
            Ok(())
        }
    }

    pub fn recording_coordinator() -> (Coordinator, CommandLog, CommandLog) {
        let main = CommandLog::default();
        let reply = CommandLog::default();
        let coordinator = Coordinator::new(
            "http://localhost:5000",
            Box::new(RecordingBackend {
                log: main.clone(),
                unsupported: false,
            }),
            Box::new(RecordingBackend {
                log: reply.clone(),
                unsupported: true,
            }),
        );
        (coordinator, main, reply)
    }

    fn video(id: &str, replies: &[&str]) -> Video {
        Video {
            id: id.into(),
            video_url: format!("/uploads/{id}.mp4"),
            replies: replies
                .iter()
                .map(|reply| Video {
                    id: (*reply).into(),
                    video_url: format!("/uploads/{reply}.mp4"),
                    reply_to: Some(id.into()),
                    ..Video::default()
                })
                .collect(),
            ..Video::default()
        }
    }

    fn last_mute(log: &CommandLog) -> Option<bool> {
        log.lock().iter().rev().find_map(|cmd| match cmd {
            VideoCommand::SetMute(muted) => Some(*muted),
            _ => None,
        })
    }

    #[test]
    fn mute_twice_restores_both_cells() {
        let (mut coordinator, main, reply) = recording_coordinator();
        assert!(coordinator.toggle_mute().unwrap());
        assert_eq!(last_mute(&main), Some(true));
        assert_eq!(last_mute(&reply), Some(true));
        assert!(!coordinator.toggle_mute().unwrap());
        assert_eq!(last_mute(&main), Some(false));
        assert_eq!(last_mute(&reply), Some(false));
    }

    #[test]
    fn activating_one_cell_pauses_the_other() {
        let mut nav = Navigator::new(vec![video("B", &["R1"])]);
        let (mut coordinator, _, reply_log) = recording_coordinator();
        coordinator.sync(&nav).unwrap();

        nav.activate(Slot::Main);
        coordinator.activate(Slot::Main).unwrap();
        assert!(coordinator.is_playing(Slot::Main));

        nav.activate(Slot::Reply);
        coordinator.activate(Slot::Reply).unwrap();
        assert!(coordinator.is_playing(Slot::Reply));
        assert!(!coordinator.is_playing(Slot::Main));
        assert_eq!(
            reply_log.lock().last(),
            Some(&VideoCommand::SetPause(false))
        );
    }

    #[test]
    fn transition_pauses_rewinds_and_loads() {
        let mut nav = Navigator::new(vec![video("A", &[]), video("B", &["R1", "R2"])]);
        let (mut coordinator, main, reply) = recording_coordinator();
        coordinator.sync(&nav).unwrap();
        assert_eq!(coordinator.loaded(Slot::Reply), None);
        coordinator.activate(Slot::Main).unwrap();
        main.lock().clear();

        let t = nav.handle(Gesture::Key(NavKey::Down));
        coordinator.on_transition(t, &nav).unwrap();
        let main_log = main.lock().clone();
        assert_eq!(main_log[0], VideoCommand::SetPause(true));
        assert_eq!(main_log[1], VideoCommand::Seek(0.0));
        assert!(main_log.contains(&VideoCommand::LoadFile(
            "http://localhost:5000/uploads/B.mp4".into()
        )));
        assert!(!coordinator.is_playing(Slot::Main));
        assert_eq!(
            coordinator.loaded(Slot::Reply),
            Some("http://localhost:5000/uploads/R1.mp4")
        );

        let t = nav.handle(Gesture::Key(NavKey::Right));
        coordinator.on_transition(t, &nav).unwrap();
        assert_eq!(
            coordinator.loaded(Slot::Reply),
            Some("http://localhost:5000/uploads/R2.mp4")
        );
        assert!(reply.lock().contains(&VideoCommand::Seek(0.0)));

        let t = nav.handle(Gesture::Key(NavKey::Up));
        coordinator.on_transition(t, &nav).unwrap();
        assert_eq!(coordinator.loaded(Slot::Reply), None);
        assert_eq!(reply.lock().last(), Some(&VideoCommand::Stop));
    }

    #[test]
    fn new_media_inherits_mute() {
        let mut nav = Navigator::new(vec![video("A", &[]), video("B", &[])]);
        let (mut coordinator, main, _) = recording_coordinator();
        coordinator.toggle_mute().unwrap();
        let t = nav.handle(Gesture::Key(NavKey::Down));
        coordinator.on_transition(t, &nav).unwrap();
        assert_eq!(last_mute(&main), Some(true));
    }

    #[test]
    fn speed_is_stepped_and_clamped() {
        let (mut coordinator, _, _) = recording_coordinator();
        assert_eq!(coordinator.set_speed(Slot::Main, 5.0).unwrap(), MAX_SPEED);
        assert_eq!(coordinator.step_speed(Slot::Main, true).unwrap(), MAX_SPEED);
        assert_eq!(coordinator.set_speed(Slot::Main, 0.0).unwrap(), MIN_SPEED);
        assert_eq!(coordinator.step_speed(Slot::Main, true).unwrap(), 0.5);
        assert_eq!(coordinator.speed(Slot::Reply), 1.0);
    }

    #[test]
    fn expanded_focus_maps_to_fullscreen() {
        let mut nav = Navigator::new(vec![video("A", &[])]);
        let (mut coordinator, main, _) = recording_coordinator();
        coordinator.sync(&nav).unwrap();
        nav.expand(Slot::Main);
        coordinator.apply_focus(nav.focus()).unwrap();
        assert_eq!(main.lock().last(), Some(&VideoCommand::SetFullscreen(true)));
        let t = nav.collapse();
        coordinator.on_transition(t, &nav).unwrap();
        assert_eq!(main.lock().last(), Some(&VideoCommand::SetFullscreen(false)));
    }

    #[test]
    fn unsupported_pip_is_reported_not_fatal() {
        let (mut coordinator, _, _) = recording_coordinator();
        assert!(coordinator.toggle_pip(Slot::Main).unwrap());
        let err = coordinator.toggle_pip(Slot::Reply).unwrap_err();
        assert!(matches!(err, PlayerError::Unsupported("picture-in-picture")));
        assert!(!coordinator.is_pip(Slot::Reply));
    }
}
