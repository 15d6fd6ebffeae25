use std::io::{BufRead, BufReader, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use serde_json::json;

#[cfg(any(unix, target_os = "windows"))]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

const IPC_CONNECT_RETRIES: usize = 40;
const IPC_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub enum VideoCommand {
    LoadFile(String),
    Stop,
    SetPause(bool),
    /// Absolute position in seconds.
    Seek(f64),
    SeekRelative(f64),
    SetMute(bool),
    SetSpeed(f64),
    SetFullscreen(bool),
    SetOntop(bool),
    SetWindowScale(f64),
}

impl VideoCommand {
    pub fn capability(&self) -> &'static str {
        match self {
            VideoCommand::LoadFile(_) | VideoCommand::Stop => "playback",
            VideoCommand::SetPause(_) => "play/pause",
            VideoCommand::Seek(_) | VideoCommand::SeekRelative(_) => "seeking",
            VideoCommand::SetMute(_) => "mute",
            VideoCommand::SetSpeed(_) => "playback speed",
            VideoCommand::SetFullscreen(_) => "fullscreen",
            VideoCommand::SetOntop(_) | VideoCommand::SetWindowScale(_) => "picture-in-picture",
        }
    }
}

/// One video surface. Implementations must tolerate commands sent before any media is loaded.
pub trait PlayerBackend: Send {
    fn send(&mut self, command: VideoCommand) -> Result<(), PlayerError>;
}

#[derive(Clone, Debug)]
pub struct MpvOptions {
    pub mpv_path: String,
    pub extra_args: Vec<String>,
    pub title: String,
    pub user_agent: String,
}

/// Player backed by an idle mpv window driven over its JSON IPC socket.
///
/// The process is started on the first `LoadFile` and restarted if it exits; until then
/// every other command is a no-op.
pub struct MpvBackend {
    options: MpvOptions,
    session: Option<MpvSession>,
}

impl MpvBackend {
    pub fn new(options: MpvOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    fn live_session(&mut self) -> Option<&MpvSession> {
        let exited = match self.session.as_mut() {
            Some(session) => match session.try_status() {
                Some(Ok(status)) => {
                    log::debug!("mpv ({}) exited with {:?}", self.options.title, status.code());
                    true
                }
                Some(Err(err)) => {
                    log::warn!("mpv ({}) failed: {err:#}", self.options.title);
                    true
                }
                None => false,
            },
            None => false,
        };
        if exited {
            self.session = None;
        }
        self.session.as_ref()
    }
}

impl PlayerBackend for MpvBackend {
    fn send(&mut self, command: VideoCommand) -> Result<(), PlayerError> {
        if self.live_session().is_none() {
            if !matches!(command, VideoCommand::LoadFile(_)) {
                return Ok(());
            }
            self.session = Some(spawn_idle_player(&self.options)?);
        }
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let Some(path) = session.ipc_path.as_deref() else {
            return Err(PlayerError::Unsupported(command.capability()));
        };
        send_ipc_command(path, &command)?;
        Ok(())
    }
}

struct MpvSession {
    kill_tx: Sender<()>,
    status_rx: Receiver<Result<ExitStatus>>,
    handle: Option<thread::JoinHandle<()>>,
    ipc_path: Option<String>,
}

impl MpvSession {
    fn finalize(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn try_status(&mut self) -> Option<Result<ExitStatus>> {
        match self.status_rx.try_recv() {
            Ok(res) => {
                self.finalize();
                Some(res)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finalize();
                Some(Err(anyhow!("video session closed unexpectedly")))
            }
        }
    }
}

impl Drop for MpvSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.kill_tx.send(());
            let _ = self.status_rx.recv().ok();
            self.finalize();
        }
    }
}

pub fn mpv_args(options: &MpvOptions, ipc_path: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "--idle=yes".to_string(),
        "--force-window=yes".to_string(),
        "--keep-open=yes".to_string(),
        "--loop-file=inf".to_string(),
        "--pause".to_string(),
        "--really-quiet".to_string(),
        "--terminal=no".to_string(),
        "--input-terminal=no".to_string(),
        "--no-config".to_string(),
        "--ytdl=no".to_string(),
        format!("--title={}", options.title),
    ];
    if !options.user_agent.trim().is_empty() {
        args.push(format!("--user-agent={}", options.user_agent.trim()));
    }
    if let Some(path) = ipc_path {
        args.push(format!("--input-ipc-server={path}"));
    }
    args.extend(options.extra_args.iter().cloned());
    args
}

fn spawn_idle_player(options: &MpvOptions) -> Result<MpvSession> {
    let (kill_tx, kill_rx) = bounded::<()>(1);
    let (status_tx, status_rx) = bounded::<Result<ExitStatus>>(1);

    let ipc_path = unique_ipc_path();
    #[cfg(unix)]
    if let Some(path) = &ipc_path {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::debug!("failed to remove stale mpv ipc path {path}: {err}");
            }
        }
    }

    let args = mpv_args(options, ipc_path.as_deref());
    log::debug!("spawning mpv: {} {:?}", options.mpv_path, args);

    let mut command = Command::new(&options.mpv_path);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .with_context(|| format!("launch {}", options.mpv_path))?;

    let title = options.title.clone();
    let ipc_cleanup = ipc_path.clone();
    let handle = thread::spawn(move || {
        let stderr_handle = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(Result::ok) {
                    log::debug!("mpv stderr: {line}");
                }
            })
        });

        let result = loop {
            if kill_rx.try_recv().is_ok() {
                let _ = child.kill();
                break child.wait().context("wait for mpv after stop request");
            }
            match child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => thread::sleep(Duration::from_millis(30)),
                Err(err) => break Err(anyhow!(err)).context("poll mpv status"),
            }
        };
        if let Some(handle) = stderr_handle {
            let _ = handle.join();
        }
        log::debug!("mpv ({title}) session ended");
        if let Some(path) = ipc_cleanup {
            cleanup_ipc_path(&path);
        }
        let _ = status_tx.send(result);
    });

    Ok(MpvSession {
        kill_tx,
        status_rx,
        handle: Some(handle),
        ipc_path,
    })
}

pub fn command_payload(command: &VideoCommand) -> serde_json::Value {
    match command {
        VideoCommand::LoadFile(url) => json!(["loadfile", url, "replace"]),
        VideoCommand::Stop => json!(["stop"]),
        VideoCommand::SetPause(paused) => json!(["set_property", "pause", paused]),
        VideoCommand::Seek(position) => json!(["seek", position, "absolute"]),
        VideoCommand::SeekRelative(offset) => json!(["seek", offset, "relative"]),
        VideoCommand::SetMute(muted) => json!(["set_property", "mute", muted]),
        VideoCommand::SetSpeed(speed) => json!(["set_property", "speed", speed]),
        VideoCommand::SetFullscreen(on) => json!(["set_property", "fullscreen", on]),
        VideoCommand::SetOntop(on) => json!(["set_property", "ontop", on]),
        VideoCommand::SetWindowScale(scale) => json!(["set_property", "window-scale", scale]),
    }
}

fn send_ipc_command(path: &str, command: &VideoCommand) -> Result<()> {
    let payload = json!({
        "command": command_payload(command),
    });
    let serialized = serde_json::to_string(&payload).context("serialize mpv command")?;
    log::trace!("mpv ipc {path}: {serialized}");
    send_ipc_command_inner(path, &serialized)
}

#[cfg(unix)]
fn send_ipc_command_inner(path: &str, serialized: &str) -> Result<()> {
    // The socket appears a moment after mpv starts.
    let mut stream = None;
    for attempt in 0..IPC_CONNECT_RETRIES {
        match UnixStream::connect(path) {
            Ok(conn) => {
                stream = Some(conn);
                break;
            }
            Err(_) if attempt + 1 < IPC_CONNECT_RETRIES => thread::sleep(IPC_RETRY_DELAY),
            Err(err) => {
                return Err(anyhow!(err)).context(format!("connect to mpv IPC socket {path}"))
            }
        }
    }
    let mut stream = stream.ok_or_else(|| anyhow!("connect to mpv IPC socket {path}"))?;
    stream
        .write_all(serialized.as_bytes())
        .context("write mpv IPC command")?;
    stream
        .write_all(b"\n")
        .context("write mpv IPC command terminator")?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_ipc_command_inner(path: &str, serialized: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::ErrorKind;

    for attempt in 0..IPC_CONNECT_RETRIES {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(mut pipe) => {
                pipe.write_all(serialized.as_bytes())
                    .with_context(|| format!("write mpv IPC command to {path}"))?;
                pipe.write_all(b"\n")
                    .with_context(|| format!("write mpv IPC command terminator to {path}"))?;
                pipe.flush().ok();
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::NotFound && attempt + 1 < IPC_CONNECT_RETRIES => {
                thread::sleep(IPC_RETRY_DELAY);
            }
            Err(err) => {
                return Err(anyhow!(err)).context(format!("connect to mpv IPC named pipe {path}"));
            }
        }
    }

    Err(anyhow!("connect to mpv IPC named pipe {}", path))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn send_ipc_command_inner(_path: &str, _serialized: &str) -> Result<()> {
    Err(anyhow!("video controls are not supported on this platform"))
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("otogram-mpv-{}-{suffix}.sock", std::process::id()));
    Some(path.to_string_lossy().to_string())
}

#[cfg(target_os = "windows")]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    Some(format!(
        r"\\.\pipe\otogram-mpv-{}-{suffix}",
        std::process::id()
    ))
}

#[cfg(all(not(unix), not(target_os = "windows")))]
fn unique_ipc_path() -> Option<String> {
    None
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::debug!("failed to remove mpv ipc path {path}: {err}");
        }
    }
}

#[cfg(not(unix))]
fn cleanup_ipc_path(_path: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MpvOptions {
        MpvOptions {
            mpv_path: "/nonexistent/mpv".into(),
            extra_args: vec!["--volume=50".into()],
            title: "Otogram".into(),
            user_agent: "otogram-tui/test".into(),
        }
    }

    #[test]
    fn payloads_match_mpv_protocol() {
        assert_eq!(
            command_payload(&VideoCommand::LoadFile("http://x/v.mp4".into())),
            json!(["loadfile", "http://x/v.mp4", "replace"])
        );
        assert_eq!(
            command_payload(&VideoCommand::SetMute(true)),
            json!(["set_property", "mute", true])
        );
        assert_eq!(
            command_payload(&VideoCommand::Seek(0.0)),
            json!(["seek", 0.0, "absolute"])
        );
        assert_eq!(
            command_payload(&VideoCommand::SetSpeed(1.5)),
            json!(["set_property", "speed", 1.5])
        );
    }

    #[test]
    fn args_include_ipc_socket_and_extras() {
        let args = mpv_args(&options(), Some("/tmp/sock"));
        assert!(args.contains(&"--input-ipc-server=/tmp/sock".to_string()));
        assert!(args.contains(&"--idle=yes".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--volume=50"));
    }

    #[test]
    fn commands_before_load_are_no_ops() {
        let mut backend = MpvBackend::new(options());
        assert!(backend.send(VideoCommand::SetPause(true)).is_ok());
        assert!(backend.send(VideoCommand::SetMute(true)).is_ok());
        assert!(backend.session.is_none());
    }

    #[test]
    fn missing_binary_is_reported() {
        let mut backend = MpvBackend::new(options());
        let err = backend
            .send(VideoCommand::LoadFile("http://x/v.mp4".into()))
            .unwrap_err();
        assert!(matches!(err, PlayerError::Backend(_)));
    }

    #[cfg(unix)]
    #[test]
    fn ipc_writes_json_line() {
        use std::io::Read;
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let reader = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut line = String::new();
            conn.read_to_string(&mut line).unwrap();
            line
        });

        send_ipc_command(
            path.to_str().unwrap(),
            &VideoCommand::SetPause(false),
        )
        .unwrap();
        let line = reader.join().unwrap();
        assert_eq!(line, "{\"command\":[\"set_property\",\"pause\",false]}\n");
    }
}
