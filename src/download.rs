use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use sha1::{Digest, Sha1};

use crate::storage::{self, DownloadRecord};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub dir: Option<PathBuf>,
    pub workers: usize,
    pub user_agent: String,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: None,
            workers: 2,
            user_agent: format!("otogram-tui/{}", crate::VERSION),
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub video_id: String,
    /// Absolute media URL.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Percent(u8),
    /// The server did not announce a length.
    Indeterminate { bytes: u64 },
    Done(DownloadRecord),
    Failed(String),
}

/// Streams one video to disk and records it in the store.
pub struct Downloader {
    store: Arc<storage::Store>,
    dir: PathBuf,
    client: Client,
    user_agent: String,
}

impl Downloader {
    pub fn new(store: Arc<storage::Store>, cfg: Config) -> Result<Self> {
        let dir = cfg
            .dir
            .clone()
            .or_else(default_download_dir)
            .context("download: directory not configured")?;
        let client = match cfg.http_client {
            Some(client) => client,
            None => Client::builder()
                .timeout(None)
                .connect_timeout(Duration::from_secs(15))
                .build()
                .context("download: build http client")?,
        };
        Ok(Self {
            store,
            dir,
            client,
            user_agent: cfg.user_agent,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn target_path(&self, video_id: &str) -> PathBuf {
        self.dir.join(file_name_for(video_id))
    }

    pub fn fetch(&self, request: &Request, emit: &mut dyn FnMut(Progress)) -> Result<DownloadRecord> {
        if request.video_id.trim().is_empty() {
            bail!("download: video id required");
        }
        if request.url.trim().is_empty() {
            bail!("download: url required");
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("download: create {}", self.dir.display()))?;

        let mut response = self
            .client
            .get(&request.url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("download: request {}", request.url))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("download: request failed: {status}"));
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("download: create temp file")?;
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        let mut last_percent = None;

        match total {
            Some(_) => emit(Progress::Percent(0)),
            None => emit(Progress::Indeterminate { bytes: 0 }),
        }
        loop {
            let read = response.read(&mut buffer).context("download: read body")?;
            if read == 0 {
                break;
            }
            tmp.write_all(&buffer[..read])
                .context("download: write temp file")?;
            hasher.update(&buffer[..read]);
            written += read as u64;
            match total {
                Some(total) => {
                    let percent = crate::api::percent(written, total);
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        emit(Progress::Percent(percent));
                    }
                }
                None => emit(Progress::Indeterminate { bytes: written }),
            }
        }
        tmp.flush().context("download: flush temp file")?;

        let file_name = file_name_for(&request.video_id);
        let path = self.dir.join(&file_name);
        tmp.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("download: move into {}", path.display()))?;

        let record = DownloadRecord {
            video_id: request.video_id.clone(),
            file_path: path.to_string_lossy().to_string(),
            file_name,
            size_bytes: written as i64,
            checksum: hex::encode(hasher.finalize()),
            downloaded_at: Utc::now(),
        };
        self.store.record_download(record.clone())?;
        log::info!(
            "downloaded {} ({} bytes) to {}",
            record.video_id,
            record.size_bytes,
            record.file_path
        );
        emit(Progress::Done(record.clone()));
        Ok(record)
    }
}

struct Job {
    request: Request,
    tx: Sender<Progress>,
}

/// Runs downloads on background workers; each job reports on its own channel.
pub struct Manager {
    downloader: Arc<Downloader>,
    jobs: Sender<Job>,
    stop: Sender<()>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>, cfg: Config) -> Result<Self> {
        let workers = cfg.workers.max(1);
        let downloader = Arc::new(Downloader::new(store, cfg)?);
        let (job_tx, job_rx) = unbounded::<Job>();
        let (stop_tx, stop_rx) = unbounded::<()>();

        let mut handles = Vec::new();
        for _ in 0..workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker = downloader.clone();
            handles.push(thread::spawn(move || run_worker(&worker, rx_jobs, rx_stop)));
        }

        Ok(Self {
            downloader,
            jobs: job_tx,
            stop: stop_tx,
            handles,
        })
    }

    pub fn enqueue(&self, request: Request) -> Receiver<Progress> {
        let (tx, rx) = unbounded();
        let _ = self.jobs.send(Job { request, tx });
        rx
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(downloader: &Downloader, jobs: Receiver<Job>, stop: Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(jobs) -> msg => {
                match msg {
                    Ok(job) => process(downloader, job),
                    Err(_) => break,
                }
            }
        }
    }
}

fn process(downloader: &Downloader, job: Job) {
    let tx = job.tx.clone();
    let mut emit = |progress: Progress| {
        let _ = tx.send(progress);
    };
    if let Err(err) = downloader.fetch(&job.request, &mut emit) {
        log::warn!("download of {} failed: {err:#}", job.request.video_id);
        let _ = job.tx.send(Progress::Failed(format!("{err:#}")));
    }
}

/// Downloads on the current thread, drawing an `indicatif` bar (or a spinner when the
/// length is unknown) on stderr.
pub fn run_with_progress_bar(downloader: &Downloader, request: &Request) -> Result<DownloadRecord> {
    let mut bar: Option<ProgressBar> = None;
    let mut emit = |progress: Progress| match progress {
        Progress::Percent(percent) => {
            let bar = bar.get_or_insert_with(|| {
                let bar = ProgressBar::new(100);
                if let Ok(style) =
                    ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos:>3}%")
                {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar.set_message(format!("otogram_{}", request.video_id));
                bar
            });
            bar.set_position(u64::from(percent));
        }
        Progress::Indeterminate { bytes } => {
            let bar = bar.get_or_insert_with(|| {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {bytes}") {
                    bar.set_style(style);
                }
                bar.set_message(format!("otogram_{}", request.video_id));
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            });
            bar.set_position(bytes);
        }
        Progress::Done(ref record) => {
            if let Some(bar) = bar.take() {
                bar.finish_with_message(format!("saved {}", record.file_path));
            }
        }
        Progress::Failed(_) => {
            if let Some(bar) = bar.take() {
                bar.abandon();
            }
        }
    };
    downloader.fetch(request, &mut emit)
}

/// Ids that need no escaping keep their plain name. Any other id gets a short
/// sha1 suffix so that distinct ids never share a file.
pub fn file_name_for(video_id: &str) -> String {
    let safe: String = video_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if safe == video_id && !safe.is_empty() {
        return format!("otogram_{safe}.mp4");
    }
    let digest = hex::encode(Sha1::digest(video_id.as_bytes()));
    format!("otogram_{safe}_{}.mp4", &digest[..8])
}

pub fn default_download_dir() -> Option<PathBuf> {
    dirs::download_dir()
        .map(|dir| dir.join("otogram"))
        .or_else(|| dirs::data_dir().map(|dir| dir.join("otogram").join("downloads")))
}
