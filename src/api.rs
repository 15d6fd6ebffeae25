use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::blocking::{multipart, Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "http://localhost:5000";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("could not reach the server: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },
    #[error("unexpected response from server: {0}")]
    Decode(String),
    #[error("server payload does not match the expected schema: {0}")]
    Schema(String),
    #[error("upload cancelled")]
    Cancelled,
    #[error("{0}")]
    Local(String),
}

#[cfg(test)]
impl ApiError {
    pub(crate) fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Creator,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Creator, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Creator => "creator",
            Role::Admin => "admin",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Creator => "Creator",
            Role::Admin => "Admin",
        }
    }

    pub fn can_upload(&self) -> bool {
        matches!(self, Role::Creator | Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserRef {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, rename = "profileImage")]
    pub profile_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, rename = "profileImage")]
    pub profile_image: String,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn as_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            username: self.username.clone(),
            profile_image: self.profile_image.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Video {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub user: UserRef,
    #[serde(rename = "videoUrl")]
    pub video_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub replies: Vec<Video>,
    #[serde(default, rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub views: i64,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Video {
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }

    /// Checks the parent back-references of nested replies.
    ///
    /// A nested reply that omits `replyTo` inherits its structural parent; one that names a
    /// different parent is rejected.
    fn link_replies(&mut self) -> Result<(), ApiError> {
        for reply in &mut self.replies {
            match reply.reply_to.as_deref() {
                None => reply.reply_to = Some(self.id.clone()),
                Some(parent) if parent == self.id => {}
                Some(parent) => {
                    return Err(ApiError::Schema(format!(
                        "reply {} is nested under {} but references parent {}",
                        reply.id, self.id, parent
                    )))
                }
            }
            if !reply.replies.is_empty() {
                return Err(ApiError::Schema(format!(
                    "reply {} carries nested replies",
                    reply.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProfileStats {
    #[serde(default, rename = "videosCount")]
    pub videos_count: i64,
    #[serde(default, rename = "repliesCount")]
    pub replies_count: i64,
    #[serde(default, rename = "totalLikes")]
    pub total_likes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Profile {
    pub user: User,
    #[serde(default)]
    pub videos: Vec<Video>,
    #[serde(default)]
    pub replies: Vec<Video>,
    #[serde(default)]
    pub stats: ProfileStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub description: String,
    pub reply_to: Option<String>,
    pub mime: String,
}

#[derive(Deserialize)]
struct MeResponse {
    #[serde(default)]
    user: Option<User>,
}

#[derive(Deserialize)]
struct LikeResponse {
    liked: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UsersEnvelope {
    Wrapped { users: Vec<User> },
    Bare(Vec<User>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VideoEnvelope {
    Wrapped { video: Video },
    Bare(Video),
}

#[derive(Deserialize)]
struct UsernameResponse {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Deserialize)]
struct ProfileImageResponse {
    #[serde(default, rename = "profileImage")]
    profile_image: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    transfer: HttpClient,
    user_agent: String,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            anyhow::bail!("api client user agent required");
        }
        let base_url = if config.base_url.trim().is_empty() {
            DEFAULT_API_BASE.to_string()
        } else {
            config.base_url.trim().trim_end_matches('/').to_string()
        };
        let parsed = url::Url::parse(&base_url)
            .map_err(|err| anyhow::anyhow!("invalid api base url {base_url:?}: {err}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("api base url must be http or https, got {}", parsed.scheme());
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(30)))
                .build()?,
        };
        // Uploads and downloads run as long as the body keeps flowing.
        let transfer = HttpClient::builder()
            .timeout(None)
            .connect_timeout(Duration::from_secs(15))
            .build()?;

        Ok(Client {
            http,
            transfer,
            user_agent: config.user_agent,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token.filter(|value| !value.trim().is_empty());
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(USER_AGENT, &self.user_agent);
        match self.token.read().as_ref() {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = self
            .authorize(builder)
            .send()
            .map_err(ApiError::Transport)?;
        check_status(response)
    }

    fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(builder)?;
        decode(response)
    }

    pub fn me(&self) -> Result<User, ApiError> {
        let body: MeResponse = self.send_json(self.http.get(self.url("/api/auth/me")))?;
        body.user
            .ok_or_else(|| ApiError::Schema("session response has no user".into()))
    }

    pub fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        self.send_json(self.http.post(self.url("/api/auth/login")).json(credentials))
    }

    pub fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        self.send_json(
            self.http
                .post(self.url("/api/auth/register"))
                .json(registration),
        )
    }

    pub fn list_videos(&self) -> Result<Vec<Video>, ApiError> {
        let mut videos: Vec<Video> = self.send_json(self.http.get(self.url("/api/videos")))?;
        for video in &mut videos {
            video.link_replies()?;
        }
        Ok(videos)
    }

    /// Toggles the like of the signed-in user and returns the server's resulting state.
    pub fn toggle_like(&self, video_id: &str) -> Result<bool, ApiError> {
        let path = format!("/api/videos/{}/like", encode_segment(video_id));
        let body: LikeResponse = self.send_json(self.http.post(self.url(&path)))?;
        Ok(body.liked)
    }

    pub fn delete_video(&self, video_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/videos/{}", encode_segment(video_id));
        self.send(self.http.delete(self.url(&path)))?;
        Ok(())
    }

    pub fn upload_video<F>(
        &self,
        request: &UploadRequest,
        cancel: Arc<AtomicBool>,
        on_progress: F,
    ) -> Result<Video, ApiError>
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        let file = File::open(&request.path)
            .map_err(|err| ApiError::Local(format!("open {}: {err}", request.path.display())))?;
        let total = file
            .metadata()
            .map_err(|err| ApiError::Local(format!("stat {}: {err}", request.path.display())))?
            .len();
        let reader = ProgressReader {
            inner: file,
            sent: 0,
            total,
            cancel: cancel.clone(),
            on_progress: Box::new(on_progress),
        };
        let part = multipart::Part::reader_with_length(reader, total)
            .file_name(file_name_of(&request.path))
            .mime_str(&request.mime)
            .map_err(|err| ApiError::Local(format!("invalid content type: {err}")))?;

        let mut form = multipart::Form::new()
            .part("video", part)
            .text("description", request.description.trim().to_string());
        let path = match request.reply_to.as_deref() {
            Some(parent) => {
                form = form.text("replyToId", parent.to_string());
                format!("/api/videos/reply/{}", encode_segment(parent))
            }
            None => "/api/videos/upload".to_string(),
        };

        let result = self
            .authorize(self.transfer.post(self.url(&path)).multipart(form))
            .send();
        if cancel.load(Ordering::SeqCst) {
            return Err(ApiError::Cancelled);
        }
        let response = check_status(result.map_err(ApiError::Transport)?)?;
        let envelope: VideoEnvelope = decode(response)?;
        Ok(match envelope {
            VideoEnvelope::Wrapped { video } | VideoEnvelope::Bare(video) => video,
        })
    }

    pub fn profile(&self, username: &str) -> Result<Profile, ApiError> {
        let path = format!("/api/users/profile/{}", encode_segment(username));
        let profile: Profile = self.send_json(self.http.get(self.url(&path)))?;
        if let Some(orphan) = profile.replies.iter().find(|reply| reply.reply_to.is_none()) {
            return Err(ApiError::Schema(format!(
                "profile reply {} has no replyTo field",
                orphan.id
            )));
        }
        Ok(profile)
    }

    pub fn liked_videos(&self) -> Result<Vec<Video>, ApiError> {
        self.send_json(self.http.get(self.url("/api/users/me/liked-videos")))
    }

    pub fn update_username(&self, username: &str) -> Result<String, ApiError> {
        let body: UsernameResponse = self.send_json(
            self.http
                .patch(self.url("/api/users/me/update-username"))
                .json(&serde_json::json!({ "username": username })),
        )?;
        body.username
            .or_else(|| body.user.map(|user| user.username))
            .ok_or_else(|| ApiError::Schema("username update returned no username".into()))
    }

    pub fn update_profile_image(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ApiError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|err| ApiError::Local(format!("invalid content type: {err}")))?;
        let form = multipart::Form::new().part("profileImage", part);
        let body: ProfileImageResponse = self.send_json(
            self.transfer
                .post(self.url("/api/users/me/update-profile-image"))
                .multipart(form),
        )?;
        body.profile_image
            .or_else(|| body.user.map(|user| user.profile_image))
            .ok_or_else(|| ApiError::Schema("profile image update returned no image".into()))
    }

    pub fn list_users(&self) -> Result<Vec<User>, ApiError> {
        let envelope: UsersEnvelope = self.send_json(self.http.get(self.url("/api/users")))?;
        Ok(match envelope {
            UsersEnvelope::Wrapped { users } | UsersEnvelope::Bare(users) => users,
        })
    }

    pub fn update_role(&self, user_id: &str, role: Role) -> Result<(), ApiError> {
        let path = format!("/api/users/role/{}", encode_segment(user_id));
        self.send(
            self.http
                .patch(self.url(&path))
                .json(&serde_json::json!({ "role": role })),
        )?;
        Ok(())
    }

    pub fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/users/{}", encode_segment(user_id));
        self.send(self.http.delete(self.url(&path)))?;
        Ok(())
    }
}

struct ProgressReader {
    inner: File,
    sent: u64,
    total: u64,
    cancel: Arc<AtomicBool>,
    on_progress: Box<dyn FnMut(u64, u64) + Send>,
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "upload cancelled"));
        }
        let read = self.inner.read(buf)?;
        self.sent = self.sent.saturating_add(read as u64);
        (self.on_progress)(self.sent, self.total);
        Ok(read)
    }
}

pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) as f64 / total as f64) * 100.0).round() as u8
}

fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ApiError::Rejected {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().map_err(ApiError::Transport)?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed
            .error
            .or(parsed.message)
            .filter(|msg| !msg.trim().is_empty())
        {
            return message.trim().to_string();
        }
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "video.mp4".to_string())
}
