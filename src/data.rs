use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::api::{self, ApiError, AuthResponse, Credentials, Profile, Registration, Role, User, Video};

pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

pub trait AuthService: Send + Sync {
    fn set_token(&self, token: Option<String>);
    fn me(&self) -> Result<User>;
    fn login(&self, credentials: &Credentials) -> Result<AuthResponse>;
    fn register(&self, registration: &Registration) -> Result<AuthResponse>;
}

pub trait FeedService: Send + Sync {
    fn load_feed(&self) -> Result<Vec<Video>>;
}

pub trait InteractionService: Send + Sync {
    /// Returns whether the video is liked after the toggle.
    fn toggle_like(&self, video_id: &str) -> Result<bool>;
    fn delete_video(&self, video_id: &str) -> Result<()>;
}

pub trait UploadService: Send + Sync {
    fn upload(
        &self,
        request: &api::UploadRequest,
        cancel: Arc<AtomicBool>,
        on_progress: ProgressFn,
    ) -> Result<Video>;
}

pub trait ProfileService: Send + Sync {
    fn load_profile(&self, username: &str) -> Result<Profile>;
    fn liked_videos(&self) -> Result<Vec<Video>>;
    fn update_username(&self, username: &str) -> Result<String>;
    fn update_profile_image(&self, file_name: &str, mime: &str, bytes: Vec<u8>) -> Result<String>;
}

pub trait AdminService: Send + Sync {
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_role(&self, user_id: &str, role: Role) -> Result<()>;
    fn delete_user(&self, user_id: &str) -> Result<()>;
}

/// Every service seam the screens need, bundled for hand-off to the model.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn AuthService>,
    pub feed: Arc<dyn FeedService>,
    pub interaction: Arc<dyn InteractionService>,
    pub upload: Arc<dyn UploadService>,
    pub profile: Arc<dyn ProfileService>,
    pub admin: Arc<dyn AdminService>,
}

impl Services {
    pub fn rest(client: Arc<api::Client>) -> Self {
        let rest = Arc::new(RestService::new(client));
        Services {
            auth: rest.clone(),
            feed: rest.clone(),
            interaction: rest.clone(),
            upload: rest.clone(),
            profile: rest.clone(),
            admin: rest,
        }
    }

    pub fn mock(backend: Arc<MockBackend>) -> Self {
        Services {
            auth: backend.clone(),
            feed: backend.clone(),
            interaction: backend.clone(),
            upload: backend.clone(),
            profile: backend.clone(),
            admin: backend,
        }
    }
}

pub struct RestService {
    client: Arc<api::Client>,
}

impl RestService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AuthService for RestService {
    fn set_token(&self, token: Option<String>) {
        self.client.set_token(token);
    }

    fn me(&self) -> Result<User> {
        self.client.me().context("verify session")
    }

    fn login(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.client.login(credentials).context("sign in")
    }

    fn register(&self, registration: &Registration) -> Result<AuthResponse> {
        self.client.register(registration).context("create account")
    }
}

impl FeedService for RestService {
    fn load_feed(&self) -> Result<Vec<Video>> {
        let mut videos = self.client.list_videos().context("fetch videos")?;
        videos.shuffle(&mut rand::thread_rng());
        Ok(videos)
    }
}

impl InteractionService for RestService {
    fn toggle_like(&self, video_id: &str) -> Result<bool> {
        self.client
            .toggle_like(video_id)
            .with_context(|| format!("like video {video_id}"))
    }

    fn delete_video(&self, video_id: &str) -> Result<()> {
        self.client
            .delete_video(video_id)
            .with_context(|| format!("delete video {video_id}"))
    }
}

impl UploadService for RestService {
    fn upload(
        &self,
        request: &api::UploadRequest,
        cancel: Arc<AtomicBool>,
        on_progress: ProgressFn,
    ) -> Result<Video> {
        self.client
            .upload_video(request, cancel, on_progress)
            .context("upload video")
    }
}

impl ProfileService for RestService {
    fn load_profile(&self, username: &str) -> Result<Profile> {
        self.client
            .profile(username)
            .with_context(|| format!("fetch profile {username}"))
    }

    fn liked_videos(&self) -> Result<Vec<Video>> {
        self.client.liked_videos().context("fetch liked videos")
    }

    fn update_username(&self, username: &str) -> Result<String> {
        self.client
            .update_username(username)
            .context("update username")
    }

    fn update_profile_image(&self, file_name: &str, mime: &str, bytes: Vec<u8>) -> Result<String> {
        self.client
            .update_profile_image(file_name, mime, bytes)
            .context("update profile image")
    }
}

impl AdminService for RestService {
    fn list_users(&self) -> Result<Vec<User>> {
        self.client.list_users().context("fetch users")
    }

    fn update_role(&self, user_id: &str, role: Role) -> Result<()> {
        self.client
            .update_role(user_id, role)
            .with_context(|| format!("change role of {user_id}"))
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        self.client
            .delete_user(user_id)
            .with_context(|| format!("delete user {user_id}"))
    }
}

/// In-memory backend for offline use and tests.
///
/// Holds one signed-in account (`password` is the password for every seeded user) and
/// a small feed. `fail_next` makes the following call fail with a rejected response.
pub struct MockBackend {
    state: Mutex<MockState>,
    fail_next: AtomicBool,
}

struct MockState {
    token: Option<String>,
    me: Option<User>,
    users: Vec<User>,
    videos: Vec<Video>,
    next_id: u64,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_videos(sample_videos())
    }
}

impl MockBackend {
    pub fn with_videos(videos: Vec<Video>) -> Self {
        MockBackend {
            state: Mutex::new(MockState {
                token: None,
                me: None,
                users: sample_users(),
                videos,
                next_id: 1,
            }),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn videos(&self) -> Vec<Video> {
        self.state.lock().videos.clone()
    }

    pub fn users(&self) -> Vec<User> {
        self.state.lock().users.clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            bail!(ApiError::Rejected {
                status: 500,
                message: "mock failure".into(),
            });
        }
        Ok(())
    }

    fn signed_in(&self) -> Result<User> {
        self.state.lock().me.clone().ok_or_else(|| {
            ApiError::Rejected {
                status: 401,
                message: "Not authorized".into(),
            }
            .into()
        })
    }
}

impl AuthService for MockBackend {
    fn set_token(&self, token: Option<String>) {
        let mut state = self.state.lock();
        if token.is_none() {
            state.me = None;
        }
        state.token = token;
    }

    fn me(&self) -> Result<User> {
        self.check()?;
        let mut state = self.state.lock();
        let token = state.token.clone().ok_or(ApiError::Rejected {
            status: 401,
            message: "No token".into(),
        })?;
        let user = state
            .users
            .iter()
            .find(|user| format!("mock-{}", user.id) == token)
            .cloned()
            .ok_or(ApiError::Rejected {
                status: 401,
                message: "Token is not valid".into(),
            })?;
        state.me = Some(user.clone());
        Ok(user)
    }

    fn login(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.check()?;
        let mut state = self.state.lock();
        let user = state
            .users
            .iter()
            .find(|user| user.email == credentials.email)
            .cloned()
            .filter(|_| credentials.password == "password")
            .ok_or(ApiError::Rejected {
                status: 400,
                message: "Invalid credentials".into(),
            })?;
        let token = format!("mock-{}", user.id);
        state.token = Some(token.clone());
        state.me = Some(user.clone());
        Ok(AuthResponse { token, user })
    }

    fn register(&self, registration: &Registration) -> Result<AuthResponse> {
        self.check()?;
        let mut state = self.state.lock();
        if state
            .users
            .iter()
            .any(|user| user.username == registration.username || user.email == registration.email)
        {
            bail!(ApiError::Rejected {
                status: 400,
                message: "User already exists".into(),
            });
        }
        let user = User {
            id: format!("u{}", state.users.len() + 1),
            username: registration.username.clone(),
            email: registration.email.clone(),
            role: Role::User,
            profile_image: String::new(),
            created_at: Some(Utc::now()),
        };
        state.users.push(user.clone());
        let token = format!("mock-{}", user.id);
        state.token = Some(token.clone());
        state.me = Some(user.clone());
        Ok(AuthResponse { token, user })
    }
}

impl FeedService for MockBackend {
    fn load_feed(&self) -> Result<Vec<Video>> {
        self.check()?;
        Ok(self.videos())
    }
}

impl InteractionService for MockBackend {
    fn toggle_like(&self, video_id: &str) -> Result<bool> {
        self.check()?;
        let me = self.signed_in()?;
        let mut state = self.state.lock();
        let video = find_video_mut(&mut state.videos, video_id)
            .ok_or_else(|| anyhow::anyhow!("video {video_id} not found"))?;
        if let Some(pos) = video.likes.iter().position(|id| *id == me.id) {
            video.likes.remove(pos);
            Ok(false)
        } else {
            video.likes.push(me.id);
            Ok(true)
        }
    }

    fn delete_video(&self, video_id: &str) -> Result<()> {
        self.check()?;
        self.signed_in()?;
        let mut state = self.state.lock();
        let before = count_videos(&state.videos);
        state.videos.retain(|video| video.id != video_id);
        for video in &mut state.videos {
            video.replies.retain(|reply| reply.id != video_id);
        }
        if count_videos(&state.videos) == before {
            bail!(ApiError::Rejected {
                status: 404,
                message: "Video not found".into(),
            });
        }
        Ok(())
    }
}

impl UploadService for MockBackend {
    fn upload(
        &self,
        request: &api::UploadRequest,
        cancel: Arc<AtomicBool>,
        mut on_progress: ProgressFn,
    ) -> Result<Video> {
        self.check()?;
        let me = self.signed_in()?;
        let total = std::fs::metadata(&request.path)
            .map(|meta| meta.len())
            .unwrap_or(0);
        if cancel.load(Ordering::SeqCst) {
            bail!(ApiError::Cancelled);
        }
        on_progress(total, total);

        let mut state = self.state.lock();
        let id = format!("mock-video-{}", state.next_id);
        state.next_id += 1;
        let video = Video {
            id: id.clone(),
            user: me.as_ref(),
            video_url: format!("/uploads/{id}.mp4"),
            description: request.description.trim().to_string(),
            reply_to: request.reply_to.clone(),
            created_at: Some(Utc::now()),
            ..Video::default()
        };
        match request.reply_to.as_deref() {
            Some(parent) => {
                let parent = state
                    .videos
                    .iter_mut()
                    .find(|video| video.id == parent)
                    .ok_or_else(|| anyhow::anyhow!("parent video {parent} not found"))?;
                parent.replies.push(video.clone());
            }
            None => state.videos.insert(0, video.clone()),
        }
        Ok(video)
    }
}

impl ProfileService for MockBackend {
    fn load_profile(&self, username: &str) -> Result<Profile> {
        self.check()?;
        let state = self.state.lock();
        let user = state
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned()
            .ok_or(ApiError::Rejected {
                status: 404,
                message: "User not found".into(),
            })?;
        let videos: Vec<Video> = state
            .videos
            .iter()
            .filter(|video| video.user.id == user.id)
            .cloned()
            .collect();
        let replies: Vec<Video> = state
            .videos
            .iter()
            .flat_map(|video| video.replies.iter())
            .filter(|reply| reply.user.id == user.id)
            .cloned()
            .collect();
        let total_likes = videos
            .iter()
            .chain(replies.iter())
            .map(|video| video.likes.len() as i64)
            .sum();
        Ok(Profile {
            stats: api::ProfileStats {
                videos_count: videos.len() as i64,
                replies_count: replies.len() as i64,
                total_likes,
            },
            user,
            videos,
            replies,
        })
    }

    fn liked_videos(&self) -> Result<Vec<Video>> {
        self.check()?;
        let me = self.signed_in()?;
        let state = self.state.lock();
        Ok(state
            .videos
            .iter()
            .filter(|video| video.is_liked_by(&me.id))
            .cloned()
            .collect())
    }

    fn update_username(&self, username: &str) -> Result<String> {
        self.check()?;
        let me = self.signed_in()?;
        let mut state = self.state.lock();
        if state
            .users
            .iter()
            .any(|user| user.username == username && user.id != me.id)
        {
            bail!(ApiError::Rejected {
                status: 400,
                message: "Username is already taken".into(),
            });
        }
        rename_user(&mut state, &me.id, |user| user.username = username.to_string());
        Ok(username.to_string())
    }

    fn update_profile_image(&self, file_name: &str, _mime: &str, _bytes: Vec<u8>) -> Result<String> {
        self.check()?;
        let me = self.signed_in()?;
        let path = format!("/uploads/profiles/{file_name}");
        let mut state = self.state.lock();
        rename_user(&mut state, &me.id, |user| user.profile_image = path.clone());
        Ok(path)
    }
}

impl AdminService for MockBackend {
    fn list_users(&self) -> Result<Vec<User>> {
        self.check()?;
        Ok(self.users())
    }

    fn update_role(&self, user_id: &str, role: Role) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock();
        let user = state
            .users
            .iter_mut()
            .find(|user| user.id == user_id)
            .ok_or_else(|| anyhow::anyhow!("user {user_id} not found"))?;
        user.role = role;
        Ok(())
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock();
        let before = state.users.len();
        state.users.retain(|user| user.id != user_id);
        if state.users.len() == before {
            bail!("user {user_id} not found");
        }
        Ok(())
    }
}

fn rename_user(state: &mut MockState, user_id: &str, apply: impl Fn(&mut User)) {
    for user in state.users.iter_mut().filter(|user| user.id == user_id) {
        apply(user);
    }
    if let Some(me) = state.me.as_mut() {
        apply(me);
    }
    let refreshed: HashMap<String, User> = state
        .users
        .iter()
        .map(|user| (user.id.clone(), user.clone()))
        .collect();
    for video in state.videos.iter_mut() {
        if let Some(user) = refreshed.get(&video.user.id) {
            video.user = user.as_ref();
        }
        for reply in video.replies.iter_mut() {
            if let Some(user) = refreshed.get(&reply.user.id) {
                reply.user = user.as_ref();
            }
        }
    }
}

fn find_video_mut<'a>(videos: &'a mut [Video], id: &str) -> Option<&'a mut Video> {
    for video in videos.iter_mut() {
        if video.id == id {
            return Some(video);
        }
        if let Some(reply) = video.replies.iter_mut().find(|reply| reply.id == id) {
            return Some(reply);
        }
    }
    None
}

fn count_videos(videos: &[Video]) -> usize {
    videos.iter().map(|video| 1 + video.replies.len()).sum()
}

fn sample_users() -> Vec<User> {
    let user = |id: &str, name: &str, role: Role| User {
        id: id.into(),
        username: name.into(),
        email: format!("{name}@otogram.test"),
        role,
        profile_image: String::new(),
        created_at: None,
    };
    vec![
        user("u1", "nour", Role::Creator),
        user("u2", "sam", Role::User),
        user("u3", "root", Role::Admin),
    ]
}

fn sample_videos() -> Vec<Video> {
    let owner = |id: &str, name: &str| api::UserRef {
        id: id.into(),
        username: name.into(),
        profile_image: String::new(),
    };
    vec![
        Video {
            id: "welcome".into(),
            user: owner("u1", "nour"),
            video_url: "/uploads/welcome.mp4".into(),
            description: "Welcome to Otogram".into(),
            likes: vec!["u2".into()],
            replies: vec![Video {
                id: "welcome-reply".into(),
                user: owner("u2", "sam"),
                video_url: "/uploads/welcome-reply.mp4".into(),
                description: "Hello back".into(),
                reply_to: Some("welcome".into()),
                ..Video::default()
            }],
            ..Video::default()
        },
        Video {
            id: "sunset".into(),
            user: owner("u1", "nour"),
            video_url: "/uploads/sunset.mp4".into(),
            description: "Sunset timelapse".into(),
            ..Video::default()
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in_backend() -> MockBackend {
        let backend = MockBackend::default();
        backend
            .login(&Credentials {
                email: "sam@otogram.test".into(),
                password: "password".into(),
            })
            .unwrap();
        backend
    }

    #[test]
    fn mock_like_toggles_membership() {
        let backend = signed_in_backend();
        assert!(backend.toggle_like("sunset").unwrap());
        assert!(!backend.toggle_like("sunset").unwrap());
        assert!(backend.toggle_like("welcome-reply").unwrap());
    }

    #[test]
    fn mock_failure_is_a_rejected_api_error() {
        let backend = signed_in_backend();
        backend.fail_next();
        let err = backend.toggle_like("sunset").unwrap_err();
        assert_eq!(err.downcast_ref::<ApiError>().and_then(ApiError::status), Some(500));
        assert!(backend.toggle_like("sunset").is_ok());
    }

    #[test]
    fn deleting_parent_removes_replies() {
        let backend = signed_in_backend();
        backend.delete_video("welcome").unwrap();
        let videos = backend.videos();
        assert_eq!(videos.len(), 1);
        assert!(backend.delete_video("welcome-reply").is_err());
    }

    #[test]
    fn me_requires_matching_token() {
        let backend = MockBackend::default();
        backend.set_token(Some("mock-u3".into()));
        assert_eq!(backend.me().unwrap().role, Role::Admin);
        backend.set_token(Some("bogus".into()));
        assert!(backend.me().is_err());
    }

    #[test]
    fn profile_collects_videos_and_replies() {
        let backend = MockBackend::default();
        let profile = backend.load_profile("sam").unwrap();
        assert!(profile.videos.is_empty());
        assert_eq!(profile.replies.len(), 1);
        assert_eq!(profile.stats.replies_count, 1);
    }

    #[test]
    fn rest_feed_is_shuffled_but_complete() {
        use crate::testing::{json_response, FakeServer};
        let server = FakeServer::start(|_| {
            json_response(
                200,
                r#"[{"_id":"a","videoUrl":"/a"},{"_id":"b","videoUrl":"/b"},{"_id":"c","videoUrl":"/c"}]"#,
            )
        });
        let client = api::Client::new(api::ClientConfig {
            base_url: server.base_url(),
            user_agent: "otogram-tests".into(),
            ..api::ClientConfig::default()
        })
        .unwrap();
        let services = Services::rest(Arc::new(client));
        let mut ids: Vec<String> = services
            .feed
            .load_feed()
            .unwrap()
            .into_iter()
            .map(|video| video.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
