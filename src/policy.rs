use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::api::{Role, User, Video};

pub const MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;
pub const MAX_PROFILE_IMAGE_BYTES: u64 = 5 * 1024 * 1024;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

pub const VIDEO_MIME_TYPES: [&str; 4] = [
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/webm",
];

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid username regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("sign in to continue")]
    NotSignedIn,
    #[error("you are not allowed to {0}")]
    Forbidden(&'static str),
    #[error("select a file first")]
    NoFile,
    #[error("{0} is empty")]
    EmptyFile(String),
    #[error("unsupported video type {0}; use MP4, MOV, AVI or WebM")]
    UnsupportedVideoType(String),
    #[error("video is {} MB; the limit is 100 MB", .0 / (1024 * 1024))]
    VideoTooLarge(u64),
    #[error("file is not an image")]
    NotAnImage,
    #[error("image is larger than 5 MB")]
    ImageTooLarge(u64),
    #[error("username must be at least 3 characters")]
    UsernameTooShort,
    #[error("username may only contain letters, numbers and underscores")]
    UsernameInvalid,
    #[error("password must be at least 6 characters")]
    PasswordTooShort,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("{0} is required")]
    MissingField(&'static str),
}

pub fn require_signed_in(user: Option<&User>) -> Result<&User, PolicyError> {
    user.ok_or(PolicyError::NotSignedIn)
}

pub fn can_upload(user: Option<&User>) -> Result<(), PolicyError> {
    let user = require_signed_in(user)?;
    if user.role.can_upload() {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("upload videos"))
    }
}

/// Any signed-in user may reply to a video.
pub fn can_reply(user: Option<&User>) -> Result<(), PolicyError> {
    require_signed_in(user).map(|_| ())
}

pub fn can_like(user: Option<&User>) -> Result<(), PolicyError> {
    require_signed_in(user).map(|_| ())
}

pub fn can_administer(user: Option<&User>) -> Result<(), PolicyError> {
    let user = require_signed_in(user)?;
    if user.role == Role::Admin {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("open the admin console"))
    }
}

pub fn can_delete_video(user: Option<&User>, video: &Video) -> Result<(), PolicyError> {
    let user = require_signed_in(user)?;
    if video.user.id == user.id {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("delete this video"))
    }
}

/// Replies may be removed by their author or by the owner of the parent video.
pub fn can_delete_reply(
    user: Option<&User>,
    reply: &Video,
    parent: &Video,
) -> Result<(), PolicyError> {
    let user = require_signed_in(user)?;
    if reply.user.id == user.id || parent.user.id == user.id {
        Ok(())
    } else {
        Err(PolicyError::Forbidden("delete this reply"))
    }
}

pub fn validate_username(username: &str) -> Result<(), PolicyError> {
    let username = username.trim();
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(PolicyError::UsernameTooShort);
    }
    if !USERNAME_RE.is_match(username) {
        return Err(PolicyError::UsernameInvalid);
    }
    Ok(())
}

pub fn validate_login(email: &str, password: &str) -> Result<(), PolicyError> {
    if email.trim().is_empty() {
        return Err(PolicyError::MissingField("email"));
    }
    if password.is_empty() {
        return Err(PolicyError::MissingField("password"));
    }
    Ok(())
}

pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
    confirm: &str,
) -> Result<(), PolicyError> {
    if username.trim().is_empty() {
        return Err(PolicyError::MissingField("username"));
    }
    validate_username(username)?;
    if email.trim().is_empty() {
        return Err(PolicyError::MissingField("email"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PolicyError::PasswordTooShort);
    }
    if password != confirm {
        return Err(PolicyError::PasswordMismatch);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub path: PathBuf,
    pub mime: &'static str,
    pub size: u64,
}

/// Checks a local file before it is offered for upload.
///
/// The type comes from the extension; content sniffing can veto it when the bytes are
/// clearly something else (an image, audio, an unsupported container).
pub fn validate_video_file(path: &Path) -> Result<VideoFile, PolicyError> {
    if path.as_os_str().is_empty() {
        return Err(PolicyError::NoFile);
    }
    let meta = fs::metadata(path).map_err(|_| PolicyError::NoFile)?;
    if !meta.is_file() {
        return Err(PolicyError::NoFile);
    }
    let size = meta.len();
    if size == 0 {
        return Err(PolicyError::EmptyFile(path.display().to_string()));
    }

    let by_extension = video_mime_for_extension(path)?;
    let mime = match tree_magic_mini::from_filepath(path) {
        Some(sniffed) if VIDEO_MIME_TYPES.contains(&sniffed) => sniffed,
        Some(sniffed) if vetoes_video(sniffed) => {
            return Err(PolicyError::UnsupportedVideoType(sniffed.to_string()))
        }
        _ => by_extension,
    };

    if size > MAX_VIDEO_BYTES {
        return Err(PolicyError::VideoTooLarge(size));
    }
    Ok(VideoFile {
        path: path.to_path_buf(),
        mime,
        size,
    })
}

fn vetoes_video(sniffed: &str) -> bool {
    sniffed.starts_with("video/")
        || sniffed.starts_with("image/")
        || sniffed.starts_with("audio/")
        || sniffed == "application/pdf"
        || sniffed == "application/zip"
}

fn video_mime_for_extension(path: &Path) -> Result<&'static str, PolicyError> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => Ok("video/mp4"),
        "mov" | "qt" => Ok("video/quicktime"),
        "avi" => Ok("video/x-msvideo"),
        "webm" => Ok("video/webm"),
        "" => Err(PolicyError::UnsupportedVideoType("unknown".into())),
        other => Err(PolicyError::UnsupportedVideoType(format!(".{other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

pub fn validate_profile_image(path: &Path) -> Result<ImageFile, PolicyError> {
    let meta = fs::metadata(path).map_err(|_| PolicyError::NoFile)?;
    if meta.len() > MAX_PROFILE_IMAGE_BYTES {
        return Err(PolicyError::ImageTooLarge(meta.len()));
    }
    let bytes = fs::read(path).map_err(|_| PolicyError::NoFile)?;
    if bytes.is_empty() {
        return Err(PolicyError::EmptyFile(path.display().to_string()));
    }
    let format = image::guess_format(&bytes).map_err(|_| PolicyError::NotAnImage)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "avatar".to_string());
    Ok(ImageFile {
        file_name,
        mime: format.to_mime_type(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UserRef;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.into(),
            username: format!("user_{id}"),
            role,
            ..User::default()
        }
    }

    fn video_by(owner: &str) -> Video {
        Video {
            id: format!("v-{owner}"),
            user: UserRef {
                id: owner.into(),
                ..UserRef::default()
            },
            video_url: "/v.mp4".into(),
            ..Video::default()
        }
    }

    #[test]
    fn upload_requires_creator_or_admin() {
        assert_eq!(can_upload(None), Err(PolicyError::NotSignedIn));
        assert!(can_upload(Some(&user("a", Role::User))).is_err());
        assert!(can_upload(Some(&user("a", Role::Creator))).is_ok());
        assert!(can_upload(Some(&user("a", Role::Admin))).is_ok());
        assert!(can_reply(Some(&user("a", Role::User))).is_ok());
    }

    #[test]
    fn reply_deletion_allows_author_and_parent_owner() {
        let parent = video_by("owner");
        let reply = video_by("replier");
        assert!(can_delete_reply(Some(&user("replier", Role::User)), &reply, &parent).is_ok());
        assert!(can_delete_reply(Some(&user("owner", Role::User)), &reply, &parent).is_ok());
        assert!(can_delete_reply(Some(&user("root", Role::Admin)), &reply, &parent).is_err());
        assert!(can_delete_reply(Some(&user("other", Role::Creator)), &reply, &parent).is_err());
    }

    #[test]
    fn video_deletion_requires_owner() {
        let video = video_by("owner");
        assert!(can_delete_video(Some(&user("owner", Role::User)), &video).is_ok());
        assert!(can_delete_video(Some(&user("other", Role::Creator)), &video).is_err());
        assert_eq!(
            can_delete_video(Some(&user("root", Role::Admin)), &video),
            Err(PolicyError::Forbidden("delete this video"))
        );
        assert_eq!(
            can_delete_video(None, &video),
            Err(PolicyError::NotSignedIn)
        );
    }

    #[test]
    fn usernames_are_checked() {
        assert_eq!(validate_username("ab"), Err(PolicyError::UsernameTooShort));
        assert_eq!(validate_username("bad name"), Err(PolicyError::UsernameInvalid));
        assert!(validate_username("good_name_1").is_ok());
    }

    #[test]
    fn registration_rules() {
        assert_eq!(
            validate_registration("nour", "n@x.test", "12345", "12345"),
            Err(PolicyError::PasswordTooShort)
        );
        assert_eq!(
            validate_registration("nour", "n@x.test", "123456", "123457"),
            Err(PolicyError::PasswordMismatch)
        );
        assert_eq!(
            validate_registration("nour", "", "123456", "123456"),
            Err(PolicyError::MissingField("email"))
        );
        assert!(validate_registration("nour", "n@x.test", "123456", "123456").is_ok());
    }

    #[test]
    fn video_files_are_checked_by_extension_and_content() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.mp4");
        assert_eq!(validate_video_file(&missing), Err(PolicyError::NoFile));

        let text = dir.path().join("notes.txt");
        fs::write(&text, b"hello").unwrap();
        assert!(matches!(
            validate_video_file(&text),
            Err(PolicyError::UnsupportedVideoType(_))
        ));

        let disguised = dir.path().join("clip.mp4");
        let mut png = PNG_MAGIC.to_vec();
        png.extend_from_slice(&[0u8; 64]);
        fs::write(&disguised, &png).unwrap();
        assert!(matches!(
            validate_video_file(&disguised),
            Err(PolicyError::UnsupportedVideoType(_))
        ));

        let mp4 = dir.path().join("real.mp4");
        let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        bytes.extend_from_slice(b"isomiso2");
        bytes.extend_from_slice(&[0u8; 512]);
        fs::write(&mp4, &bytes).unwrap();
        let checked = validate_video_file(&mp4).unwrap();
        assert!(VIDEO_MIME_TYPES.contains(&checked.mime));
        assert_eq!(checked.size, bytes.len() as u64);
    }

    #[test]
    fn profile_images_must_be_images() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("avatar.png");
        fs::write(&text, b"plain text").unwrap();
        assert_eq!(validate_profile_image(&text), Err(PolicyError::NotAnImage));

        let png = dir.path().join("me.png");
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(&png, &bytes).unwrap();
        let image = validate_profile_image(&png).unwrap();
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.file_name, "me.png");
    }
}
