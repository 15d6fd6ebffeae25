//! Optimistic local edits with snapshots so that a failed request can be undone.
//!
//! Each `apply_*` function patches local state immediately and returns the [`Pending`]
//! snapshot; the caller keeps it keyed by request until the worker reports back, then
//! either drops it or hands it to one of the `restore_*` methods.

use crate::api::{Role, User, Video};
use crate::feed::Navigator;

#[derive(Debug, Clone, PartialEq)]
pub enum Pending {
    Like {
        video_id: String,
        previous_likes: Vec<String>,
    },
    RemovedVideo {
        index: usize,
        video: Video,
    },
    RemovedReply {
        parent_id: String,
        index: usize,
        reply: Video,
    },
    RoleChange {
        user_id: String,
        previous: Role,
    },
    RemovedUsers {
        removed: Vec<(usize, User)>,
    },
}

/// Flips `user_id`'s like on the video or reply `video_id`.
pub fn apply_like(nav: &mut Navigator, video_id: &str, user_id: &str) -> Option<Pending> {
    let video = nav.find_mut(video_id)?;
    let previous_likes = video.likes.clone();
    toggle_membership(&mut video.likes, user_id);
    Some(Pending::Like {
        video_id: video_id.to_string(),
        previous_likes,
    })
}

/// Makes local state agree with the server's answer when it differs from the guess.
pub fn reconcile_like(nav: &mut Navigator, video_id: &str, user_id: &str, liked: bool) {
    if let Some(video) = nav.find_mut(video_id) {
        let present = video.likes.iter().any(|id| id == user_id);
        if present != liked {
            toggle_membership(&mut video.likes, user_id);
        }
    }
}

fn toggle_membership(likes: &mut Vec<String>, user_id: &str) {
    if let Some(pos) = likes.iter().position(|id| id == user_id) {
        likes.remove(pos);
    } else {
        likes.push(user_id.to_string());
    }
}

pub fn apply_delete_video(nav: &mut Navigator, video_id: &str) -> Option<Pending> {
    let (index, video) = nav.remove_video(video_id)?;
    Some(Pending::RemovedVideo { index, video })
}

pub fn apply_delete_reply(nav: &mut Navigator, parent_id: &str, reply_id: &str) -> Option<Pending> {
    let (index, reply) = nav.remove_reply(parent_id, reply_id)?;
    Some(Pending::RemovedReply {
        parent_id: parent_id.to_string(),
        index,
        reply,
    })
}

/// Removes a video from a plain list such as a profile tab.
pub fn apply_remove_from_list(list: &mut Vec<Video>, video_id: &str) -> Option<Pending> {
    let index = list.iter().position(|video| video.id == video_id)?;
    let video = list.remove(index);
    Some(Pending::RemovedVideo { index, video })
}

pub fn apply_role_change(users: &mut [User], user_id: &str, role: Role) -> Option<Pending> {
    let user = users.iter_mut().find(|user| user.id == user_id)?;
    let previous = user.role;
    user.role = role;
    Some(Pending::RoleChange {
        user_id: user_id.to_string(),
        previous,
    })
}

pub fn apply_delete_users(users: &mut Vec<User>, ids: &[String]) -> Option<Pending> {
    let mut removed = Vec::new();
    let mut original_index = 0;
    users.retain(|user| {
        let keep = !ids.contains(&user.id);
        if !keep {
            removed.push((original_index, user.clone()));
        }
        original_index += 1;
        keep
    });
    (!removed.is_empty()).then_some(Pending::RemovedUsers { removed })
}

impl Pending {
    pub fn restore_feed(self, nav: &mut Navigator) {
        match self {
            Pending::Like {
                video_id,
                previous_likes,
            } => {
                if let Some(video) = nav.find_mut(&video_id) {
                    video.likes = previous_likes;
                }
            }
            Pending::RemovedVideo { index, video } => nav.insert_video(index, video),
            Pending::RemovedReply {
                parent_id,
                index,
                reply,
            } => {
                nav.insert_reply(&parent_id, index, reply);
            }
            other => log::debug!("snapshot {other:?} does not apply to the feed"),
        }
    }

    pub fn restore_list(self, list: &mut Vec<Video>) {
        match self {
            Pending::RemovedVideo { index, video } | Pending::RemovedReply { index, reply: video, .. } => {
                let index = index.min(list.len());
                list.insert(index, video);
            }
            other => log::debug!("snapshot {other:?} does not apply to a video list"),
        }
    }

    pub fn restore_users(self, users: &mut Vec<User>) {
        match self {
            Pending::RoleChange { user_id, previous } => {
                if let Some(user) = users.iter_mut().find(|user| user.id == user_id) {
                    user.role = previous;
                }
            }
            Pending::RemovedUsers { removed } => {
                for (index, user) in removed {
                    let index = index.min(users.len());
                    users.insert(index, user);
                }
            }
            other => log::debug!("snapshot {other:?} does not apply to users"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, likes: &[&str], replies: &[&str]) -> Video {
        Video {
            id: id.into(),
            video_url: format!("/{id}.mp4"),
            likes: likes.iter().map(|s| s.to_string()).collect(),
            replies: replies
                .iter()
                .map(|reply| Video {
                    id: (*reply).into(),
                    video_url: format!("/{reply}.mp4"),
                    reply_to: Some(id.into()),
                    ..Video::default()
                })
                .collect(),
            ..Video::default()
        }
    }

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.into(),
            username: id.into(),
            role,
            ..User::default()
        }
    }

    #[test]
    fn like_flips_before_response_and_survives_success() {
        let mut nav = Navigator::new(vec![video("v1", &[], &[])]);
        let pending = apply_like(&mut nav, "v1", "me").unwrap();
        assert!(nav.find("v1").unwrap().is_liked_by("me"));
        reconcile_like(&mut nav, "v1", "me", true);
        drop(pending);
        assert!(nav.find("v1").unwrap().is_liked_by("me"));
    }

    #[test]
    fn like_failure_restores_previous_state() {
        let mut nav = Navigator::new(vec![video("v1", &["other"], &["r1"])]);
        let pending = apply_like(&mut nav, "r1", "me").unwrap();
        assert!(nav.find("r1").unwrap().is_liked_by("me"));
        pending.restore_feed(&mut nav);
        assert!(!nav.find("r1").unwrap().is_liked_by("me"));

        let pending = apply_like(&mut nav, "v1", "other").unwrap();
        assert!(nav.find("v1").unwrap().likes.is_empty());
        pending.restore_feed(&mut nav);
        assert_eq!(nav.find("v1").unwrap().likes, vec!["other".to_string()]);
    }

    #[test]
    fn server_disagreement_wins() {
        let mut nav = Navigator::new(vec![video("v1", &[], &[])]);
        apply_like(&mut nav, "v1", "me").unwrap();
        reconcile_like(&mut nav, "v1", "me", false);
        assert!(!nav.find("v1").unwrap().is_liked_by("me"));
    }

    #[test]
    fn deleted_video_is_reinserted_in_place() {
        let mut nav = Navigator::new(vec![
            video("a", &[], &[]),
            video("b", &[], &["r"]),
            video("c", &[], &[]),
        ]);
        let pending = apply_delete_video(&mut nav, "b").unwrap();
        assert!(nav.find("r").is_none());
        pending.restore_feed(&mut nav);
        let ids: Vec<&str> = nav.videos().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(nav.find("r").is_some());
        assert!(apply_delete_video(&mut nav, "zzz").is_none());
    }

    #[test]
    fn deleted_reply_is_reinserted_in_place() {
        let mut nav = Navigator::new(vec![video("p", &[], &["r1", "r2", "r3"])]);
        let pending = apply_delete_reply(&mut nav, "p", "r2").unwrap();
        assert_eq!(nav.reply_count(), 2);
        pending.restore_feed(&mut nav);
        let ids: Vec<&str> = nav.videos()[0]
            .replies
            .iter()
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn list_removal_rolls_back() {
        let mut list = vec![video("a", &[], &[]), video("b", &[], &[])];
        let pending = apply_remove_from_list(&mut list, "a").unwrap();
        assert_eq!(list.len(), 1);
        pending.restore_list(&mut list);
        assert_eq!(list[0].id, "a");
    }

    #[test]
    fn admin_changes_roll_back() {
        let mut users = vec![
            user("a", Role::User),
            user("b", Role::Creator),
            user("c", Role::Admin),
            user("d", Role::User),
        ];
        let pending = apply_role_change(&mut users, "a", Role::Creator).unwrap();
        assert_eq!(users[0].role, Role::Creator);
        pending.restore_users(&mut users);
        assert_eq!(users[0].role, Role::User);

        let pending = apply_delete_users(&mut users, &["b".into(), "d".into()]).unwrap();
        assert_eq!(users.len(), 2);
        pending.restore_users(&mut users);
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        assert!(apply_delete_users(&mut users, &["nobody".into()]).is_none());
    }
}
