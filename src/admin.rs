//! User list queries for the admin console: fuzzy search, role filter, ordering and counts.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::api::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Date,
    Name,
    Role,
}

impl SortKey {
    pub fn label(self) -> &'static str {
        match self {
            SortKey::Date => "date",
            SortKey::Name => "name",
            SortKey::Role => "role",
        }
    }

    pub fn next(self) -> Self {
        match self {
            SortKey::Date => SortKey::Name,
            SortKey::Name => SortKey::Role,
            SortKey::Role => SortKey::Date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuery {
    pub search: String,
    pub role: Option<Role>,
    pub sort: SortKey,
    pub descending: bool,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            role: None,
            sort: SortKey::Date,
            descending: true,
        }
    }
}

impl UserQuery {
    /// Cycles all → user → creator → admin → all.
    pub fn cycle_role(&mut self) {
        self.role = match self.role {
            None => Some(Role::User),
            Some(Role::User) => Some(Role::Creator),
            Some(Role::Creator) => Some(Role::Admin),
            Some(Role::Admin) => None,
        };
    }

    pub fn describe(&self) -> String {
        let role = self.role.map(|role| role.as_str()).unwrap_or("all");
        let order = if self.descending { "desc" } else { "asc" };
        format!("role: {role} · sort: {} {order}", self.sort.label())
    }
}

/// Indices into `users` that match `query`, in display order.
pub fn visible_users(users: &[User], query: &UserQuery) -> Vec<usize> {
    let matcher = SkimMatcherV2::default().ignore_case();
    let pattern = query.search.trim();
    let mut indices: Vec<usize> = users
        .iter()
        .enumerate()
        .filter(|(_, user)| query.role.map_or(true, |role| user.role == role))
        .filter(|(_, user)| {
            pattern.is_empty()
                || matcher.fuzzy_match(&user.username, pattern).is_some()
                || matcher.fuzzy_match(&user.email, pattern).is_some()
        })
        .map(|(index, _)| index)
        .collect();

    indices.sort_by(|&a, &b| {
        let ordering = compare(&users[a], &users[b], query.sort);
        if query.descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    indices
}

fn compare(a: &User, b: &User, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a
            .username
            .to_lowercase()
            .cmp(&b.username.to_lowercase()),
        SortKey::Role => a.role.as_str().cmp(b.role.as_str()),
        SortKey::Date => a.created_at.cmp(&b.created_at),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleStats {
    pub total: usize,
    pub admins: usize,
    pub creators: usize,
    pub users: usize,
    pub new_this_week: usize,
}

impl RoleStats {
    pub fn share(&self, count: usize) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((count * 100) / self.total) as u8
        }
    }
}

pub fn role_stats(users: &[User], now: DateTime<Utc>) -> RoleStats {
    let week_ago = now - Duration::days(7);
    let mut stats = RoleStats {
        total: users.len(),
        ..RoleStats::default()
    };
    for user in users {
        match user.role {
            Role::Admin => stats.admins += 1,
            Role::Creator => stats.creators += 1,
            Role::User => stats.users += 1,
        }
        if user.created_at.is_some_and(|created| created > week_ago) {
            stats.new_this_week += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(name: &str, email: &str, role: Role, day: u32) -> User {
        User {
            id: name.into(),
            username: name.into(),
            email: email.into(),
            role,
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()),
            ..User::default()
        }
    }

    fn users() -> Vec<User> {
        vec![
            user("nour", "nour@otogram.test", Role::Creator, 1),
            user("sam", "sam@mail.test", Role::User, 10),
            user("root", "ops@otogram.test", Role::Admin, 5),
            user("samira", "samira@mail.test", Role::User, 20),
        ]
    }

    fn names(users: &[User], indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| users[i].username.clone()).collect()
    }

    #[test]
    fn default_query_lists_newest_first() {
        let users = users();
        let order = visible_users(&users, &UserQuery::default());
        assert_eq!(names(&users, &order), vec!["samira", "sam", "root", "nour"]);
    }

    #[test]
    fn fuzzy_search_matches_username_or_email() {
        let users = users();
        let query = UserQuery {
            search: "SMR".into(),
            ..UserQuery::default()
        };
        assert_eq!(names(&users, &visible_users(&users, &query)), vec!["samira"]);

        let query = UserQuery {
            search: "ops".into(),
            ..UserQuery::default()
        };
        assert_eq!(names(&users, &visible_users(&users, &query)), vec!["root"]);
    }

    #[test]
    fn role_filter_and_role_sort() {
        let users = users();
        let mut query = UserQuery::default();
        query.cycle_role();
        assert_eq!(query.role, Some(Role::User));
        assert_eq!(
            names(&users, &visible_users(&users, &query)),
            vec!["samira", "sam"]
        );

        let query = UserQuery {
            sort: SortKey::Role,
            descending: false,
            ..UserQuery::default()
        };
        let order = visible_users(&users, &query);
        assert_eq!(users[order[0]].role, Role::Admin);
        assert_eq!(users[order[3]].role, Role::User);
    }

    #[test]
    fn stats_count_roles_and_recent_signups() {
        let users = users();
        let now = Utc.with_ymd_and_hms(2024, 3, 21, 0, 0, 0).unwrap();
        let stats = role_stats(&users, now);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.admins, 1);
        assert_eq!(stats.creators, 1);
        assert_eq!(stats.users, 2);
        assert_eq!(stats.new_this_week, 1);
        assert_eq!(stats.share(stats.users), 50);
        assert_eq!(RoleStats::default().share(0), 0);
    }
}
