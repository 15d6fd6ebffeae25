use std::sync::Arc;

use anyhow::{Context as _, Result};
use parking_lot::RwLock;

use crate::api::{Credentials, Registration, Role, User};
use crate::data::AuthService;
use crate::policy;
use crate::storage::{self, Store};

/// Owns the bearer token and the signed-in user.
///
/// The token is persisted in the state database; the user lives only in memory and is
/// re-fetched from the server at startup.
pub struct Context {
    store: Arc<Store>,
    auth: Arc<dyn AuthService>,
    user: RwLock<Option<User>>,
}

impl Context {
    pub fn new(store: Arc<Store>, auth: Arc<dyn AuthService>) -> Self {
        Self {
            store,
            auth,
            user: RwLock::new(None),
        }
    }

    /// Verifies a previously saved token at startup.
    pub fn restore(&self) -> Result<Option<User>> {
        let user = self.refetch()?;
        if let Some(user) = &user {
            log::info!("session restored for {}", user.username);
        }
        Ok(user)
    }

    /// Reloads the current user with the saved token. Any failure clears the token and
    /// leaves the context signed out.
    pub fn refetch(&self) -> Result<Option<User>> {
        let token = match self.store.get_value(storage::KEY_SESSION_TOKEN)? {
            Some(token) if !token.trim().is_empty() => token,
            _ => return Ok(None),
        };
        self.auth.set_token(Some(token));
        match self.auth.me() {
            Ok(user) => {
                *self.user.write() = Some(user.clone());
                Ok(Some(user))
            }
            Err(err) => {
                log::warn!("session verification failed: {err:#}");
                self.logout()?;
                Ok(None)
            }
        }
    }

    pub fn login(&self, email: &str, password: &str) -> Result<User> {
        policy::validate_login(email, password)?;
        let response = self.auth.login(&Credentials {
            email: email.trim().to_string(),
            password: password.to_string(),
        })?;
        self.adopt(response.token, response.user)
    }

    pub fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<User> {
        policy::validate_registration(username, email, password, confirm)?;
        let response = self.auth.register(&Registration {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        })?;
        self.adopt(response.token, response.user)
    }

    fn adopt(&self, token: String, user: User) -> Result<User> {
        self.store
            .set_value(storage::KEY_SESSION_TOKEN, &token)
            .context("persist session token")?;
        self.auth.set_token(Some(token));
        *self.user.write() = Some(user.clone());
        log::info!("signed in as {}", user.username);
        Ok(user)
    }

    pub fn logout(&self) -> Result<()> {
        *self.user.write() = None;
        self.auth.set_token(None);
        self.store
            .remove_value(storage::KEY_SESSION_TOKEN)
            .context("clear session token")
    }

    pub fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.read().is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.user.read().as_ref().map(|user| user.role)
    }

    pub fn update_user(&self, apply: impl FnOnce(&mut User)) -> Option<User> {
        let mut guard = self.user.write();
        let user = guard.as_mut()?;
        apply(user);
        Some(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockBackend;
    use crate::policy::PolicyError;

    fn context() -> (Context, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::default());
        (Context::new(store.clone(), backend), store)
    }

    #[test]
    fn login_persists_token_and_user() {
        let (ctx, store) = context();
        let user = ctx.login("nour@otogram.test", "password").unwrap();
        assert_eq!(user.username, "nour");
        assert_eq!(ctx.role(), Some(Role::Creator));
        assert_eq!(
            store.get_value(storage::KEY_SESSION_TOKEN).unwrap().as_deref(),
            Some("mock-u1")
        );
    }

    #[test]
    fn bad_credentials_leave_session_empty() {
        let (ctx, store) = context();
        assert!(ctx.login("nour@otogram.test", "wrong").is_err());
        assert!(!ctx.is_signed_in());
        assert_eq!(store.get_value(storage::KEY_SESSION_TOKEN).unwrap(), None);
    }

    #[test]
    fn restore_verifies_saved_token() {
        let (ctx, store) = context();
        store.set_value(storage::KEY_SESSION_TOKEN, "mock-u3").unwrap();
        let user = ctx.restore().unwrap().unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(ctx.is_signed_in());
    }

    #[test]
    fn restore_with_invalid_token_logs_out() {
        let (ctx, store) = context();
        store.set_value(storage::KEY_SESSION_TOKEN, "stale").unwrap();
        assert!(ctx.restore().unwrap().is_none());
        assert!(!ctx.is_signed_in());
        assert_eq!(store.get_value(storage::KEY_SESSION_TOKEN).unwrap(), None);
    }

    #[test]
    fn refetch_picks_up_server_changes() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let backend = Arc::new(MockBackend::default());
        let ctx = Context::new(store.clone(), backend.clone());
        assert!(ctx.refetch().unwrap().is_none());

        ctx.login("nour@otogram.test", "password").unwrap();
        crate::data::ProfileService::update_username(backend.as_ref(), "nour_two").unwrap();
        let user = ctx.refetch().unwrap().unwrap();
        assert_eq!(user.username, "nour_two");
        assert_eq!(ctx.current_user().unwrap().username, "nour_two");

        backend.fail_next();
        assert!(ctx.refetch().unwrap().is_none());
        assert!(!ctx.is_signed_in());
        assert_eq!(store.get_value(storage::KEY_SESSION_TOKEN).unwrap(), None);
    }

    #[test]
    fn registration_is_validated_before_network() {
        let (ctx, _) = context();
        let err = ctx.register("ab", "a@b.test", "123456", "123456").unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolicyError>(),
            Some(&PolicyError::UsernameTooShort)
        );
        let user = ctx
            .register("new_user", "new@otogram.test", "123456", "123456")
            .unwrap();
        assert_eq!(user.role, Role::User);
    }

    #[test]
    fn logout_clears_everything() {
        let (ctx, store) = context();
        ctx.login("sam@otogram.test", "password").unwrap();
        ctx.logout().unwrap();
        assert!(ctx.current_user().is_none());
        assert_eq!(ctx.role(), None);
        assert_eq!(store.get_value(storage::KEY_SESSION_TOKEN).unwrap(), None);
    }

    #[test]
    fn update_user_patches_in_place() {
        let (ctx, _) = context();
        assert!(ctx.update_user(|user| user.username = "x".into()).is_none());
        ctx.login("sam@otogram.test", "password").unwrap();
        let updated = ctx
            .update_user(|user| user.username = "sammy".into())
            .unwrap();
        assert_eq!(updated.username, "sammy");
        assert_eq!(ctx.current_user().unwrap().username, "sammy");
    }
}
