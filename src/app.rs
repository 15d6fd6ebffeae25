use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::data::Services;
use crate::download;
use crate::logging;
use crate::playback::Coordinator;
use crate::session;
use crate::storage;
use crate::theme::{Theme, ThemeStore};
use crate::ui;
use crate::video::{MpvBackend, MpvOptions};

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let display_path = friendly_path(config::default_path().as_ref());
    if let Some(log_path) = logging::init()? {
        log::debug!("config from {display_path}, log at {}", log_path.display());
    }

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("open storage")?);

    let client = api::Client::new(api::ClientConfig {
        base_url: cfg.api.base_url.clone(),
        user_agent: cfg.api.user_agent.clone(),
        timeout: Some(cfg.api.timeout),
        http_client: None,
    })
    .context("create api client")?;
    let base_url = client.base_url().to_string();
    let services = Services::rest(Arc::new(client));

    let session = Arc::new(session::Context::new(
        store.clone(),
        Arc::clone(&services.auth),
    ));
    let mut status = match session.restore() {
        Ok(Some(user)) => format!("Welcome back, {}.", user.username),
        Ok(None) => "Browsing as guest. Like or upload to sign in.".to_string(),
        Err(err) => {
            log::warn!("restoring session: {err:#}");
            "Could not restore the previous session.".to_string()
        }
    };

    let default_theme = cfg.ui.theme.parse::<Theme>().unwrap_or_else(|_| {
        log::warn!("unknown theme {:?} in {display_path}", cfg.ui.theme);
        Theme::Dark
    });
    let theme = Arc::new(ThemeStore::load(store.clone(), default_theme).context("load theme")?);

    let downloads = match download::Manager::new(
        store.clone(),
        download::Config {
            dir: cfg.downloads.dir.clone(),
            user_agent: cfg.api.user_agent.clone(),
            ..download::Config::default()
        },
    ) {
        Ok(manager) => Some(Arc::new(manager)),
        Err(err) => {
            log::warn!("downloads disabled: {err:#}");
            status.push_str(" Downloads are unavailable.");
            None
        }
    };

    let player = |title: &str| {
        Box::new(MpvBackend::new(MpvOptions {
            mpv_path: cfg.player.mpv_path.clone(),
            extra_args: cfg.player.extra_args.clone(),
            title: title.to_string(),
            user_agent: cfg.api.user_agent.clone(),
        }))
    };
    let playback = Coordinator::new(
        base_url.clone(),
        player("Otogram"),
        player("Otogram reply"),
    );

    let mut model = ui::Model::new(ui::Options {
        services,
        session,
        theme,
        store,
        downloads,
        playback,
        base_url,
        status_message: status,
        load_feed_on_start: true,
    });
    model.run()
}

pub(crate) fn friendly_path(path: Option<&std::path::PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/otogram/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_path_shortens_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let path = home.join(".config").join("otogram").join("config.yaml");
        assert_eq!(friendly_path(Some(&path)), "~/.config/otogram/config.yaml");
        assert_eq!(friendly_path(None), "~/.config/otogram/config.yaml");
    }
}
