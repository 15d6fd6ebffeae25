use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use ratatui::style::Color;

use crate::storage::{self, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            Theme::Dark => DARK,
            Theme::Light => LIGHT,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => anyhow::bail!("unknown theme {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub bg: Color,
    pub panel_bg: Color,
    pub panel_focused_bg: Color,
    pub panel_selected_bg: Color,
    pub border_idle: Color,
    pub border_focused: Color,
    pub text_primary: Color,
    pub text_secondary: Color,
    pub accent: Color,
    pub success: Color,
    pub error: Color,
    pub like: Color,
}

const DARK: Palette = Palette {
    bg: Color::Rgb(30, 30, 46),
    panel_bg: Color::Rgb(24, 24, 36),
    panel_focused_bg: Color::Rgb(49, 50, 68),
    panel_selected_bg: Color::Rgb(69, 71, 90),
    border_idle: Color::Rgb(49, 50, 68),
    border_focused: Color::Rgb(137, 180, 250),
    text_primary: Color::Rgb(205, 214, 244),
    text_secondary: Color::Rgb(166, 173, 200),
    accent: Color::Rgb(137, 180, 250),
    success: Color::Rgb(166, 227, 161),
    error: Color::Rgb(243, 139, 168),
    like: Color::Rgb(245, 194, 231),
};

const LIGHT: Palette = Palette {
    bg: Color::Rgb(239, 241, 245),
    panel_bg: Color::Rgb(230, 233, 239),
    panel_focused_bg: Color::Rgb(220, 224, 232),
    panel_selected_bg: Color::Rgb(204, 208, 218),
    border_idle: Color::Rgb(188, 192, 204),
    border_focused: Color::Rgb(30, 102, 245),
    text_primary: Color::Rgb(76, 79, 105),
    text_secondary: Color::Rgb(108, 111, 133),
    accent: Color::Rgb(30, 102, 245),
    success: Color::Rgb(64, 160, 43),
    error: Color::Rgb(210, 15, 57),
    like: Color::Rgb(234, 118, 203),
};

/// Persisted light/dark choice.
pub struct ThemeStore {
    store: Arc<Store>,
    current: RwLock<Theme>,
}

impl ThemeStore {
    /// Loads the saved theme, falling back to `default` when nothing (or garbage) is stored.
    pub fn load(store: Arc<Store>, default: Theme) -> Result<Self> {
        let saved = store
            .get_value(storage::KEY_THEME)
            .context("read saved theme")?
            .and_then(|raw| raw.parse::<Theme>().ok());
        Ok(Self {
            store,
            current: RwLock::new(saved.unwrap_or(default)),
        })
    }

    pub fn current(&self) -> Theme {
        *self.current.read()
    }

    pub fn palette(&self) -> Palette {
        self.current().palette()
    }

    pub fn set(&self, theme: Theme) -> Result<()> {
        self.store
            .set_value(storage::KEY_THEME, theme.as_str())
            .context("persist theme")?;
        *self.current.write() = theme;
        Ok(())
    }

    pub fn toggle(&self) -> Result<Theme> {
        let next = self.current().toggled();
        self.set(next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Light".parse::<Theme>().unwrap(), Theme::Light);
        assert!("sepia".parse::<Theme>().is_err());
    }

    #[test]
    fn toggle_persists_choice() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let themes = ThemeStore::load(store.clone(), Theme::Dark).unwrap();
        assert_eq!(themes.current(), Theme::Dark);
        assert_eq!(themes.toggle().unwrap(), Theme::Light);
        assert_eq!(themes.palette(), LIGHT);

        let reloaded = ThemeStore::load(store, Theme::Dark).unwrap();
        assert_eq!(reloaded.current(), Theme::Light);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.set_value(storage::KEY_THEME, "neon").unwrap();
        let themes = ThemeStore::load(store, Theme::Light).unwrap();
        assert_eq!(themes.current(), Theme::Light);
    }
}
