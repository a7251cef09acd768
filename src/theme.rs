/// Light/dark key shared by the preview page and the diagram engine.
///
/// The diagram renderer caches the last key it initialized its engine with,
/// so toggling this is what triggers an engine re-initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThemeKey {
    Light,
    Dark,
}

/// Built-in theme names.
pub const THEMES: &[(&str, ThemeKey)] = &[("light", ThemeKey::Light), ("dark", ThemeKey::Dark)];

/// Default theme.
pub const DEFAULT_THEME: ThemeKey = ThemeKey::Dark;

impl ThemeKey {
    pub fn name(self) -> &'static str {
        match self {
            ThemeKey::Light => "light",
            ThemeKey::Dark => "dark",
        }
    }

    /// The other key (light ↔ dark).
    pub fn toggled(self) -> Self {
        match self {
            ThemeKey::Light => ThemeKey::Dark,
            ThemeKey::Dark => ThemeKey::Light,
        }
    }
}

/// Look up a built-in theme by name.
pub fn get(name: &str) -> Option<ThemeKey> {
    THEMES.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}
