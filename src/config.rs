use crate::error::{ConfigError, Result as AppResult};
use crate::game::deck::{DEFAULT_CARD_EXTENSION, DEFAULT_DECK_SIZE};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    pub deck_size: usize,
    pub card_extension: String,
    /// Empty means every well-formed theme is accepted.
    #[serde(deserialize_with = "deserialize_string_or_list_to_set_lowercase")]
    pub allowed_themes: HashSet<String>,
    pub max_name_length: usize,
    pub max_guess_length: usize,
    pub room_buffer_size: usize,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            deck_size: DEFAULT_DECK_SIZE,
            card_extension: DEFAULT_CARD_EXTENSION.to_string(),
            allowed_themes: HashSet::new(),
            max_name_length: 20,
            max_guess_length: 40,
            room_buffer_size: 32,
        }
    }
}

impl GameSettings {
    pub fn is_theme_allowed(&self, theme: &str) -> bool {
        self.allowed_themes.is_empty() || self.allowed_themes.contains(theme)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkType {
    #[default]
    None,
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub sink_type: LogSinkType,
    pub file_path: Option<String>,
    pub http_url: Option<String>,
    pub buffer_size: usize,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            sink_type: LogSinkType::None,
            file_path: None,
            http_url: None,
            buffer_size: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    #[serde(default)]
    pub game: GameSettings,
    #[serde(default)]
    pub log_sink: LogSinkConfig,
}

impl AppSettings {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.game.deck_size == 0 {
            return Err(ConfigError::InvalidValue(
                "game.deck_size must be at least 1".to_string(),
            ));
        }
        if self.game.max_name_length == 0 || self.game.max_guess_length == 0 {
            return Err(ConfigError::InvalidValue(
                "game.max_name_length and game.max_guess_length must be at least 1".to_string(),
            ));
        }
        match self.log_sink.sink_type {
            LogSinkType::File if self.log_sink.file_path.is_none() => Err(ConfigError::Missing(
                "log_sink.file_path (required for sink_type = file)".to_string(),
            )),
            LogSinkType::Http if self.log_sink.http_url.is_none() => Err(ConfigError::Missing(
                "log_sink.http_url (required for sink_type = http)".to_string(),
            )),
            _ => Ok(self),
        }
    }
}

pub fn load_settings() -> AppResult<AppSettings> {
    let settings = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("ONOMATO")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        )
        .set_default("server.port", 5001)
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    Ok(app_settings.validate()?)
}

fn deserialize_string_or_list_to_set_lowercase<'de, D>(
    deserializer: D,
) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    let mut set = HashSet::new();

    match value {
        Value::String(s) => {
            let trimmed = s.trim().to_lowercase();
            // "all" and "" both leave the set empty, which accepts every theme.
            if trimmed != "all" {
                for item in trimmed.split(',') {
                    let item = item.trim();
                    if !item.is_empty() {
                        set.insert(item.to_string());
                    }
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                if let Value::String(s) = item {
                    set.insert(s.trim().to_lowercase());
                } else {
                    return Err(D::Error::custom("Array must contain only strings"));
                }
            }
        }
        Value::Null => {}
        _ => return Err(D::Error::custom("Expected string or array of strings")),
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_settings_from_json(value: serde_json::Value) -> GameSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_game_settings_defaults() {
        let settings = game_settings_from_json(serde_json::json!({}));
        assert_eq!(settings.deck_size, 36);
        assert_eq!(settings.card_extension, "jpg");
        assert!(settings.allowed_themes.is_empty());
        assert!(settings.is_theme_allowed("stone"));
    }

    #[test]
    fn test_allowed_themes_from_string_or_list() {
        let settings =
            game_settings_from_json(serde_json::json!({"allowed_themes": "Stone, animals"}));
        assert!(settings.is_theme_allowed("stone"));
        assert!(settings.is_theme_allowed("animals"));
        assert!(!settings.is_theme_allowed("fruit"));

        let settings = game_settings_from_json(serde_json::json!({"allowed_themes": ["FRUIT"]}));
        assert_eq!(settings.allowed_themes.len(), 1);
        assert!(settings.is_theme_allowed("fruit"));

        let settings = game_settings_from_json(serde_json::json!({"allowed_themes": "all"}));
        assert!(settings.allowed_themes.is_empty());
    }

    #[test]
    fn test_validate_requires_sink_target() {
        let settings = AppSettings {
            server: ServerConfig {
                port: 5001,
                cors_origins: vec![],
            },
            game: GameSettings::default(),
            log_sink: LogSinkConfig {
                sink_type: LogSinkType::File,
                ..LogSinkConfig::default()
            },
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_validate_rejects_empty_deck() {
        let settings = AppSettings {
            server: ServerConfig {
                port: 5001,
                cors_origins: vec![],
            },
            game: GameSettings {
                deck_size: 0,
                ..GameSettings::default()
            },
            log_sink: LogSinkConfig::default(),
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
