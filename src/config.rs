use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Ошибки чтения конфигурации WakaTime
#[derive(Debug)]
pub enum ConfigError {
    /// Файл ~/.wakatime.cfg отсутствует
    Missing(PathBuf),
    /// Файл есть, но api_key в секции [settings] нет (или он пустой)
    KeyAbsent(PathBuf),
    /// Файл не удалось прочитать
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(path) => {
                write!(f, "Config file not found: {}", path.display())
            }
            ConfigError::KeyAbsent(path) => {
                write!(f, "No api_key in [settings] section of {}", path.display())
            }
            ConfigError::Io(msg) => write!(f, "Config read error: {}", msg),
        }
    }
}

/// Путь к файлу конфигурации: ~/.wakatime.cfg
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wakatime.cfg")
}

/// Прочитать api_key из INI-файла по заданному пути
pub fn read_api_key(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }

    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

    extract_ini_value(&contents, "settings", "api_key")
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ConfigError::KeyAbsent(path.to_path_buf()))
}

/// Получить API ключ из стандартного расположения.
/// Отсутствие конфигурации не ошибка: трекинг просто не запустится.
pub fn load_api_key() -> Option<String> {
    let path = config_path();
    match read_api_key(&path) {
        Ok(key) => {
            debug!("[CONFIG] API key loaded from {}", path.display());
            Some(key)
        }
        Err(e) => {
            warn!("[CONFIG] {}", e);
            None
        }
    }
}

// Минимальный INI-скан: заголовки [section], пары key = value,
// комментарии с ; или #, имена секций и ключей без учета регистра
fn extract_ini_value(contents: &str, section: &str, key: &str) -> Option<String> {
    let mut in_section = false;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim();
            in_section = name.eq_ignore_ascii_case(section);
            continue;
        }

        if !in_section {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let name = line[..eq_pos].trim();
            if name.eq_ignore_ascii_case(key) {
                return Some(line[eq_pos + 1..].trim().to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ini_value_basic() {
        let contents = "[settings]\napi_key = waka_abc123\n";
        assert_eq!(
            extract_ini_value(contents, "settings", "api_key"),
            Some("waka_abc123".to_string())
        );
    }

    #[test]
    fn test_extract_ini_value_ignores_other_sections() {
        let contents = "[other]\napi_key = wrong\n[settings]\napi_key = right\n";
        assert_eq!(
            extract_ini_value(contents, "settings", "api_key"),
            Some("right".to_string())
        );
    }

    #[test]
    fn test_extract_ini_value_case_insensitive() {
        let contents = "[Settings]\nAPI_KEY = key1\n";
        assert_eq!(
            extract_ini_value(contents, "settings", "api_key"),
            Some("key1".to_string())
        );
    }

    #[test]
    fn test_extract_ini_value_skips_comments_and_whitespace() {
        let contents = "; comment\n# comment\n[settings]\n  api_key   =   spaced-key  \n";
        assert_eq!(
            extract_ini_value(contents, "settings", "api_key"),
            Some("spaced-key".to_string())
        );
    }

    #[test]
    fn test_extract_ini_value_missing_key() {
        let contents = "[settings]\nother = value\n";
        assert_eq!(extract_ini_value(contents, "settings", "api_key"), None);
    }
}
