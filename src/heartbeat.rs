use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;

/// Метка приложения: идёт в language/editor, и как проект для команд
pub const APP_NAME: &str = "Fusion 360";

/// Проект-заглушка, когда документ не удалось привязать к проекту
pub const UNKNOWN_PROJECT: &str = "Unknown Project";

/// Категория heartbeat — определяется типом события хоста
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatCategory {
    FileOpened,
    FileSaved,
    DocumentActivated,
    DocumentDeactivated,
    CommandCreated,
    TestStart,
}

impl HeartbeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatCategory::FileOpened => "file_opened",
            HeartbeatCategory::FileSaved => "file_saved",
            HeartbeatCategory::DocumentActivated => "document_activated",
            HeartbeatCategory::DocumentDeactivated => "document_deactivated",
            HeartbeatCategory::CommandCreated => "command_created",
            HeartbeatCategory::TestStart => "test_start",
        }
    }

    /// Значение ключа action для этой категории.
    /// Стартовый test_start отправляется без action.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            HeartbeatCategory::FileOpened => Some("open"),
            HeartbeatCategory::FileSaved => Some("save"),
            HeartbeatCategory::DocumentActivated => Some("activate"),
            HeartbeatCategory::DocumentDeactivated => Some("deactivate"),
            HeartbeatCategory::CommandCreated => Some("create"),
            HeartbeatCategory::TestStart => None,
        }
    }
}

/// Один heartbeat: снимок активности в момент события.
/// Живет от события до отправки, нигде не сохраняется.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub time: f64,
    pub entity: String,
    pub project: String,
    pub category: HeartbeatCategory,
    pub language: String,
    pub editor: String,
    pub operating_system: String,
    #[serde(skip)]
    pub extra: Option<HashMap<String, String>>,
}

impl Heartbeat {
    pub fn new(category: HeartbeatCategory, entity: String, project: String) -> Self {
        Self {
            time: Utc::now().timestamp_millis() as f64 / 1000.0,
            entity,
            project,
            category,
            language: APP_NAME.to_string(),
            editor: APP_NAME.to_string(),
            operating_system: std::env::consts::OS.to_string(),
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: HashMap<String, String>) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Собрать тело запроса. Сначала стандартные поля, потом extra:
    /// совпадающие ключи из extra перекрывают стандартные.
    pub fn payload(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("time".to_string(), serde_json::json!(self.time));
        body.insert("entity".to_string(), serde_json::json!(self.entity));
        body.insert("project".to_string(), serde_json::json!(self.project));
        body.insert(
            "category".to_string(),
            serde_json::json!(self.category.as_str()),
        );
        body.insert("language".to_string(), serde_json::json!(self.language));
        body.insert("editor".to_string(), serde_json::json!(self.editor));
        body.insert(
            "operating_system".to_string(),
            serde_json::json!(self.operating_system),
        );

        if let Some(extra) = &self.extra {
            for (key, value) in extra {
                body.insert(key.clone(), serde_json::json!(value));
            }
        }

        serde_json::Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_action_mapping() {
        assert_eq!(HeartbeatCategory::FileOpened.action(), Some("open"));
        assert_eq!(HeartbeatCategory::FileSaved.action(), Some("save"));
        assert_eq!(
            HeartbeatCategory::DocumentActivated.action(),
            Some("activate")
        );
        assert_eq!(
            HeartbeatCategory::DocumentDeactivated.action(),
            Some("deactivate")
        );
        assert_eq!(HeartbeatCategory::CommandCreated.action(), Some("create"));
        assert_eq!(HeartbeatCategory::TestStart.action(), None);
    }

    #[test]
    fn test_payload_contains_canonical_fields() {
        let beat = Heartbeat::new(
            HeartbeatCategory::FileSaved,
            "Part1.f3d".to_string(),
            "RocketProject".to_string(),
        );
        let payload = beat.payload();

        assert_eq!(payload["entity"], "Part1.f3d");
        assert_eq!(payload["project"], "RocketProject");
        assert_eq!(payload["category"], "file_saved");
        assert_eq!(payload["language"], "Fusion 360");
        assert_eq!(payload["editor"], "Fusion 360");
        assert_eq!(payload["operating_system"], std::env::consts::OS);
        assert!(payload["time"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_payload_extra_overrides_builtin() {
        let mut extra = HashMap::new();
        extra.insert("action".to_string(), "save".to_string());
        extra.insert("project".to_string(), "Override".to_string());

        let beat = Heartbeat::new(
            HeartbeatCategory::FileSaved,
            "Part1.f3d".to_string(),
            "RocketProject".to_string(),
        )
        .with_extra(extra);
        let payload = beat.payload();

        assert_eq!(payload["action"], "save");
        assert_eq!(payload["project"], "Override");
    }
}
