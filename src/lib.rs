use std::sync::Arc;

use tracing::{error, info, warn};

mod config;
mod dispatch;
mod heartbeat;
mod host;
mod sender;
mod tracker;

pub use config::{config_path, load_api_key, read_api_key, ConfigError};
pub use dispatch::{HeartbeatDispatcher, HeartbeatSink, NoOpSink, QUEUE_CAPACITY};
pub use heartbeat::{Heartbeat, HeartbeatCategory, APP_NAME, UNKNOWN_PROJECT};
pub use host::{
    DocumentRef, EventCallback, HostAdapter, HostError, HostEvent, HostEventKind, SimulatedHost,
    SubscriptionId,
};
pub use sender::{HeartbeatSender, SendError, SenderConfig};
pub use tracker::{TrackError, TrackerEngine};


/// Экземпляр аддона: владеет контроллером трекинга и фоновой отправкой.
/// Создается хостом при загрузке, разбирается при выгрузке — никакого
/// глобального состояния.
pub struct Addin {
    engine: TrackerEngine,
    dispatcher: Option<HeartbeatDispatcher>,
}

impl Addin {
    /// Точка входа аддона: прочитать ~/.wakatime.cfg, поднять фоновую
    /// отправку и попытаться начать трекинг. Неудача старта не фатальна,
    /// аддон остается загруженным.
    pub fn load(host: Arc<dyn HostAdapter>) -> Self {
        let api_key = config::load_api_key();
        Self::load_with_config(host, api_key, SenderConfig::default())
    }

    pub fn load_with_config(
        host: Arc<dyn HostAdapter>,
        api_key: Option<String>,
        sender_config: SenderConfig,
    ) -> Self {
        init_logging();

        // Пустой ключ равносилен отсутствующему: отправку не поднимаем
        let api_key = api_key.filter(|key| !key.is_empty());

        let (dispatcher, sink): (Option<HeartbeatDispatcher>, Arc<dyn HeartbeatSink>) =
            match &api_key {
                Some(key) => {
                    let sender = HeartbeatSender::new_with_config(key.clone(), sender_config);
                    let dispatcher = HeartbeatDispatcher::spawn(sender);
                    let sink = dispatcher.sink();
                    (Some(dispatcher), sink)
                }
                None => (None, Arc::new(NoOpSink)),
            };

        let engine = TrackerEngine::new(Arc::clone(&host), sink, api_key);

        match engine.start_tracking() {
            Ok(()) => info!("[ADDIN] Add-in loaded, tracking started"),
            Err(e) => {
                warn!("[ADDIN] Add-in loaded, tracking not started: {}", e);
                match e {
                    TrackError::CredentialMissing => {
                        host.show_message("WakaTime could not start. API key is missing.");
                    }
                    TrackError::NoActiveDocument => {
                        host.show_message("WakaTime started, but there is no active document.");
                    }
                    other => {
                        host.show_message(&format!("Error starting WakaTime tracking: {}", other));
                    }
                }
            }
        }

        Self { engine, dispatcher }
    }

    pub fn engine(&self) -> &TrackerEngine {
        &self.engine
    }

    /// Выгрузка аддона: снять подписки и дослать накопленные heartbeat.
    pub fn unload(self) {
        if let Err(e) = self.engine.stop_tracking() {
            error!("[ADDIN] Failed to stop tracking on unload: {}", e);
        }

        // Контроллер отпускает свою sink-ручку до закрытия очереди
        drop(self.engine);

        if let Some(dispatcher) = self.dispatcher {
            dispatcher.shutdown();
        }

        info!("[ADDIN] Add-in unloaded");
    }
}

/// Инициализация логирования: по умолчанию info (если RUST_LOG не задан),
/// чтобы [TRACK]/[DISPATCH] были видны. Повторный вызов — no-op.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
