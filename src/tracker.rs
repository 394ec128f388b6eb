use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use scopeguard::{guard, ScopeGuard};
use tracing::{debug, info, warn};

use crate::dispatch::HeartbeatSink;
use crate::heartbeat::{Heartbeat, HeartbeatCategory, APP_NAME, UNKNOWN_PROJECT};
use crate::host::{
    DocumentRef, EventCallback, HostAdapter, HostEvent, HostEventKind, SubscriptionId,
};

/// Ошибки управления трекингом (для разбора и логирования)
#[derive(Debug)]
pub enum TrackError {
    CredentialMissing,
    NoActiveDocument,
    Subscription { event: &'static str, message: String },
    AlreadyTracking,
    Poisoned(String),
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::CredentialMissing => write!(f, "API key is missing"),
            TrackError::NoActiveDocument => write!(f, "No active document"),
            TrackError::Subscription { event, message } => {
                write!(f, "Subscription to {}: {}", event, message)
            }
            TrackError::AlreadyTracking => write!(f, "Tracking is already running"),
            TrackError::Poisoned(s) => write!(f, "Mutex poisoned: {}", s),
        }
    }
}

/// Состояние трекинга. Tracking держит выданные хостом подписки.
enum TrackingState {
    Stopped,
    Tracking {
        subscriptions: Vec<(HostEventKind, SubscriptionId)>,
    },
}

/// Контроллер трекинга: строгий FSM Stopped ⇄ Tracking.
/// Клонируется дешево — все поля разделяемые, колбэки держат свою копию.
#[derive(Clone)]
pub struct TrackerEngine {
    host: Arc<dyn HostAdapter>,
    sink: Arc<dyn HeartbeatSink>,
    api_key: Option<String>,
    state: Arc<Mutex<TrackingState>>,
    /// Быстрая проверка в колбэках без захвата state
    is_tracking: Arc<AtomicBool>,
}

impl TrackerEngine {
    pub fn new(
        host: Arc<dyn HostAdapter>,
        sink: Arc<dyn HeartbeatSink>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            host,
            sink,
            // Пустой ключ равносилен отсутствующему
            api_key: api_key.filter(|key| !key.is_empty()),
            state: Arc::new(Mutex::new(TrackingState::Stopped)),
            is_tracking: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.is_tracking.load(Ordering::Acquire)
    }

    /// Переход: Stopped → Tracking.
    /// Требует API ключ и активный документ, подписывается на все пять
    /// событий хоста. Неудача любой подписки откатывает уже сделанные:
    /// трекинг либо полный, либо никакой.
    pub fn start_tracking(&self) -> Result<(), TrackError> {
        if self.api_key.is_none() {
            warn!("[TRACK] No API key provided. Tracking cannot start.");
            return Err(TrackError::CredentialMissing);
        }

        let document = self
            .host
            .active_document()
            .ok_or(TrackError::NoActiveDocument)?;

        let mut state = self
            .state
            .lock()
            .map_err(|e| TrackError::Poisoned(e.to_string()))?;

        match &*state {
            TrackingState::Tracking { .. } => {
                warn!("[FSM] Invalid transition: Tracking → Tracking (already tracking)");
                Err(TrackError::AlreadyTracking)
            }
            TrackingState::Stopped => {
                // Откат при частичной неудаче: guard снимает уже сделанные
                // подписки, если не дойдем до into_inner
                let rollback_host = Arc::clone(&self.host);
                let mut registered = guard(
                    Vec::new(),
                    move |subs: Vec<(HostEventKind, SubscriptionId)>| {
                        for (kind, id) in subs {
                            if let Err(e) = rollback_host.unsubscribe(id) {
                                warn!(
                                    "[TRACK] Rollback unsubscribe from {} failed: {}",
                                    kind.as_str(),
                                    e
                                );
                            }
                        }
                    },
                );

                for kind in HostEventKind::ALL {
                    match self.host.subscribe(kind, self.event_callback()) {
                        Ok(id) => registered.push((kind, id)),
                        Err(e) => {
                            warn!("[TRACK] Failed to subscribe to {}: {}", kind.as_str(), e);
                            return Err(TrackError::Subscription {
                                event: kind.as_str(),
                                message: e.0,
                            });
                        }
                    }
                }

                let subscriptions = ScopeGuard::into_inner(registered);
                *state = TrackingState::Tracking { subscriptions };
                self.is_tracking.store(true, Ordering::Release);
                drop(state); // Освобождаем lock перед исходящими вызовами

                info!("[TRACK] Tracking started");
                self.host.show_message("WakaTime tracking started!");

                // Стартовый heartbeat: проверка, что ключ и эндпоинт живы
                self.submit(
                    HeartbeatCategory::TestStart,
                    document.name.clone(),
                    self.resolve_project(&document),
                );

                Ok(())
            }
        }
    }

    /// Переход: Tracking → Stopped. Каждая подписка снимается отдельно,
    /// неудача одной не мешает остальным. Повторный stop — no-op.
    pub fn stop_tracking(&self) -> Result<(), TrackError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| TrackError::Poisoned(e.to_string()))?;

        match &mut *state {
            TrackingState::Stopped => {
                debug!("[FSM] Stop requested but tracking is not running");
                Ok(())
            }
            TrackingState::Tracking { subscriptions } => {
                let subs = std::mem::take(subscriptions);
                *state = TrackingState::Stopped;
                // Флаг сбрасываем до снятия подписок: события, пришедшие
                // в процессе, уже не должны порождать heartbeat
                self.is_tracking.store(false, Ordering::Release);
                drop(state);

                for (kind, id) in subs {
                    if let Err(e) = self.host.unsubscribe(id) {
                        warn!(
                            "[TRACK] Failed to unsubscribe from {}: {}",
                            kind.as_str(),
                            e
                        );
                    }
                }

                info!("[TRACK] Tracking stopped");
                self.host.show_message("WakaTime tracking stopped.");
                Ok(())
            }
        }
    }

    fn event_callback(&self) -> EventCallback {
        let engine = self.clone();
        Arc::new(move |event: HostEvent| {
            engine.handle_event(&event);
        })
    }

    /// Обработка события хоста. Выполняется в потоке событий:
    /// только сборка heartbeat и постановка в очередь, никакой сети.
    fn handle_event(&self, event: &HostEvent) {
        if !self.is_tracking.load(Ordering::Acquire) || self.api_key.is_none() {
            return;
        }

        let (category, entity, project) = match event {
            HostEvent::DocumentOpened(doc) => (
                HeartbeatCategory::FileOpened,
                doc.name.clone(),
                self.resolve_project(doc),
            ),
            HostEvent::DocumentSaved(doc) => (
                HeartbeatCategory::FileSaved,
                doc.name.clone(),
                self.resolve_project(doc),
            ),
            HostEvent::DocumentActivated(doc) => (
                HeartbeatCategory::DocumentActivated,
                doc.name.clone(),
                self.resolve_project(doc),
            ),
            HostEvent::DocumentDeactivated(doc) => (
                HeartbeatCategory::DocumentDeactivated,
                doc.name.clone(),
                self.resolve_project(doc),
            ),
            HostEvent::CommandCreated { name } => {
                if name.eq_ignore_ascii_case("pan") {
                    debug!("[TRACK] Pan command detected. Skipping heartbeat.");
                    return;
                }
                (
                    HeartbeatCategory::CommandCreated,
                    name.clone(),
                    APP_NAME.to_string(),
                )
            }
        };

        debug!("[TRACK] {}: {} ({})", category.as_str(), entity, project);
        self.submit(category, entity, project);
    }

    fn submit(&self, category: HeartbeatCategory, entity: String, project: String) {
        let mut beat = Heartbeat::new(category, entity, project);
        if let Some(action) = category.action() {
            let mut extra = HashMap::new();
            extra.insert("action".to_string(), action.to_string());
            beat = beat.with_extra(extra);
        }
        self.sink.submit(beat);
    }

    /// Проект документа; любая неудача деградирует в Unknown Project
    fn resolve_project(&self, doc: &DocumentRef) -> String {
        match self.host.document_project(doc) {
            Ok(Some(project)) => project,
            Ok(None) => UNKNOWN_PROJECT.to_string(),
            Err(e) => {
                debug!("[TRACK] Error getting project name for {}: {}", doc.name, e);
                UNKNOWN_PROJECT.to_string()
            }
        }
    }
}
