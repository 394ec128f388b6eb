use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Виды событий жизненного цикла, на которые можно подписаться
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    DocumentOpened,
    DocumentSaved,
    DocumentActivated,
    DocumentDeactivated,
    CommandCreated,
}

impl HostEventKind {
    pub const ALL: [HostEventKind; 5] = [
        HostEventKind::DocumentOpened,
        HostEventKind::DocumentSaved,
        HostEventKind::DocumentActivated,
        HostEventKind::DocumentDeactivated,
        HostEventKind::CommandCreated,
    ];

    /// Имя события в терминах хоста
    pub fn as_str(&self) -> &'static str {
        match self {
            HostEventKind::DocumentOpened => "documentOpened",
            HostEventKind::DocumentSaved => "documentSaved",
            HostEventKind::DocumentActivated => "documentActivated",
            HostEventKind::DocumentDeactivated => "documentDeactivated",
            HostEventKind::CommandCreated => "commandCreated",
        }
    }
}

/// Ссылка на документ хоста
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub name: String,
}

impl DocumentRef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Событие хоста, доставляемое подписчикам
#[derive(Debug, Clone)]
pub enum HostEvent {
    DocumentOpened(DocumentRef),
    DocumentSaved(DocumentRef),
    DocumentActivated(DocumentRef),
    DocumentDeactivated(DocumentRef),
    CommandCreated { name: String },
}

impl HostEvent {
    pub fn kind(&self) -> HostEventKind {
        match self {
            HostEvent::DocumentOpened(_) => HostEventKind::DocumentOpened,
            HostEvent::DocumentSaved(_) => HostEventKind::DocumentSaved,
            HostEvent::DocumentActivated(_) => HostEventKind::DocumentActivated,
            HostEvent::DocumentDeactivated(_) => HostEventKind::DocumentDeactivated,
            HostEvent::CommandCreated { .. } => HostEventKind::CommandCreated,
        }
    }
}

/// Ошибка на стороне адаптера хоста
#[derive(Debug, Clone)]
pub struct HostError(pub String);

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Host error: {}", self.0)
    }
}

/// Идентификатор подписки, выдается хостом при регистрации
pub type SubscriptionId = u64;

pub type EventCallback = Arc<dyn Fn(HostEvent) + Send + Sync>;

/// Абстракция над объектной моделью CAD-хоста.
/// Реальный адаптер оборачивает API приложения, SimulatedHost
/// имитирует его в памяти.
pub trait HostAdapter: Send + Sync {
    fn subscribe(
        &self,
        kind: HostEventKind,
        callback: EventCallback,
    ) -> Result<SubscriptionId, HostError>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), HostError>;

    fn active_document(&self) -> Option<DocumentRef>;

    /// Определить проект документа. Ok(None) — документ не привязан
    /// к проекту, Err — хост не смог ответить.
    fn document_project(&self, doc: &DocumentRef) -> Result<Option<String>, HostError>;

    fn show_message(&self, text: &str);
}

#[derive(Default)]
struct SimulatedState {
    subscriptions: HashMap<SubscriptionId, (HostEventKind, EventCallback)>,
    active_document: Option<DocumentRef>,
    projects: HashMap<String, String>,
    failing_kinds: HashSet<HostEventKind>,
    failing_unsubscribe_kinds: HashSet<HostEventKind>,
    fail_project_lookup: bool,
    messages: Vec<String>,
    unsubscribed: Vec<SubscriptionId>,
}

/// In-memory реализация хоста: события запускаются вручную через fire().
/// Используется тестами и локальными прогонами без CAD-приложения.
#[derive(Default)]
pub struct SimulatedHost {
    state: Mutex<SimulatedState>,
    next_id: AtomicU64,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_document(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.active_document = Some(DocumentRef::new(name));
        }
    }

    pub fn clear_active_document(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.active_document = None;
        }
    }

    /// Привязать документ к проекту для document_project()
    pub fn set_project(&self, document: &str, project: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .projects
                .insert(document.to_string(), project.to_string());
        }
    }

    /// Подписки на этот вид события будут завершаться ошибкой
    pub fn fail_subscription(&self, kind: HostEventKind) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_kinds.insert(kind);
        }
    }

    /// Снятие подписок этого вида будет завершаться ошибкой,
    /// сама подписка при этом остается зарегистрированной
    pub fn fail_unsubscribe(&self, kind: HostEventKind) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_unsubscribe_kinds.insert(kind);
        }
    }

    /// Все запросы document_project() будут возвращать Err
    pub fn fail_project_lookup(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_project_lookup = true;
        }
    }

    /// Доставить событие всем подписчикам соответствующего вида.
    /// Колбэки вызываются вне блокировки, как это делает сам хост.
    pub fn fire(&self, event: HostEvent) {
        let callbacks: Vec<EventCallback> = match self.state.lock() {
            Ok(state) => state
                .subscriptions
                .values()
                .filter(|(kind, _)| *kind == event.kind())
                .map(|(_, callback)| Arc::clone(callback))
                .collect(),
            Err(_) => return,
        };

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.messages.clone())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.subscriptions.len())
            .unwrap_or(0)
    }

    pub fn unsubscribed_ids(&self) -> Vec<SubscriptionId> {
        self.state
            .lock()
            .map(|state| state.unsubscribed.clone())
            .unwrap_or_default()
    }
}

impl HostAdapter for SimulatedHost {
    fn subscribe(
        &self,
        kind: HostEventKind,
        callback: EventCallback,
    ) -> Result<SubscriptionId, HostError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| HostError(format!("Mutex poisoned: {}", e)))?;

        if state.failing_kinds.contains(&kind) {
            return Err(HostError(format!(
                "Subscription to {} rejected",
                kind.as_str()
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        state.subscriptions.insert(id, (kind, callback));
        debug!("[HOST] Subscribed to {} (id={})", kind.as_str(), id);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), HostError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| HostError(format!("Mutex poisoned: {}", e)))?;

        let kind = match state.subscriptions.get(&id) {
            Some((kind, _)) => *kind,
            None => return Err(HostError(format!("Unknown subscription id: {}", id))),
        };

        if state.failing_unsubscribe_kinds.contains(&kind) {
            return Err(HostError(format!(
                "Unsubscribe from {} rejected",
                kind.as_str()
            )));
        }

        state.subscriptions.remove(&id);
        state.unsubscribed.push(id);
        debug!("[HOST] Unsubscribed from {} (id={})", kind.as_str(), id);
        Ok(())
    }

    fn active_document(&self) -> Option<DocumentRef> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.active_document.clone())
    }

    fn document_project(&self, doc: &DocumentRef) -> Result<Option<String>, HostError> {
        let state = self
            .state
            .lock()
            .map_err(|e| HostError(format!("Mutex poisoned: {}", e)))?;

        if state.fail_project_lookup {
            return Err(HostError("Project lookup failed".to_string()));
        }

        Ok(state.projects.get(&doc.name).cloned())
    }

    fn show_message(&self, text: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.messages.push(text.to_string());
        }
    }
}
