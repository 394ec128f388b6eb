use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::heartbeat::Heartbeat;
use crate::sender::HeartbeatSender;

/// Размер очереди heartbeat. Переполнение означает, что хост генерирует
/// события быстрее, чем уходят запросы — лишние просто отбрасываются.
pub const QUEUE_CAPACITY: usize = 64;

/// Приемник heartbeat. Продакшен-реализация кладет в очередь отправки,
/// тестовая просто записывает.
pub trait HeartbeatSink: Send + Sync {
    /// Принять heartbeat в обработку. Не блокирует вызывающий поток.
    fn submit(&self, heartbeat: Heartbeat);
}

/// Заглушка-приемник: молча отбрасывает heartbeat.
/// Ставится, когда отправка не поднята (нет API ключа).
pub struct NoOpSink;

impl HeartbeatSink for NoOpSink {
    fn submit(&self, _heartbeat: Heartbeat) {}
}

/// Ручка очереди отправки: неблокирующий try_send в канал воркера
#[derive(Clone)]
pub struct QueueSink {
    tx: mpsc::Sender<Heartbeat>,
}

impl QueueSink {
    pub(crate) fn new(tx: mpsc::Sender<Heartbeat>) -> Self {
        Self { tx }
    }
}

impl HeartbeatSink for QueueSink {
    fn submit(&self, heartbeat: Heartbeat) {
        match self.tx.try_send(heartbeat) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(beat)) => {
                warn!(
                    "[DISPATCH] Heartbeat queue full, dropping {} for {}",
                    beat.category.as_str(),
                    beat.entity
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("[DISPATCH] Heartbeat queue closed, heartbeat dropped");
            }
        }
    }
}

/// Фоновая отправка heartbeat: выделенный поток со своим Tokio runtime,
/// чтобы HTTP не выполнялся в потоке событий хоста.
pub struct HeartbeatDispatcher {
    tx: mpsc::Sender<Heartbeat>,
    close_tx: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

impl HeartbeatDispatcher {
    pub fn spawn(sender: HeartbeatSender) -> Self {
        let (tx, mut rx) = mpsc::channel::<Heartbeat>(QUEUE_CAPACITY);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let worker = std::thread::spawn(move || {
            // Создаем отдельный Tokio runtime для фоновой задачи:
            // поток событий хоста не наш и runtime там не живет
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(
                        "[DISPATCH] CRITICAL: Failed to create Tokio runtime for heartbeat \
                        dispatch: {}. Heartbeats will be dropped.",
                        e
                    );
                    return;
                }
            };

            rt.block_on(async {
                info!("[DISPATCH] Heartbeat dispatch worker started");
                let mut closing = false;
                loop {
                    // Сигнал закрытия перехватывается только между
                    // отправками: начатый POST дорабатывает до конца
                    tokio::select! {
                        _ = &mut close_rx, if !closing => {
                            // Новые heartbeat больше не принимаются,
                            // буфер досылается
                            rx.close();
                            closing = true;
                        }
                        maybe = rx.recv() => match maybe {
                            Some(beat) => {
                                if let Err(e) = sender.send(&beat).await {
                                    warn!(
                                        "[DISPATCH] Failed to send {} heartbeat for {}: {}",
                                        beat.category.as_str(),
                                        beat.entity,
                                        e
                                    );
                                }
                            }
                            None => break,
                        }
                    }
                }
                debug!("[DISPATCH] Heartbeat queue closed, worker exiting");
            });
        });

        info!("[DISPATCH] Heartbeat dispatch started in separate thread with dedicated runtime");

        Self {
            tx,
            close_tx,
            worker,
        }
    }

    /// Ручка для постановки heartbeat в очередь
    pub fn sink(&self) -> Arc<dyn HeartbeatSink> {
        Arc::new(QueueSink::new(self.tx.clone()))
    }

    /// Закрыть очередь и дождаться воркера. Буферизованные heartbeat
    /// досылаются перед выходом; удержанная кем-то sink-ручка не может
    /// отложить завершение — очередь закрывается по сигналу.
    pub fn shutdown(self) {
        let Self {
            tx,
            close_tx,
            worker,
        } = self;
        drop(tx);
        let _ = close_tx.send(());

        if worker.join().is_err() {
            error!("[DISPATCH] Dispatch worker panicked during shutdown");
        }

        info!("[DISPATCH] Heartbeat dispatch stopped");
    }
}
