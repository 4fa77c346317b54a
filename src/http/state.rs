use crate::assistant::Assistant;
use crate::session::{SessionUpdate, VoiceSession};
use crate::store::AppStore;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The voice session driven by the mic endpoints
    pub session: Arc<VoiceSession>,

    /// Profile, memories and companion history
    pub store: Arc<RwLock<AppStore>>,

    /// Text companion
    pub assistant: Arc<dyn Assistant>,
}

impl AppState {
    pub fn new(session: Arc<VoiceSession>, store: AppStore, assistant: Arc<dyn Assistant>) -> Self {
        Self {
            session,
            store: Arc::new(RwLock::new(store)),
            assistant,
        }
    }

    /// Copy voice transcripts, replies and tags into the store as they happen
    pub fn spawn_store_sync(&self) -> JoinHandle<()> {
        let mut updates = self.session.subscribe();
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            loop {
                let update = match updates.recv().await {
                    Ok(update) => update,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Store sync fell behind; {} session updates lost", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let result = match update {
                    SessionUpdate::Message(message) => {
                        store.write().await.add_companion_message(message).await
                    }
                    SessionUpdate::Tags(tags) => {
                        store
                            .write()
                            .await
                            .add_companion_tags(&tags)
                            .await
                            .map(|_| ())
                    }
                    SessionUpdate::State(_) | SessionUpdate::Error(_) => Ok(()),
                };

                if let Err(e) = result {
                    warn!("Failed to persist session update: {}", e);
                }
            }
            debug!("Store sync stopped");
        })
    }
}
