//! One shared engine per user.
//!
//! UI surfaces (a connection, a window, a badge) each hold a
//! [`SessionHandle`]. The first handle for a user starts an engine; dropping
//! the last one disposes it.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use fairway_realtime::ChangeFeed;
use fairway_types::UserId;
use tracing::{debug, info};

use crate::engine::{EngineConfig, NotificationEngine};
use crate::store::Store;

struct Session {
    engine: Arc<NotificationEngine>,
    handles: usize,
}

pub struct SessionRegistry {
    store: Arc<dyn Store>,
    feed: ChangeFeed,
    config: EngineConfig,
    sessions: Mutex<HashMap<UserId, Session>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn Store>, feed: ChangeFeed, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            feed,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Get a handle on `user_id`'s engine, starting one if needed.
    pub fn acquire(self: &Arc<Self>, user_id: UserId) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.entry(user_id).or_insert_with(|| {
            info!(user = %user_id, "starting session");
            Session {
                engine: NotificationEngine::start(
                    user_id,
                    Arc::clone(&self.store),
                    &self.feed,
                    self.config.clone(),
                ),
                handles: 0,
            }
        });
        session.handles += 1;
        debug!(user = %user_id, handles = session.handles, "session acquired");

        SessionHandle {
            engine: Arc::clone(&session.engine),
            registry: Arc::clone(self),
        }
    }

    /// Number of users with a live engine.
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Handles currently held for `user_id`.
    pub fn handle_count(&self, user_id: &UserId) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .map_or(0, |s| s.handles)
    }

    fn release(&self, user_id: &UserId) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = sessions.get_mut(user_id) else {
            return;
        };
        session.handles = session.handles.saturating_sub(1);
        if session.handles > 0 {
            return;
        }
        if let Some(session) = sessions.remove(user_id) {
            session.engine.dispose();
            info!(user = %user_id, "session closed");
        }
    }
}

/// A counted reference to a user's engine. Dereferences to
/// [`NotificationEngine`].
pub struct SessionHandle {
    engine: Arc<NotificationEngine>,
    registry: Arc<SessionRegistry>,
}

impl SessionHandle {
    pub fn engine(&self) -> &Arc<NotificationEngine> {
        &self.engine
    }
}

impl Deref for SessionHandle {
    type Target = NotificationEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.registry.release(self.engine.user_id());
    }
}
