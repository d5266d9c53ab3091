//! Session registry: maps `SessionId -> SessionHandle`, enforces
//! `max_concurrent_sessions`, and runs an idle-timeout cleanup loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cdbg_config::CdbgConfig;
use cdbg_core::{CoreError, SessionId, SessionState};
use cdbg_session::SessionHandle;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct Inner {
    config: CdbgConfig,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    cleanup_cancel: CancellationToken,
}

/// A cheap, cloneable handle to the process-wide session registry.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(config: CdbgConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: RwLock::new(HashMap::new()),
                cleanup_cancel: CancellationToken::new(),
            }),
        }
    }

    /// Open a new session against `dump_path`, assigning it a generated
    /// [`SessionId`]. Rejects with `CapacityExceeded` once
    /// `max_concurrent_sessions` non-terminal sessions are already open.
    pub async fn create(
        &self,
        dump_path: PathBuf,
        symbol_path: Option<PathBuf>,
    ) -> Result<SessionHandle, CoreError> {
        let mut sessions = self.inner.sessions.write().await;
        let live = sessions
            .values()
            .filter(|s| !s.state().is_terminal())
            .count();
        let limit = self.inner.config.registry.max_concurrent_sessions;
        if live >= limit {
            return Err(CoreError::CapacityExceeded { limit });
        }

        let session_id = SessionId::generate();
        let handle = SessionHandle::open(
            session_id.clone(),
            self.inner.config.clone(),
            dump_path,
            symbol_path,
        );
        sessions.insert(session_id.clone(), handle.clone());
        info!(%session_id, "session registered");
        Ok(handle)
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.inner.sessions.read().await.get(session_id).cloned()
    }

    /// Close and forget one session. No-op if unknown.
    pub async fn close(&self, session_id: &SessionId) -> Result<(), CoreError> {
        let handle = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.remove(session_id)
        };
        match handle {
            Some(handle) => {
                handle.close().await;
                info!(%session_id, "session closed and removed from registry");
                Ok(())
            }
            None => Err(CoreError::not_found(format!("session '{session_id}'"))),
        }
    }

    /// Close every open session, draining the registry. Used on shutdown.
    pub async fn close_all(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.close().await;
        }
    }

    pub async fn list(&self) -> Vec<SessionId> {
        self.inner.sessions.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Spawn the background task that evicts sessions idle for longer than
    /// `RegistryConfig::session_timeout`, polling every
    /// `RegistryConfig::cleanup_interval`.
    pub fn spawn_cleanup_loop(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let cancel = self.inner.cleanup_cancel.clone();
        let interval = self.inner.config.registry.cleanup_interval();
        let timeout = self.inner.config.registry.session_timeout();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => registry.sweep_idle(timeout, Instant::now()).await,
                }
            }
        })
    }

    pub fn stop_cleanup_loop(&self) {
        self.inner.cleanup_cancel.cancel();
    }

    async fn sweep_idle(&self, timeout: std::time::Duration, now: Instant) {
        let idle: Vec<SessionId> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, handle)| {
                    handle.state() == SessionState::Closed
                        || now.duration_since(handle.last_activity()) >= timeout
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in idle {
            info!(session_id = %id, "evicting idle session");
            let _ = self.close(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn fake_cdb() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdb.exe");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "#!/bin/sh\nwhile IFS= read -r line; do :; done"
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    }

    fn test_config(cdb_path: PathBuf, max_sessions: usize) -> CdbgConfig {
        let mut config = CdbgConfig::default();
        config.process.executable_override = Some(cdb_path);
        config.process.startup_delay = Duration::from_millis(1);
        config.registry.max_concurrent_sessions = max_sessions;
        config
    }

    #[tokio::test]
    async fn create_get_close_round_trip() {
        let (_dir, cdb) = fake_cdb();
        let registry = SessionRegistry::new(test_config(cdb, 4));

        let handle = registry
            .create(PathBuf::from("/dumps/a.dmp"), None)
            .await
            .unwrap();
        let id = handle.session_id().clone();

        assert!(registry.get(&id).await.is_some());
        assert_eq!(registry.count().await, 1);

        registry.close(&id).await.unwrap();
        assert!(registry.get(&id).await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn create_rejects_once_at_capacity() {
        let (_dir, cdb) = fake_cdb();
        let registry = SessionRegistry::new(test_config(cdb, 1));

        registry
            .create(PathBuf::from("/dumps/a.dmp"), None)
            .await
            .unwrap();

        let err = registry
            .create(PathBuf::from("/dumps/b.dmp"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { limit: 1 }));
    }

    #[tokio::test]
    async fn close_unknown_session_is_not_found() {
        let (_dir, cdb) = fake_cdb();
        let registry = SessionRegistry::new(test_config(cdb, 4));
        let err = registry
            .close(&SessionId::from("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn close_all_drains_every_session() {
        let (_dir, cdb) = fake_cdb();
        let registry = SessionRegistry::new(test_config(cdb, 4));
        registry.create(PathBuf::from("/dumps/a.dmp"), None).await.unwrap();
        registry.create(PathBuf::from("/dumps/b.dmp"), None).await.unwrap();

        registry.close_all().await;
        assert_eq!(registry.count().await, 0);
    }
}
