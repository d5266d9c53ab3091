//! Request dispatch: translates one wire [`RequestMethod`] into calls
//! against the [`SessionRegistry`] and the shared [`ResultCache`], and fans
//! session lifecycle/command events out to stdout as [`Notification`]s.

use std::sync::Arc;

use cdbg_cache::ResultCache;
use cdbg_core::{CommandId, CommandInfo, CoreError, SessionId};
use cdbg_registry::SessionRegistry;
use cdbg_session::SessionHandle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::debug;

use crate::rpc::{Notification, RequestMethod, RpcRequest, RpcResponse};

pub struct ServerState {
    registry: SessionRegistry,
    cache: ResultCache<(SessionId, CommandId), CommandInfo>,
    output: mpsc::UnboundedSender<String>,
}

impl ServerState {
    pub fn new(
        registry: SessionRegistry,
        cache: ResultCache<(SessionId, CommandId), CommandInfo>,
        output: mpsc::UnboundedSender<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            cache,
            output,
        })
    }

    pub async fn handle(self: &Arc<Self>, request: RpcRequest) -> RpcResponse {
        let id = request.id;
        match self.dispatch(request.method).await {
            Ok(value) => RpcResponse::ok(id, value),
            Err(e) => RpcResponse::err(id, e),
        }
    }

    pub fn emit_response(&self, response: RpcResponse) {
        match serde_json::to_string(&response) {
            Ok(line) => {
                let _ = self.output.send(line);
            }
            Err(e) => debug!(error = %e, "failed to serialize response"),
        }
    }

    async fn dispatch(self: &Arc<Self>, method: RequestMethod) -> Result<serde_json::Value, CoreError> {
        match method {
            RequestMethod::OpenSession { dump_path, symbol_path } => {
                let handle = self.registry.create(dump_path, symbol_path).await?;
                self.spawn_notifiers(handle.clone());
                Ok(serde_json::json!({ "session_id": handle.session_id().to_string() }))
            }
            RequestMethod::Enqueue { session_id, command } => {
                let handle = self.session(session_id).await?;
                let command_id = handle.enqueue(&command)?;
                Ok(serde_json::json!({ "command_id": command_id.to_string() }))
            }
            RequestMethod::GetCommand { session_id, command_id } => {
                let sid = SessionId::from(session_id);
                let cid = CommandId::from(command_id);
                let handle = self.require_session(&sid).await?;
                let info = self.get_command_cached(&handle, &sid, &cid).await?;
                Ok(serde_json::to_value(info).expect("CommandInfo always serializes"))
            }
            RequestMethod::GetAllCommands { session_id } => {
                let handle = self.session(session_id).await?;
                let infos = handle.get_all_infos();
                Ok(serde_json::to_value(infos).expect("CommandInfo map always serializes"))
            }
            RequestMethod::CancelCommand { session_id, command_id } => {
                let handle = self.session(session_id).await?;
                let cid = CommandId::from(command_id);
                let cancelled = handle.cancel(&cid);
                Ok(serde_json::json!({ "cancelled": cancelled }))
            }
            RequestMethod::CloseSession { session_id } => {
                self.registry.close(&SessionId::from(session_id)).await?;
                Ok(serde_json::json!({ "closed": true }))
            }
            RequestMethod::ListSessions => {
                let ids: Vec<String> = self.registry.list().await.iter().map(ToString::to_string).collect();
                Ok(serde_json::json!({ "sessions": ids }))
            }
        }
    }

    async fn session(&self, session_id: String) -> Result<SessionHandle, CoreError> {
        self.require_session(&SessionId::from(session_id)).await
    }

    async fn require_session(&self, session_id: &SessionId) -> Result<SessionHandle, CoreError> {
        self.registry
            .get(session_id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("session '{session_id}'")))
    }

    /// A terminal command's `CommandInfo` never changes again, so once one
    /// is observed it is safe to cache (spec.md §4.7's rationale for the
    /// result cache: avoid re-reading a finished command's full output).
    async fn get_command_cached(
        &self,
        handle: &SessionHandle,
        session_id: &SessionId,
        command_id: &CommandId,
    ) -> Result<CommandInfo, CoreError> {
        let key = (session_id.clone(), command_id.clone());
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let info = handle
            .get_info(command_id)
            .ok_or_else(|| CoreError::not_found(format!("command '{command_id}'")))?;
        if info.state.is_terminal() {
            self.cache.set(key, info.clone(), None).await;
        }
        Ok(info)
    }

    fn spawn_notifiers(self: &Arc<Self>, handle: SessionHandle) {
        let output = self.output.clone();
        let mut commands = handle.subscribe_commands();
        tokio::spawn(async move {
            loop {
                match commands.recv().await {
                    Ok(event) => send(&output, Notification::CommandStateChanged(event)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "command notifier lagged, dropping oldest events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let output = self.output.clone();
        let mut states = handle.subscribe_state();
        tokio::spawn(async move {
            loop {
                match states.recv().await {
                    Ok(event) => send(&output, Notification::SessionStateChanged(event)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "session notifier lagged, dropping oldest events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let output = self.output.clone();
        let mut heartbeats = handle.subscribe_heartbeats();
        tokio::spawn(async move {
            loop {
                match heartbeats.recv().await {
                    Ok(event) => send(&output, Notification::CommandHeartbeat(event)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "heartbeat notifier lagged, dropping oldest events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

fn send(output: &mpsc::UnboundedSender<String>, notification: Notification) {
    match serde_json::to_string(&notification) {
        Ok(line) => {
            let _ = output.send(line);
        }
        Err(e) => debug!(error = %e, "failed to serialize notification"),
    }
}
