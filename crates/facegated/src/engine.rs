use facegate_core::{
    CommandResponse, EmbeddingBackend, FaceAuthService, FaceEmbedder, FaceLocator, Rejection,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Face analysis commands the engine thread executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Detect,
    Register { identity: String },
    Verify { claimed: Option<String> },
    CheckDuplicate { excluding: Option<String> },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Detect => "detect",
            Command::Register { .. } => "register",
            Command::Verify { .. } => "verify",
            Command::CheckDuplicate { .. } => "check_duplicate",
        }
    }
}

/// Message sent from D-Bus handlers to the engine thread.
struct EngineRequest {
    command: Command,
    frame: Vec<u8>,
    deadline: Instant,
    reply: oneshot::Sender<CommandResponse>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Queue `command` for `frame` and wait for the reply, up to the call
    /// timeout. A late reply is reported as a timeout rejection.
    pub async fn submit(&self, command: Command, frame: Vec<u8>) -> Result<CommandResponse, EngineError> {
        let name = command.name();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = EngineRequest {
            command,
            frame,
            deadline: Instant::now() + self.timeout,
            reply: reply_tx,
        };

        let exchange = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(command = name, timeout_secs = self.timeout.as_secs(), "request timed out");
                Ok(CommandResponse::rejected(&Rejection::Timeout))
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread. The service, and with it both
/// models, is owned by that thread for its whole life.
pub fn spawn_engine<L, E, B>(
    mut service: FaceAuthService<L, E, B>,
    timeout: Duration,
) -> Result<EngineHandle, EngineError>
where
    L: FaceLocator + Send + 'static,
    E: FaceEmbedder + Send + 'static,
    B: EmbeddingBackend + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let name = req.command.name();
                if Instant::now() >= req.deadline {
                    tracing::warn!(command = name, "request expired in queue");
                    let _ = req.reply.send(CommandResponse::rejected(&Rejection::Timeout));
                    continue;
                }
                let response = run_command(&mut service, req.command, &req.frame, req.deadline);
                tracing::debug!(command = name, success = response.success, "request handled");
                let _ = req.reply.send(response);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, timeout })
}

fn run_command<L, E, B>(
    service: &mut FaceAuthService<L, E, B>,
    command: Command,
    frame: &[u8],
    deadline: Instant,
) -> CommandResponse
where
    L: FaceLocator,
    E: FaceEmbedder,
    B: EmbeddingBackend,
{
    match command {
        Command::Detect => service.detect(frame).into(),
        Command::Register { identity } => {
            service.register_until(&identity, frame, Some(deadline)).into()
        }
        Command::Verify { claimed } => service.verify(frame, claimed.as_deref()).into(),
        Command::CheckDuplicate { excluding } => {
            service.check_duplicate(frame, excluding.as_deref()).into()
        }
    }
}
