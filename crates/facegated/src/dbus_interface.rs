use crate::engine::{Command, EngineHandle};
use facegate_core::{decode_frame, CommandResponse, EmbeddingBackend, EmbeddingStore, StoreError};
use facegate_store::SqliteBackend;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the FaceGate daemon.
///
/// Bus name: org.facegate.FaceGate1
/// Object path: /org/facegate/FaceGate1
///
/// Frame arguments are base64 strings. Analysis methods reply with the JSON
/// response document; an empty identity argument means "none".
pub struct FaceGateService {
    pub engine: EngineHandle,
    pub store: Arc<EmbeddingStore<SqliteBackend>>,
    pub match_tolerance: f32,
    pub duplicate_tolerance: f32,
}

impl FaceGateService {
    async fn run(&self, command: Command, frame_b64: &str) -> zbus::fdo::Result<String> {
        let frame = match decode_frame(frame_b64) {
            Ok(frame) => frame,
            Err(rejection) => return Ok(CommandResponse::rejected(&rejection).to_json()),
        };
        let response = self
            .engine
            .submit(command, frame)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(response.to_json())
    }
}

/// Run a store call on the blocking pool. Writes go through to SQLite and
/// must stay off the executor threads.
async fn with_store<B, T, F>(store: &Arc<EmbeddingStore<B>>, call: F) -> zbus::fdo::Result<T>
where
    B: EmbeddingBackend + 'static,
    T: Send + 'static,
    F: FnOnce(&EmbeddingStore<B>) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(&store))
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("store task failed: {e}")))?
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn optional(identity: &str) -> Option<String> {
    let identity = identity.trim();
    (!identity.is_empty()).then(|| identity.to_string())
}

#[interface(name = "org.facegate.FaceGate1")]
impl FaceGateService {
    /// Locate exactly one face and return its region, embedding and preview.
    async fn detect(&self, frame: &str) -> zbus::fdo::Result<String> {
        tracing::info!("detect requested");
        self.run(Command::Detect, frame).await
    }

    /// Enroll the face in `frame` for `identity`, refusing duplicates.
    async fn register(&self, identity: &str, frame: &str) -> zbus::fdo::Result<String> {
        tracing::info!(identity, "register requested");
        self.run(
            Command::Register { identity: identity.to_string() },
            frame,
        )
        .await
    }

    /// Verify the face against `identity`, or against everyone when empty.
    async fn verify(&self, identity: &str, frame: &str) -> zbus::fdo::Result<String> {
        tracing::info!(identity, "verify requested");
        self.run(Command::Verify { claimed: optional(identity) }, frame)
            .await
    }

    /// Report whether the face is already enrolled under another account.
    async fn check_duplicate(&self, exclude: &str, frame: &str) -> zbus::fdo::Result<String> {
        tracing::info!(exclude, "check_duplicate requested");
        self.run(
            Command::CheckDuplicate { excluding: optional(exclude) },
            frame,
        )
        .await
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let identities = with_store(&self.store, |store| store.len()).await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "models_loaded": true,
            "identities": identities,
            "match_tolerance": self.match_tolerance,
            "duplicate_tolerance": self.duplicate_tolerance,
        })
        .to_string())
    }

    /// List enrolled identities with their last update time.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let listing = with_store(&self.store, |store| store.list()).await?;
        serde_json::to_string(&listing).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove the enrolled face for `identity`. Returns whether one existed.
    async fn remove_identity(&self, identity: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity, "remove_identity requested");
        let identity = identity.to_string();
        with_store(&self.store, move |store| store.remove(&identity)).await
    }

    /// Whether `identity` has an enrolled face.
    async fn is_registered(&self, identity: &str) -> zbus::fdo::Result<bool> {
        let identity = identity.to_string();
        with_store(&self.store, move |store| store.contains(&identity)).await
    }
}
