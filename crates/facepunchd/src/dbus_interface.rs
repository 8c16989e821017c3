use std::sync::Arc;

use serde::Serialize;
use zbus::interface;

use crate::config::Config;
use crate::punch::{PunchService, ServiceError};
use crate::store::{HistoryFilter, StoreError};

/// Shared state accessible by D-Bus method handlers.
///
/// The punch service synchronises internally, so handlers run concurrently.
pub struct AppState {
    pub config: Config,
    pub service: PunchService,
    /// The extractor produces eye contours, so blinks can be detected.
    pub blink_detection: bool,
}

/// D-Bus interface of the attendance daemon.
///
/// Bus name: org.facepunch.Attendance1
/// Object path: /org/facepunch/Attendance1
///
/// Replies are JSON strings. Rejections the person at the camera should
/// see (no face, not recognized, liveness, too soon) are regular replies
/// with `"success": false`; infrastructure failures are D-Bus errors.
pub struct AttendanceService {
    pub state: Arc<AppState>,
}

fn failed(context: &'static str, e: impl std::fmt::Display) -> zbus::fdo::Error {
    tracing::error!(error = %e, "{context} failed");
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Reply for pipeline operations: the report, a rejection, or a D-Bus error.
fn outcome<T: Serialize>(
    context: &'static str,
    result: Result<T, ServiceError>,
) -> zbus::fdo::Result<String> {
    match result {
        Ok(report) => Ok(serde_json::json!({ "success": true, "result": report }).to_string()),
        Err(ServiceError::Rejected(e)) => Ok(serde_json::json!({
            "success": false,
            "code": e.code(),
            "message": e.to_string(),
            "detail": e.detail(),
        })
        .to_string()),
        Err(e) => Err(service_error(context, e)),
    }
}

fn service_error(context: &'static str, e: ServiceError) -> zbus::fdo::Error {
    match e {
        ServiceError::Session(e) => {
            tracing::warn!(error = %e, "{context}: bad liveness session");
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        ServiceError::Store(
            e @ (StoreError::UnknownIdentity(_) | StoreError::DuplicateIdentity(_)),
        ) => {
            tracing::warn!(error = %e, "{context}: rejected");
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => failed(context, other),
    }
}

fn session_arg(session: &str) -> Option<&str> {
    (!session.is_empty()).then_some(session)
}

#[interface(name = "org.facepunch.Attendance1")]
impl AttendanceService {
    /// Register a new identity under an unused external id.
    async fn create_identity(&self, id: &str, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, name, "create_identity requested");
        if id.trim().is_empty() || name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "identity id and name must not be empty".to_string(),
            ));
        }
        let record = self
            .state
            .service
            .store()
            .create_identity(id, name)
            .await
            .map_err(|e| service_error("create_identity", e.into()))?;
        to_json(&record)
    }

    /// Deactivate an identity; it stops matching but keeps its history.
    async fn deactivate_identity(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "deactivate_identity requested");
        let removed = self
            .state
            .service
            .store()
            .deactivate_identity(id)
            .await
            .map_err(|e| failed("deactivate_identity", e))?;
        if !removed {
            tracing::warn!(id, "identity not found or already inactive");
        }
        Ok(removed)
    }

    async fn list_identities(&self, include_inactive: bool) -> zbus::fdo::Result<String> {
        let identities = self
            .state
            .service
            .store()
            .list_identities(include_inactive)
            .await
            .map_err(|e| failed("list_identities", e))?;
        to_json(&identities)
    }

    /// Enroll encoded face images; `angles[i]` labels `images[i]`.
    async fn register_faces(
        &self,
        id: &str,
        images: Vec<Vec<u8>>,
        angles: Vec<String>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(id, images = images.len(), "register_faces requested");
        let report = self
            .state
            .service
            .register_faces(id, images, &angles)
            .await
            .map_err(|e| service_error("register_faces", e))?;
        to_json(&report)
    }

    /// Stored embeddings of an identity (metadata only) as JSON.
    async fn list_faces(&self, id: &str) -> zbus::fdo::Result<String> {
        let faces = self
            .state
            .service
            .store()
            .list_embeddings(id)
            .await
            .map_err(|e| failed("list_faces", e))?;
        to_json(&faces)
    }

    /// Delete every stored embedding of an identity.
    async fn clear_faces(&self, id: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(id, "clear_faces requested");
        let removed = self
            .state
            .service
            .store()
            .clear_embeddings(id)
            .await
            .map_err(|e| failed("clear_faces", e))?;
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }

    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        outcome("recognize", self.state.service.recognize(image).await)
    }

    /// Open a liveness session and return its id.
    async fn start_liveness_session(&self) -> String {
        self.state.service.start_session().await
    }

    /// Run liveness on a burst. An empty `session` evaluates without history.
    async fn liveness_check(
        &self,
        frames: Vec<Vec<u8>>,
        session: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(frames = frames.len(), session, "liveness_check requested");
        let verdict = self
            .state
            .service
            .liveness_check(frames, session_arg(session))
            .await
            .map_err(|e| service_error("liveness_check", e))?;
        to_json(&verdict)
    }

    /// Identify, verify liveness and record a punch at the current time.
    async fn punch(
        &self,
        image: Vec<u8>,
        frames: Vec<Vec<u8>>,
        session: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(frames = frames.len(), session, "punch requested");
        let result = self
            .state
            .service
            .punch(image, frames, session_arg(session), chrono::Utc::now())
            .await;
        outcome("punch", result)
    }

    /// Attendance history. `filter` is a JSON object with optional
    /// `identity`, `from`, `to` (YYYY-MM-DD), `offset` and `limit`.
    async fn history(&self, filter: &str) -> zbus::fdo::Result<String> {
        let filter: HistoryFilter = if filter.trim().is_empty() {
            HistoryFilter::default()
        } else {
            serde_json::from_str(filter)
                .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid filter: {e}")))?
        };
        let page = self
            .state
            .service
            .store()
            .history(&filter)
            .await
            .map_err(|e| failed("history", e))?;
        to_json(&page)
    }

    async fn today_stats(&self) -> zbus::fdo::Result<String> {
        let report = self
            .state
            .service
            .today_stats(chrono::Utc::now())
            .await
            .map_err(|e| service_error("today_stats", e))?;
        to_json(&report)
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = &self.state;
        let store = state.service.store();
        let identities = store.list_identities(false).await.map(|v| v.len()).unwrap_or(0);
        let embeddings = store.count_embeddings().await.unwrap_or(0);

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "model_dir": state.config.model_dir,
            "identities": identities,
            "embeddings": embeddings,
            "open_liveness_sessions": state.service.open_sessions().await,
            "match_tolerance": state.config.engine.matching.tolerance,
            "liveness_min_frames": state.config.engine.liveness.min_frames,
            "blink_detection": state.blink_detection,
            "min_hours_for_punch_out": state.config.engine.attendance.min_hours_for_punch_out,
            "session_bus": state.config.session_bus,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facepunch_core::{ExtractionError, PunchError};

    #[test]
    fn test_rejection_is_a_reply() {
        let result: Result<(), ServiceError> =
            Err(PunchError::ExtractionFailure(ExtractionError::NoFace).into());
        let reply: serde_json::Value =
            serde_json::from_str(&outcome("punch", result).unwrap()).unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["code"], "no_face");
        assert_eq!(reply["message"], "No face detected in the image");
    }

    #[test]
    fn test_unreadable_image_is_a_reply() {
        let decode = image::load_from_memory(b"\x00\x01").unwrap_err();
        let result: Result<(), ServiceError> =
            Err(PunchError::ExtractionFailure(ExtractionError::Decode(decode)).into());
        let reply: serde_json::Value =
            serde_json::from_str(&outcome("recognize", result).unwrap()).unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["code"], "decode_failed");
    }

    #[test]
    fn test_success_wraps_report() {
        let reply: serde_json::Value =
            serde_json::from_str(&outcome("punch", Ok(serde_json::json!({"k": 1}))).unwrap())
                .unwrap();
        assert_eq!(reply["success"], true);
        assert_eq!(reply["result"]["k"], 1);
    }

    #[test]
    fn test_infrastructure_failure_is_dbus_error() {
        let result: Result<(), ServiceError> =
            Err(ServiceError::Store(StoreError::DecryptionFailed));
        assert!(matches!(
            outcome("punch", result),
            Err(zbus::fdo::Error::Failed(_))
        ));

        let unknown: Result<(), ServiceError> =
            Err(ServiceError::Store(StoreError::UnknownIdentity("E9".into())));
        assert!(matches!(
            outcome("register_faces", unknown),
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_empty_session_means_none() {
        assert_eq!(session_arg(""), None);
        assert_eq!(session_arg("abc"), Some("abc"));
    }
}
