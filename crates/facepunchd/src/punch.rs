//! The punch pipeline: extraction, matching, liveness and the attendance
//! decision, wired to the store and the engine thread.

use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use facepunch_core::extractor::ProbeFace;
use facepunch_core::matcher::IdentityMatch;
use facepunch_core::repository::{AttendanceRepository, GalleryRepository};
use facepunch_core::{
    decide, AttendanceEvent, AttendancePolicy, DayStats, DetectorState, EngineConfig,
    EuclideanMatcher, Identity, LivenessEngine, LivenessVerdict, MatchEngine, MatchResult,
    PunchError, PunchKind,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::engine::{EngineError, EngineHandle};
use crate::identity_lock::IdentityLocks;
use crate::session::{LivenessSessions, SessionError};
use crate::store::{AttendanceStore, StoreError};

/// Everything that ends a request without a result.
///
/// `Rejected` carries the outcomes reported to the person at the camera;
/// the other variants are infrastructure failures.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Rejected(#[from] PunchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(EngineError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Extraction(e) => ServiceError::Rejected(PunchError::ExtractionFailure(e)),
            other => ServiceError::Engine(other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognizeReport {
    pub identity: Identity,
    pub distance: f32,
    pub confidence: f32,
    /// More than one face was in the image; the largest was used.
    pub multiple_faces: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PunchReport {
    pub message: String,
    pub identity: Identity,
    pub kind: PunchKind,
    pub timestamp: DateTime<Utc>,
    pub match_confidence: f32,
    pub liveness: LivenessVerdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageIssue {
    pub index: usize,
    pub angle: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterReport {
    pub identity_id: String,
    pub saved: usize,
    pub rejected: Vec<ImageIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodayReport {
    pub date: NaiveDate,
    /// Active identities.
    pub registered: usize,
    #[serde(flatten)]
    pub stats: DayStats,
}

const DEFAULT_ANGLE: &str = "front";

pub struct PunchService {
    engine: EngineHandle,
    store: AttendanceStore,
    matcher: MatchEngine<EuclideanMatcher>,
    liveness: LivenessEngine,
    policy: AttendancePolicy,
    locks: IdentityLocks,
    sessions: Mutex<LivenessSessions>,
}

impl PunchService {
    pub fn new(
        engine: EngineHandle,
        store: AttendanceStore,
        config: &EngineConfig,
        session_ttl: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            matcher: MatchEngine::new(EuclideanMatcher, config.matching),
            liveness: LivenessEngine::new(config.liveness.clone()),
            policy: config.attendance,
            locks: IdentityLocks::new(),
            sessions: Mutex::new(LivenessSessions::new(session_ttl)),
        }
    }

    pub fn store(&self) -> &AttendanceStore {
        &self.store
    }

    /// Identify the largest face in `image` without liveness or punching.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<RecognizeReport, ServiceError> {
        let probe = self.engine.probe(image).await?;
        let m = self.identify(&probe).await?;
        Ok(RecognizeReport {
            identity: m.identity,
            distance: m.distance,
            confidence: m.confidence,
            multiple_faces: probe.selection.is_ambiguous(),
        })
    }

    pub async fn start_session(&self) -> String {
        let state = self.liveness.new_state();
        self.sessions.lock().await.start(state, Instant::now())
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.lock().await.open_sessions()
    }

    /// Run liveness on a burst. With a session, the blink history carries
    /// over to later checks and the session stays open.
    pub async fn liveness_check(
        &self,
        frames: Vec<Vec<u8>>,
        session: Option<&str>,
    ) -> Result<LivenessVerdict, ServiceError> {
        let burst = self.engine.burst(frames).await?;
        let mut state = self.checkout(session).await?;
        let verdict = self.liveness.verify(&burst, &mut state);
        self.checkin(session, state, false).await;

        tracing::debug!(
            passed = verdict.passed,
            confidence = verdict.confidence,
            usable = verdict.usable_frames,
            ear_samples = verdict.ear_samples,
            blinking_frames = verdict.blinking_frames,
            "liveness evaluated"
        );
        Ok(verdict)
    }

    /// Full punch: identify, verify liveness, decide and record.
    ///
    /// The session state stays checked out from the liveness check until
    /// the punch is decided, so concurrent checks on the same session are
    /// refused as busy. A recorded punch consumes the session; any
    /// rejection after the check hands the state back.
    pub async fn punch(
        &self,
        image: Vec<u8>,
        frames: Vec<Vec<u8>>,
        session: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PunchReport, ServiceError> {
        let probe = self.engine.probe(image).await?;
        let m = self.identify(&probe).await?;
        let burst = self.engine.burst(frames).await?;

        let mut state = self.checkout(session).await?;
        let verdict = self.liveness.verify(&burst, &mut state);
        let result = self.record(&m, &verdict, now).await;
        self.checkin(session, state, result.is_ok()).await;
        let kind = result?;

        tracing::info!(
            identity = %m.identity.id,
            kind = %kind,
            match_confidence = m.confidence,
            liveness_confidence = verdict.confidence,
            "punch recorded"
        );

        Ok(PunchReport {
            message: format!("{} successful", kind.label()),
            identity: m.identity,
            kind,
            timestamp: now,
            match_confidence: m.confidence,
            liveness: verdict,
        })
    }

    /// Gate on the verdict, then decide and append under the identity lock.
    async fn record(
        &self,
        m: &IdentityMatch,
        verdict: &LivenessVerdict,
        now: DateTime<Utc>,
    ) -> Result<PunchKind, ServiceError> {
        if !verdict.passed {
            tracing::warn!(
                identity = %m.identity.id,
                confidence = verdict.confidence,
                texture = verdict.texture_passed,
                motion = verdict.motion_passed,
                blink = verdict.blink_detected,
                "punch rejected: liveness failed"
            );
            return Err(PunchError::LivenessFailure(Box::new(verdict.clone())).into());
        }

        let _guard = self.locks.lock(&m.identity.id).await;
        let today = self.store.events_for(&m.identity.id, now.date_naive()).await?;
        let kind = decide(&today, now, &self.policy).map_err(|too_soon| {
            tracing::info!(
                identity = %m.identity.id,
                remaining_secs = too_soon.remaining_secs,
                "punch rejected: too soon for punch out"
            );
            PunchError::TooSoonForPunchOut(too_soon)
        })?;
        self.store
            .append(&AttendanceEvent {
                identity_id: m.identity.id.clone(),
                kind,
                timestamp: now,
                match_confidence: m.confidence,
                liveness_passed: verdict.passed,
                liveness_confidence: verdict.confidence,
            })
            .await?;
        Ok(kind)
    }

    /// The session's detector state, or a fresh one without a session.
    async fn checkout(&self, session: Option<&str>) -> Result<DetectorState, ServiceError> {
        match session {
            Some(id) => Ok(self.sessions.lock().await.take(id, Instant::now())?),
            None => Ok(self.liveness.new_state()),
        }
    }

    /// Hand the state back to its session, or close the session when `consumed`.
    async fn checkin(&self, session: Option<&str>, state: DetectorState, consumed: bool) {
        let Some(id) = session else {
            return;
        };
        let mut sessions = self.sessions.lock().await;
        if consumed {
            sessions.finish(id);
        } else {
            sessions.restore(id, state, Instant::now());
        }
    }

    /// Enroll face images for an active identity.
    ///
    /// Images that fail decoding, detection or the quality gate are
    /// reported individually; the rest are stored.
    pub async fn register_faces(
        &self,
        identity_id: &str,
        images: Vec<Vec<u8>>,
        angles: &[String],
    ) -> Result<RegisterReport, ServiceError> {
        match self.store.identity(identity_id).await? {
            Some(record) if record.active => {}
            _ => return Err(StoreError::UnknownIdentity(identity_id.to_string()).into()),
        }

        let mut report = RegisterReport {
            identity_id: identity_id.to_string(),
            saved: 0,
            rejected: Vec::new(),
        };
        for (index, image) in images.into_iter().enumerate() {
            let angle = angles
                .get(index)
                .map(String::as_str)
                .unwrap_or(DEFAULT_ANGLE)
                .to_string();
            match self.engine.enroll(image).await? {
                Ok(face) => {
                    self.store
                        .add_embedding(identity_id, &face.embedding, &angle, face.quality_score)
                        .await?;
                    report.saved += 1;
                }
                Err(issue) => {
                    tracing::warn!(identity = identity_id, index, %issue, "enrollment image rejected");
                    report.rejected.push(ImageIssue {
                        index,
                        angle,
                        message: issue.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            identity = identity_id,
            saved = report.saved,
            rejected = report.rejected.len(),
            "faces registered"
        );
        Ok(report)
    }

    pub async fn today_stats(&self, now: DateTime<Utc>) -> Result<TodayReport, ServiceError> {
        let date = now.date_naive();
        let events = self.store.events_on(date).await?;
        let registered = self.store.list_identities(false).await?.len();
        Ok(TodayReport {
            date,
            registered,
            stats: DayStats::from_events(&events),
        })
    }

    async fn identify(&self, probe: &ProbeFace) -> Result<IdentityMatch, ServiceError> {
        let gallery = self.store.active_embeddings().await?;
        match self.matcher.identify(&probe.embedding, &gallery) {
            MatchResult::Match(m) => {
                tracing::info!(
                    identity = %m.identity.id,
                    distance = m.distance,
                    confidence = m.confidence,
                    "face matched"
                );
                Ok(m)
            }
            MatchResult::NoMatch(reason) => {
                tracing::info!(?reason, "face not matched");
                Err(PunchError::NoMatch(reason).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::test_support::{encode_png, noise_png, FakeExtractor};
    use chrono::TimeZone;
    use facepunch_core::matcher::NoMatchReason;
    use facepunch_core::quality::QualityConfig;
    use facepunch_core::ExtractionError;
    use image::{GrayImage, Luma};
    use std::path::Path;
    use std::sync::Arc;

    const SIZE: u32 = 128;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
    }

    /// Service whose extractor sees one whole-frame face embedding to `probe`,
    /// with "E1" enrolled at `[1, 0]`.
    async fn service(probe: Vec<f32>) -> PunchService {
        service_with(FakeExtractor::whole(probe)).await
    }

    async fn service_with(extractor: FakeExtractor) -> PunchService {
        let store = AttendanceStore::open(Path::new(":memory:"), 2).await.unwrap();
        store.create_identity("E1", "Alice").await.unwrap();
        store
            .add_embedding("E1", &facepunch_core::Embedding::new(vec![1.0, 0.0]), "front", 0.9)
            .await
            .unwrap();
        let engine = spawn_engine(extractor, QualityConfig::default()).unwrap();
        PunchService::new(
            engine,
            store,
            &EngineConfig::default(),
            Duration::from_secs(120),
        )
    }

    fn live_frames() -> Vec<Vec<u8>> {
        (0..3).map(|i| noise_png(SIZE, SIZE, 10 + i)).collect()
    }

    fn flat_frames() -> Vec<Vec<u8>> {
        let flat = encode_png(&GrayImage::from_pixel(SIZE, SIZE, Luma([128])));
        vec![flat; 3]
    }

    fn probe_image() -> Vec<u8> {
        noise_png(SIZE, SIZE, 1)
    }

    #[tokio::test]
    async fn test_punch_in_then_too_soon_then_out() {
        let svc = service(vec![1.0, 0.0]).await;

        let first = svc.punch(probe_image(), live_frames(), None, t0()).await.unwrap();
        assert_eq!(first.kind, PunchKind::PunchIn);
        assert_eq!(first.message, "Punch In successful");
        assert_eq!(first.identity.id, "E1");
        assert_eq!(first.match_confidence, 1.0);
        assert!(first.liveness.texture_passed);

        let early = t0() + chrono::Duration::hours(5) + chrono::Duration::minutes(59);
        let err = svc.punch(probe_image(), live_frames(), None, early).await.unwrap_err();
        let t = match err {
            ServiceError::Rejected(PunchError::TooSoonForPunchOut(t)) => t,
            other => panic!("expected too soon, got {other:?}"),
        };
        assert_eq!((t.hours(), t.minutes()), (0, 1));

        let later = t0() + chrono::Duration::hours(6);
        let out = svc.punch(probe_image(), live_frames(), None, later).await.unwrap();
        assert_eq!(out.kind, PunchKind::PunchOut);
        assert_eq!(out.message, "Punch Out successful");

        let stats = svc.today_stats(later).await.unwrap();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.stats.present, 1);
        assert_eq!(stats.stats.punched_in, 0);
        assert_eq!(stats.stats.punched_out, 1);
    }

    #[tokio::test]
    async fn test_spoof_records_nothing() {
        let svc = service(vec![1.0, 0.0]).await;
        let err = svc.punch(probe_image(), flat_frames(), None, t0()).await.unwrap_err();
        let verdict = match err {
            ServiceError::Rejected(PunchError::LivenessFailure(verdict)) => verdict,
            other => panic!("expected liveness failure, got {other:?}"),
        };
        assert!(!verdict.passed);
        assert!(!verdict.texture_passed);
        assert!(svc.store().events_on(t0().date_naive()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_face() {
        let svc = service(vec![0.0, 1.0]).await;
        let err = svc.recognize(probe_image()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rejected(PunchError::NoMatch(NoMatchReason::OutsideTolerance { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_gallery() {
        let svc = service(vec![1.0, 0.0]).await;
        svc.store().clear_embeddings("E1").await.unwrap();
        let err = svc.punch(probe_image(), live_frames(), None, t0()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rejected(PunchError::NoMatch(NoMatchReason::EmptyGallery))
        ));
    }

    #[tokio::test]
    async fn test_no_face_is_extraction_failure() {
        let svc = service_with(FakeExtractor::faceless()).await;
        let err = svc.recognize(probe_image()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rejected(PunchError::ExtractionFailure(ExtractionError::NoFace))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_bytes_are_extraction_failures() {
        let svc = service(vec![1.0, 0.0]).await;
        let err = svc.recognize(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Rejected(PunchError::ExtractionFailure(ExtractionError::Decode(_)))
        ));

        let mut frames = live_frames();
        frames[1] = b"not an image".to_vec();
        let err = svc.punch(probe_image(), frames, None, t0()).await.unwrap_err();
        match err {
            ServiceError::Rejected(e) => assert_eq!(e.code(), "decode_failed"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(svc.store().events_on(t0().date_naive()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recognize() {
        let svc = service(vec![1.0, 0.0]).await;
        let report = svc.recognize(probe_image()).await.unwrap();
        assert_eq!(report.identity, Identity::new("E1", "Alice"));
        assert_eq!(report.distance, 0.0);
        assert!(!report.multiple_faces);
    }

    #[tokio::test]
    async fn test_session_survives_checks_and_is_consumed_by_punch() {
        let svc = service(vec![1.0, 0.0]).await;
        let session = svc.start_session().await;

        let verdict = svc.liveness_check(live_frames(), Some(&session)).await.unwrap();
        assert!(verdict.passed);
        assert_eq!(svc.open_sessions().await, 1);

        svc.punch(probe_image(), live_frames(), Some(&session), t0())
            .await
            .unwrap();
        assert_eq!(svc.open_sessions().await, 0);

        let err = svc
            .liveness_check(live_frames(), Some(&session))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Session(SessionError::Unknown(_))));
    }

    #[tokio::test]
    async fn test_session_held_for_whole_punch() {
        let svc = service(vec![1.0, 0.0]).await;
        let session = svc.start_session().await;

        // While the state is checked out, a check on the same session is busy.
        let held = svc.checkout(Some(&session)).await.unwrap();
        let err = svc
            .liveness_check(live_frames(), Some(&session))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Session(SessionError::Busy(_))));
        let err = svc
            .punch(probe_image(), live_frames(), Some(&session), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Session(SessionError::Busy(_))));
        assert!(svc.store().events_on(t0().date_naive()).await.unwrap().is_empty());
        svc.checkin(Some(&session), held, false).await;

        // A rejected punch hands the session back with its history.
        let err = svc
            .punch(probe_image(), flat_frames(), Some(&session), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(PunchError::LivenessFailure(_))));
        assert_eq!(svc.open_sessions().await, 1);
        let verdict = svc.liveness_check(live_frames(), Some(&session)).await.unwrap();
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn test_concurrent_punches_serialised() {
        let svc = Arc::new(service(vec![1.0, 0.0]).await);
        let a = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.punch(probe_image(), live_frames(), None, t0()).await })
        };
        let b = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.punch(probe_image(), live_frames(), None, t0()).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ServiceError::Rejected(PunchError::TooSoonForPunchOut(_)))
        )));
        assert_eq!(svc.store().events_on(t0().date_naive()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_faces_reports_per_image() {
        let svc = service(vec![0.6, 0.8]).await;
        let images = vec![noise_png(200, 200, 3), b"broken".to_vec(), noise_png(200, 200, 4)];
        let angles = vec!["front".to_string(), "left".to_string()];

        let report = svc.register_faces("E1", images, &angles).await.unwrap();
        assert_eq!(report.saved, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 1);
        assert_eq!(report.rejected[0].angle, "left");

        let infos = svc.store().list_embeddings("E1").await.unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[2].angle_label, "front");
    }

    #[tokio::test]
    async fn test_register_faces_unknown_identity() {
        let svc = service(vec![1.0, 0.0]).await;
        let err = svc
            .register_faces("nobody", vec![noise_png(200, 200, 3)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::UnknownIdentity(_))));
    }
}
