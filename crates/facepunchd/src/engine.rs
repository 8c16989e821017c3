use facepunch_core::extractor::{analyze_frame, extract_probe, select_face, ProbeFace};
use facepunch_core::liveness::MAX_BURST_FRAMES;
use facepunch_core::quality::{validate_face_quality, QualityConfig, QualityIssue};
use facepunch_core::{Embedding, ExtractionError, FeatureExtractor, FrameBurst};
use image::DynamicImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    /// The image was unreadable or held no usable face.
    #[error(transparent)]
    Extraction(ExtractionError),
    #[error("extractor backend failed: {0}")]
    Backend(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<ExtractionError> for EngineError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Backend(msg) => EngineError::Backend(msg),
            other => EngineError::Extraction(other),
        }
    }
}

/// A face accepted for enrollment.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub embedding: Embedding,
    /// Detector confidence of the selected face.
    pub quality_score: f32,
}

/// Why one enrollment image was not used.
#[derive(Error, Debug)]
pub enum EnrollIssue {
    #[error("Could not read image: {0}")]
    Unreadable(String),
    #[error(transparent)]
    Extraction(ExtractionError),
    #[error(transparent)]
    Quality(QualityIssue),
}

pub type EnrollOutcome = Result<EnrolledFace, EnrollIssue>;

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Probe {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<ProbeFace, EngineError>>,
    },
    Burst {
        frames: Vec<Vec<u8>>,
        reply: oneshot::Sender<Result<FrameBurst, EngineError>>,
    },
    Enroll {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Decode an encoded image, pick its largest face and embed it.
    pub async fn probe(&self, image: Vec<u8>) -> Result<ProbeFace, EngineError> {
        self.request(|reply| EngineRequest::Probe { image, reply })
            .await
    }

    /// Decode burst frames and detect face and landmarks in each.
    pub async fn burst(&self, frames: Vec<Vec<u8>>) -> Result<FrameBurst, EngineError> {
        self.request(|reply| EngineRequest::Burst { frames, reply })
            .await
    }

    /// Extract an enrollment embedding after the quality gate.
    ///
    /// The outer error is an engine failure; the inner one explains why
    /// this particular image was rejected.
    pub async fn enroll(&self, image: Vec<u8>) -> Result<EnrollOutcome, EngineError> {
        self.request(|reply| EngineRequest::Enroll { image, reply })
            .await
    }
}

/// Run `extractor` on a dedicated OS thread.
///
/// Model loading happens before this call so startup fails fast; the
/// thread only serves requests until every handle is dropped.
pub fn spawn_engine<E>(mut extractor: E, quality: QualityConfig) -> Result<EngineHandle, EngineError>
where
    E: FeatureExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facepunch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Probe { image, reply } => {
                        let _ = reply.send(run_probe(&mut extractor, &image));
                    }
                    EngineRequest::Burst { frames, reply } => {
                        let _ = reply.send(run_burst(&mut extractor, &frames));
                    }
                    EngineRequest::Enroll { image, reply } => {
                        let _ = reply.send(run_enroll(&mut extractor, &image, &quality));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_probe<E: FeatureExtractor>(extractor: &mut E, bytes: &[u8]) -> Result<ProbeFace, EngineError> {
    let image = image::load_from_memory(bytes)
        .map_err(ExtractionError::from)?
        .to_rgb8();
    let probe = extract_probe(extractor, &image)?;
    tracing::debug!(
        candidates = probe.selection.candidates,
        confidence = probe.selection.face.confidence,
        "probe: face embedded"
    );
    Ok(probe)
}

fn run_burst<E: FeatureExtractor>(
    extractor: &mut E,
    frames: &[Vec<u8>],
) -> Result<FrameBurst, EngineError> {
    if frames.len() > MAX_BURST_FRAMES {
        tracing::warn!(
            supplied = frames.len(),
            kept = MAX_BURST_FRAMES,
            "burst: ignoring frames beyond the limit"
        );
    }
    let analysed = frames
        .iter()
        .take(MAX_BURST_FRAMES)
        .map(|bytes| {
            let image: DynamicImage =
                image::load_from_memory(bytes).map_err(ExtractionError::from)?;
            Ok(analyze_frame(&mut *extractor, &image)?)
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    tracing::debug!(
        frames = analysed.len(),
        with_face = analysed.iter().filter(|f| f.face.is_some()).count(),
        "burst: frames analysed"
    );
    Ok(FrameBurst::new(analysed))
}

fn run_enroll<E: FeatureExtractor>(
    extractor: &mut E,
    bytes: &[u8],
    quality: &QualityConfig,
) -> Result<EnrollOutcome, EngineError> {
    let image = match image::load_from_memory(bytes) {
        Ok(image) => image,
        Err(e) => return Ok(Err(EnrollIssue::Unreadable(e.to_string()))),
    };
    let rgb = image.to_rgb8();

    let faces = extractor.detect_faces(&rgb).map_err(EngineError::from)?;
    let selection = match select_face(&faces) {
        Ok(s) => s,
        Err(e) => return Ok(Err(EnrollIssue::Extraction(e))),
    };
    if let Err(issue) = validate_face_quality(&image.to_luma8(), &selection.face, quality) {
        tracing::debug!(%issue, "enroll: image rejected by quality gate");
        return Ok(Err(EnrollIssue::Quality(issue)));
    }

    let Some(embedding) = extractor
        .extract_embedding(&rgb, &selection.face)
        .map_err(EngineError::from)?
    else {
        return Ok(Err(EnrollIssue::Extraction(ExtractionError::EmbeddingUnavailable)));
    };

    Ok(Ok(EnrolledFace {
        embedding,
        quality_score: selection.face.confidence,
    }))
}
