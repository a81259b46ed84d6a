use crate::pipeline::{Detection, EnrollRequest, EnrollmentError, Pipeline};
use crate::state::Kiosk;
use chrono::NaiveDateTime;
use kiosk_core::detector::DetectorError;
use kiosk_core::signature::{decode_image, SignatureError};
use kiosk_core::{FaceLocator, Identity, TemplateMatcher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("invalid image: {0}")]
    Image(#[from] SignatureError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Process {
        frame: Vec<u8>,
        at: NaiveDateTime,
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
    Enroll {
        request: EnrollRequest,
        image: Vec<u8>,
        at: NaiveDateTime,
        reply: oneshot::Sender<Result<Identity, EngineError>>,
    },
    SignatureCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode `frame`, then locate, match and mark every face in it.
    pub async fn process(&self, frame: Vec<u8>, at: NaiveDateTime) -> Result<Vec<Detection>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Process { frame, at, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll a new identity from an encoded image.
    pub async fn enroll(
        &self,
        request: EnrollRequest,
        image: Vec<u8>,
        at: NaiveDateTime,
    ) -> Result<Identity, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Enroll {
            request,
            image,
            at,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Number of identities that currently have a signature.
    pub async fn signature_count(&self) -> Result<usize, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::SignatureCount { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// `make_locator` runs on that thread, since the cascade detector is not
/// `Send`. The signature gallery is built from the registry before the first
/// request is served. Fails fast if the locator cannot be created.
pub fn spawn_engine<F>(make_locator: F, kiosk: Arc<Kiosk>) -> Result<EngineHandle, EngineError>
where
    F: FnOnce() -> Result<Box<dyn FaceLocator>, DetectorError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<Result<usize, DetectorError>>(1);

    std::thread::Builder::new()
        .name("kiosk-engine".into())
        .spawn(move || {
            let locator = match make_locator() {
                Ok(locator) => locator,
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };
            let mut pipeline = Pipeline::load(locator, Box::new(TemplateMatcher), &kiosk);
            let _ = init_tx.send(Ok(pipeline.signature_count()));

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Process { frame, at, reply } => {
                        let result = decode_image(&frame)
                            .map(|image| pipeline.process(&image, at, &kiosk))
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll {
                        request,
                        image,
                        at,
                        reply,
                    } => {
                        let result = decode_image(&image)
                            .map_err(EnrollmentError::from)
                            .and_then(|image| pipeline.enroll(&request, &image, at, &kiosk))
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::SignatureCount { reply } => {
                        let _ = reply.send(pipeline.signature_count());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    let signatures = init_rx.recv().map_err(|_| EngineError::ChannelClosed)??;
    tracing::info!(signatures, "face engine ready");

    Ok(EngineHandle { tx })
}
