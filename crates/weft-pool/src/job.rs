//! Units of work executed by pool workers.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::cancel::CancelToken;
use weft_core::Result;

type WorkFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A named unit of work.
///
/// A job owns its work closure, so the body runs at most once: `run`
/// consumes the job. A job that wants to re-enqueue itself captures a clone
/// of its queue handle in the closure and submits a fresh job.
pub struct Job {
    name: String,
    payload: Option<Bytes>,
    token: Option<CancelToken>,
    work: WorkFn,
    completion: Option<oneshot::Sender<Result<()>>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("payload_len", &self.payload.as_ref().map(Bytes::len))
            .finish()
    }
}

impl Job {
    /// Create a job from a plain work closure.
    pub fn callback(name: impl Into<String>, work: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            name: name.into(),
            payload: None,
            token: None,
            work: Box::new(work),
            completion: None,
        }
    }

    /// Create a job that carries a byte payload handed to its handler.
    pub fn data(
        name: impl Into<String>,
        payload: Bytes,
        handler: impl FnOnce(Bytes) -> Result<()> + Send + 'static,
    ) -> Self {
        let handed = payload.clone();
        Self {
            name: name.into(),
            payload: Some(payload),
            token: None,
            work: Box::new(move || handler(handed)),
            completion: None,
        }
    }

    /// Attach a cancellation token checked before the job body runs.
    #[must_use]
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    /// The job name, used in logs and failure messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The byte payload, if this is a data job.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// The cancellation token, if one is attached.
    pub fn token(&self) -> Option<&CancelToken> {
        self.token.as_ref()
    }

    /// Run the job body, honouring the attached cancellation token.
    pub fn run(self) -> Result<()> {
        if let Some(token) = &self.token {
            token.ensure_active()?;
        }
        (self.work)()
    }

    pub(crate) fn set_completion(&mut self, tx: oneshot::Sender<Result<()>>) {
        self.completion = Some(tx);
    }

    pub(crate) fn take_completion(&mut self) -> Option<oneshot::Sender<Result<()>>> {
        self.completion.take()
    }
}
