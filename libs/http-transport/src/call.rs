//! Handle returned by callback-style sends.

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Bytes moved so far in one direction of an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    /// Expected total, when known (from `Content-Length` for downloads)
    pub total: Option<u64>,
}

impl Progress {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.total.is_some_and(|total| self.completed >= total)
    }
}

/// Sending half of a call's progress and cancellation state.
///
/// Requests sent without a handle use a detached context nobody observes.
pub struct CallContext {
    cancel: CancellationToken,
    download: watch::Sender<Progress>,
    upload: watch::Sender<Progress>,
}

impl CallContext {
    pub(crate) fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            download: watch::Sender::new(Progress::default()),
            upload: watch::Sender::new(Progress::default()),
        }
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn report_download(&self, progress: Progress) {
        self.download.send_replace(progress);
    }

    pub(crate) fn report_upload(&self, progress: Progress) {
        self.upload.send_replace(progress);
    }
}

/// An in-flight request started with a callback.
///
/// Dropping the handle does not cancel the request.
#[derive(Debug)]
pub struct HttpCall {
    cancel: CancellationToken,
    download: watch::Receiver<Progress>,
    upload: watch::Receiver<Progress>,
    runtime: Handle,
}

impl HttpCall {
    pub(crate) fn new(runtime: Handle) -> (Self, CallContext) {
        let context = CallContext::detached();
        let call = Self {
            cancel: context.cancel.clone(),
            download: context.download.subscribe(),
            upload: context.upload.subscribe(),
            runtime,
        };
        (call, context)
    }

    /// Cancel the request.
    ///
    /// The completion receives `Cancelled` unless it has already run; in
    /// that case this does nothing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Latest download progress
    #[must_use]
    pub fn progress(&self) -> Progress {
        *self.download.borrow()
    }

    #[must_use]
    pub fn upload_progress(&self) -> Progress {
        *self.upload.borrow()
    }

    /// Call `observer` on every download progress update until the request ends.
    pub fn on_progress(&self, observer: impl Fn(Progress) + Send + 'static) {
        self.observe(self.download.clone(), observer);
    }

    /// Call `observer` on every upload progress update until the request ends.
    pub fn on_upload_progress(&self, observer: impl Fn(Progress) + Send + 'static) {
        self.observe(self.upload.clone(), observer);
    }

    fn observe(
        &self,
        mut updates: watch::Receiver<Progress>,
        observer: impl Fn(Progress) + Send + 'static,
    ) {
        self.runtime.spawn(async move {
            while updates.changed().await.is_ok() {
                let progress = *updates.borrow_and_update();
                observer(progress);
            }
        });
    }
}
