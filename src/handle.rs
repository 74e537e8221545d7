//! Handles for background registrations.

/// Handle for a registered callback or background task.
///
/// The registration is undone when the handle is dropped or
/// [`unregister`](Self::unregister) is called.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Handle that aborts a spawned task when released.
    pub(crate) fn for_task(id: u64, task: tokio::task::JoinHandle<()>) -> Self {
        Self::new(id, move || task.abort())
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("id", &self.id)
            .field("registered", &self.unregister_fn.is_some())
            .finish()
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drop_unregisters_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = CallbackHandle::new(7, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handle.id(), 7);

        handle.unregister();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_handle_aborts() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        drop(CallbackHandle::for_task(1, task));
        // The aborted task drops its sender.
        assert!(rx.recv().await.is_none());
    }
}
