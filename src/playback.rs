//! Ordered speech playback
//!
//! Every unit of text is handed to a single worker task, so units are
//! spoken strictly in submission order and never overlap. Each submission
//! returns a [`Spoken`] future that resolves once that unit finished (or
//! was skipped), which is how callers chain "after this is said" actions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

use crate::voice::Synthesizer;

/// One queued unit
struct PlaybackTask {
    text: String,
    epoch: u64,
    done: oneshot::Sender<()>,
}

/// Resolves when a queued unit has been spoken, skipped or cleared
#[must_use = "a Spoken future does nothing unless awaited"]
#[derive(Debug)]
pub struct Spoken(oneshot::Receiver<()>);

impl Future for Spoken {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender also counts as finished
        Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}

/// FIFO of text units rendered by a [`Synthesizer`]
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<PlaybackTask>,
    synthesizer: Arc<dyn Synthesizer>,
    epoch: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl PlaybackQueue {
    /// Create a queue and spawn its worker
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_worker(
            rx,
            Arc::clone(&synthesizer),
            Arc::clone(&epoch),
            Arc::clone(&pending),
        ));

        Self {
            tx,
            synthesizer,
            epoch,
            pending,
        }
    }

    /// Queue `text` behind everything already submitted
    ///
    /// Blank text is not rendered; its future still resolves in order.
    pub fn enqueue(&self, text: impl Into<String>) -> Spoken {
        let (done, rx) = oneshot::channel();
        let task = PlaybackTask {
            text: text.into(),
            epoch: self.epoch.load(Ordering::SeqCst),
            done,
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            // The worker is gone; the dropped task resolves the future
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("playback worker stopped, dropping speech");
        }

        Spoken(rx)
    }

    /// Resolves once everything submitted so far has finished
    pub fn flush(&self) -> Spoken {
        self.enqueue(String::new())
    }

    /// Cancel the unit being spoken and skip everything queued
    ///
    /// Units submitted after this call play normally.
    pub fn stop(&self) {
        let cleared = self.epoch.fetch_add(1, Ordering::SeqCst);
        self.synthesizer.stop();
        tracing::debug!(epoch = cleared + 1, pending = self.pending(), "playback cleared");
    }

    /// Units submitted but not yet finished
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether nothing is queued or playing
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

/// Speak queued units one at a time
async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<PlaybackTask>,
    synthesizer: Arc<dyn Synthesizer>,
    epoch: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(task) = rx.recv().await {
        let current = epoch.load(Ordering::SeqCst);

        if task.epoch != current {
            tracing::trace!("skipping cleared speech");
        } else if !task.text.trim().is_empty() {
            if let Err(e) = synthesizer.speak(&task.text).await {
                tracing::warn!(error = %e, "speech failed, continuing");
            }
        }

        pending.fetch_sub(1, Ordering::SeqCst);
        let _ = task.done.send(());
    }

    tracing::trace!("playback worker exited");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::{Error, Result};

    /// Records spoken text; "slow" units block until stopped
    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
        cancel: Notify,
    }

    #[async_trait]
    impl Synthesizer for Recorder {
        async fn speak(&self, text: &str) -> Result<()> {
            if text == "fail" {
                return Err(Error::Synthesis("boom".to_string()));
            }
            if text == "slow" {
                self.cancel.notified().await;
            }
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn stop(&self) {
            self.cancel.notify_waiters();
        }

        fn set_language(&self, _language: &str) {}
    }

    #[tokio::test]
    async fn test_units_play_in_order() {
        let recorder = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(recorder.clone());

        let first = queue.enqueue("one");
        let second = queue.enqueue("two");
        let third = queue.enqueue("three");

        third.await;
        first.await;
        second.await;

        assert_eq!(*recorder.spoken.lock().unwrap(), vec!["one", "two", "three"]);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_blank_text_resolves_without_speaking() {
        let recorder = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(recorder.clone());

        queue.enqueue("  ").await;
        queue.flush().await;

        assert!(recorder.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_break_chain() {
        let recorder = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(recorder.clone());

        let failed = queue.enqueue("fail");
        let after = queue.enqueue("after");
        failed.await;
        after.await;

        assert_eq!(*recorder.spoken.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_stop_clears_pending_units() {
        let recorder = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(recorder.clone());

        let slow = queue.enqueue("slow");
        let queued = queue.enqueue("queued");
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.stop();
        tokio::time::timeout(Duration::from_secs(1), async {
            slow.await;
            queued.await;
        })
        .await
        .unwrap();

        // The in-flight unit finished early; the queued one was skipped
        assert_eq!(*recorder.spoken.lock().unwrap(), vec!["slow"]);

        queue.enqueue("fresh").await;
        assert_eq!(*recorder.spoken.lock().unwrap(), vec!["slow", "fresh"]);
    }
}
