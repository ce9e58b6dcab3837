// ABOUTME: One-time startup gate awaited before any run begins
// ABOUTME: Lets the application hold runs until module initialization has happened

use tokio::sync::watch;

/// Process-lifetime "has initialization happened" gate.
///
/// Once opened it stays open.
#[derive(Debug)]
pub struct StartupBarrier {
    initialized: watch::Sender<bool>,
}

impl StartupBarrier {
    /// A barrier that blocks runs until [`mark_initialized`](Self::mark_initialized).
    pub fn new() -> Self {
        let (initialized, _) = watch::channel(false);
        Self { initialized }
    }

    /// A barrier that is already open.
    pub fn opened() -> Self {
        let barrier = Self::new();
        barrier.mark_initialized();
        barrier
    }

    pub fn mark_initialized(&self) {
        self.initialized.send_replace(true);
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    pub async fn wait(&self) {
        let mut receiver = self.initialized.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|initialized| *initialized).await;
    }
}

impl Default for StartupBarrier {
    fn default() -> Self {
        Self::new()
    }
}
