use tokio::sync::watch;

/// Process-wide stop signal carrying the reason it was raised. Every long-running task holds a
/// listener.
#[derive(Clone)]
pub struct Shutdown {
    sender: watch::Sender<Option<&'static str>>,
}

#[derive(Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<Option<&'static str>>,
}

impl Shutdown {
    pub fn new() -> (Self, ShutdownListener) {
        let (sender, receiver) = watch::channel(None);
        (Self { sender }, ShutdownListener { receiver })
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }

    /// The first reason wins; later triggers are ignored.
    pub fn trigger(&self, reason: &'static str) {
        let first = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            tracing::info!(target: "lifecycle", reason, "shutdown requested");
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        *self.sender.borrow()
    }
}

impl ShutdownListener {
    pub async fn notified(&mut self) {
        let _ = self.receiver.wait_for(Option::is_some).await;
    }

    pub fn is_triggered(&self) -> bool {
        self.receiver.borrow().is_some()
    }
}

/// Raises shutdown on ctrl-c, or SIGTERM on unix.
pub fn install_signal_handlers(shutdown: Shutdown) {
    tokio::spawn(async move {
        let reason = stop_signal().await;
        shutdown.trigger(reason);
    });
}

async fn stop_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                return tokio::select! {
                    _ = ctrl_c() => "ctrl-c",
                    _ = term.recv() => "SIGTERM",
                };
            }
            Err(err) => {
                tracing::warn!(target: "lifecycle", error = %err, "SIGTERM handler unavailable");
            }
        }
    }
    ctrl_c().await;
    "ctrl-c"
}

/// Never resolves when no ctrl-c handler can be installed.
async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "lifecycle", error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}
