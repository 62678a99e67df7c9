use anyhow::{Context, Result};
use crossbeam::channel::Sender;
use log::{debug, info};
use std::thread::{self, JoinHandle};
use tokio::runtime::Builder;

/// Listen for a termination request on a background thread and send one
/// stop message to the polling loop when it arrives.
///
/// Handlers are registered before this returns, so a signal delivered
/// right after startup is not lost.
pub fn spawn_signal_listener(stop: Sender<()>) -> Result<JoinHandle<()>> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    let mut signals = {
        let _guard = runtime.enter();
        TerminationSignals::register().context("failed to register termination signal handlers")?
    };

    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            let name = runtime.block_on(signals.recv());
            info!("Received {name}");
            if stop.send(()).is_err() {
                debug!("Polling loop already stopped");
            }
        })
        .context("failed to spawn signal listener thread")
}

#[cfg(unix)]
struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(windows)]
struct TerminationSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_close: tokio::signal::windows::CtrlClose,
}

#[cfg(windows)]
impl TerminationSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
            ctrl_close: tokio::signal::windows::ctrl_close()?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.ctrl_c.recv() => "Ctrl+C",
            _ = self.ctrl_close.recv() => "console close",
        }
    }
}
