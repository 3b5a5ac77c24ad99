use crossbeam_channel::Sender;
use tracing_subscriber::EnvFilter;

use crate::state::{GeneratingStep, LogLevel, ProgressEvent};

/// Install the global subscriber. `TESTFORGE_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("TESTFORGE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Fire-and-forget progress channel.
///
/// Sends never block and a dropped receiver is ignored, so an observer can
/// never stall the pipeline.
#[derive(Clone, Default)]
pub struct ProgressSink {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn log(&self, step: GeneratingStep, level: LogLevel, msg: impl Into<String>) {
        let msg = msg.into();

        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(step = %step, "{msg}"),
            LogLevel::Warn => tracing::warn!(step = %step, "{msg}"),
            LogLevel::Error => tracing::error!(step = %step, "{msg}"),
        }

        if let Some(tx) = &self.tx {
            let _ = tx.try_send(ProgressEvent::new(step, level, msg));
        }
    }
}
