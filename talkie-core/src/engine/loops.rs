//! The two long-running loops.
//!
//! Both run on blocking threads for the life of the engine, gated on
//! the shared `running` flag. Each iteration is a single `*_tick` call
//! on [`EngineInner`] — the ticks hold all the logic so tests can
//! drive them deterministically without threads.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::EngineInner;

/// Foreground block-with-timeout: short enough that keepalive and the
/// stop-speak drain stay responsive, long enough not to spin.
pub(crate) const FOREGROUND_WAIT: Duration = Duration::from_millis(50);

/// Audio tick period. One opus frame is 60 ms, so a 10 ms tick keeps
/// the loop comfortably ahead of both directions.
pub(crate) const AUDIO_TICK: Duration = Duration::from_millis(10);

pub(crate) fn run_foreground(inner: Arc<EngineInner>) {
    info!("foreground loop started");
    while inner.is_running() {
        inner.foreground_tick(FOREGROUND_WAIT);
    }
    info!("foreground loop stopped");
}

pub(crate) fn run_audio(inner: Arc<EngineInner>) {
    info!("audio loop started");
    while inner.is_running() {
        std::thread::sleep(AUDIO_TICK);
        inner.audio_tick();
    }
    info!("audio loop stopped");
}
