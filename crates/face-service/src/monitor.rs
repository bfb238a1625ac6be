//! Live monitoring loop
//!
//! Frames are published into a single latest-frame slot. A fixed-rate loop
//! picks up whatever frame is newest, counts it for FPS and starts a
//! recognition tick when the pipeline is idle. Frames that arrive while a
//! tick is running are overwritten, never queued.

use crate::pipeline::RecognitionPipeline;
use common::face::VideoFrame;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(33);

/// Source of frames for the monitor loop
pub trait FrameSource: Send + 'static {
    /// The newest frame delivered since the previous call, if any
    fn next_frame(&mut self) -> Option<VideoFrame>;
}

/// Producer side of the latest-frame slot
#[derive(Clone)]
pub struct FramePublisher {
    tx: watch::Sender<Option<VideoFrame>>,
}

impl FramePublisher {
    /// Replace whatever frame is waiting
    pub fn publish(&self, frame: VideoFrame) {
        self.tx.send_replace(Some(frame));
    }

    pub fn subscribe(&self) -> LatestFrameSource {
        LatestFrameSource {
            rx: self.tx.subscribe(),
        }
    }
}

/// Consumer side of the latest-frame slot
pub struct LatestFrameSource {
    rx: watch::Receiver<Option<VideoFrame>>,
}

/// Create a connected publisher and source
pub fn latest_frame_channel() -> (FramePublisher, LatestFrameSource) {
    let (tx, rx) = watch::channel(None);
    (FramePublisher { tx }, LatestFrameSource { rx })
}

impl FrameSource for LatestFrameSource {
    fn next_frame(&mut self) -> Option<VideoFrame> {
        match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            _ => None,
        }
    }
}

/// Running monitor loop
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Cancel the loop and wait for it to release its frame source
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "monitor loop task failed");
        }
    }
}

/// Spawn the monitor loop. It runs until `cancel` fires.
pub fn start_monitor<S>(
    pipeline: RecognitionPipeline,
    mut source: S,
    tick_interval: Duration,
    cancel: CancellationToken,
) -> MonitorHandle
where
    S: FrameSource,
{
    let loop_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        info!(interval_ms = tick_interval.as_millis() as u64, "starting monitor loop");

        let mut interval = time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks_started = 0u64;

        loop {
            tokio::select! {
                _ = loop_cancel.cancelled() => {
                    info!("monitor loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let Some(frame) = source.next_frame() else {
                        continue;
                    };
                    pipeline.record_frame();

                    if !pipeline.is_ready() {
                        continue;
                    }

                    let Some(permit) = pipeline.try_begin() else {
                        debug!(sequence = frame.sequence, "pipeline busy, frame dropped");
                        continue;
                    };

                    ticks_started += 1;
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        let report = pipeline.run(permit, &frame).await;
                        debug!(
                            sequence = frame.sequence,
                            faces = report.results.len(),
                            events = report.events_recorded,
                            elapsed_ms = report.processing_time_ms,
                            "monitor tick complete"
                        );
                    });
                }
            }
        }

        drop(source);
        info!(ticks_started, "monitor loop stopped");
    });

    MonitorHandle { cancel, task }
}
