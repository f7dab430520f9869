//! Per-job progress reporting.
//!
//! A job owns exactly one injected [`ProgressSink`]; there is no global
//! channel registry. Emission is fire-and-forget: a sink with no listener
//! drops events without erroring, and a terminal event is delivered on both
//! success and failure, after which the channel is torn down.

use std::sync::Arc;

use serde::Serialize;

fn is_false(value: &bool) -> bool {
    !*value
}

/// One coarse-grained progress milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "is_false")]
    pub completed: bool,
}

impl ProgressEvent {
    /// Newline-delimited wire frame. Consumers stop only after a frame with
    /// `completed: true`.
    pub fn frame(&self) -> String {
        let payload = serde_json::to_string(self).expect("progress event must be encodable");
        format!("data: {payload}\n\n")
    }
}

/// Injected event sink. Implementations must never block or fail the job.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: u8, message: &str);

    /// Terminal event. The sink is unusable afterwards.
    fn complete(&self, progress: u8, message: &str);
}

/// Sink for jobs nobody is listening to.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _progress: u8, _message: &str) {}
    fn complete(&self, _progress: u8, _message: &str) {}
}

/// Bounded-channel sink feeding one listener, e.g. an event-stream response
/// writer. A full buffer or a disconnected listener drops the event rather
/// than stalling the render.
pub struct ChannelSink {
    tx: async_channel::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, async_channel::Receiver<ProgressEvent>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, progress: u8, message: &str) {
        let _ = self.tx.try_send(ProgressEvent {
            progress,
            message: message.to_owned(),
            completed: false,
        });
    }

    fn complete(&self, progress: u8, message: &str) {
        let _ = self.tx.try_send(ProgressEvent {
            progress,
            message: message.to_owned(),
            completed: true,
        });
        self.tx.close();
    }
}

/// Terminal sink for the CLI: a spinner while work is in flight, a summary
/// line when it finishes.
pub struct ConsoleSink {
    bar: indicatif::ProgressBar,
}

impl ConsoleSink {
    pub fn new() -> Self {
        let bar = indicatif::ProgressBar::new(100);
        bar.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {pos:>3}% {msg}")
                .expect("static progress template must parse"),
        );
        Self { bar }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleSink {
    fn emit(&self, progress: u8, message: &str) {
        self.bar.set_position(u64::from(progress));
        self.bar.set_message(message.to_owned());
    }

    fn complete(&self, progress: u8, message: &str) {
        self.bar.set_position(u64::from(progress));
        self.bar.finish_with_message(message.to_owned());
    }
}

/// Pick a sink for the binary based on terminal capabilities.
pub fn create_sink() -> Arc<dyn ProgressSink> {
    if console::Term::stderr().is_term() {
        Arc::new(ConsoleSink::new())
    } else {
        Arc::new(NullSink)
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn emit(&self, progress: u8, message: &str) {
        (**self).emit(progress, message);
    }

    fn complete(&self, progress: u8, message: &str) {
        (**self).complete(progress, message);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_shape_matches_wire_format() {
        let event = ProgressEvent {
            progress: 42,
            message: "Embedding photograph 3 of 8".into(),
            completed: false,
        };
        assert_eq!(
            event.frame(),
            "data: {\"progress\":42,\"message\":\"Embedding photograph 3 of 8\"}\n\n"
        );
    }

    #[test]
    fn terminal_frame_carries_completed_flag() {
        let event = ProgressEvent {
            progress: 100,
            message: "Document ready".into(),
            completed: true,
        };
        assert_eq!(
            event.frame(),
            "data: {\"progress\":100,\"message\":\"Document ready\",\"completed\":true}\n\n"
        );
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order_and_closes() {
        let (sink, rx) = ChannelSink::new(16);
        sink.emit(10, "Validating report data");
        sink.emit(45, "Placeholder mapping complete");
        sink.complete(100, "Document ready");

        assert_eq!(rx.recv().await.unwrap().progress, 10);
        assert_eq!(rx.recv().await.unwrap().progress, 45);
        let terminal = rx.recv().await.unwrap();
        assert!(terminal.completed);
        // Channel is torn down after the terminal event.
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn disconnected_listener_drops_events_silently() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.emit(50, "still rendering");
        sink.complete(100, "done");
    }
}
