//! Rolling-window admission control, time-windowed batching, and the
//! senders that carry notifications downstream.

pub mod admission;
pub mod engine;
#[cfg(test)]
mod log_capture;
pub mod sender;
pub mod window;

pub use admission::AdmissionController;
pub use engine::NotificationEngine;
pub use sender::{
    build_sender, CaptureOutcome, CaptureSender, ConsoleSender, LogSender, NotificationSender,
    SentNotification,
};
pub use window::BatchScheduler;
