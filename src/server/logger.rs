//! Built-in session traffic logger.

use std::sync::Arc;

use crate::notifier::{Event, EventKind, Observer, Subject};

/// Timestamp format of traffic log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Observer that logs every successful send and receive.
pub fn session_logger() -> Arc<Observer> {
    Observer::new()
        .on(EventKind::SendSuccess, |subject, event| {
            if let Event::SendSuccess { message } = event {
                log_traffic("SEND", subject, message);
            }
        })
        .on(EventKind::RecvSuccess, |subject, event| {
            if let Event::RecvSuccess { message, .. } = event {
                log_traffic("RECV", subject, message);
            }
        })
        .into_shared()
}

fn log_traffic(direction: &str, subject: &Subject, message: &[u8]) {
    tracing::info!(
        "{} {} {}\n{}",
        direction,
        chrono::Local::now().format(TIMESTAMP_FORMAT),
        subject,
        String::from_utf8_lossy(message)
    );
}
