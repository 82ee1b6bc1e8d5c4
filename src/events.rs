//! Outbound notifications from the core to whatever host displays them.
//!
//! Events are sent over an unbounded channel so the core never blocks on a
//! slow consumer. The host decides which thread handles them.

use crossbeam_channel::{Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Error(String),
    BusyStart,
    BusyEnd,
    OverlayMessage(String),
    /// `None` means indeterminate.
    OverlayProgress(Option<u8>),
    OverlayDetail(String),
    DownloadProgress {
        in_progress: bool,
        status: String,
        percent: Option<u8>,
    },
}

/// Cheap, cloneable sending half. Sends never fail loudly: a host that has
/// gone away simply stops receiving.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Event>,
}

pub fn channel() -> (Notifier, Receiver<Event>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Notifier { tx }, rx)
}

impl Notifier {
    fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(Event::Error(message.into()));
    }

    pub fn busy_start(&self) {
        self.send(Event::BusyStart);
    }

    pub fn busy_end(&self) {
        self.send(Event::BusyEnd);
    }

    pub fn overlay_message(&self, text: impl Into<String>) {
        self.send(Event::OverlayMessage(text.into()));
    }

    pub fn overlay_progress(&self, percent: Option<u8>) {
        self.send(Event::OverlayProgress(percent.map(|p| p.min(100))));
    }

    pub fn overlay_detail(&self, text: impl Into<String>) {
        self.send(Event::OverlayDetail(text.into()));
    }

    pub fn download_progress(&self, in_progress: bool, status: impl Into<String>, percent: Option<u8>) {
        self.send(Event::DownloadProgress {
            in_progress,
            status: status.into(),
            percent: percent.map(|p| p.min(100)),
        });
    }
}
