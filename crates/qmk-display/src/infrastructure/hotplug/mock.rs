//! Mock hotplug source for tests.
//!
//! `start` only stores the event sender; tests then push events by hand with
//! [`MockHotplugSource::emit`], in exactly the order they want the
//! supervisor to see them.  `stop` drops the sender, which ends
//! `SessionSupervisor::run`.

use tokio::sync::mpsc;

use crate::application::supervisor::{HotplugError, HotplugEvent, HotplugSource};

/// A hotplug source driven by the test.
#[derive(Default)]
pub struct MockHotplugSource {
    sender: Option<mpsc::Sender<HotplugEvent>>,
    should_fail: bool,
}

impl MockHotplugSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `start` fails the way a missing HID library would.
    pub fn failing() -> Self {
        Self {
            sender: None,
            should_fail: true,
        }
    }

    /// Delivers `event` to the supervisor.  Returns `false` if the source is
    /// not started or the receiver is gone.
    pub async fn emit(&self, event: HotplugEvent) -> bool {
        match &self.sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.sender.is_some()
    }
}

impl HotplugSource for MockHotplugSource {
    fn start(&mut self, events: mpsc::Sender<HotplugEvent>) -> Result<(), HotplugError> {
        if self.should_fail {
            return Err(HotplugError::Init("mock failure".to_string()));
        }
        if self.sender.is_some() {
            return Err(HotplugError::AlreadyStarted);
        }
        self.sender = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        self.sender = None;
    }
}
