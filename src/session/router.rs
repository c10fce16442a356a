//! Inbound line handling.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::event::Event;
use crate::protocol::{Command, Keyword, Line, parse_battery, parse_clock, parse_settings};
use crate::session::Session;

/// Argument value acknowledging a settings write.
const SETTINGS_ACK: &str = "ok";

impl Session {
    /// Applies one received line to the session.
    ///
    /// Every successfully decoded line publishes an update and then
    /// resolves the waiter registered under its keyword, if any. A line
    /// that fails to decode changes nothing.
    pub(crate) async fn handle_line(&self, text: &str) -> Result<()> {
        let line = Line::parse(text)?;

        match Keyword::parse(&line.keyword) {
            Some(Keyword::Ping) => {
                self.send_now(&Command::Pong).await?;

                if !self.inner.connected.swap(true, Ordering::SeqCst) {
                    self.modify_state(|s| s.connected = true);
                    tracing::info!("device {} connected", self.inner.address);
                    self.inner
                        .dispatcher
                        .dispatch(Event::DeviceConnected(self.inner.address.clone()));
                }
            }
            Some(Keyword::Battery) => {
                let level = parse_battery(line.arg(0)?)?;
                self.modify_state(|s| s.battery = level);
            }
            Some(Keyword::Firmware) => {
                let firmware = line.arg(0)?.to_owned();
                self.modify_state(|s| s.firmware = firmware);
            }
            Some(Keyword::SetSettings) => {
                if line.arg(0)? == SETTINGS_ACK {
                    self.send(Command::GetSettings);
                }
            }
            Some(Keyword::GetSettings) => {
                let settings = parse_settings(line.arg(0)?)?;
                self.modify_state(|s| {
                    s.settings = settings;
                    s.settings_changed = true;
                });
            }
            Some(Keyword::Alarm) => {
                let alarm = parse_clock(line.arg(0)?)?;
                self.modify_state(|s| s.alarm = Some(alarm));
            }
            _ => {}
        }

        self.publish_update();
        self.inner
            .pending
            .resolve(&line.keyword, line.value().unwrap_or_default());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::{DecodeError, Error};
    use crate::event::EventKind;
    use crate::session::tests::{Harness, drain};
    use crate::transport::MockCentral;

    /// Starts a session against a peripheral that only answers the handshake.
    async fn quiet_session() -> (Harness, tokio::task::JoinHandle<()>) {
        let central = MockCentral::with_responder(|line| match line {
            "getsettings" => vec!["getsettings:1,2".to_owned()],
            _ => Vec::new(),
        });
        let harness = Harness::new(central);
        let task = harness.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        (harness, task)
    }

    async fn stop(harness: Harness, task: tokio::task::JoinHandle<()>) {
        harness.session.disconnect().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_line() {
        let (harness, task) = quiet_session().await;
        let mut events = harness.subscribe();
        let waiter = harness.session.pending().register("battery").unwrap();

        harness.session.handle_line("battery:87").await.unwrap();

        assert_eq!(harness.session.snapshot().battery, 87);
        let updates = drain(&mut events)
            .iter()
            .filter(|e| e.kind() == EventKind::DeviceUpdated)
            .count();
        assert_eq!(updates, 1);
        assert_eq!(waiter.wait(Duration::from_secs(2)).await, Some("87".into()));
        assert!(!harness.session.pending().is_pending("battery"));

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_firmware_line() {
        let (harness, task) = quiet_session().await;

        harness.session.handle_line("firmware:2.0.1").await.unwrap();
        assert_eq!(harness.session.snapshot().firmware, "2.0.1");

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_connects_exactly_once() {
        let (harness, task) = quiet_session().await;
        let mut events = harness.subscribe();

        for _ in 0..3 {
            harness.session.handle_line("ping").await.unwrap();
        }

        assert!(harness.session.is_connected());
        assert!(harness.session.snapshot().connected);
        let connected = drain(&mut events)
            .iter()
            .filter(|e| e.kind() == EventKind::DeviceConnected)
            .count();
        assert_eq!(connected, 1);

        let pongs = harness
            .link()
            .written_lines()
            .iter()
            .filter(|l| *l == "pong")
            .count();
        assert_eq!(pongs, 3);

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_setsettings_ok_queues_getsettings() {
        let central = MockCentral::new();
        let harness = Harness::new(central);
        // The handshake never completes; no await between the calls below
        // gives the dispatcher a chance to drain
        let task = harness.start();
        tokio::task::yield_now().await;

        harness.session.handle_line("setsettings:ok").await.unwrap();
        assert!(harness.session.queued().contains(&Command::GetSettings));

        harness.session.handle_line("setsettings:failed").await.unwrap();
        assert_eq!(harness.session.queued().len(), 1);

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_getsettings_updates_settings() {
        let (harness, task) = quiet_session().await;
        harness.session.acknowledge_settings();

        harness.session.handle_line("getsettings:9,45").await.unwrap();

        let state = harness.session.snapshot();
        assert_eq!(state.settings, crate::types::Settings(9, 45));
        assert!(state.settings_changed);

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_line() {
        let (harness, task) = quiet_session().await;

        harness.session.handle_line("alarm:07,15,00,20,10,26").await.unwrap();
        assert!(harness.session.snapshot().alarm.is_some());

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_keyword_resolves_waiter() {
        let (harness, task) = quiet_session().await;
        let waiter = harness.session.pending().register("vibrate").unwrap();

        harness.session.handle_line("vibrate").await.unwrap();
        assert_eq!(waiter.wait(Duration::from_secs(2)).await, Some(String::new()));

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_lines_change_nothing() {
        let (harness, task) = quiet_session().await;
        let before = harness.session.snapshot();
        let mut events = harness.subscribe();
        let waiter = harness.session.pending().register("battery").unwrap();

        let missing = harness.session.handle_line("battery").await;
        assert!(matches!(
            missing,
            Err(Error::Decode(DecodeError::MissingArgument { .. }))
        ));
        assert!(harness.session.handle_line("battery:lots").await.is_err());
        assert!(harness.session.handle_line("").await.is_err());

        assert_eq!(harness.session.snapshot(), before);
        assert!(drain(&mut events).is_empty());
        assert!(harness.session.pending().is_pending("battery"));
        drop(waiter);

        stop(harness, task).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_bytes_reach_router() {
        let (harness, task) = quiet_session().await;
        let link = harness.link();

        assert!(link.inject("batt"));
        assert!(link.inject("ery:42\nfirmware:"));
        assert!(link.inject("3.1\n"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = harness.session.snapshot();
        assert_eq!(state.battery, 42);
        assert_eq!(state.firmware, "3.1");

        stop(harness, task).await;
    }
}
