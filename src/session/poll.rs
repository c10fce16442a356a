//! Settings handshake and the periodic polling loop.

use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::protocol::{Command, parse_clock, parse_imu, parse_settings};
use crate::session::Session;

impl Session {
    /// Reads the settings before polling starts.
    ///
    /// A peripheral that does not answer within the response timeout is
    /// treated as a failed connect.
    pub(super) async fn handshake(&self) -> Result<()> {
        let value = self
            .request(Command::GetSettings)
            .await?
            .ok_or(Error::HandshakeTimeout)?;

        // The router already stored the tuple; this rejects garbage replies.
        let settings = parse_settings(&value)?;
        tracing::info!("{}: handshake complete, settings {settings:?}", self.inner.address);
        Ok(())
    }

    /// Polls clock and motion data every tick, battery and firmware less
    /// often, until the session stops.
    pub(super) async fn poll(&self) -> Result<()> {
        let config = &self.inner.config;
        let mut ticker = tokio::time::interval(config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stopped = self.stopped();
        tokio::pin!(stopped);

        let mut tick: u64 = 0;
        while self.is_running() {
            tokio::select! {
                _ = ticker.tick() => {}
                () = &mut stopped => break,
            }

            match self.poll_once(tick).await {
                Ok(()) => {}
                Err(Error::NotRunning) => break,
                Err(e) => return Err(e),
            }
            tick = tick.wrapping_add(1);
        }

        Ok(())
    }

    async fn poll_once(&self, tick: u64) -> Result<()> {
        let config = &self.inner.config;

        if let Some(value) = self.request(Command::GetTime).await? {
            match parse_clock(&value) {
                Ok(clock) => {
                    self.modify_state(|s| {
                        s.clock = Some(clock);
                        s.clock_changed = true;
                    });
                    self.publish_update();
                }
                Err(e) => tracing::warn!("{}: bad clock reply: {e}", self.inner.address),
            }
        }

        if let Some(value) = self.request(Command::GetImuData).await? {
            match parse_imu(&value) {
                Ok(sample) => {
                    self.modify_state(|s| s.imu = sample);
                    self.publish_update();
                }
                Err(e) => tracing::warn!("{}: bad motion reply: {e}", self.inner.address),
            }
        }

        // Answers to these arrive through the router
        if tick % config.battery_every.max(1) == 0 {
            self.send_now(&Command::GetBattery).await?;
        }
        if tick % config.firmware_every.max(1) == 0 {
            self.send_now(&Command::GetFirmware).await?;
        }

        Ok(())
    }
}
