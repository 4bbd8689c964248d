//! [`DeviceSession`] – scoped ownership of a running rangefinder.
//!
//! A session is the only way the acquisition loop touches a device:
//!
//! 1. [`DeviceSession::open`] connects, checks that the device reports
//!    [`DeviceHealth::Ok`] and starts scanning. Any failure here is fatal.
//! 2. [`DeviceSession::grab`] pulls one revolution.
//! 3. [`DeviceSession::recover`] runs the stop → wait → restart sequence
//!    after a transient read failure.
//! 4. [`DeviceSession::release`] stops the device. It is idempotent and is
//!    also run from `Drop`, so the device is released exactly once on every
//!    exit path.

use std::time::Duration;

use scanfuse_types::{DeviceHealth, FuseError, MAX_SCAN_SAMPLES, PolarSample};
use tracing::{debug, info, warn};

use crate::rangefinder::Rangefinder;

/// A connected, healthy, scanning rangefinder.
pub struct DeviceSession {
    id: String,
    device: Option<Box<dyn Rangefinder>>,
}

impl DeviceSession {
    /// Bring `device` up: connect, validate health, start scanning.
    ///
    /// # Errors
    ///
    /// - [`FuseError::DeviceInit`] if connecting or starting the scan fails.
    /// - [`FuseError::DeviceUnhealthy`] if the device reports anything other
    ///   than [`DeviceHealth::Ok`].
    pub fn open(mut device: Box<dyn Rangefinder>) -> Result<Self, FuseError> {
        let id = device.id().to_string();

        device.connect()?;
        let health = device.health()?;
        if health != DeviceHealth::Ok {
            warn!(device = %id, %health, "rangefinder reported unhealthy status");
            return Err(FuseError::DeviceUnhealthy(health));
        }
        device.start_scan().map_err(|e| FuseError::DeviceInit {
            component: id.clone(),
            details: format!("start_scan failed: {e}"),
        })?;

        info!(device = %id, "rangefinder connected and scanning");
        Ok(Self {
            id,
            device: Some(device),
        })
    }

    /// Identifier of the wrapped device.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `true` once [`release`][Self::release] has run.
    pub fn is_released(&self) -> bool {
        self.device.is_none()
    }

    /// Pull one revolution from the device.
    ///
    /// Scans larger than [`MAX_SCAN_SAMPLES`] are truncated.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::Acquisition`] if the read fails or the session
    /// has already been released.
    pub fn grab(&mut self) -> Result<Vec<PolarSample>, FuseError> {
        let device = self.device_mut()?;
        let mut scan = device.grab_scan()?;
        if scan.len() > MAX_SCAN_SAMPLES {
            warn!(
                device = %self.id,
                samples = scan.len(),
                max = MAX_SCAN_SAMPLES,
                "oversized scan truncated"
            );
            scan.truncate(MAX_SCAN_SAMPLES);
        }
        Ok(scan)
    }

    /// Stop the device, wait `delay`, and restart scanning.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if scanning cannot be restarted; the
    /// caller's next [`grab`][Self::grab] will then fail and count against
    /// its retry budget.
    pub fn recover(&mut self, delay: Duration) -> Result<(), FuseError> {
        let id = self.id.clone();
        let device = self.device_mut()?;
        debug!(device = %id, delay_ms = delay.as_millis() as u64, "restarting scan");
        device.stop();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        device.start_scan()
    }

    /// Stop the device and give it up. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
            info!(device = %self.id, "rangefinder released");
        }
    }

    fn device_mut(&mut self) -> Result<&mut Box<dyn Rangefinder>, FuseError> {
        self.device
            .as_mut()
            .ok_or_else(|| FuseError::Acquisition(format!("{} already released", self.id)))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.release();
    }
}
