//! Generic `Rangefinder` trait for spinning 2-D range sensors.

use scanfuse_types::{DeviceHealth, FuseError, PolarSample};

/// A spinning range sensor that produces one full revolution per scan.
///
/// Drivers wrap the vendor SDK / serial protocol and are driven by a
/// [`DeviceSession`][crate::session::DeviceSession].
pub trait Rangefinder: Send {
    /// Stable identifier for this device, e.g. `"front_lidar"`.
    fn id(&self) -> &str;

    /// Open the transport and connect to the device.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::DeviceInit`] if the port cannot be opened or the
    /// device does not answer.
    fn connect(&mut self) -> Result<(), FuseError>;

    /// Query the device's self-reported health.
    fn health(&mut self) -> Result<DeviceHealth, FuseError>;

    /// Spin up the motor and start streaming scans.
    fn start_scan(&mut self) -> Result<(), FuseError>;

    /// Stop scanning. Must be safe to call on an already-stopped device.
    fn stop(&mut self);

    /// Block until the next complete revolution is available and return its
    /// samples (at most [`MAX_SCAN_SAMPLES`][scanfuse_types::MAX_SCAN_SAMPLES]).
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::Acquisition`] on a transient read failure.
    fn grab_scan(&mut self) -> Result<Vec<PolarSample>, FuseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockRangefinder {
        id: String,
        scanning: bool,
    }

    impl Rangefinder for MockRangefinder {
        fn id(&self) -> &str {
            &self.id
        }

        fn connect(&mut self) -> Result<(), FuseError> {
            Ok(())
        }

        fn health(&mut self) -> Result<DeviceHealth, FuseError> {
            Ok(DeviceHealth::Ok)
        }

        fn start_scan(&mut self) -> Result<(), FuseError> {
            self.scanning = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.scanning = false;
        }

        fn grab_scan(&mut self) -> Result<Vec<PolarSample>, FuseError> {
            if !self.scanning {
                return Err(FuseError::Acquisition("not scanning".to_string()));
            }
            Ok(vec![PolarSample::from_device(0.0, 500.0)])
        }
    }

    #[test]
    fn mock_rangefinder_requires_start() {
        let mut dev = MockRangefinder {
            id: "front_lidar".to_string(),
            scanning: false,
        };
        assert_eq!(dev.id(), "front_lidar");
        assert!(dev.grab_scan().is_err());

        dev.start_scan().unwrap();
        assert_eq!(dev.grab_scan().unwrap().len(), 1);

        dev.stop();
        dev.stop();
        assert!(matches!(dev.grab_scan(), Err(FuseError::Acquisition(_))));
    }
}
