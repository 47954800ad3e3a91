//! Extension pour intégrer la configuration du sender GRBL dans pmoconfig
//!
//! Ce module fournit le trait `GrblConfigExt` qui ajoute à `pmoconfig::Config`
//! les réglages du lien série, du polling et des limites de course.
//!
//! ```yaml
//! serial:
//!   port: /dev/ttyUSB0
//!   baud_rate: 115200
//! status:
//!   poll_interval_ms: 500
//! machine:
//!   limits:
//!     x: { min: 0.0, max: 200.0 }
//!     y: { min: 0.0, max: 200.0 }
//!     z: { min: 0.0, max: 100.0 }
//! jog:
//!   step: 1.0
//! ```

use std::time::Duration;

use anyhow::{Result, anyhow};
use pmoconfig::Config;
use tracing::warn;

use crate::model::{Axis, AxisRange, TravelLimits};
use crate::poller::MIN_POLL_INTERVAL;
use crate::sender::{DEFAULT_JOG_STEP, SenderOptions};
use crate::serial::DEFAULT_BAUD_RATE;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

fn axis_key(axis: Axis) -> &'static str {
    match axis {
        Axis::X => "x",
        Axis::Y => "y",
        Axis::Z => "z",
    }
}

/// Trait d'extension pour la configuration du sender
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmogrbl::GrblConfigExt;
///
/// let options = get_config().get_sender_options()?;
/// println!("Port: {:?}", options.port);
/// ```
pub trait GrblConfigExt {
    /// Port série configuré, `None` si vide
    fn get_serial_port(&self) -> Option<String>;

    fn set_serial_port(&self, port: &str) -> Result<()>;

    fn get_baud_rate(&self) -> Result<u32>;

    /// Intervalle de polling du statut (minimum 10 ms)
    fn get_poll_interval(&self) -> Duration;

    fn get_travel_limits(&self) -> Result<TravelLimits>;

    fn set_travel_limits(&self, limits: &TravelLimits) -> Result<()>;

    /// Pas de jog en mm, strictement positif
    fn get_jog_step(&self) -> f64;

    /// Toutes les options du sender en un seul appel
    fn get_sender_options(&self) -> Result<SenderOptions> {
        Ok(SenderOptions {
            poll_interval: self.get_poll_interval(),
            limits: self.get_travel_limits()?,
            jog_step: self.get_jog_step(),
            port: self.get_serial_port(),
            baud_rate: self.get_baud_rate()?,
        })
    }
}

impl GrblConfigExt for Config {
    fn get_serial_port(&self) -> Option<String> {
        self.get_string(&["serial", "port"])
    }

    fn set_serial_port(&self, port: &str) -> Result<()> {
        self.set_string(&["serial", "port"], port)
    }

    fn get_baud_rate(&self) -> Result<u32> {
        let baud = self.get_u64(&["serial", "baud_rate"], DEFAULT_BAUD_RATE as u64);
        u32::try_from(baud).map_err(|_| anyhow!("Baud rate out of range: {}", baud))
    }

    fn get_poll_interval(&self) -> Duration {
        let ms = self.get_u64(&["status", "poll_interval_ms"], DEFAULT_POLL_INTERVAL_MS);
        let interval = Duration::from_millis(ms);
        if interval < MIN_POLL_INTERVAL {
            warn!(ms, "Poll interval too short, using {:?}", MIN_POLL_INTERVAL);
        }
        interval.max(MIN_POLL_INTERVAL)
    }

    fn get_travel_limits(&self) -> Result<TravelLimits> {
        let defaults = TravelLimits::default();
        let read = |axis: Axis| -> Result<AxisRange> {
            let key = axis_key(axis);
            let fallback = defaults.range(axis);
            let min = self.get_f64(&["machine", "limits", key, "min"], fallback.min);
            let max = self.get_f64(&["machine", "limits", key, "max"], fallback.max);
            if min > max {
                return Err(anyhow!("Invalid {} travel limits: min {} > max {}", key, min, max));
            }
            Ok(AxisRange::new(min, max))
        };

        Ok(TravelLimits {
            x: read(Axis::X)?,
            y: read(Axis::Y)?,
            z: read(Axis::Z)?,
        })
    }

    fn set_travel_limits(&self, limits: &TravelLimits) -> Result<()> {
        for axis in Axis::ALL {
            let key = axis_key(axis);
            let range = limits.range(axis);
            self.set_f64(&["machine", "limits", key, "min"], range.min)?;
            self.set_f64(&["machine", "limits", key, "max"], range.max)?;
        }
        Ok(())
    }

    fn get_jog_step(&self) -> f64 {
        let step = self.get_f64(&["jog", "step"], DEFAULT_JOG_STEP);
        if step > 0.0 && step.is_finite() {
            step
        } else {
            warn!(step, "Invalid jog step, using {}", DEFAULT_JOG_STEP);
            DEFAULT_JOG_STEP
        }
    }
}
