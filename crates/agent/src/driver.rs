//! Synthetic traffic driver
//!
//! Marks every configured group at its profile rate once per second for a
//! burst period, then goes quiet so groups can be watched decaying back to
//! GOOD_CITIZEN. Each second the status of every group is logged.

use crate::config::DriverConfig;
use outlier_lib::OutlierDetector;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

pub async fn run(
    detector: OutlierDetector,
    config: DriverConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(
        groups = config.profiles.len(),
        burst_seconds = config.burst_seconds,
        "Starting synthetic traffic driver"
    );

    let mut ticker = interval(Duration::from_secs(1));
    let mut elapsed = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if elapsed < config.burst_seconds {
                    drive_once(&detector, &config);
                }
                elapsed += 1;
                log_statuses(&detector, &config);
            }
            _ = shutdown.recv() => {
                info!("Shutting down traffic driver");
                break;
            }
        }
    }
}

/// Mark one second of traffic for every profile
pub fn drive_once(detector: &OutlierDetector, config: &DriverConfig) {
    for profile in &config.profiles {
        for _ in 0..profile.events_per_second {
            detector.mark(&profile.group);
        }
    }
}

fn log_statuses(detector: &OutlierDetector, config: &DriverConfig) {
    for profile in &config.profiles {
        match detector.status(&profile.group) {
            Ok(status) => info!(group_id = %profile.group, status = %status, "Group status"),
            Err(e) => debug!(group_id = %profile.group, error = %e, "Group not registered yet"),
        }
    }
}
