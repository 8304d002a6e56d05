// Cardiac Node — SNTP time source

use std::time::{SystemTime, UNIX_EPOCH};

use esp_idf_svc::sntp::EspSntp;

use crate::error::NetError;
use crate::net::TimeSource;

#[derive(Default)]
pub struct SntpTime {
    sntp: Option<EspSntp<'static>>,
}

impl TimeSource for SntpTime {
    fn start_sync(&mut self) -> Result<(), NetError> {
        // The service keeps re-syncing on its own once started.
        if self.sntp.is_none() {
            let sntp = EspSntp::new_default().map_err(|e| NetError::TimeSync(e.to_string()))?;
            self.sntp = Some(sntp);
        }
        Ok(())
    }

    fn unix_time(&self) -> Option<i64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs() as i64)
    }
}
