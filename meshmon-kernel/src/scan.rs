//! Scan admission: one scan at a time, with a minimum gap between scans.

use parking_lot::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ScanError;
use crate::models::ScanReport;

#[derive(Default)]
struct ScanState {
    is_scanning: bool,
    last_scan: Option<OffsetDateTime>,
    last_result: Option<ScanReport>,
    last_finished: Option<Instant>,
}

pub struct ScanCoordinator {
    state: Mutex<ScanState>,
    min_gap: Duration,
}

/// Marks a scan as running for as long as it lives
pub struct ScanGuard<'a> {
    coordinator: &'a ScanCoordinator,
}

impl ScanGuard<'_> {
    /// Records a successful scan
    pub fn finish(self, report: &ScanReport) {
        let mut st = self.coordinator.state.lock();
        st.last_scan = Some(report.discovery.timestamp);
        st.last_result = Some(report.clone());
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.coordinator.state.lock();
        st.is_scanning = false;
        st.last_finished = Some(Instant::now());
    }
}

impl ScanCoordinator {
    pub fn new(min_gap: Duration) -> Self {
        Self { state: Mutex::new(ScanState::default()), min_gap }
    }

    /// Claims the scan slot, then waits out whatever is left of the minimum gap.
    ///
    /// The slot is claimed before waiting so triggers arriving during the wait
    /// are rejected rather than piling up.
    pub async fn try_begin(&self) -> Result<ScanGuard<'_>, ScanError> {
        let wait = {
            let mut st = self.state.lock();
            if st.is_scanning {
                return Err(ScanError::AlreadyScanning);
            }
            st.is_scanning = true;
            st.last_finished
                .map(|t| self.min_gap.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        let guard = ScanGuard { coordinator: self };
        if !wait.is_zero() {
            debug!("waiting {:?} before next scan", wait);
            tokio::time::sleep(wait).await;
        }
        Ok(guard)
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().is_scanning
    }

    pub fn last_scan(&self) -> Option<OffsetDateTime> {
        self.state.lock().last_scan
    }

    pub fn last_result(&self) -> Option<ScanReport> {
        self.state.lock().last_result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_begin_is_rejected() {
        let coord = ScanCoordinator::new(Duration::ZERO);
        let guard = coord.try_begin().await.unwrap();
        assert!(coord.is_scanning());
        assert!(matches!(coord.try_begin().await, Err(ScanError::AlreadyScanning)));
        drop(guard);
        assert!(!coord.is_scanning());
        assert!(coord.try_begin().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_gap_is_waited_out() {
        let coord = ScanCoordinator::new(Duration::from_secs(10));
        drop(coord.try_begin().await.unwrap());

        let started = Instant::now();
        let _guard = coord.try_begin().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(9));
    }
}
