use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

const KSEED_START: u64 = 7000;
const KSEED_STEP: u64 = 500;

/// Rotating correlation tokens attached to outbound requests so that
/// successive requests don't share one fingerprint.
///
/// One instance lives as long as the client that owns it; the counters are
/// only reset by building a new client.
#[derive(Debug)]
pub struct Telemetry {
    ig: String,
    kseed: AtomicU64,
    inst: AtomicU64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            ig: format!("{:032X}", rand::rng().random::<u128>()),
            kseed: AtomicU64::new(KSEED_START),
            inst: AtomicU64::new(0),
        }
    }

    /// Per-instance page impression id.
    pub fn ig(&self) -> &str {
        &self.ig
    }

    pub fn next_kseed(&self) -> u64 {
        self.kseed.fetch_add(KSEED_STEP, Ordering::Relaxed) + KSEED_STEP
    }

    pub fn next_inst_suffix(&self) -> String {
        (self.inst.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}
