//! Admission filters applied on the producer path
//!
//! Both filters run in the codec's receive context, which must not block,
//! so the state is plain atomics. The matching release happens on a worker
//! thread once the packet's handler runs, or immediately if the packet
//! could not be queued after all.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::Admission;
use crate::protocol::Command;

const RASR_FEED: u32 = Command::RasrDataFeed.code();
const RASR_START: u32 = Command::RasrStart.code();
const RASR_STOP: u32 = Command::RasrStop.code();

pub(crate) struct AdmissionControl {
    adpcm_limit: u32,
    adpcm_in_flight: AtomicU32,
    rasr_start_pending: AtomicBool,
    rasr_stop_pending: AtomicBool,
}

impl AdmissionControl {
    pub(crate) fn new(adpcm_limit: u32) -> Self {
        Self {
            adpcm_limit,
            adpcm_in_flight: AtomicU32::new(0),
            rasr_start_pending: AtomicBool::new(false),
            rasr_stop_pending: AtomicBool::new(false),
        }
    }

    /// Claim a slot for `command`, or report why it must be dropped
    pub(crate) fn admit(&self, command: u32) -> Result<(), Admission> {
        match command {
            RASR_FEED => self
                .adpcm_in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.adpcm_limit).then_some(n + 1)
                })
                .map(|_| ())
                .map_err(|_| Admission::MemoryBound),
            RASR_START => latch(&self.rasr_start_pending),
            RASR_STOP => latch(&self.rasr_stop_pending),
            _ => Ok(()),
        }
    }

    /// Give back whatever `admit` claimed for `command`
    pub(crate) fn release(&self, command: u32) {
        match command {
            RASR_FEED => {
                let _ = self
                    .adpcm_in_flight
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
            }
            RASR_START => self.rasr_start_pending.store(false, Ordering::Release),
            RASR_STOP => self.rasr_stop_pending.store(false, Ordering::Release),
            _ => {}
        }
    }

    pub(crate) fn adpcm_in_flight(&self) -> u32 {
        self.adpcm_in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn rasr_start_pending(&self) -> bool {
        self.rasr_start_pending.load(Ordering::Acquire)
    }

    pub(crate) fn rasr_stop_pending(&self) -> bool {
        self.rasr_stop_pending.load(Ordering::Acquire)
    }
}

fn latch(flag: &AtomicBool) -> Result<(), Admission> {
    if flag.swap(true, Ordering::AcqRel) {
        Err(Admission::Duplicate)
    } else {
        Ok(())
    }
}
