//! Shared broadcast medium between simulated nodes.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use losstest_core::codec::ad::AdPayload;
use losstest_core::phy::code;
use losstest_core::radio::{ScanParams, ScanReport};
use losstest_core::stats::{RSSI_CEILING, TX_POWER_UNKNOWN};

/// Path loss at distance zero, in dB.
const BASE_PATH_LOSS: i16 = 40;

/// Extra loss per node of distance, in dB.
const STEP_PATH_LOSS: i16 = 4;

/// Reports a node has not drained yet. Older ones are dropped first.
const INBOX_CAPACITY: usize = 1024;

/// One advertisement put on air.
#[derive(Clone, Debug)]
pub struct Transmission {
    pub primary: u8,
    pub secondary: u8,
    /// Power actually radiated.
    pub power_dbm: i8,
    /// Whether the TX power field is included in the advertisement.
    pub advertise_power: bool,
    pub payload: AdPayload,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MediumStats {
    pub delivered: u64,
    pub dropped: u64,
}

struct MediumState {
    inboxes: Vec<VecDeque<ScanReport>>,
    scans: Vec<Option<ScanParams>>,
    /// Drop one reception in this many; `0` disables loss.
    loss_one_in: u32,
    receptions: u64,
    stats: MediumStats,
}

pub struct Medium {
    state: Mutex<MediumState>,
}

impl Medium {
    pub fn new(nodes: usize) -> Self {
        Self {
            state: Mutex::new(MediumState {
                inboxes: vec![VecDeque::new(); nodes],
                scans: vec![None; nodes],
                loss_one_in: 0,
                receptions: 0,
                stats: MediumStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MediumState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_scan(&self, node: usize, scan: Option<ScanParams>) {
        let mut state = self.lock();
        state.scans[node] = scan;
        if scan.is_none() {
            state.inboxes[node].clear();
        }
    }

    pub fn set_loss(&self, one_in: u32) {
        self.lock().loss_one_in = one_in;
    }

    pub fn loss(&self) -> u32 {
        self.lock().loss_one_in
    }

    pub fn stats(&self) -> MediumStats {
        self.lock().stats
    }

    /// Delivers `transmission` to every other node scanning a PHY that hears it.
    pub fn transmit(&self, from: usize, transmission: &Transmission) {
        let mut state = self.lock();
        for to in 0..state.inboxes.len() {
            if to == from {
                continue;
            }
            let hears = state.scans[to].is_some_and(|scan| scan.phys.hears(transmission.primary));
            if !hears {
                continue;
            }

            state.receptions += 1;
            let loss = u64::from(state.loss_one_in);
            if loss != 0 && state.receptions % loss == 0 {
                state.stats.dropped += 1;
                continue;
            }

            let report = reception(transmission, from.abs_diff(to));
            let inbox = &mut state.inboxes[to];
            if inbox.len() == INBOX_CAPACITY {
                inbox.pop_front();
            }
            inbox.push_back(report);
            state.stats.delivered += 1;
        }
    }

    pub fn receive(&self, node: usize) -> Option<ScanReport> {
        self.lock().inboxes[node].pop_front()
    }
}

/// What a node `distance` away hears of `transmission`.
fn reception(transmission: &Transmission, distance: usize) -> ScanReport {
    let steps = i16::try_from(distance).unwrap_or(i16::MAX);
    let rssi = i16::from(transmission.power_dbm)
        .saturating_sub(BASE_PATH_LOSS)
        .saturating_sub(STEP_PATH_LOSS.saturating_mul(steps))
        .clamp(-127, i16::from(RSSI_CEILING));
    let rssi = i8::try_from(rssi).unwrap_or(i8::MIN);

    if transmission.secondary == code::NONE {
        return ScanReport::legacy(rssi, transmission.payload.clone());
    }
    ScanReport {
        primary: transmission.primary,
        secondary: transmission.secondary,
        rssi,
        tx_power: if transmission.advertise_power {
            transmission.power_dbm
        } else {
            TX_POWER_UNKNOWN
        },
        payload: transmission.payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use losstest_core::radio::ScanMethod;

    use super::*;

    fn one_m(power_dbm: i8) -> Transmission {
        Transmission {
            primary: code::LE_1M,
            secondary: code::LE_1M,
            power_dbm,
            advertise_power: true,
            payload: AdPayload::new(),
        }
    }

    #[test]
    fn only_scanning_nodes_hear() {
        let medium = Medium::new(3);
        medium.set_scan(1, Some(ScanMethod::OneM.params()));
        medium.set_scan(2, Some(ScanMethod::Coded.params()));

        medium.transmit(0, &one_m(0));

        let heard = medium.receive(1).expect("1M scanner hears");
        assert_eq!(heard.rssi, -44);
        assert_eq!(heard.tx_power, 0);
        assert!(medium.receive(2).is_none(), "coded scanner misses 1M");
        assert!(medium.receive(0).is_none(), "no self reception");
    }

    #[test]
    fn loss_drops_one_in_n() {
        let medium = Medium::new(2);
        medium.set_scan(1, Some(ScanMethod::AllPhys.params()));
        medium.set_loss(4);

        for _ in 0..8 {
            medium.transmit(0, &one_m(0));
        }

        assert_eq!(
            medium.stats(),
            MediumStats {
                delivered: 6,
                dropped: 2,
            }
        );
    }
}
