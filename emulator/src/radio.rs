//! [`Radio`] implementation backed by the simulated medium.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use losstest_core::codec::ad::AdPayload;
use losstest_core::config::{AdvOptions, AdvParams, StartParams};
use losstest_core::phy::ChannelMap;
use losstest_core::radio::{
    Radio, RadioError, RadioEvent, ScanParams, TARGET_COUNT, TargetId,
};

use crate::clock::SimTime;
use crate::medium::{Medium, Transmission};

/// Shortest gap between two advertisements of one set.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Copy, Clone, Debug)]
struct Running {
    next_at: Duration,
    events_left: Option<u32>,
    ends_at: Option<Duration>,
}

#[derive(Clone, Debug, Default)]
struct AdvSet {
    params: Option<AdvParams>,
    data: AdPayload,
    running: Option<Running>,
}

pub struct SimRadio {
    node: usize,
    time: Arc<SimTime>,
    medium: Arc<Medium>,
    sets: [AdvSet; TARGET_COUNT],
    tx_power_dbm: i8,
    pending: VecDeque<RadioEvent>,
}

impl SimRadio {
    pub fn new(node: usize, time: Arc<SimTime>, medium: Arc<Medium>) -> Self {
        Self {
            node,
            time,
            medium,
            sets: Default::default(),
            tx_power_dbm: 0,
            pending: VecDeque::new(),
        }
    }

    fn now(&self) -> Duration {
        self.time.now().0
    }

    fn set(&mut self, target: TargetId) -> Result<&mut AdvSet, RadioError> {
        let set = &mut self.sets[target.index()];
        if set.params.is_none() {
            return Err(RadioError::NotInitialized);
        }
        Ok(set)
    }

    /// Puts every advertisement due by now on air and ends bounded starts.
    fn advertise(&mut self) {
        let now = self.now();
        for target in TargetId::all() {
            let set = &mut self.sets[target.index()];
            let Some(params) = set.params else {
                continue;
            };
            let interval = params.nominal_interval().max(MIN_INTERVAL);
            let (primary, secondary) = params.phys();

            while let Some(running) = set.running.as_mut() {
                if running.ends_at.is_some_and(|end| now >= end) {
                    set.running = None;
                    self.pending.push_back(RadioEvent::AdvSent(target));
                    break;
                }
                if running.next_at > now {
                    break;
                }
                running.next_at += interval;
                let exhausted = running.events_left.as_mut().is_some_and(|left| {
                    *left = left.saturating_sub(1);
                    *left == 0
                });

                self.medium.transmit(
                    self.node,
                    &Transmission {
                        primary,
                        secondary,
                        power_dbm: self.tx_power_dbm,
                        advertise_power: params.options.contains(AdvOptions::USE_TX_POWER),
                        payload: set.data.clone(),
                    },
                );

                if exhausted {
                    set.running = None;
                    self.pending.push_back(RadioEvent::AdvSent(target));
                }
            }
        }
    }
}

impl Radio for SimRadio {
    fn create(&mut self, target: TargetId, params: &AdvParams) -> Result<(), RadioError> {
        self.sets[target.index()] = AdvSet {
            params: Some(*params),
            ..AdvSet::default()
        };
        Ok(())
    }

    fn update_params(&mut self, target: TargetId, params: &AdvParams) -> Result<(), RadioError> {
        self.set(target)?.params = Some(*params);
        Ok(())
    }

    fn set_data(&mut self, target: TargetId, payload: &[u8]) -> Result<(), RadioError> {
        let data = AdPayload::from_slice(payload).map_err(|_| RadioError::Unsupported)?;
        self.set(target)?.data = data;
        Ok(())
    }

    fn start(&mut self, target: TargetId, start: StartParams) -> Result<(), RadioError> {
        let now = self.now();
        let set = self.set(target)?;
        set.running = Some(Running {
            next_at: now,
            events_left: (start.max_events != 0).then_some(u32::from(start.max_events)),
            ends_at: start.duration().map(|duration| now + duration),
        });
        Ok(())
    }

    fn stop(&mut self, target: TargetId) -> Result<(), RadioError> {
        self.set(target)?.running = None;
        Ok(())
    }

    fn set_channel_map(&mut self, target: TargetId, _map: ChannelMap) -> Result<(), RadioError> {
        self.set(target).map(|_| ())
    }

    fn set_tx_power(&mut self, dbm: i8) -> Result<i8, RadioError> {
        self.tx_power_dbm = dbm;
        Ok(dbm)
    }

    fn start_scan(&mut self, params: ScanParams) -> Result<(), RadioError> {
        self.medium.set_scan(self.node, Some(params));
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.medium.set_scan(self.node, None);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        self.advertise();
        while let Some(report) = self.medium.receive(self.node) {
            self.pending.push_back(RadioEvent::Report(report));
        }
        self.pending.pop_front()
    }
}
