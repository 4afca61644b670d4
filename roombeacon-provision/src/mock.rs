//! Test doubles: a central that records requests and a scheduler that never
//! fires on its own.

use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

use crate::central::Central;
use crate::timer::{Phase, Scheduler, TimerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(String),
    CancelConnection(String),
    DiscoverServices(String, Uuid),
    DiscoverCharacteristics(String, Uuid, Vec<Uuid>),
    Subscribe(String, Uuid),
    Read(String, Uuid),
    Write(String, Uuid, Vec<u8>),
}

#[derive(Debug, Default)]
pub struct MockCentral {
    pub calls: Vec<Call>,
}

impl MockCentral {
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Write(_, uuid, value) if *uuid == characteristic => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Central for MockCentral {
    fn start_scan(&mut self) {
        self.calls.push(Call::StartScan);
    }

    fn stop_scan(&mut self) {
        self.calls.push(Call::StopScan);
    }

    fn connect(&mut self, id: &str) {
        self.calls.push(Call::Connect(id.to_string()));
    }

    fn cancel_connection(&mut self, id: &str) {
        self.calls.push(Call::CancelConnection(id.to_string()));
    }

    fn discover_services(&mut self, id: &str, service: Uuid) {
        self.calls.push(Call::DiscoverServices(id.to_string(), service));
    }

    fn discover_characteristics(&mut self, id: &str, service: Uuid, characteristics: &[Uuid]) {
        self.calls.push(Call::DiscoverCharacteristics(
            id.to_string(),
            service,
            characteristics.to_vec(),
        ));
    }

    fn subscribe(&mut self, id: &str, characteristic: Uuid) {
        self.calls.push(Call::Subscribe(id.to_string(), characteristic));
    }

    fn read(&mut self, id: &str, characteristic: Uuid) {
        self.calls.push(Call::Read(id.to_string(), characteristic));
    }

    fn write(&mut self, id: &str, characteristic: Uuid, value: Vec<u8>) {
        self.calls.push(Call::Write(id.to_string(), characteristic, value));
    }
}

#[derive(Debug, Default)]
pub struct ManualScheduler {
    pub scheduled: Vec<(TimerId, Phase, Duration)>,
    pub cancelled: HashSet<TimerId>,
}

impl ManualScheduler {
    /// Most recently scheduled timer for `phase`
    pub fn latest(&self, phase: Phase) -> Option<TimerId> {
        self.scheduled
            .iter()
            .rev()
            .find(|(_, p, _)| *p == phase)
            .map(|(timer, _, _)| *timer)
    }

    pub fn is_cancelled(&self, timer: TimerId) -> bool {
        self.cancelled.contains(&timer)
    }

    /// Timers scheduled and not cancelled
    pub fn live(&self) -> Vec<TimerId> {
        self.scheduled
            .iter()
            .map(|(timer, _, _)| *timer)
            .filter(|timer| !self.cancelled.contains(timer))
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, timer: TimerId, phase: Phase, after: Duration) {
        self.scheduled.push((timer, phase, after));
    }

    fn cancel(&mut self, timer: TimerId) {
        self.cancelled.insert(timer);
    }
}
