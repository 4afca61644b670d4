//! btleplug backend
//!
//! [`BtleCentral`] turns the state machine's fire-and-forget requests into
//! btleplug calls. Three kinds of task do the work:
//!
//! - an event pump forwarding adapter events (advertisements, disconnects,
//!   radio state) to the session
//! - a GATT worker that runs discovery, reads, writes and subscriptions one
//!   at a time, in the order they were requested
//! - one connect task per attempt, aborted on `cancel_connection`
//!
//! Every outcome is reported through the [`EventSink`].

use std::collections::HashMap;

use btleplug::api::{
    Central as _, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId as BtlePeripheralId};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::central::{Central, Event, RadioState};
use crate::session::EventSink;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("bluetooth: {0}")]
    Btle(#[from] btleplug::Error),
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("peripheral {0} is no longer known to the adapter")]
    PeripheralNotFound(String),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
}

/// First adapter the platform reports
pub async fn default_adapter() -> Result<Adapter, BackendError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(BackendError::NoAdapter)
}

enum Request {
    StartScan,
    StopScan,
    DiscoverServices {
        id: String,
    },
    DiscoverCharacteristics {
        id: String,
        service: Uuid,
        wanted: Vec<Uuid>,
    },
    Subscribe {
        id: String,
        characteristic: Uuid,
    },
    Read {
        id: String,
        characteristic: Uuid,
    },
    Write {
        id: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    Disconnect {
        id: String,
    },
}

pub struct BtleCentral {
    adapter: Adapter,
    sink: EventSink,
    requests: mpsc::UnboundedSender<Request>,
    connecting: HashMap<String, JoinHandle<()>>,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl BtleCentral {
    /// Start the backend tasks. Must be called from within a tokio runtime.
    pub fn new(adapter: Adapter, sink: EventSink) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(adapter.clone(), sink.clone()));
        let worker = tokio::spawn(gatt_worker(adapter.clone(), rx, sink.clone()));
        Self {
            adapter,
            sink,
            requests,
            connecting: HashMap::new(),
            pump,
            worker,
        }
    }

    fn request(&self, request: Request) {
        if self.requests.send(request).is_err() {
            log::error!("gatt worker is gone, request dropped");
        }
    }
}

impl Drop for BtleCentral {
    fn drop(&mut self) {
        self.pump.abort();
        self.worker.abort();
        for (_, task) in self.connecting.drain() {
            task.abort();
        }
    }
}

impl Central for BtleCentral {
    fn start_scan(&mut self) {
        self.request(Request::StartScan);
    }

    fn stop_scan(&mut self) {
        self.request(Request::StopScan);
    }

    fn connect(&mut self, id: &str) {
        let adapter = self.adapter.clone();
        let sink = self.sink.clone();
        let target = id.to_string();
        let task = tokio::spawn(async move {
            let result = match find_peripheral(&adapter, &target).await {
                Ok(peripheral) => peripheral.connect().await.map_err(BackendError::from),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => sink.send(Event::Connected { id: target }),
                Err(e) => sink.send(Event::ConnectFailed {
                    id: target,
                    error: e.to_string(),
                }),
            };
        });
        if let Some(previous) = self.connecting.insert(id.to_string(), task) {
            previous.abort();
        }
    }

    fn cancel_connection(&mut self, id: &str) {
        if let Some(task) = self.connecting.remove(id) {
            task.abort();
        }
        self.request(Request::Disconnect { id: id.to_string() });
    }

    fn discover_services(&mut self, id: &str, _service: Uuid) {
        // btleplug has no scoped discovery; the worker reports everything
        self.request(Request::DiscoverServices { id: id.to_string() });
    }

    fn discover_characteristics(&mut self, id: &str, service: Uuid, characteristics: &[Uuid]) {
        self.request(Request::DiscoverCharacteristics {
            id: id.to_string(),
            service,
            wanted: characteristics.to_vec(),
        });
    }

    fn subscribe(&mut self, id: &str, characteristic: Uuid) {
        self.request(Request::Subscribe {
            id: id.to_string(),
            characteristic,
        });
    }

    fn read(&mut self, id: &str, characteristic: Uuid) {
        self.request(Request::Read {
            id: id.to_string(),
            characteristic,
        });
    }

    fn write(&mut self, id: &str, characteristic: Uuid, value: Vec<u8>) {
        self.request(Request::Write {
            id: id.to_string(),
            characteristic,
            value,
        });
    }
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

async fn pump_events(adapter: Adapter, sink: EventSink) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            log::error!("cannot listen to adapter events: {e}");
            sink.send(Event::ScanFailed(e.to_string()));
            return;
        }
    };

    match adapter.adapter_state().await {
        Ok(state) => {
            sink.send(Event::RadioStateChanged(radio_state(state)));
        }
        Err(e) => {
            // some backends cannot report it; assume usable
            log::warn!("adapter state unavailable ({e}), assuming powered on");
            sink.send(Event::RadioStateChanged(RadioState::PoweredOn));
        }
    }

    while let Some(event) = events.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                match advertisement(&adapter, &id).await {
                    Some((name, rssi)) => Event::Discovered {
                        id: id.to_string(),
                        name,
                        rssi,
                    },
                    None => continue,
                }
            }
            CentralEvent::DeviceDisconnected(id) => Event::Disconnected {
                id: id.to_string(),
                reason: None,
            },
            CentralEvent::StateUpdate(state) => Event::RadioStateChanged(radio_state(state)),
            _ => continue,
        };
        if !sink.send(forwarded) {
            break;
        }
    }
    log::debug!("adapter event stream ended");
}

/// Advertised local name and RSSI, if the peripheral has a name
async fn advertisement(adapter: &Adapter, id: &BtlePeripheralId) -> Option<(String, Option<i16>)> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok().flatten()?;
    Some((properties.local_name?, properties.rssi))
}

async fn find_peripheral(adapter: &Adapter, id: &str) -> Result<Peripheral, BackendError> {
    adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.id().to_string() == id)
        .ok_or_else(|| BackendError::PeripheralNotFound(id.to_string()))
}

fn find_characteristic(
    peripheral: &Peripheral,
    uuid: Uuid,
) -> Result<Characteristic, BackendError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(BackendError::CharacteristicNotFound(uuid))
}

/// Notification forwarders, one per subscribed peripheral
#[derive(Default)]
struct Notifications(HashMap<String, JoinHandle<()>>);

impl Notifications {
    async fn ensure(
        &mut self,
        id: &str,
        peripheral: &Peripheral,
        sink: &EventSink,
    ) -> Result<(), BackendError> {
        if self.0.get(id).is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let mut stream = peripheral.notifications().await?;
        let sink = sink.clone();
        let owner = id.to_string();
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let delivered = sink.send(Event::ValueUpdated {
                    id: owner.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                });
                if !delivered {
                    break;
                }
            }
        });
        self.0.insert(id.to_string(), task);
        Ok(())
    }

    fn stop(&mut self, id: &str) {
        if let Some(task) = self.0.remove(id) {
            task.abort();
        }
    }
}

impl Drop for Notifications {
    fn drop(&mut self) {
        for (_, task) in self.0.drain() {
            task.abort();
        }
    }
}

async fn gatt_worker(
    adapter: Adapter,
    mut requests: mpsc::UnboundedReceiver<Request>,
    sink: EventSink,
) {
    let mut notifications = Notifications::default();

    while let Some(request) = requests.recv().await {
        match request {
            Request::StartScan => {
                if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                    sink.send(Event::ScanFailed(e.to_string()));
                }
            }
            Request::StopScan => {
                if let Err(e) = adapter.stop_scan().await {
                    log::warn!("stop scan failed: {e}");
                }
            }
            Request::DiscoverServices { id } => {
                let result = discover_services(&adapter, &id).await;
                sink.send(Event::ServicesDiscovered {
                    id,
                    result: result.map_err(|e| e.to_string()),
                });
            }
            Request::DiscoverCharacteristics {
                id,
                service,
                wanted,
            } => {
                let result = discover_characteristics(&adapter, &id, service, &wanted).await;
                sink.send(Event::CharacteristicsDiscovered {
                    id,
                    service,
                    result: result.map_err(|e| e.to_string()),
                });
            }
            Request::Subscribe { id, characteristic } => {
                let result = async {
                    let peripheral = find_peripheral(&adapter, &id).await?;
                    let target = find_characteristic(&peripheral, characteristic)?;
                    notifications.ensure(&id, &peripheral, &sink).await?;
                    peripheral.subscribe(&target).await?;
                    Ok::<_, BackendError>(())
                }
                .await;
                if let Err(e) = result {
                    sink.send(Event::SubscribeFailed {
                        id,
                        characteristic,
                        error: e.to_string(),
                    });
                }
            }
            Request::Read { id, characteristic } => {
                let result = async {
                    let peripheral = find_peripheral(&adapter, &id).await?;
                    let target = find_characteristic(&peripheral, characteristic)?;
                    Ok::<_, BackendError>(peripheral.read(&target).await?)
                }
                .await;
                match result {
                    Ok(value) => {
                        sink.send(Event::ValueUpdated {
                            id,
                            characteristic,
                            value,
                        });
                    }
                    Err(e) => log::warn!("read of {characteristic} failed: {e}"),
                }
            }
            Request::Write {
                id,
                characteristic,
                value,
            } => {
                let result = async {
                    let peripheral = find_peripheral(&adapter, &id).await?;
                    let target = find_characteristic(&peripheral, characteristic)?;
                    peripheral
                        .write(&target, &value, WriteType::WithResponse)
                        .await?;
                    Ok::<_, BackendError>(())
                }
                .await;
                sink.send(Event::WriteCompleted {
                    id,
                    characteristic,
                    result: result.map_err(|e| e.to_string()),
                });
            }
            Request::Disconnect { id } => {
                notifications.stop(&id);
                match find_peripheral(&adapter, &id).await {
                    Ok(peripheral) => {
                        if let Err(e) = peripheral.disconnect().await {
                            log::warn!("disconnect from {id} failed: {e}");
                        }
                    }
                    Err(e) => log::debug!("disconnect skipped: {e}"),
                }
            }
        }
    }
}

async fn discover_services(adapter: &Adapter, id: &str) -> Result<Vec<Uuid>, BackendError> {
    let peripheral = find_peripheral(adapter, id).await?;
    peripheral.discover_services().await?;
    Ok(peripheral.services().iter().map(|s| s.uuid).collect())
}

/// Characteristics of `service` that are among `wanted`
async fn discover_characteristics(
    adapter: &Adapter,
    id: &str,
    service: Uuid,
    wanted: &[Uuid],
) -> Result<Vec<Uuid>, BackendError> {
    let peripheral = find_peripheral(adapter, id).await?;
    let found = peripheral
        .services()
        .into_iter()
        .filter(|s| s.uuid == service)
        .flat_map(|s| s.characteristics)
        .map(|c| c.uuid)
        .filter(|uuid| wanted.contains(uuid))
        .collect();
    Ok(found)
}
