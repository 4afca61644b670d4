//! Async front end for the state machine
//!
//! A [`Session`] runs one [`Provisioner`] on its own tokio task. Caller
//! commands, radio events and timer expiries all arrive on the same channel
//! and are handled one at a time, so no handler ever observes another one
//! half way through. State changes are published on a `watch` channel.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::central::{Central, Event};
use crate::config::ProvisionerConfig;
use crate::discovery::DiscoveredPeripheral;
use crate::machine::Provisioner;
use crate::save::ProvisionedDevice;
use crate::state::ProvisioningState;
use crate::timer::{Phase, Scheduler, TimerId};
use crate::writer::ProvisionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("provisioning session has shut down")]
pub struct SessionClosed;

enum Input {
    StartScanning,
    StopScanning,
    Connect(String),
    Provision(ProvisionRequest),
    Cancel,
    Peripherals(oneshot::Sender<Vec<DiscoveredPeripheral>>),
    Provisioned(oneshot::Sender<Vec<ProvisionedDevice>>),
    ExportLog(oneshot::Sender<String>),
    Event(Event),
    Shutdown,
}

/// Where a [`Central`] implementation reports what happened
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Input>,
}

impl EventSink {
    /// Queue an event for the state machine. False once the session is gone.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(Input::Event(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Timers backed by `tokio::time::sleep`
pub struct TokioScheduler {
    sink: EventSink,
    tasks: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            tasks: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, timer: TimerId, phase: Phase, after: Duration) {
        self.tasks.retain(|_, task| !task.is_finished());
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            sink.send(Event::TimerFired { phase, timer });
        });
        self.tasks.insert(timer, task);
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(task) = self.tasks.remove(&timer) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Handle to a running provisioning session
pub struct Session {
    tx: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<ProvisioningState>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session. `make_central` receives the sink its events must be
    /// delivered to. Must be called from within a tokio runtime.
    pub fn spawn<C, F>(config: ProvisionerConfig, make_central: F) -> Self
    where
        C: Central + Send + 'static,
        F: FnOnce(EventSink) -> C,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink { tx: tx.clone() };
        let central = make_central(sink.clone());
        let machine = Provisioner::new(config, central, TokioScheduler::new(sink));
        let (state_tx, state) = watch::channel(machine.state().clone());
        let task = tokio::spawn(run(machine, rx, state_tx));

        Self {
            tx,
            state,
            task: Some(task),
        }
    }

    fn send(&self, input: Input) -> Result<(), SessionClosed> {
        self.tx.send(input).map_err(|_| SessionClosed)
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Input,
    ) -> Result<T, SessionClosed> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;
        response.await.map_err(|_| SessionClosed)
    }

    pub fn start_scanning(&self) -> Result<(), SessionClosed> {
        self.send(Input::StartScanning)
    }

    pub fn stop_scanning(&self) -> Result<(), SessionClosed> {
        self.send(Input::StopScanning)
    }

    pub fn connect(&self, id: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Input::Connect(id.into()))
    }

    pub fn provision(&self, request: ProvisionRequest) -> Result<(), SessionClosed> {
        self.send(Input::Provision(request))
    }

    pub fn cancel(&self) -> Result<(), SessionClosed> {
        self.send(Input::Cancel)
    }

    pub async fn peripherals(&self) -> Result<Vec<DiscoveredPeripheral>, SessionClosed> {
        self.query(Input::Peripherals).await
    }

    pub async fn provisioned(&self) -> Result<Vec<ProvisionedDevice>, SessionClosed> {
        self.query(Input::Provisioned).await
    }

    pub async fn export_diagnostic_log(&self) -> Result<String, SessionClosed> {
        self.query(Input::ExportLog).await
    }

    /// Latest published state
    pub fn state(&self) -> ProvisioningState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProvisioningState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `pred`. Intermediate states
    /// can be skipped if several changes land between two polls.
    pub async fn wait_for(
        &self,
        pred: impl FnMut(&ProvisioningState) -> bool,
    ) -> Result<ProvisioningState, SessionClosed> {
        let mut state = self.state.clone();
        let current = state.wait_for(pred).await.map_err(|_| SessionClosed)?;
        Ok(current.clone())
    }

    /// Cancel whatever is in progress and stop the session task
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(Input::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.tx.send(Input::Shutdown);
        }
    }
}

async fn run<C: Central>(
    mut machine: Provisioner<C, TokioScheduler>,
    mut rx: mpsc::UnboundedReceiver<Input>,
    state: watch::Sender<ProvisioningState>,
) {
    log::debug!("provisioning session started");

    while let Some(input) = rx.recv().await {
        match input {
            Input::StartScanning => machine.start_scanning(),
            Input::StopScanning => machine.stop_scanning(),
            Input::Connect(id) => machine.connect(&id),
            Input::Provision(request) => machine.provision(request),
            Input::Cancel => machine.cancel(),
            Input::Peripherals(reply) => {
                let _ = reply.send(machine.peripherals().to_vec());
            }
            Input::Provisioned(reply) => {
                let _ = reply.send(machine.provisioned().to_vec());
            }
            Input::ExportLog(reply) => {
                let _ = reply.send(machine.export_diagnostic_log());
            }
            Input::Event(event) => machine.handle(event),
            Input::Shutdown => break,
        }
        publish(&state, machine.state());
    }

    machine.cancel();
    publish(&state, machine.state());
    log::debug!("provisioning session stopped");
}

fn publish(state: &watch::Sender<ProvisioningState>, next: &ProvisioningState) {
    state.send_if_modified(|current| {
        if current == next {
            false
        } else {
            *current = next.clone();
            true
        }
    });
}
