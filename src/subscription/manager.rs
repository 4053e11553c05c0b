//! Subscription manager: the single control task owning all mutable core state.
//!
//! Commands arrive over an mpsc channel with oneshot responses; subscription
//! output and sink close events arrive over their own channels. One
//! `tokio::select!` loop applies every side effect, which is what guarantees
//! per-subscription line ordering and keeps appends from racing surface
//! removal without any locking.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::command::{build_command, publish_args, subscribe_args};
use crate::broker::{BrokerConnection, ClientRole, ConnectOptions};
use crate::config::Config;
use crate::process::{ProcessExit, ProcessRunner};
use crate::sink::{SinkEvent, SinkId, SinkRegistry, SurfaceProvider};
use crate::subscription::error::SubscriptionError;
use crate::subscription::task::{RunOutcome, SubscriptionEvent, SubscriptionId, SubscriptionTask};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Point-in-time view of the manager's state, for the shell and tests.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub connection: BrokerConnection,
    pub subscriptions: Vec<(SubscriptionId, String)>,
}

/// Commands accepted by the manager task.
#[derive(Debug)]
pub enum ManagerCommand {
    Connect {
        opts: ConnectOptions,
        response_tx: oneshot::Sender<BrokerConnection>,
    },
    Subscribe {
        topic: String,
        response_tx: oneshot::Sender<Result<SubscriptionId, SubscriptionError>>,
    },
    Publish {
        topic: String,
        payload: String,
        response_tx: oneshot::Sender<Result<(), SubscriptionError>>,
    },
    /// Stop one subscription; responds with whether it was live.
    Stop {
        id: SubscriptionId,
        response_tx: oneshot::Sender<bool>,
    },
    Disconnect {
        response_tx: oneshot::Sender<()>,
    },
    OpenConsole {
        response_tx: oneshot::Sender<Result<(), SubscriptionError>>,
    },
    Status {
        response_tx: oneshot::Sender<StatusSnapshot>,
    },
}

struct SubscriptionHandle {
    topic: String,
    cancel: CancellationToken,
}

/// The subscription lifecycle orchestrator.
///
/// Owns the broker connection, the handle map and the sink registry; everything
/// else talks to it through [`ManagerClient`].
pub struct SubscriptionManager {
    config: Config,
    defaults: BrokerConnection,
    connection: BrokerConnection,
    handles: HashMap<SubscriptionId, SubscriptionHandle>,
    registry: SinkRegistry,
    commands: mpsc::Receiver<ManagerCommand>,
    events_rx: mpsc::Receiver<SubscriptionEvent>,
    events_tx: mpsc::Sender<SubscriptionEvent>,
    sink_events: mpsc::Receiver<SinkEvent>,
}

impl SubscriptionManager {
    /// Main control loop. Returns when every client handle is dropped, after
    /// sweeping all remaining subscriptions.
    pub async fn run(mut self) {
        info!("Subscription manager started ({})", self.connection);
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_subscription_event(event),
                Some(event) = self.sink_events.recv() => self.handle_sink_event(event),
            }
        }
        debug!("Command channel closed, sweeping remaining subscriptions");
        self.disconnect();
        info!("Subscription manager stopped");
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Connect { opts, response_tx } => {
                self.connection = BrokerConnection::connect(&self.defaults, opts);
                respond(response_tx, self.connection.clone());
            }
            ManagerCommand::Subscribe { topic, response_tx } => {
                respond(response_tx, self.subscribe(&topic));
            }
            ManagerCommand::Publish {
                topic,
                payload,
                response_tx,
            } => {
                respond(response_tx, self.publish(&topic, &payload));
            }
            ManagerCommand::Stop { id, response_tx } => {
                respond(response_tx, self.stop_subscription(id));
            }
            ManagerCommand::Disconnect { response_tx } => {
                self.disconnect();
                respond(response_tx, ());
            }
            ManagerCommand::OpenConsole { response_tx } => {
                let result = self
                    .registry
                    .get_or_create(&SinkId::Console)
                    .map(|_| ())
                    .map_err(SubscriptionError::from);
                respond(response_tx, result);
            }
            ManagerCommand::Status { response_tx } => {
                let snapshot = StatusSnapshot {
                    connection: self.connection.clone(),
                    subscriptions: self
                        .handles
                        .iter()
                        .map(|(id, handle)| (*id, handle.topic.clone()))
                        .collect(),
                };
                respond(response_tx, snapshot);
            }
        }
    }

    /// Spawns one listening process for `topic` and records it in the handle
    /// map. Duplicate subscriptions to the same topic each get their own
    /// process.
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, SubscriptionError> {
        if topic.trim().is_empty() {
            return Err(SubscriptionError::TopicRequired);
        }

        let argv = build_command(
            self.client_binary(ClientRole::Subscribe),
            &self.connection,
            &self.config.client_opts,
            &subscribe_args(topic),
        );
        let task = SubscriptionTask::create(topic.to_string(), argv, self.events_tx.clone());
        let running = task.start()?;
        let id = running.id();
        let cancel = running.cancel_token();

        tokio::spawn(async move {
            match running.forward_lines().await {
                Ok(RunOutcome::Finished(_)) => {}
                Ok(RunOutcome::Cancelled(stopping)) => {
                    stopping.finish().await;
                }
                Err(e) => error!("Subscription task failed: {}", e),
            }
        });

        self.handles.insert(
            id,
            SubscriptionHandle {
                topic: topic.to_string(),
                cancel,
            },
        );

        // Open the topic surface right away so the subscription is visible
        // before the first message arrives.
        if let Err(e) = self.registry.get_or_create(&SinkId::Topic(topic.to_string())) {
            warn!("Could not open surface for '{}': {}", topic, e);
        }

        info!("Subscribed to '{}' (subscription {})", topic, id);
        Ok(id)
    }

    /// Fires a detached publish process. Only a failure to spawn is reported;
    /// the process is never tracked in the handle map.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), SubscriptionError> {
        if topic.trim().is_empty() {
            return Err(SubscriptionError::TopicRequired);
        }

        let argv = build_command(
            self.client_binary(ClientRole::Publish),
            &self.connection,
            &self.config.client_opts,
            &publish_args(topic, payload),
        );
        let mut process = ProcessRunner::start(&argv)?;
        let topic = topic.to_string();

        tokio::spawn(async move {
            while process.lines.recv().await.is_some() {}
            match process.exit.await {
                Ok(ProcessExit::Natural(Some(0))) | Ok(ProcessExit::Stopped) => {}
                Ok(ProcessExit::Natural(code)) => {
                    warn!("Publish to '{}' exited with {:?}", topic, code)
                }
                Err(_) => debug!("Publish process exit signal lost"),
            }
        });

        Ok(())
    }

    /// Requests a stop for one subscription and deletes its handle map entry.
    /// Idempotent: stopping an unknown or already-stopped id is a no-op.
    fn stop_subscription(&mut self, id: SubscriptionId) -> bool {
        match self.handles.remove(&id) {
            Some(handle) => {
                info!("Stopping subscription {} ('{}')", id, handle.topic);
                handle.cancel.cancel();
                true
            }
            None => {
                debug!("Stop for unknown subscription {}, ignoring", id);
                false
            }
        }
    }

    /// Disconnect sweep: stop everything, reset the connection to defaults,
    /// clear (not destroy) all surfaces.
    fn disconnect(&mut self) {
        let count = self.handles.len();
        for (id, handle) in self.handles.drain() {
            debug!("Sweeping subscription {} ('{}')", id, handle.topic);
            handle.cancel.cancel();
        }
        self.connection = self.defaults.clone();
        self.registry.clear_all();
        info!(
            "Disconnected, stopped {} subscription(s), connection reset to {}",
            count, self.connection
        );
    }

    fn handle_subscription_event(&mut self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Line { id, text } => {
                // Lines from a stopped subscription can still be in flight;
                // they are dropped once the handle map entry is gone.
                let Some(handle) = self.handles.get(&id) else {
                    debug!("Dropping line from inactive subscription {}", id);
                    return;
                };
                let topic = handle.topic.clone();
                self.registry
                    .append(&SinkId::Topic(topic.clone()), &[text.clone()]);
                self.registry.append_console(&topic, &[text]);
            }
            SubscriptionEvent::Exited { id, exit } => {
                let Some(handle) = self.handles.remove(&id) else {
                    debug!("Exit of untracked subscription {}, ignoring", id);
                    return;
                };
                let status = match exit {
                    ProcessExit::Natural(Some(code)) => {
                        format!("subscription ended (exit code {})", code)
                    }
                    ProcessExit::Natural(None) => {
                        "subscription ended (killed by signal)".to_string()
                    }
                    ProcessExit::Stopped => "subscription stopped".to_string(),
                };
                info!("Subscription {} ('{}'): {}", id, handle.topic, status);
                let line = format!("--- {} ---", status);
                self.registry
                    .append(&SinkId::Topic(handle.topic.clone()), &[line.clone()]);
                self.registry.append_console(&handle.topic, &[line]);
            }
        }
    }

    /// External closure of a display surface stops every subscription routed
    /// into it and drops the cached surface.
    fn handle_sink_event(&mut self, event: SinkEvent) {
        let SinkEvent::Closed(sink) = event;
        info!("Surface '{}' closed externally", sink);
        self.registry.invalidate(&sink);

        if let SinkId::Topic(topic) = sink {
            let ids: Vec<SubscriptionId> = self
                .handles
                .iter()
                .filter(|(_, handle)| handle.topic == topic)
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                self.stop_subscription(id);
            }
        }
    }

    fn client_binary(&self, role: ClientRole) -> &str {
        match role {
            ClientRole::Subscribe => &self.config.subscribe_bin,
            ClientRole::Publish => &self.config.publish_bin,
        }
    }
}

fn respond<T>(response_tx: oneshot::Sender<T>, value: T) {
    if response_tx.send(value).is_err() {
        warn!("Command caller went away before the response");
    }
}

/// Spawns the manager task and hands out client handles.
pub struct ManagerHandle {
    client: ManagerClient,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    /// Wires the channels, builds the sink registry from `provider` and starts
    /// the control loop.
    pub fn spawn(
        config: Config,
        provider: Box<dyn SurfaceProvider>,
        sink_events: mpsc::Receiver<SinkEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let defaults = BrokerConnection::from_defaults(&config.host, config.port);
        let registry = SinkRegistry::new(provider, config.use_console);
        let manager = SubscriptionManager {
            config,
            connection: defaults.clone(),
            defaults,
            handles: HashMap::new(),
            registry,
            commands: command_rx,
            events_rx,
            events_tx,
            sink_events,
        };

        let task = tokio::spawn(manager.run());
        Self {
            client: ManagerClient { tx: command_tx },
            task,
        }
    }

    pub fn client(&self) -> ManagerClient {
        self.client.clone()
    }

    /// Waits for the manager to finish after the last client is dropped.
    pub async fn join(self) {
        let ManagerHandle { client, task } = self;
        drop(client);
        if let Err(e) = task.await {
            error!("Manager task panicked: {}", e);
        }
    }
}

/// Cloneable handle for talking to the manager task.
#[derive(Clone)]
pub struct ManagerClient {
    tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerClient {
    pub async fn connect(
        &self,
        opts: ConnectOptions,
    ) -> Result<BrokerConnection, SubscriptionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ManagerCommand::Connect { opts, response_tx }).await?;
        Self::receive(response_rx).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<SubscriptionId, SubscriptionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ManagerCommand::Subscribe {
            topic: topic.to_string(),
            response_tx,
        })
        .await?;
        Self::receive(response_rx).await?
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), SubscriptionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ManagerCommand::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
            response_tx,
        })
        .await?;
        Self::receive(response_rx).await?
    }

    /// Stops one subscription; `Ok(false)` means it was not (or no longer)
    /// live.
    pub async fn stop(&self, id: SubscriptionId) -> Result<bool, SubscriptionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ManagerCommand::Stop { id, response_tx }).await?;
        Self::receive(response_rx).await
    }

    pub async fn disconnect(&self) -> Result<(), SubscriptionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ManagerCommand::Disconnect { response_tx }).await?;
        Self::receive(response_rx).await
    }

    pub async fn open_console(&self) -> Result<(), SubscriptionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ManagerCommand::OpenConsole { response_tx }).await?;
        Self::receive(response_rx).await?
    }

    pub async fn status(&self) -> Result<StatusSnapshot, SubscriptionError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ManagerCommand::Status { response_tx }).await?;
        Self::receive(response_rx).await
    }

    async fn send(&self, command: ManagerCommand) -> Result<(), SubscriptionError> {
        self.tx
            .send(command)
            .await
            .map_err(|e| SubscriptionError::Channel(format!("Manager task gone: {}", e)))
    }

    async fn receive<T>(response_rx: oneshot::Receiver<T>) -> Result<T, SubscriptionError> {
        response_rx
            .await
            .map_err(|_| SubscriptionError::Channel("Manager dropped the response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryProvider;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    static SCRIPT_COUNTER: AtomicU32 = AtomicU32::new(0);

    /// Writes an executable script standing in for a mosquitto binary. The
    /// scripts ignore the argv the command builder produces.
    fn fake_client_bin(body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = std::env::temp_dir().join(format!(
            "mqttdeck-fake-client-{}-{}",
            std::process::id(),
            SCRIPT_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct TestRig {
        client: ManagerClient,
        surfaces: MemoryProvider,
        _handle: ManagerHandle,
    }

    fn rig(config: Config) -> TestRig {
        let (sink_tx, sink_rx) = mpsc::channel(16);
        let provider = MemoryProvider::new(sink_tx);
        let surfaces = provider.clone();
        let handle = ManagerHandle::spawn(config, Box::new(provider), sink_rx);
        TestRig {
            client: handle.client(),
            surfaces,
            _handle: handle,
        }
    }

    fn config_with_sub_bin(body: &str) -> Config {
        Config {
            subscribe_bin: fake_client_bin(body).display().to_string(),
            ..Config::default()
        }
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn empty_topic_is_rejected_before_spawn() {
        let rig = rig(config_with_sub_bin("sleep 30"));
        assert!(matches!(
            rig.client.subscribe("  ").await,
            Err(SubscriptionError::TopicRequired)
        ));
        assert!(rig.client.status().await.unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_registers_nothing() {
        let config = Config {
            subscribe_bin: "mqttdeck-no-such-binary".to_string(),
            ..Config::default()
        };
        let rig = rig(config);
        assert!(matches!(
            rig.client.subscribe("a").await,
            Err(SubscriptionError::Process(_))
        ));
        assert!(rig.client.status().await.unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn lines_reach_topic_and_console_in_order() {
        let rig = rig(config_with_sub_bin("echo alpha; echo beta; sleep 30"));
        rig.client.subscribe("x/y").await.unwrap();

        let topic = rig.surfaces.handle("x/y");
        wait_until("both lines on the topic surface", || topic.lines().len() == 2).await;
        assert_eq!(topic.lines(), vec!["alpha", "beta"]);

        let console = rig.surfaces.handle("console");
        wait_until("both lines on the console", || console.lines().len() == 2).await;
        let console_lines = console.lines();
        assert!(console_lines[0].contains("x/y: alpha"));
        assert!(console_lines[1].contains("x/y: beta"));
    }

    #[tokio::test]
    async fn console_routing_can_be_disabled() {
        let config = Config {
            use_console: false,
            ..config_with_sub_bin("echo only; sleep 30")
        };
        let rig = rig(config);
        rig.client.subscribe("t").await.unwrap();

        let topic = rig.surfaces.handle("t");
        wait_until("line on the topic surface", || !topic.lines().is_empty()).await;
        assert_eq!(rig.surfaces.handle("console").generation(), 0);
    }

    #[tokio::test]
    async fn natural_exit_appends_status_line_and_deregisters() {
        let rig = rig(config_with_sub_bin("exit 2"));
        rig.client.subscribe("dying").await.unwrap();

        let topic = rig.surfaces.handle("dying");
        wait_until("the status line", || {
            topic.lines().iter().any(|line| line.contains("exit code 2"))
        })
        .await;
        assert!(rig.client.status().await.unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let rig = rig(config_with_sub_bin("sleep 30"));
        let id = rig.client.subscribe("t").await.unwrap();

        assert!(rig.client.stop(id).await.unwrap());
        assert!(!rig.client.stop(id).await.unwrap());
        assert!(rig.client.status().await.unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn disconnect_sweeps_everything_and_resets_connection() {
        let rig = rig(config_with_sub_bin("echo hello; sleep 30"));
        rig.client
            .connect(ConnectOptions {
                host: Some("other.example".to_string()),
                port: Some(9999),
                ..Default::default()
            })
            .await
            .unwrap();
        rig.client.subscribe("a").await.unwrap();
        rig.client.subscribe("b").await.unwrap();
        let surface_a = rig.surfaces.handle("a");
        wait_until("output on surface a", || !surface_a.lines().is_empty()).await;

        rig.client.disconnect().await.unwrap();

        let status = rig.client.status().await.unwrap();
        assert!(status.subscriptions.is_empty());
        assert_eq!(status.connection, BrokerConnection::default());
        // Surfaces survive the sweep but their content is cleared.
        assert_eq!(surface_a.generation(), 1);
        assert!(surface_a.lines().is_empty());

        // A bare connect afterwards lands on the defaults again.
        let connection = rig.client.connect(ConnectOptions::default()).await.unwrap();
        assert_eq!(connection, BrokerConnection::default());
    }

    #[tokio::test]
    async fn publish_never_enters_the_handle_map() {
        let config = Config {
            publish_bin: fake_client_bin("exit 0").display().to_string(),
            ..Config::default()
        };
        let rig = rig(config);
        rig.client.publish("t", "hello world").await.unwrap();
        assert!(rig.client.status().await.unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn publish_spawn_failure_reaches_the_caller() {
        let config = Config {
            publish_bin: "mqttdeck-no-such-binary".to_string(),
            ..Config::default()
        };
        let rig = rig(config);
        assert!(matches!(
            rig.client.publish("t", "x").await,
            Err(SubscriptionError::Process(_))
        ));
    }

    #[tokio::test]
    async fn closing_a_topic_surface_stops_its_subscription() {
        let rig = rig(config_with_sub_bin("echo up; sleep 30"));
        rig.client.subscribe("x").await.unwrap();
        let surface = rig.surfaces.handle("x");
        wait_until("subscription output", || !surface.lines().is_empty()).await;

        rig.surfaces.close(&SinkId::Topic("x".to_string()));

        let client = rig.client.clone();
        let mut empty = false;
        for _ in 0..100 {
            if client.status().await.unwrap().subscriptions.is_empty() {
                empty = true;
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(empty, "subscription was not stopped by the surface closure");
    }
}
