//! The per-session detection coordinator.
//!
//! Owns the lifecycle of all per-device [`HandshakeExecutor`]s for one
//! client session, translates handshake outcomes into polling actions, and
//! routes device-reported foreground processes to listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use fg_protocol::{
    ActivityKind, CommandType, DeviceDescriptor, EventKind, EventPayload, ForegroundProcess,
    ForegroundProcessEvent, ProcessDescriptor, SupportType, TrackingSupportEvent,
};
use fg_runtime::{Error, Result, Transport};

use crate::config::DetectionConfig;
use crate::device_model::{DeviceModel, ListenerId, SupportStatus};
use crate::handshake::{HandshakeExecutor, HandshakeState};
use crate::metrics::DetectionMetrics;
use crate::process_model::ProcessesModel;
use crate::registry::{ConnectClockTable, SessionRegistry};

/// Notified whenever a device reports a new foreground process.
///
/// `is_debuggable` reflects whether the process registry knows the pid; a
/// foreground process the registry cannot resolve is not instrumentable.
pub trait ForegroundProcessListener: Send + Sync {
    fn on_new_process(
        &self,
        device: &DeviceDescriptor,
        foreground_process: &ForegroundProcess,
        is_debuggable: bool,
    );
}

impl<F> ForegroundProcessListener for F
where
    F: Fn(&DeviceDescriptor, &ForegroundProcess, bool) + Send + Sync,
{
    fn on_new_process(
        &self,
        device: &DeviceDescriptor,
        foreground_process: &ForegroundProcess,
        is_debuggable: bool,
    ) {
        self(device, foreground_process, is_debuggable)
    }
}

/// Observability hook invoked after a device's disconnect teardown.
pub type DisconnectHook = Arc<dyn Fn(&DeviceDescriptor) + Send + Sync>;

struct DeviceTasks {
    foreground: JoinHandle<()>,
    support: JoinHandle<()>,
}

impl DeviceTasks {
    fn abort(&self) {
        self.foreground.abort();
        self.support.abort();
    }
}

#[derive(Clone)]
struct LastForeground {
    device: DeviceDescriptor,
    foreground_process: ForegroundProcess,
    is_debuggable: bool,
}

/// Detects which application is in the foreground on connected devices and
/// coordinates on-device polling for one client session.
///
/// Created once per session; [`start`](Self::start) subscribes to the
/// transport's activity feed and [`stop`](Self::stop) tears everything down
/// without sending any command to a device.
pub struct ForegroundProcessDetection {
    device_model: Arc<DeviceModel>,
    process_model: Arc<dyn ProcessesModel>,
    transport: Arc<dyn Transport>,
    metrics: Arc<dyn DetectionMetrics>,
    registry: Arc<SessionRegistry>,
    clocks: Arc<ConnectClockTable>,
    config: DetectionConfig,
    executors: DashMap<DeviceDescriptor, HandshakeExecutor>,
    device_tasks: DashMap<DeviceDescriptor, DeviceTasks>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ForegroundProcessListener>)>>,
    next_listener_id: AtomicU64,
    last_foreground: Mutex<Option<LastForeground>>,
    activity_task: Mutex<Option<JoinHandle<()>>>,
    disconnect_hook: Mutex<Option<DisconnectHook>>,
    recovery_listener_installed: AtomicBool,
}

impl ForegroundProcessDetection {
    pub fn new(
        device_model: Arc<DeviceModel>,
        process_model: Arc<dyn ProcessesModel>,
        transport: Arc<dyn Transport>,
        metrics: Arc<dyn DetectionMetrics>,
        registry: Arc<SessionRegistry>,
        clocks: Arc<ConnectClockTable>,
        config: DetectionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            device_model,
            process_model,
            transport,
            metrics,
            registry,
            clocks,
            config,
            executors: DashMap::new(),
            device_tasks: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            last_foreground: Mutex::new(None),
            activity_task: Mutex::new(None),
            disconnect_hook: Mutex::new(None),
            recovery_listener_installed: AtomicBool::new(false),
        })
    }

    /// Starts listening for device connect/disconnect activity. Idempotent.
    ///
    /// Also installs the recovery listener on the process registry: when the
    /// user manually selects a process on a device that is not classified
    /// `Supported`, the handshake is re-initiated (the earlier classification
    /// may have been a false negative).
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.activity_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        if !self.recovery_listener_installed.swap(true, Ordering::SeqCst) {
            let weak = Arc::downgrade(self);
            self.process_model
                .add_selection_listener(Arc::new(move |process: Option<&ProcessDescriptor>| {
                    if let (Some(detection), Some(process)) = (weak.upgrade(), process) {
                        detection.maybe_restart_handshake(&process.device);
                    }
                }));
        }

        // Subscribe synchronously so that a connect/disconnect broadcast sent
        // immediately after `start()` returns is not missed by the not-yet-
        // polled task (the broadcast only reaches receivers that already exist).
        let mut activity = self.transport.stream_activity();
        let detection = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            while let Some(event) = activity.recv().await {
                match event.kind {
                    ActivityKind::Connected => {
                        detection.handle_device_connected(&event.device).await;
                    }
                    ActivityKind::Disconnected => {
                        detection.handle_device_disconnected(&event.device);
                    }
                }
            }
        }));
    }

    /// Cancels the activity subscription and every per-device task.
    ///
    /// Idempotent, and deliberately command-free: only an explicit
    /// [`stop_polling_selected_device`](Self::stop_polling_selected_device)
    /// or session-disposal path may stop a device's tracker.
    pub fn stop(&self) {
        if let Some(task) = self.activity_task.lock().take() {
            task.abort();
        }
        self.device_tasks.retain(|_, tasks| {
            tasks.abort();
            false
        });
        self.executors.clear();
    }

    /// Starts on-device polling of `new_device`, replacing any previous
    /// selection.
    ///
    /// The previous device is sent a stop command only when no other live
    /// session still has it selected; the on-device tracker is a shared
    /// resource and stopping it is destructive to every watcher. The new
    /// device is started and selected only if it is classified `Supported`;
    /// otherwise the selection is cleared and the session falls back to
    /// manual process selection.
    pub fn start_polling_device(&self, new_device: &DeviceDescriptor, stop_previous: bool) {
        let selected = self.device_model.selected_device();
        if selected.as_ref() == Some(new_device) {
            return;
        }

        if stop_previous {
            if let Some(old_device) = &selected {
                self.send_stop_if_last_watcher(old_device);
            }
        }

        if self.device_model.support_status(new_device) == Some(SupportStatus::Supported) {
            self.transport
                .send_command(new_device, CommandType::StartTracking);
            self.device_model
                .set_selected_device(Some(new_device.clone()));
            tracing::debug!(serial = %new_device.serial, "started polling device");
        } else {
            tracing::debug!(
                serial = %new_device.serial,
                "device is not classified as supported, clearing selection"
            );
            self.device_model.set_selected_device(None);
        }
    }

    /// Stops polling the currently selected device, if any.
    ///
    /// The stop command is gated by the same cross-session reference count
    /// as [`start_polling_device`](Self::start_polling_device).
    pub fn stop_polling_selected_device(&self) {
        let Some(device) = self.device_model.selected_device() else {
            return;
        };

        self.send_stop_if_last_watcher(&device);
        self.clear_foreground_cache_for(&device);
        self.device_model.set_selected_device(None);
    }

    /// Combined session teardown: stop polling if a device is selected,
    /// otherwise just clear the registry's selected process.
    pub fn stop_inspection(&self) {
        if self.device_model.selected_device().is_some() {
            self.stop_polling_selected_device();
        } else {
            self.process_model.set_selected_process(None);
        }
    }

    /// Registers a foreground-process listener and immediately replays the
    /// last known foreground process to it, so a listener added late still
    /// learns the current state.
    pub fn add_foreground_process_listener(
        &self,
        listener: Arc<dyn ForegroundProcessListener>,
    ) -> ListenerId {
        let id = ListenerId::new(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, Arc::clone(&listener)));

        let last = self.last_foreground.lock().clone();
        if let Some(last) = last {
            listener.on_new_process(&last.device, &last.foreground_process, last.is_debuggable);
        }
        id
    }

    pub fn remove_foreground_process_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(entry, _)| *entry != id);
    }

    /// Installs the hook invoked after a device's disconnect teardown.
    pub fn set_disconnect_hook(&self, hook: DisconnectHook) {
        *self.disconnect_hook.lock() = Some(hook);
    }

    async fn handle_device_connected(self: &Arc<Self>, device: &DeviceDescriptor) {
        let clock = match self.transport.current_clock(device).await {
            Ok(clock) => clock,
            Err(err) => {
                tracing::warn!(serial = %device.serial, %err, "failed to read device clock");
                0
            }
        };
        if self.clocks.record_connect(device, clock) {
            tracing::warn!(serial = %device.serial, clock, "device reconnected with a non-monotonic clock");
            self.metrics.log_reconnect_anomaly(device);
        }

        // Subscribe before the handshake can produce any reply.
        let mut foreground_stream =
            self.transport
                .events(device, EventKind::ForegroundProcess, clock);
        let mut support_stream = self.transport.events(device, EventKind::TrackingSupport, clock);

        let detection = Arc::clone(self);
        let foreground_device = device.clone();
        let foreground = tokio::spawn(async move {
            while let Some(event) = foreground_stream.recv().await {
                if let EventPayload::ForegroundProcess(payload) = event.payload {
                    if let Err(err) =
                        detection.handle_foreground_process(&foreground_device, &payload)
                    {
                        tracing::error!(
                            serial = %foreground_device.serial, %err,
                            "foreground-process event violated the wire contract, stopping event handling for device"
                        );
                        break;
                    }
                }
            }
        });

        let detection = Arc::clone(self);
        let support_device = device.clone();
        let support = tokio::spawn(async move {
            while let Some(event) = support_stream.recv().await {
                if let EventPayload::TrackingSupport(payload) = event.payload {
                    if let Err(err) = detection.handle_tracking_support(&support_device, payload) {
                        tracing::error!(
                            serial = %support_device.serial, %err,
                            "tracking-support event violated the wire contract, stopping event handling for device"
                        );
                        break;
                    }
                }
            }
        });

        // A duplicate connect broadcast replaces the old subscriptions.
        if let Some(previous) = self.device_tasks.insert(
            device.clone(),
            DeviceTasks {
                foreground,
                support,
            },
        ) {
            previous.abort();
        }

        self.device_model
            .set_support_status(device, SupportStatus::HandshakeInProgress);
        self.executor(device).post(HandshakeState::Connected);
    }

    fn handle_device_disconnected(&self, device: &DeviceDescriptor) {
        self.device_model.remove_support_status(device);
        if let Some((_, tasks)) = self.device_tasks.remove(device) {
            tasks.abort();
        }

        if self.device_model.selected_device().as_ref() == Some(device) {
            self.device_model.set_selected_device(None);
        }
        // Never tell a late listener about a process on a device that is gone.
        self.clear_foreground_cache_for(device);

        if let Some(executor) = self.executors.get(device) {
            executor.post(HandshakeState::Disconnected);
        }

        let hook = self.disconnect_hook.lock().clone();
        if let Some(hook) = hook {
            hook(device);
        }
    }

    fn handle_foreground_process(
        &self,
        device: &DeviceDescriptor,
        payload: &ForegroundProcessEvent,
    ) -> Result<()> {
        let foreground_process = ForegroundProcess::try_from(payload).map_err(|err| {
            Error::Protocol(format!(
                "unparseable foreground-process pid {:?}: {err}",
                payload.pid
            ))
        })?;

        let descriptor = self
            .process_model
            .find_process_by_pid(device, foreground_process.pid);
        let is_debuggable = descriptor.is_some();

        *self.last_foreground.lock() = Some(LastForeground {
            device: device.clone(),
            foreground_process: foreground_process.clone(),
            is_debuggable,
        });

        let listeners: Vec<Arc<dyn ForegroundProcessListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_new_process(device, &foreground_process, is_debuggable);
        }
        Ok(())
    }

    fn handle_tracking_support(
        &self,
        device: &DeviceDescriptor,
        payload: TrackingSupportEvent,
    ) -> Result<()> {
        match payload.support_type {
            SupportType::Supported => {
                self.device_model
                    .set_support_status(device, SupportStatus::Supported);
                self.executor(device).post(HandshakeState::Supported(payload));

                // Zero-configuration default: the first supported device a
                // session sees gets polled automatically.
                if self.device_model.selected_device().is_none()
                    && self.device_model.devices().contains(device)
                {
                    self.start_polling_device(device, true);
                }
            }
            SupportType::NotSupported => {
                self.device_model
                    .set_support_status(device, SupportStatus::NotSupported);
                self.executor(device)
                    .post(HandshakeState::NotSupported(payload));
            }
            SupportType::Unknown => {
                self.device_model
                    .set_support_status(device, SupportStatus::Unknown);
                self.executor(device)
                    .post(HandshakeState::UnknownSupported(payload));
            }
            SupportType::Unrecognized => {
                // The wire contract is violated; guessing here would corrupt
                // the classification for every later decision.
                return Err(Error::Protocol(format!(
                    "unrecognized tracking-support classification from device {}",
                    device.serial
                )));
            }
        }
        Ok(())
    }

    /// Re-initiates the handshake for a device the user manually picked a
    /// process on, unless the device is already supported or a round is in
    /// progress.
    fn maybe_restart_handshake(&self, device: &DeviceDescriptor) {
        match self.device_model.support_status(device) {
            Some(SupportStatus::Supported)
            | Some(SupportStatus::HandshakeInProgress)
            | Some(SupportStatus::Unknown) => {}
            Some(SupportStatus::NotSupported) | None => {
                tracing::debug!(serial = %device.serial, "re-initiating handshake after manual process selection");
                self.device_model
                    .set_support_status(device, SupportStatus::HandshakeInProgress);
                self.executor(device).post(HandshakeState::Connected);
            }
        }
    }

    fn send_stop_if_last_watcher(&self, device: &DeviceDescriptor) {
        if self
            .registry
            .is_selected_in_other_session(self.device_model.session_id(), device)
        {
            tracing::debug!(
                serial = %device.serial,
                "device still selected in another session, not stopping its tracker"
            );
        } else {
            self.transport.send_command(device, CommandType::StopTracking);
        }
    }

    fn clear_foreground_cache_for(&self, device: &DeviceDescriptor) {
        let mut last = self.last_foreground.lock();
        if last.as_ref().is_some_and(|cached| &cached.device == device) {
            *last = None;
        }
    }

    fn executor(
        &self,
        device: &DeviceDescriptor,
    ) -> dashmap::mapref::one::RefMut<'_, DeviceDescriptor, HandshakeExecutor> {
        self.executors.entry(device.clone()).or_insert_with(|| {
            HandshakeExecutor::new(
                device.clone(),
                Arc::clone(&self.transport),
                Arc::clone(&self.metrics),
                self.config.polling_interval,
                self.config.handshake_queue_capacity,
            )
        })
    }
}

impl Drop for ForegroundProcessDetection {
    fn drop(&mut self) {
        self.stop();
    }
}
