//! Per-device capability negotiation.
//!
//! Every connected device gets one [`HandshakeExecutor`]: a single-consumer
//! state machine fed through a bounded queue, plus a periodic retry task
//! that keeps asking the device to classify itself while the answer is
//! ambiguous. Because the transport fans every event out to every session,
//! the executor sees duplicate broadcasts; it discards any state whose
//! variant matches the previously recorded one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fg_protocol::{CommandType, DeviceDescriptor, TrackingSupportEvent};
use fg_runtime::Transport;

use crate::metrics::{DetectionMetrics, HandshakeConversion};

/// Transient protocol message driving one device's negotiation.
///
/// Consumed and discarded; never persisted.
#[derive(Debug, Clone)]
pub enum HandshakeState {
    /// The device appeared on the transport
    Connected,
    /// The device answered the handshake but could not classify itself
    UnknownSupported(TrackingSupportEvent),
    /// The device reported tracking works
    Supported(TrackingSupportEvent),
    /// The device reported tracking is unavailable
    NotSupported(TrackingSupportEvent),
    /// The device went away
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateKind {
    Connected,
    UnknownSupported,
    Supported,
    NotSupported,
    Disconnected,
}

impl HandshakeState {
    fn kind(&self) -> StateKind {
        match self {
            HandshakeState::Connected => StateKind::Connected,
            HandshakeState::UnknownSupported(_) => StateKind::UnknownSupported,
            HandshakeState::Supported(_) => StateKind::Supported,
            HandshakeState::NotSupported(_) => StateKind::NotSupported,
            HandshakeState::Disconnected => StateKind::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundPhase {
    /// No negotiation running; the retry loop exits when it sees this
    Idle,
    /// The last recorded state is `Connected` or `UnknownSupported`
    Negotiating,
}

struct RetryShared {
    phase: Mutex<RoundPhase>,
    retry: Mutex<Option<JoinHandle<()>>>,
}

/// Runs the negotiation protocol with exactly one connected device.
///
/// States are posted from concurrent event-stream consumers but processed
/// strictly in arrival order by a single consumer task. Posting never
/// blocks. Dropping the executor aborts both tasks without sending any
/// command to the device.
pub struct HandshakeExecutor {
    tx: mpsc::Sender<HandshakeState>,
    shared: Arc<RetryShared>,
    consumer: JoinHandle<()>,
}

impl HandshakeExecutor {
    /// Spawns the consumer task. Must be called within a tokio runtime.
    pub fn new(
        device: DeviceDescriptor,
        transport: Arc<dyn Transport>,
        metrics: Arc<dyn DetectionMetrics>,
        polling_interval: Duration,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let shared = Arc::new(RetryShared {
            phase: Mutex::new(RoundPhase::Idle),
            retry: Mutex::new(None),
        });
        let consumer = tokio::spawn(consume(
            rx,
            device,
            transport,
            metrics,
            polling_interval,
            Arc::clone(&shared),
        ));
        Self {
            tx,
            shared,
            consumer,
        }
    }

    /// Posts a state transition without blocking.
    ///
    /// A full queue drops the state with a warning; the retry loop
    /// re-requests the classification on its next tick, so nothing is lost
    /// for good.
    pub fn post(&self, state: HandshakeState) {
        if let Err(err) = self.tx.try_send(state) {
            tracing::warn!(%err, "handshake queue rejected state, dropping");
        }
    }
}

impl Drop for HandshakeExecutor {
    fn drop(&mut self) {
        *self.shared.phase.lock() = RoundPhase::Idle;
        if let Some(retry) = self.shared.retry.lock().take() {
            retry.abort();
        }
        self.consumer.abort();
    }
}

async fn consume(
    mut rx: mpsc::Receiver<HandshakeState>,
    device: DeviceDescriptor,
    transport: Arc<dyn Transport>,
    metrics: Arc<dyn DetectionMetrics>,
    polling_interval: Duration,
    shared: Arc<RetryShared>,
) {
    // Prior round memory, kept across disconnect/reconnect so a second
    // negotiation with the same device is classified as a recovery.
    let mut last: Option<StateKind> = None;
    let mut previous_terminal: Option<StateKind> = None;
    let mut recovery_round = false;

    while let Some(state) = rx.recv().await {
        let kind = state.kind();
        if last == Some(kind) {
            // Duplicate broadcast; every session receives every device's
            // activity, so identical back-to-back states are expected.
            tracing::debug!(serial = %device.serial, ?kind, "discarding duplicate handshake state");
            continue;
        }
        let prior = last;
        last = Some(kind);

        match state {
            HandshakeState::Connected => {
                recovery_round = prior.is_some();
                *shared.phase.lock() = RoundPhase::Negotiating;
                ensure_retry_loop(&shared, &device, &transport, polling_interval);
                tracing::debug!(serial = %device.serial, recovery = recovery_round, "handshake round started");
            }
            HandshakeState::UnknownSupported(event) => {
                // Keep retrying; the loop runs while the last recorded state
                // is Connected or UnknownSupported.
                *shared.phase.lock() = RoundPhase::Negotiating;
                tracing::debug!(serial = %device.serial, "device cannot classify tracking support yet, retrying");
                metrics.log_handshake_result(&event, recovery_round);
            }
            HandshakeState::Supported(event) => {
                *shared.phase.lock() = RoundPhase::Idle;
                metrics.log_handshake_result(&event, recovery_round);
                if prior == Some(StateKind::UnknownSupported) {
                    metrics.log_conversion(HandshakeConversion::UnknownToSupported);
                }
                if previous_terminal == Some(StateKind::NotSupported) {
                    metrics.log_conversion(HandshakeConversion::NotSupportedToSupported);
                }
                previous_terminal = Some(StateKind::Supported);
                tracing::debug!(serial = %device.serial, "device supports foreground-process tracking");
            }
            HandshakeState::NotSupported(event) => {
                *shared.phase.lock() = RoundPhase::Idle;
                metrics.log_handshake_result(&event, recovery_round);
                if prior == Some(StateKind::UnknownSupported) {
                    metrics.log_conversion(HandshakeConversion::UnknownToNotSupported);
                }
                previous_terminal = Some(StateKind::NotSupported);
                tracing::debug!(serial = %device.serial, reason = ?event.reason_not_supported, "device does not support foreground-process tracking");
            }
            HandshakeState::Disconnected => {
                *shared.phase.lock() = RoundPhase::Idle;
                if prior == Some(StateKind::UnknownSupported) {
                    // Distinguishes a real non-response from an interrupted
                    // handshake.
                    tracing::debug!(serial = %device.serial, "unknown state never resolved, device disconnected");
                    metrics.log_conversion(HandshakeConversion::UnknownNotResolved);
                }
            }
        }
    }
}

fn ensure_retry_loop(
    shared: &Arc<RetryShared>,
    device: &DeviceDescriptor,
    transport: &Arc<dyn Transport>,
    polling_interval: Duration,
) {
    let mut retry = shared.retry.lock();
    if retry.as_ref().is_some_and(|handle| !handle.is_finished()) {
        return;
    }

    let shared = Arc::clone(shared);
    let device = device.clone();
    let transport = Arc::clone(transport);
    *retry = Some(tokio::spawn(async move {
        loop {
            if *shared.phase.lock() != RoundPhase::Negotiating {
                break;
            }
            // Send failures are not handled here; the next tick resends
            // whether or not this one made it to the device.
            transport.send_command(&device, CommandType::IsTrackingSupported);
            tokio::time::sleep(polling_interval).await;
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMetrics;
    use fg_protocol::SupportType;
    use fg_runtime::testing::FakeTransport;
    use std::time::Instant;

    const INTERVAL: Duration = Duration::from_millis(20);

    fn device(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor::new("FakeManufacturer", "FakeModel", serial, 33)
    }

    fn unknown() -> TrackingSupportEvent {
        TrackingSupportEvent::new(SupportType::Unknown)
    }

    fn supported() -> TrackingSupportEvent {
        TrackingSupportEvent::new(SupportType::Supported)
    }

    fn not_supported() -> TrackingSupportEvent {
        TrackingSupportEvent::new(SupportType::NotSupported)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn executor(
        d: &DeviceDescriptor,
        transport: &Arc<FakeTransport>,
        metrics: &Arc<RecordingMetrics>,
    ) -> HandshakeExecutor {
        HandshakeExecutor::new(
            d.clone(),
            Arc::clone(transport) as Arc<dyn Transport>,
            Arc::clone(metrics) as Arc<dyn DetectionMetrics>,
            INTERVAL,
            16,
        )
    }

    #[tokio::test]
    async fn connected_starts_the_retry_loop() {
        let transport = Arc::new(FakeTransport::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let d = device("d1");
        let executor = executor(&d, &transport, &metrics);

        executor.post(HandshakeState::Connected);

        wait_until(|| transport.command_count(CommandType::IsTrackingSupported) >= 2).await;
    }

    #[tokio::test]
    async fn terminal_state_stops_the_retry_loop() {
        let transport = Arc::new(FakeTransport::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let d = device("d1");
        let executor = executor(&d, &transport, &metrics);

        executor.post(HandshakeState::Connected);
        wait_until(|| transport.command_count(CommandType::IsTrackingSupported) >= 1).await;

        executor.post(HandshakeState::Supported(supported()));
        wait_until(|| !metrics.handshake_results().is_empty()).await;

        // let any in-flight tick drain, then confirm the loop is dead
        tokio::time::sleep(INTERVAL * 2).await;
        let count = transport.command_count(CommandType::IsTrackingSupported);
        tokio::time::sleep(INTERVAL * 4).await;
        assert_eq!(
            transport.command_count(CommandType::IsTrackingSupported),
            count
        );
    }

    #[tokio::test]
    async fn duplicate_states_are_discarded() {
        let transport = Arc::new(FakeTransport::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let d = device("d1");
        let executor = executor(&d, &transport, &metrics);

        executor.post(HandshakeState::Connected);
        executor.post(HandshakeState::UnknownSupported(unknown()));
        executor.post(HandshakeState::UnknownSupported(unknown()));
        executor.post(HandshakeState::UnknownSupported(unknown()));
        executor.post(HandshakeState::Supported(supported()));

        wait_until(|| metrics.handshake_results().len() >= 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // one UNKNOWN log despite three posts, one SUPPORTED log
        let results = metrics.handshake_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.support_type, SupportType::Unknown);
        assert_eq!(results[1].0.support_type, SupportType::Supported);
        assert_eq!(
            metrics.conversions(),
            vec![HandshakeConversion::UnknownToSupported]
        );
    }

    #[tokio::test]
    async fn unknown_resolving_to_not_supported_is_a_conversion() {
        let transport = Arc::new(FakeTransport::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let d = device("d1");
        let executor = executor(&d, &transport, &metrics);

        executor.post(HandshakeState::Connected);
        executor.post(HandshakeState::UnknownSupported(unknown()));
        executor.post(HandshakeState::NotSupported(not_supported()));

        wait_until(|| metrics.handshake_results().len() >= 2).await;
        assert_eq!(
            metrics.conversions(),
            vec![HandshakeConversion::UnknownToNotSupported]
        );
    }

    #[tokio::test]
    async fn disconnect_during_unknown_logs_unresolved_and_stops_sends() {
        let transport = Arc::new(FakeTransport::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let d = device("d1");
        let executor = executor(&d, &transport, &metrics);

        executor.post(HandshakeState::Connected);
        executor.post(HandshakeState::UnknownSupported(unknown()));
        executor.post(HandshakeState::Disconnected);

        wait_until(|| {
            metrics
                .conversions()
                .contains(&HandshakeConversion::UnknownNotResolved)
        })
        .await;
        assert_eq!(metrics.conversions().len(), 1);

        tokio::time::sleep(INTERVAL * 2).await;
        let count = transport.command_count(CommandType::IsTrackingSupported);
        tokio::time::sleep(INTERVAL * 4).await;
        assert_eq!(
            transport.command_count(CommandType::IsTrackingSupported),
            count
        );
    }

    #[tokio::test]
    async fn reconnect_marks_the_round_as_recovery() {
        let transport = Arc::new(FakeTransport::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let d = device("d1");
        let executor = executor(&d, &transport, &metrics);

        executor.post(HandshakeState::Connected);
        executor.post(HandshakeState::NotSupported(not_supported()));
        wait_until(|| metrics.handshake_results().len() >= 1).await;
        assert!(!metrics.handshake_results()[0].1);

        executor.post(HandshakeState::Connected);
        executor.post(HandshakeState::Supported(supported()));
        wait_until(|| metrics.handshake_results().len() >= 2).await;

        let results = metrics.handshake_results();
        assert!(results[1].1, "second round should be a recovery handshake");
        assert_eq!(
            metrics.conversions(),
            vec![HandshakeConversion::NotSupportedToSupported]
        );
    }
}
