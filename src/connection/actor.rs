//! The actor that owns a connection's transport and all of its state.
//!
//! 拥有连接的传输实例及其全部状态的 actor。

use super::{
    command::{Command, Internal},
    event::{ConnectionEvent, EventBus},
    state::{ConnectionState, StateMachine, StateValidator, Step, Trigger},
    waiters::StateWaiters,
};
use crate::{
    channel::{ChannelProxy, ChannelRequest},
    config::ConnectionConfig,
    error::{Error, Result},
    registry::{self, QueueRegistry},
    transport::{Generation, Transport, TransportEvent, TransportEventSink, TransportFactory},
};
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use tracing::{debug, error, info, trace, warn};

struct PendingChannel {
    request: ChannelRequest,
    response_tx: oneshot::Sender<Result<ChannelProxy>>,
}

/// Single owner of one logical broker connection.
///
/// The actor handles one message to completion, including any transition it
/// causes, before it looks at the next one. Slow collaborator calls run in
/// spawned tasks that report back through `internal_tx`.
///
/// 一个逻辑代理连接的唯一所有者。actor 在处理下一条消息之前，会完整处理当前消息
/// （包括由此引发的状态转换）。耗时的协作调用在派生任务中运行，并通过 `internal_tx` 回报结果。
pub(crate) struct ConnectionActor {
    config: ConnectionConfig,
    factory: Arc<dyn TransportFactory>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: Arc<EventBus>,
    command_rx: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    /// Generation of `transport`; bumped for every new instance.
    generation: Generation,
    transport: Option<Arc<dyn Transport>>,
    /// Set the first time `Connected` is entered, never reset.
    has_connected: bool,
    /// `Connected` was entered and no loss has been observed since.
    link_live: bool,
    /// The current transport raised `Released` or `Closed`.
    transport_lost: bool,

    fail_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,

    registry: QueueRegistry,
    pending_connects: Vec<oneshot::Sender<Result<()>>>,
    pending_channels: Vec<PendingChannel>,
    waiters: StateWaiters,
    /// `Some` while a close is in progress; holds every caller waiting on it.
    closing: Option<Vec<oneshot::Sender<Result<()>>>>,
}

impl ConnectionActor {
    pub(crate) fn new(
        config: ConnectionConfig,
        factory: Arc<dyn TransportFactory>,
        command_rx: mpsc::Receiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        events: Arc<EventBus>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            factory,
            state: ConnectionState::Disconnected,
            state_tx,
            events,
            command_rx,
            internal_tx,
            internal_rx,
            generation: 0,
            transport: None,
            has_connected: false,
            link_live: false,
            transport_lost: false,
            fail_deadline: None,
            retry_deadline: None,
            registry: QueueRegistry::new(),
            pending_connects: Vec::new(),
            pending_channels: Vec::new(),
            waiters: StateWaiters::default(),
            closing: None,
        }
    }

    /// Runs the actor's main event loop until every handle is dropped.
    ///
    /// 运行 actor 的主事件循环，直到所有句柄都被丢弃。
    pub(crate) async fn run(mut self) {
        debug!(name = %self.config.name, "Connection actor started");

        loop {
            let fail_timer = wait_until(self.fail_deadline);
            let retry_timer = wait_until(self.retry_deadline);

            tokio::select! {
                biased;

                // 1. Transport events and spawned work first, so that an event
                //    raised before a command is seen before that command.
                // 1. 优先处理传输事件和派生任务结果，保证先于命令触发的事件先被处理。
                Some(message) = self.internal_rx.recv() => {
                    self.handle_internal(message);
                }
                // 2. Commands from handles.
                // 2. 来自句柄的命令。
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                // 3. Connect attempt deadline.
                // 3. 连接尝试的截止时间。
                _ = fail_timer => {
                    self.fail_deadline = None;
                    self.apply(Trigger::Timeout, Some(Error::ConnectTimeout));
                }
                // 4. Automatic retry from `Failed`.
                // 4. 从 `Failed` 自动重试。
                _ = retry_timer => {
                    self.retry_deadline = None;
                    self.apply(Trigger::RetryDue, None);
                }
            }
        }

        debug!(name = %self.config.name, state = %self.state, "All handles dropped, actor stopping");
    }

    fn handle_command(&mut self, command: Command) {
        trace!(name = %self.config.name, state = %self.state, ?command, "Handling command");

        match command {
            Command::Connect { response_tx } => {
                if let Some(error) = self.closing_error() {
                    let _ = response_tx.send(Err(error));
                    return;
                }
                match StateMachine::step(self.state, Trigger::Connect) {
                    Step::Ready => {
                        let _ = response_tx.send(Ok(()));
                    }
                    Step::Join => self.pending_connects.push(response_tx),
                    Step::StartAttempt => {
                        self.pending_connects.push(response_tx);
                        self.start_attempt();
                    }
                    _ => {
                        let _ = response_tx.send(Err(Error::Closed));
                    }
                }
            }
            Command::GetChannel {
                request,
                response_tx,
            } => {
                if let Some(error) = self.closing_error() {
                    let _ = response_tx.send(Err(error));
                    return;
                }
                match StateMachine::step(self.state, Trigger::Connect) {
                    Step::Ready => self.spawn_channel(request, response_tx),
                    Step::Join => self.pending_channels.push(PendingChannel {
                        request,
                        response_tx,
                    }),
                    Step::StartAttempt => {
                        self.pending_channels.push(PendingChannel {
                            request,
                            response_tx,
                        });
                        self.start_attempt();
                    }
                    _ => {
                        let _ = response_tx.send(Err(Error::Closed));
                    }
                }
            }
            Command::AddQueue { queue, response_tx } => {
                let result = if self.state == ConnectionState::Closed {
                    Err(Error::Closed)
                } else {
                    self.registry.add(queue)
                };
                if result.is_ok() {
                    trace!(name = %self.config.name, registered = self.registry.len(), "Queue registered");
                }
                let _ = response_tx.send(result);
            }
            Command::Close { response_tx } => self.begin_close(response_tx),
            Command::After { state, response_tx } => {
                if self.state == state {
                    let _ = response_tx.send(());
                } else if self.state != ConnectionState::Closed {
                    self.waiters.register(state, response_tx);
                }
                // Once closed no other state can be reached; dropping the
                // sender tells the caller so.
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Transport { generation, event } => {
                if !self.is_current(generation) {
                    debug!(
                        name = %self.config.name,
                        generation,
                        current = self.generation,
                        ?event,
                        "Dropping event from superseded transport"
                    );
                    return;
                }
                self.handle_transport_event(event);
            }
            Internal::ChannelFailed { generation, error } => {
                if self.is_current(generation) {
                    self.apply(Trigger::ChannelFailed, Some(error));
                }
            }
            Internal::CloseComplete { result } => self.finish_close(result),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Acquiring => {
                trace!(name = %self.config.name, generation = self.generation, "Transport acquiring");
            }
            TransportEvent::Acquired => self.apply(Trigger::Acquired, None),
            TransportEvent::Failed(error) => self.apply(Trigger::TransportFailed, Some(error)),
            TransportEvent::Closed => self.apply(
                Trigger::LinkClosed,
                Some(Error::transport("link closed")),
            ),
            TransportEvent::Released => self.apply(
                Trigger::Released,
                Some(Error::transport("transport released")),
            ),
        }
    }

    /// Looks the trigger up in the transition table and carries out the step.
    ///
    /// 在转换表中查找触发器并执行对应步骤。
    fn apply(&mut self, trigger: Trigger, cause: Option<Error>) {
        if self.closing.is_some() {
            trace!(name = %self.config.name, ?trigger, "Closing, trigger ignored");
            return;
        }

        let step = StateMachine::step(self.state, trigger);
        trace!(name = %self.config.name, state = %self.state, ?trigger, ?step, "Dispatching trigger");

        let cause = || cause.unwrap_or_else(|| Error::transport(format!("{trigger:?}")));
        match step {
            Step::Ignore => {
                debug!(name = %self.config.name, state = %self.state, ?trigger, "Trigger has no effect in this state");
            }
            Step::StartAttempt => self.start_attempt(),
            Step::Establish => self.establish(),
            Step::Fail => self.fail(cause()),
            Step::FailRetainingLink => self.enter_failed(cause()),
            Step::Reconnect => self.reconnect(cause()),
            Step::DropLink => self.drop_link(cause()),
            // Only produced for `Trigger::Connect`, which callers handle themselves.
            Step::Join | Step::Ready | Step::Reject => {}
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.transport.is_some() && generation == self.generation
    }

    fn closing_error(&self) -> Option<Error> {
        if self.state == ConnectionState::Closed {
            Some(Error::Closed)
        } else if self.closing.is_some() {
            Some(Error::Closing)
        } else {
            None
        }
    }

    fn enter(&mut self, next: ConnectionState) {
        let current = self.state;
        debug_assert!(
            StateValidator::is_valid_transition(current, next),
            "invalid transition {current} -> {next}"
        );
        if !StateValidator::is_valid_transition(current, next) {
            error!(name = %self.config.name, from = %current, to = %next, "Invalid state transition attempted");
            return;
        }

        debug!(name = %self.config.name, from = %current, to = %next, "State transition");
        self.state = next;
        self.state_tx.send_replace(next);
        self.waiters.notify(next);
    }

    /// Creates a new transport, supersedes the previous generation, and
    /// starts acquiring.
    ///
    /// 创建新的传输实例，取代上一代，并开始获取链路。
    fn start_attempt(&mut self) {
        self.retry_deadline = None;
        // A link kept through `Failed` is superseded by the new attempt.
        if let Some(previous) = self.transport.take() {
            self.release_superseded(previous);
        }
        self.link_live = false;
        self.generation += 1;
        let generation = self.generation;
        let sink = TransportEventSink::new(generation, self.internal_tx.clone());

        let created = self.factory.create(sink.clone());
        if let Ok(transport) = &created {
            self.transport = Some(Arc::clone(transport));
            self.transport_lost = false;
            self.fail_deadline = Some(Instant::now() + self.config.fail_after);
        }

        self.enter(ConnectionState::Connecting);
        info!(name = %self.config.name, generation, "Connecting");
        self.events.emit(ConnectionEvent::Connecting);

        match created {
            Ok(transport) => {
                tokio::spawn(async move {
                    let event = match transport.acquire().await {
                        Ok(()) => TransportEvent::Acquired,
                        Err(error) => TransportEvent::Failed(error),
                    };
                    sink.raise(event);
                });
            }
            Err(error) => {
                warn!(name = %self.config.name, generation, %error, "Transport factory failed");
                self.fail(error);
            }
        }
    }

    fn establish(&mut self) {
        self.fail_deadline = None;
        self.link_live = true;
        self.transport_lost = false;
        self.enter(ConnectionState::Connected);

        let event = if self.has_connected {
            ConnectionEvent::Reconnected
        } else {
            ConnectionEvent::Connected
        };
        self.has_connected = true;
        info!(name = %self.config.name, generation = self.generation, ?event, "Connection established");
        self.events.emit(event);

        for tx in self.pending_connects.drain(..) {
            let _ = tx.send(Ok(()));
        }
        for pending in std::mem::take(&mut self.pending_channels) {
            self.spawn_channel(pending.request, pending.response_tx);
        }
    }

    fn fail(&mut self, error: Error) {
        self.link_live = false;
        if let Some(transport) = self.transport.take() {
            self.release_superseded(transport);
        }
        self.enter_failed(error);
    }

    /// Enters `Failed` without touching the transport.
    ///
    /// Reached directly when a channel could not be created on a live link:
    /// the transport and its liveness are kept, so a later close still drains
    /// the registered queues before releasing it.
    ///
    /// 进入 `Failed` 而不改动传输实例。在存活链路上创建通道失败时直接走这里：
    /// 保留传输实例及其存活状态，之后的关闭仍会先排空已注册的队列再释放它。
    fn enter_failed(&mut self, error: Error) {
        self.fail_deadline = None;
        self.enter(ConnectionState::Failed);

        warn!(name = %self.config.name, generation = self.generation, %error, "Connection failed");
        self.events.emit(ConnectionEvent::failed(error.clone()));

        for tx in self.pending_connects.drain(..) {
            let _ = tx.send(Err(error.clone()));
        }
        for pending in self.pending_channels.drain(..) {
            let _ = pending.response_tx.send(Err(error.clone()));
        }

        if let Some(delay) = self.config.retry_after {
            let delay = jittered(delay);
            debug!(name = %self.config.name, ?delay, "Scheduling automatic retry");
            self.retry_deadline = Some(Instant::now() + delay);
        }
    }

    fn reconnect(&mut self, cause: Error) {
        warn!(name = %self.config.name, generation = self.generation, %cause, "Link lost, reconnecting");
        self.link_live = false;
        self.transport_lost = true;
        self.transport = None;
        self.start_attempt();
    }

    fn drop_link(&mut self, cause: Error) {
        info!(name = %self.config.name, generation = self.generation, %cause, "Link kept through failure was lost");
        self.link_live = false;
        self.transport_lost = true;
        self.transport = None;
    }

    fn release_superseded(&self, transport: Arc<dyn Transport>) {
        let name = self.config.name.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            if let Err(error) = transport.release().await {
                debug!(%name, generation, %error, "Superseded transport failed to release");
            }
        });
    }

    fn spawn_channel(
        &self,
        request: ChannelRequest,
        response_tx: oneshot::Sender<Result<ChannelProxy>>,
    ) {
        let transport = match &self.transport {
            Some(transport) if StateValidator::is_usable(self.state) => Arc::clone(transport),
            _ => {
                let _ = response_tx.send(Err(Error::transport("no usable transport")));
                return;
            }
        };
        let generation = self.generation;
        let internal_tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = ChannelProxy::acquire(transport, request).await;
            if let Err(error) = &result {
                let _ = internal_tx.send(Internal::ChannelFailed {
                    generation,
                    error: error.clone(),
                });
            }
            // The caller stopped waiting; give the channel back.
            if let Err(Ok(proxy)) = response_tx.send(result) {
                let _ = proxy.release().await;
            }
        });
    }

    /// Starts the close sequence: drain queues if the link is live, then
    /// release the transport, then report back with `CloseComplete`.
    ///
    /// 开始关闭流程：如果链路存活则先排空队列，然后释放传输实例，最后通过 `CloseComplete` 回报。
    fn begin_close(&mut self, response_tx: oneshot::Sender<Result<()>>) {
        if self.state == ConnectionState::Closed {
            let _ = response_tx.send(Ok(()));
            return;
        }
        if let Some(waiting) = &mut self.closing {
            waiting.push(response_tx);
            return;
        }
        self.closing = Some(vec![response_tx]);
        self.fail_deadline = None;
        self.retry_deadline = None;

        for tx in self.pending_connects.drain(..) {
            let _ = tx.send(Err(Error::Closing));
        }
        for pending in self.pending_channels.drain(..) {
            let _ = pending.response_tx.send(Err(Error::Closing));
        }

        let queues = self.registry.begin_drain();
        let live = self.link_live;
        let lost = self.transport_lost;
        let transport = self.transport.take().filter(|_| !lost);

        info!(
            name = %self.config.name,
            state = %self.state,
            live,
            queues = queues.len(),
            "Closing connection"
        );
        if !live && !queues.is_empty() {
            debug!(name = %self.config.name, discarded = queues.len(), "Link not live, discarding queues without release");
        }

        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let drained = if live {
                registry::drain(queues).await.map(|_| ())
            } else {
                Ok(())
            };
            let released = match transport {
                Some(transport) => transport
                    .release()
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::TransportRelease {
                        message: e.to_string(),
                    }),
                None => Ok(()),
            };
            let _ = internal_tx.send(Internal::CloseComplete {
                result: drained.and(released),
            });
        });
    }

    fn finish_close(&mut self, result: Result<()>) {
        self.transport = None;
        self.link_live = false;
        self.registry.discard();
        self.enter(ConnectionState::Closed);
        self.waiters.abandon_all();

        match &result {
            Ok(()) => info!(name = %self.config.name, "Connection closed"),
            Err(error) => warn!(name = %self.config.name, %error, "Connection closed with errors"),
        }
        self.events.emit(ConnectionEvent::Closed);

        for tx in self.closing.take().unwrap_or_default() {
            let _ = tx.send(result.clone());
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Adds up to 10% random jitter so that many connections failing together do
/// not retry in lockstep.
///
/// 增加最多10%的随机抖动，避免大量同时失败的连接同步重试。
fn jittered(delay: Duration) -> Duration {
    let spread = delay.as_secs_f64() * 0.1;
    if spread <= 0.0 {
        return delay;
    }
    delay + Duration::from_secs_f64(rand::rng().random_range(0.0..spread))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let delay = jittered(base);
            assert!(delay >= base);
            assert!(delay < Duration::from_millis(1100));
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
