//! Background read loop and command submission.

use std::io;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use emu_types::{decode, Notification, TypeRegistry};
use emu_wire::consts::DEFAULT_LINE_TERMINATOR;
use emu_wire::{Command, Reassembler};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::callbacks::{CallbackRegistry, Target};
use crate::line::{LineReader, DEFAULT_MAX_LINE_LENGTH};
use crate::stats::SessionStats;
use crate::SessionError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Builder for [`Session`].
pub struct SessionBuilder<R, W> {
    reader: R,
    writer: W,
    terminator: Vec<u8>,
    max_line_length: usize,
    poll_interval: Duration,
    exit_on_eof: bool,
    registry: Option<Arc<TypeRegistry>>,
}

impl<S> SessionBuilder<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Builder over a single duplex stream such as an opened serial port.
    pub fn from_stream(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

impl<R, W> SessionBuilder<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            terminator: DEFAULT_LINE_TERMINATOR.to_vec(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            poll_interval: DEFAULT_POLL_INTERVAL,
            exit_on_eof: false,
            registry: None,
        }
    }

    /// Byte sequence ending each line of the inbound stream (default CRLF).
    pub fn line_terminator(mut self, terminator: impl Into<Vec<u8>>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Longest line kept before its bytes are discarded as malformed.
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Delay before reading again after the transport reports end of input.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// End the read loop at end of input instead of polling for more.
    pub fn exit_on_eof(mut self, exit: bool) -> Self {
        self.exit_on_eof = exit;
        self
    }

    /// Type table used for boundary detection and decoding.
    pub fn registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Session<R, W>, SessionError> {
        if self.terminator.is_empty() {
            return Err(SessionError::Config("line terminator must not be empty".into()));
        }
        if self.max_line_length == 0 {
            return Err(SessionError::Config("maximum line length must be positive".into()));
        }
        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(TypeRegistry::standard()?),
        };
        let (running, _) = watch::channel(false);
        Ok(Session {
            registry,
            callbacks: Arc::new(CallbackRegistry::new()),
            stats: Arc::new(SessionStats::new()),
            running: Arc::new(running),
            poll_interval: self.poll_interval,
            exit_on_eof: self.exit_on_eof,
            writer: Mutex::new(self.writer),
            slot: Mutex::new(Slot::Idle(
                LineReader::new(self.reader, self.terminator)
                    .with_max_line_length(self.max_line_length),
            )),
        })
    }
}

struct LoopExit<R> {
    reader: LineReader<R>,
    result: Result<(), SessionError>,
}

struct Worker<R> {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<LoopExit<R>>,
}

enum Slot<R> {
    Idle(LineReader<R>),
    Running(Worker<R>),
    /// The read loop panicked and took the transport with it.
    Closed,
}

/// Connection to one EMU-2 device.
///
/// A session is `Idle` until [`Session::start`] spawns the read loop, which
/// pulls lines from the transport, reassembles fragments, decodes them and
/// dispatches the results to the registered callbacks. [`Session::stop`]
/// cancels the loop at its next read and returns the session to `Idle`.
pub struct Session<R, W> {
    registry: Arc<TypeRegistry>,
    callbacks: Arc<CallbackRegistry>,
    stats: Arc<SessionStats>,
    running: Arc<watch::Sender<bool>>,
    poll_interval: Duration,
    exit_on_eof: bool,
    writer: Mutex<W>,
    slot: Mutex<Slot<R>>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    pub fn builder(reader: R, writer: W) -> SessionBuilder<R, W> {
        SessionBuilder::new(reader, writer)
    }

    /// Whether the read loop is active.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Spawn the read loop.
    ///
    /// Fails with [`SessionError::AlreadyRunning`] while a loop is active. A
    /// loop that already ended on its own is reaped first; its outcome is
    /// logged and discarded.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        let reader = match mem::replace(&mut *slot, Slot::Closed) {
            Slot::Idle(reader) => reader,
            Slot::Running(worker) if !worker.handle.is_finished() => {
                *slot = Slot::Running(worker);
                return Err(SessionError::AlreadyRunning);
            }
            Slot::Running(worker) => {
                let exit = worker
                    .handle
                    .await
                    .map_err(|err| SessionError::Join(err.to_string()))?;
                if let Err(err) = exit.result {
                    warn!(%err, "previous read loop ended with an error");
                }
                exit.reader
            }
            Slot::Closed => return Err(SessionError::Closed),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.running.send_replace(true);
        let context = LoopContext {
            registry: Arc::clone(&self.registry),
            callbacks: Arc::clone(&self.callbacks),
            stats: Arc::clone(&self.stats),
            running: Arc::clone(&self.running),
            poll_interval: self.poll_interval,
            exit_on_eof: self.exit_on_eof,
        };
        let handle = tokio::spawn(context.run(reader, shutdown_rx));
        *slot = Slot::Running(Worker { shutdown, handle });
        info!(roots = self.registry.len(), "session started");
        Ok(())
    }

    /// Cancel the read loop and wait for it to exit.
    ///
    /// Returns the loop's outcome, so a transport failure that ended the loop
    /// before `stop` was called surfaces here.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        let worker = match mem::replace(&mut *slot, Slot::Closed) {
            Slot::Running(worker) => worker,
            Slot::Idle(reader) => {
                *slot = Slot::Idle(reader);
                return Err(SessionError::NotRunning);
            }
            Slot::Closed => return Err(SessionError::Closed),
        };
        worker.shutdown.send_replace(true);
        let result = reap(&mut slot, worker.handle).await;
        info!("session stopped");
        result
    }

    /// Wait until the read loop ends on its own and return its outcome.
    ///
    /// Returns immediately when the session is idle.
    pub async fn wait(&self) -> Result<(), SessionError> {
        let mut running = self.running.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = running.wait_for(|running| !*running).await;
        let mut slot = self.slot.lock().await;
        match mem::replace(&mut *slot, Slot::Closed) {
            Slot::Running(worker) => reap(&mut slot, worker.handle).await,
            Slot::Idle(reader) => {
                *slot = Slot::Idle(reader);
                Ok(())
            }
            Slot::Closed => Err(SessionError::Closed),
        }
    }

    /// Encode `command` and write it to the transport.
    ///
    /// Only valid while the read loop is running, since replies arrive as
    /// notifications.
    pub async fn issue_command(&self, command: &Command) -> Result<(), SessionError> {
        match &*self.slot.lock().await {
            Slot::Running(worker) if !worker.handle.is_finished() && self.is_running() => {}
            Slot::Closed => return Err(SessionError::Closed),
            _ => return Err(SessionError::NotRunning),
        }
        let wire = command.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(&wire).await?;
        writer.flush().await?;
        self.stats.record_command();
        info!(command = command.name(), bytes = wire.len(), "command issued");
        Ok(())
    }

    /// Register `handler` for a notification kind, [`Target::Global`] or
    /// [`Target::Fallback`]. Replaces any previous registration.
    pub fn callback<F>(&self, target: impl Into<Target>, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.callbacks.callback(target, handler);
    }

    pub fn on_failure<F>(&self, handler: F)
    where
        F: Fn(&emu_types::DecodeFailure) + Send + Sync + 'static,
    {
        self.callbacks.on_failure(handler);
    }

    pub fn reset_callbacks(&self) {
        self.callbacks.reset_callbacks();
    }

    /// Shared handler table, usable from other tasks and threads.
    pub fn callbacks(&self) -> Arc<CallbackRegistry> {
        Arc::clone(&self.callbacks)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }
}

async fn reap<R>(
    slot: &mut Slot<R>,
    handle: JoinHandle<LoopExit<R>>,
) -> Result<(), SessionError> {
    match handle.await {
        Ok(exit) => {
            *slot = Slot::Idle(exit.reader);
            exit.result
        }
        Err(err) => {
            error!(%err, "read loop aborted");
            Err(SessionError::Join(err.to_string()))
        }
    }
}

/// Clears the shared running flag however the read loop exits, unwinding
/// out of a handler included.
struct RunningGuard(Arc<watch::Sender<bool>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

struct LoopContext {
    registry: Arc<TypeRegistry>,
    callbacks: Arc<CallbackRegistry>,
    stats: Arc<SessionStats>,
    running: Arc<watch::Sender<bool>>,
    poll_interval: Duration,
    exit_on_eof: bool,
}

impl LoopContext {
    async fn run<R>(self, mut reader: LineReader<R>, mut shutdown: watch::Receiver<bool>) -> LoopExit<R>
    where
        R: AsyncRead + Unpin,
    {
        let running = RunningGuard(Arc::clone(&self.running));
        let mut reassembler = self.registry.reassembler();
        let result = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break Ok(()),
                next = reader.next_line() => next,
            };
            match next {
                Ok(Some(line)) => self.process_line(&mut reassembler, &line),
                Ok(None) if self.exit_on_eof => {
                    debug!("end of input");
                    break Ok(());
                }
                Ok(None) => {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break Ok(()),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    self.stats.record_malformed();
                    warn!(%err, "discarding overlong line");
                }
                Err(err) => {
                    error!(%err, "transport read failed");
                    break Err(SessionError::Transport(err));
                }
            }
        };
        reassembler.reset();
        drop(running);
        debug!(ok = result.is_ok(), "read loop exited");
        LoopExit { reader, result }
    }

    fn process_line(&self, reassembler: &mut Reassembler, line: &[u8]) {
        self.stats.record_line();
        trace!(len = line.len(), "line read");
        let outcome = reassembler.feed_line(line);
        if let Some(err) = outcome.error {
            self.stats.record_malformed();
            warn!(%err, line = %String::from_utf8_lossy(line), "malformed line");
        }
        for fragment in outcome.fragments {
            self.stats.record_fragment();
            match decode(&self.registry, fragment) {
                Ok(notification) => {
                    self.callbacks.dispatch(&notification);
                    self.stats.record_dispatch();
                }
                Err(failure) => {
                    self.stats.record_failure();
                    warn!(%failure, "dropping fragment");
                    self.callbacks.report_failure(&failure);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use emu_types::{Body, NotificationKind};
    use tokio::io::{AsyncReadExt, DuplexStream, ReadBuf};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    type DuplexSession = Session<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn connected() -> (DuplexSession, DuplexStream) {
        let (client, device) = tokio::io::duplex(4096);
        let session = SessionBuilder::from_stream(client)
            .poll_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        (session, device)
    }

    fn collect_kinds<R, W>(
        session: &Session<R, W>,
        target: Target,
    ) -> mpsc::UnboundedReceiver<NotificationKind>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        session.callback(target, move |notification| {
            let _ = tx.send(notification.kind());
        });
        rx
    }

    const DEMAND: &[u8] = b"<InstantaneousDemand>\r\n\
        <DeviceMacId>0xd8d5b90000001234</DeviceMacId>\r\n\
        <TimeStamp>0x00000000</TimeStamp>\r\n\
        <Demand>0x00001000</Demand>\r\n\
        <Multiplier>0x00000001</Multiplier>\r\n\
        <Divisor>0x000003e8</Divisor>\r\n\
        </InstantaneousDemand>\r\n";

    #[tokio::test]
    async fn dispatches_decoded_notifications() {
        let (session, mut device) = connected();
        let (tx, mut demands) = mpsc::unbounded_channel();
        session.callback(NotificationKind::InstantaneousDemand, move |notification| {
            if let Body::InstantaneousDemand(demand) = &notification.body {
                let _ = tx.send((notification.timestamp, demand.demand));
            }
        });
        let mut global = collect_kinds(&session, Target::Global);
        let mut fallback = collect_kinds(&session, Target::Fallback);

        session.start().await.unwrap();
        assert!(session.is_running());
        device.write_all(DEMAND).await.unwrap();
        device
            .write_all(b"<TimeCluster>\r\n<UTCTime>0x1</UTCTime>\r\n</TimeCluster>\r\n")
            .await
            .unwrap();

        let (timestamp, demand) = timeout(WAIT, demands.recv()).await.unwrap().unwrap();
        assert_eq!(timestamp, Some(946_684_800));
        assert_eq!(demand, Some(4.096));
        assert_eq!(
            timeout(WAIT, global.recv()).await.unwrap(),
            Some(NotificationKind::InstantaneousDemand)
        );
        assert_eq!(
            timeout(WAIT, global.recv()).await.unwrap(),
            Some(NotificationKind::TimeCluster)
        );
        assert_eq!(
            timeout(WAIT, fallback.recv()).await.unwrap(),
            Some(NotificationKind::TimeCluster)
        );

        session.stop().await.unwrap();
        assert!(!session.is_running());
        let stats = session.stats().snapshot();
        assert_eq!(stats.fragments, 2);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn command_is_written_verbatim() {
        let (session, mut device) = connected();
        session.start().await.unwrap();
        let command = Command::set_schedule("demand", 60, true).unwrap();
        session.issue_command(&command).await.unwrap();

        let expected = command.encode();
        let mut buf = vec![0u8; expected.len()];
        timeout(WAIT, device.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(buf, &expected[..]);
        assert_eq!(session.stats().snapshot().commands, 1);
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn command_requires_running_session() {
        let (session, _device) = connected();
        let err = session.issue_command(&Command::get_time()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotRunning));
    }

    #[tokio::test]
    async fn start_and_stop_follow_state() {
        let (session, _device) = connected();
        assert!(matches!(session.stop().await, Err(SessionError::NotRunning)));
        session.start().await.unwrap();
        assert!(matches!(session.start().await, Err(SessionError::AlreadyRunning)));
        session.stop().await.unwrap();
        assert!(matches!(session.stop().await, Err(SessionError::NotRunning)));
    }

    #[tokio::test]
    async fn restart_keeps_reading_the_same_transport() {
        let (session, mut device) = connected();
        let mut global = collect_kinds(&session, Target::Global);
        session.start().await.unwrap();
        session.stop().await.unwrap();
        session.start().await.unwrap();
        device
            .write_all(b"<MeterList>\r\n<MeterMacId>0x1</MeterMacId>\r\n</MeterList>\r\n")
            .await
            .unwrap();
        assert_eq!(
            timeout(WAIT, global.recv()).await.unwrap(),
            Some(NotificationKind::MeterList)
        );
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn replay_survives_bad_input_and_ends_at_eof() {
        let stream: &'static [u8] = b"<Demand>0x1</Demand>\r\n\
            </InstantaneousDemand>\r\n\
            <Bogus>\r\n<X>1</X>\r\n</Bogus>\r\n\
            <TimeCluster>\r\n<TimeStamp>noon</TimeStamp>\r\n</TimeCluster>\r\n\
            <MeterList>\r\n<Oops>1</Oops><\r\n</MeterList>\r\n\
            <ScheduleInfo>\r\n<Mode>default</Mode>\r\n</ScheduleInfo>\r\n";
        let session = Session::builder(stream, tokio::io::sink())
            .exit_on_eof(true)
            .build()
            .unwrap();
        let mut global = collect_kinds(&session, Target::Global);
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        session.on_failure(move |failure| {
            assert_eq!(failure.fragment.tag, "TimeCluster");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        session.start().await.unwrap();
        timeout(WAIT, session.wait()).await.unwrap().unwrap();
        assert!(!session.is_running());

        let mut kinds = Vec::new();
        while let Ok(kind) = global.try_recv() {
            kinds.push(kind);
        }
        assert_eq!(kinds, vec![NotificationKind::MeterList, NotificationKind::ScheduleInfo]);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let stats = session.stats().snapshot();
        assert_eq!(stats.lines, 14);
        assert_eq!(stats.fragments, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.malformed_lines, 1);
    }

    #[tokio::test]
    async fn panicking_handler_closes_the_session() {
        let (session, mut device) = connected();
        session.callback(NotificationKind::MeterList, |_| panic!("handler bug"));
        session.start().await.unwrap();
        device
            .write_all(b"<MeterList>\r\n<MeterMacId>0x1</MeterMacId>\r\n</MeterList>\r\n")
            .await
            .unwrap();

        let err = timeout(WAIT, session.wait()).await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Join(_)));
        assert!(!session.is_running());
        assert!(matches!(
            session.issue_command(&Command::get_time()).await,
            Err(SessionError::Closed)
        ));
        assert!(matches!(session.stop().await, Err(SessionError::Closed)));
        assert!(matches!(session.start().await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn stop_after_handler_panic_reports_join_error() {
        let (session, mut device) = connected();
        session.callback(Target::Global, |_| panic!("handler bug"));
        session.start().await.unwrap();
        device
            .write_all(b"<MeterList>\r\n</MeterList>\r\n")
            .await
            .unwrap();
        let mut flag = session.running.subscribe();
        timeout(WAIT, flag.wait_for(|running| !*running))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(session.stop().await, Err(SessionError::Join(_))));
        assert!(!session.is_running());
        assert!(matches!(
            session.issue_command(&Command::get_time()).await,
            Err(SessionError::Closed)
        ));
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")))
        }
    }

    #[tokio::test]
    async fn transport_failure_ends_the_loop() {
        let session = Session::builder(FailingReader, tokio::io::sink())
            .build()
            .unwrap();
        session.start().await.unwrap();
        let err = timeout(WAIT, session.wait()).await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Transport(ref inner) if inner.kind() == io::ErrorKind::BrokenPipe));
        assert!(!session.is_running());
        assert!(matches!(
            session.issue_command(&Command::restart()).await,
            Err(SessionError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn wrong_terminator_counts_overlong_lines() {
        let stream = b"<MeterList>\n<MeterMacId>0x1</MeterMacId>\n</MeterList>\n".repeat(20);
        let session = Session::builder(io::Cursor::new(stream), tokio::io::sink())
            .max_line_length(128)
            .exit_on_eof(true)
            .build()
            .unwrap();
        let mut global = collect_kinds(&session, Target::Global);
        session.start().await.unwrap();
        timeout(WAIT, session.wait()).await.unwrap().unwrap();

        let stats = session.stats().snapshot();
        assert!(stats.malformed_lines > 0);
        assert_eq!(stats.lines, 0);
        assert!(global.try_recv().is_err());
    }

    #[test]
    fn empty_terminator_is_a_config_error() {
        let stream: &'static [u8] = b"";
        let err = Session::builder(stream, tokio::io::sink())
            .line_terminator(Vec::new())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test]
    async fn custom_terminator_and_registry() {
        let stream: &'static [u8] =
            b"<TimeCluster>\n<UTCTime>0x1</UTCTime>\n</TimeCluster>\n<MeterList>\n</MeterList>\n";
        let registry = TypeRegistry::from_kinds(&[NotificationKind::MeterList]).unwrap();
        let session = Session::builder(stream, tokio::io::sink())
            .line_terminator(b"\n".to_vec())
            .registry(Arc::new(registry))
            .exit_on_eof(true)
            .build()
            .unwrap();
        let mut global = collect_kinds(&session, Target::Global);
        session.start().await.unwrap();
        session.wait().await.unwrap();
        assert_eq!(global.try_recv().ok(), Some(NotificationKind::MeterList));
        assert!(global.try_recv().is_err());
        assert_eq!(session.stats().snapshot().failures, 0);
    }
}
