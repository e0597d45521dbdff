//! Session multiplexer.
//!
//! The single consumer of a wrapped session. It merges operator keystrokes,
//! pty output and input injected by the console, and is the only writer of
//! the pty input and of the outbound link.
//!
//! Relayed output is handed to a separate writer task through a bounded
//! queue, so a console that stops reading can never stall the local session.

use crate::chunk::{CHANNEL_CAPACITY, Chunk};
use crate::ipc::{IpcError, LinkSender};
use crate::sanitize::sanitize;
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How long draining waits for queued output to reach the console.
pub const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where sanitized pty output is sent.
#[async_trait]
pub trait OutputRelay: Send {
    async fn relay(&mut self, data: &[u8]) -> Result<(), IpcError>;
}

#[async_trait]
impl OutputRelay for LinkSender {
    async fn relay(&mut self, data: &[u8]) -> Result<(), IpcError> {
        self.relay_output(data).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Running,
    Draining,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxExit {
    /// The pty output closed and everything was flushed.
    Completed,
    /// Cancellation fired while the session was running.
    Cancelled,
}

/// Queue in front of the task that owns the [`OutputRelay`].
struct RelayQueue {
    queue: mpsc::Sender<Vec<u8>>,
    writer: JoinHandle<()>,
}

impl RelayQueue {
    fn spawn<R: OutputRelay + 'static>(relay: R, capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(capacity);
        let writer = tokio::spawn(write_relayed(relay, rx));
        Self { queue, writer }
    }
}

async fn write_relayed<R: OutputRelay>(mut relay: R, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        let result = relay.relay(&data).await;
        if let Err(e) = result {
            warn!("failed to relay output, no longer relaying: {}", e);
            return;
        }
    }
    trace!("relay queue closed");
}

pub struct Multiplexer<P, T> {
    pty_output: Option<mpsc::Receiver<Chunk>>,
    operator: Option<mpsc::Receiver<Chunk>>,
    peer: Option<mpsc::Receiver<Chunk>>,
    pty_input: Option<P>,
    terminal: T,
    relay: Option<RelayQueue>,
    token: CancellationToken,
    state: MuxState,
}

impl<P, T> Multiplexer<P, T>
where
    P: Write + Send,
    T: Write + Send,
{
    pub fn new(
        pty_output: mpsc::Receiver<Chunk>,
        pty_input: P,
        terminal: T,
        token: CancellationToken,
    ) -> Self {
        Self {
            pty_output: Some(pty_output),
            operator: None,
            peer: None,
            pty_input: Some(pty_input),
            terminal,
            relay: None,
            token,
            state: MuxState::Running,
        }
    }

    /// Keystrokes from the operator's terminal.
    pub fn with_operator(mut self, operator: mpsc::Receiver<Chunk>) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Input injected by the console.
    pub fn with_peer(mut self, peer: mpsc::Receiver<Chunk>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Relay sanitized output through `relay`, from a writer task of its own.
    /// Must be called within a tokio runtime.
    pub fn with_relay<R: OutputRelay + 'static>(self, relay: R) -> Self {
        self.with_relay_capacity(relay, CHANNEL_CAPACITY)
    }

    /// Like [`with_relay`](Self::with_relay) with a custom queue length.
    /// When the queue is full the relay is retired.
    pub fn with_relay_capacity<R: OutputRelay + 'static>(
        mut self,
        relay: R,
        capacity: usize,
    ) -> Self {
        if let Some(old) = self.relay.take() {
            old.writer.abort();
        }
        self.relay = Some(RelayQueue::spawn(relay, capacity.max(1)));
        self
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    /// Whether sanitized output is still being relayed.
    pub fn is_relaying(&self) -> bool {
        self.relay.is_some()
    }

    pub async fn run(&mut self) -> MuxExit {
        while self.state == MuxState::Running {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => {
                    debug!("multiplexer cancelled");
                    self.retire_relay();
                    self.state = MuxState::Terminated;
                    return MuxExit::Cancelled;
                }
                chunk = recv(&mut self.operator), if self.operator.is_some() => match chunk {
                    Some(chunk) => self.write_pty_input(chunk, "operator"),
                    None => {
                        debug!("operator input closed");
                        self.operator = None;
                    }
                },
                chunk = recv(&mut self.peer), if self.peer.is_some() => match chunk {
                    Some(chunk) => self.write_pty_input(chunk, "peer"),
                    None => {
                        debug!("peer input closed");
                        self.peer = None;
                    }
                },
                chunk = recv(&mut self.pty_output) => match chunk {
                    Some(chunk) => self.on_pty_output(chunk),
                    None => {
                        self.pty_output = None;
                        self.set_state(MuxState::Draining);
                    }
                },
            }
        }

        if let Err(e) = self.terminal.flush() {
            debug!("failed to flush terminal: {}", e);
        }
        self.drain_relay().await;
        self.set_state(MuxState::Terminated);
        self.token.cancel();
        MuxExit::Completed
    }

    fn set_state(&mut self, state: MuxState) {
        trace!("multiplexer {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn on_pty_output(&mut self, chunk: Chunk) {
        let data = chunk.as_bytes();
        if let Err(e) = self
            .terminal
            .write_all(data)
            .and_then(|()| self.terminal.flush())
        {
            debug!("failed to write to terminal: {}", e);
        }

        let Some(relay) = self.relay.as_ref() else {
            return;
        };
        // Every chunk is relayed, even when nothing printable is left.
        match relay.queue.try_send(sanitize(data)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("console is not keeping up, no longer relaying output");
                self.retire_relay();
            }
            Err(TrySendError::Closed(_)) => {
                debug!("relay writer stopped");
                self.retire_relay();
            }
        }
    }

    fn retire_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.writer.abort();
        }
    }

    /// Close the queue and wait until everything queued has been relayed.
    async fn drain_relay(&mut self) {
        let Some(RelayQueue { queue, mut writer }) = self.relay.take() else {
            return;
        };
        drop(queue);
        tokio::select! {
            _ = &mut writer => trace!("relay drained"),
            _ = self.token.cancelled() => writer.abort(),
            _ = tokio::time::sleep(RELAY_DRAIN_TIMEOUT) => {
                warn!("console did not accept remaining output, giving up");
                writer.abort();
            }
        }
    }

    fn write_pty_input(&mut self, chunk: Chunk, source: &str) {
        let Some(input) = self.pty_input.as_mut() else {
            trace!("dropping {} bytes of {} input, pty input closed", chunk.len(), source);
            return;
        };
        let result = input
            .write_all(chunk.as_bytes())
            .and_then(|()| input.flush());
        if let Err(e) = result {
            warn!("failed to write {} input to pty: {}", source, e);
            self.pty_input = None;
        }
    }
}

impl<P, T> Drop for Multiplexer<P, T> {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.writer.abort();
        }
    }
}

async fn recv(slot: &mut Option<mpsc::Receiver<Chunk>>) -> Option<Chunk> {
    match slot {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Writer that forwards every write to a channel.
    struct ChannelWriter(mpsc::UnboundedSender<Vec<u8>>);

    impl Write for ChannelWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .send(buf.to_vec())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingRelay {
        relayed: Arc<Mutex<Vec<Vec<u8>>>>,
        fail: bool,
    }

    #[async_trait]
    impl OutputRelay for RecordingRelay {
        async fn relay(&mut self, data: &[u8]) -> Result<(), IpcError> {
            if self.fail {
                return Err(IpcError::Io(io::ErrorKind::BrokenPipe.into()));
            }
            self.relayed.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    struct Harness {
        pty_output: mpsc::Sender<Chunk>,
        operator: mpsc::Sender<Chunk>,
        peer: mpsc::Sender<Chunk>,
        pty_input: mpsc::UnboundedReceiver<Vec<u8>>,
        terminal: SharedBuffer,
        relay: RecordingRelay,
        token: CancellationToken,
        mux: Multiplexer<ChannelWriter, SharedBuffer>,
    }

    fn harness(relay: RecordingRelay) -> Harness {
        let (pty_output, pty_output_rx) = mpsc::channel(8);
        let (operator, operator_rx) = mpsc::channel(8);
        let (peer, peer_rx) = mpsc::channel(8);
        let (input_tx, pty_input) = mpsc::unbounded_channel();
        let terminal = SharedBuffer::default();
        let token = CancellationToken::new();
        let mux = Multiplexer::new(
            pty_output_rx,
            ChannelWriter(input_tx),
            terminal.clone(),
            token.clone(),
        )
        .with_operator(operator_rx)
        .with_peer(peer_rx)
        .with_relay(relay.clone());
        Harness {
            pty_output,
            operator,
            peer,
            pty_input,
            terminal,
            relay,
            token,
            mux,
        }
    }

    async fn written(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for pty input")
            .expect("pty input closed")
    }

    #[tokio::test]
    async fn test_input_written_in_arrival_order() {
        let mut h = harness(RecordingRelay::default());
        let mut mux = h.mux;
        let task = tokio::spawn(async move { (mux.run().await, mux) });

        h.operator.send(Chunk::new(b"O1")).await.unwrap();
        assert_eq!(written(&mut h.pty_input).await, b"O1");
        h.peer.send(Chunk::new(b"P1")).await.unwrap();
        assert_eq!(written(&mut h.pty_input).await, b"P1");
        h.operator.send(Chunk::new(b"O2")).await.unwrap();
        assert_eq!(written(&mut h.pty_input).await, b"O2");

        drop(h.pty_output);
        let (exit, mux) = task.await.unwrap();
        assert_eq!(exit, MuxExit::Completed);
        assert_eq!(mux.state(), MuxState::Terminated);
        assert!(h.token.is_cancelled());
    }

    #[tokio::test]
    async fn test_output_goes_verbatim_to_terminal_and_sanitized_to_relay() {
        let h = harness(RecordingRelay::default());
        let mut mux = h.mux;
        h.pty_output
            .send(Chunk::new(b"\x1b[32mok\x1b[0m\r\n"))
            .await
            .unwrap();
        h.pty_output.send(Chunk::new(b"\x1b[H")).await.unwrap();
        drop(h.pty_output);

        assert_eq!(mux.run().await, MuxExit::Completed);
        assert_eq!(h.terminal.contents(), b"\x1b[32mok\x1b[0m\r\n\x1b[H");
        // The second chunk sanitizes to nothing but is still relayed.
        assert_eq!(
            *h.relay.relayed.lock().unwrap(),
            vec![b"ok\n".to_vec(), Vec::new()]
        );
    }

    #[tokio::test]
    async fn test_relay_completes_before_exit() {
        let h = harness(RecordingRelay::default());
        let mut mux = h.mux;
        for i in 0..5 {
            h.pty_output
                .send(Chunk::new(format!("line {i}\n").as_bytes()))
                .await
                .unwrap();
        }
        drop(h.pty_output);

        assert_eq!(mux.run().await, MuxExit::Completed);
        let relayed = h.relay.relayed.lock().unwrap().concat();
        assert_eq!(relayed, b"line 0\nline 1\nline 2\nline 3\nline 4\n");
    }

    #[tokio::test]
    async fn test_closed_inputs_do_not_terminate() {
        let mut h = harness(RecordingRelay::default());
        let mut mux = h.mux;
        drop(h.operator);
        drop(h.peer);
        let task = tokio::spawn(async move { mux.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        h.pty_output.send(Chunk::new(b"still here")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        drop(h.pty_output);
        assert_eq!(task.await.unwrap(), MuxExit::Completed);
        assert_eq!(h.terminal.contents(), b"still here");
        assert!(h.pty_input.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancellation_exits_promptly() {
        let h = harness(RecordingRelay::default());
        let mut mux = h.mux;
        h.token.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(5), mux.run())
            .await
            .unwrap();
        assert_eq!(exit, MuxExit::Cancelled);
        assert_eq!(mux.state(), MuxState::Terminated);
    }

    #[tokio::test]
    async fn test_failed_relay_is_retired() {
        let relay = RecordingRelay {
            fail: true,
            ..Default::default()
        };
        let h = harness(relay);
        let mut mux = h.mux;
        h.pty_output.send(Chunk::new(b"one\n")).await.unwrap();
        h.pty_output.send(Chunk::new(b"two\n")).await.unwrap();
        drop(h.pty_output);

        assert_eq!(mux.run().await, MuxExit::Completed);
        assert!(!mux.is_relaying());
        assert_eq!(h.terminal.contents(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_writer_failure_retires_relay_while_running() {
        let relay = RecordingRelay {
            fail: true,
            ..Default::default()
        };
        let mut h = harness(relay);
        let mut mux = h.mux;
        let task = tokio::spawn(async move { (mux.run().await, mux) });

        h.pty_output.send(Chunk::new(b"one\n")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.pty_output.send(Chunk::new(b"two\n")).await.unwrap();
        h.operator.send(Chunk::new(b"ls\r")).await.unwrap();
        assert_eq!(written(&mut h.pty_input).await, b"ls\r");

        drop(h.pty_output);
        let (exit, mux) = task.await.unwrap();
        assert_eq!(exit, MuxExit::Completed);
        assert!(!mux.is_relaying());
        assert_eq!(h.terminal.contents(), b"one\ntwo\n");
    }

    /// Relay whose sends never complete.
    struct StalledRelay;

    #[async_trait]
    impl OutputRelay for StalledRelay {
        async fn relay(&mut self, _data: &[u8]) -> Result<(), IpcError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_relay_does_not_block_input() {
        let (pty_output, pty_output_rx) = mpsc::channel(8);
        let (operator, operator_rx) = mpsc::channel(8);
        let (input_tx, mut pty_input) = mpsc::unbounded_channel();
        let terminal = SharedBuffer::default();
        let mut mux = Multiplexer::new(
            pty_output_rx,
            ChannelWriter(input_tx),
            terminal.clone(),
            CancellationToken::new(),
        )
        .with_operator(operator_rx)
        .with_relay_capacity(StalledRelay, 2);
        let task = tokio::spawn(async move { (mux.run().await, mux) });

        for i in 0..8 {
            pty_output
                .send(Chunk::new(format!("{i}\n").as_bytes()))
                .await
                .unwrap();
        }
        operator.send(Chunk::new(b"\x03")).await.unwrap();
        assert_eq!(written(&mut pty_input).await, b"\x03");

        drop(pty_output);
        let (exit, mux) = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("multiplexer blocked on a stalled relay")
            .unwrap();
        assert_eq!(exit, MuxExit::Completed);
        assert!(!mux.is_relaying());
        assert_eq!(terminal.contents(), b"0\n1\n2\n3\n4\n5\n6\n7\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_console_that_stops_reading_does_not_freeze_session() {
        use crate::ipc::Link;
        use tokio::net::UnixStream;

        // The console end is kept open but never read.
        let (ours, _console) = UnixStream::pair().unwrap();
        let (sender, _receiver) = Link::from_stream(ours).announce("sh").await.unwrap();

        let (pty_output, pty_output_rx) = mpsc::channel(8);
        let (operator, operator_rx) = mpsc::channel(8);
        let (input_tx, mut pty_input) = mpsc::unbounded_channel();
        let mut mux = Multiplexer::new(
            pty_output_rx,
            ChannelWriter(input_tx),
            io::sink(),
            CancellationToken::new(),
        )
        .with_operator(operator_rx)
        .with_relay(sender);
        let task = tokio::spawn(async move { (mux.run().await, mux) });

        let feeder = tokio::spawn(async move {
            let block = vec![b'x'; 16 * 1024];
            for _ in 0..256 {
                if pty_output.send(Chunk::new(&block)).await.is_err() {
                    break;
                }
            }
            pty_output
        });

        operator.send(Chunk::new(b"\x03")).await.unwrap();
        let ctrl_c = tokio::time::timeout(Duration::from_secs(3), pty_input.recv())
            .await
            .expect("operator input blocked behind the console");
        assert_eq!(ctrl_c, Some(b"\x03".to_vec()));

        let pty_output = tokio::time::timeout(Duration::from_secs(5), feeder)
            .await
            .expect("pty output backed up behind the console")
            .unwrap();
        drop(pty_output);

        let (exit, mux) = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("multiplexer did not finish")
            .unwrap();
        assert_eq!(exit, MuxExit::Completed);
        assert!(!mux.is_relaying());
    }

    #[tokio::test]
    async fn test_failed_pty_input_is_retired() {
        let mut h = harness(RecordingRelay::default());
        h.pty_input.close();
        let mut mux = h.mux;
        let task = tokio::spawn(async move { (mux.run().await, mux) });

        h.operator.send(Chunk::new(b"lost")).await.unwrap();
        h.pty_output.send(Chunk::new(b"prompt$ ")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        drop(h.pty_output);

        let (exit, mux) = task.await.unwrap();
        assert_eq!(exit, MuxExit::Completed);
        assert!(mux.pty_input.is_none());
        assert_eq!(h.terminal.contents(), b"prompt$ ");
    }
}
