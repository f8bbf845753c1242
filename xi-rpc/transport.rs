use std::{
  ffi::OsString,
  io::{
    self,
    BufRead,
    BufReader,
    BufWriter,
    Read,
    Write,
  },
  path::PathBuf,
  process::{
    Child,
    ChildStdin,
    Command,
    Stdio,
  },
  sync::{
    Arc,
    atomic::{
      AtomicBool,
      Ordering,
    },
    mpsc::{
      Receiver,
      RecvTimeoutError,
      Sender,
      TryRecvError,
      channel,
    },
  },
  thread::{
    self,
    JoinHandle,
  },
  time::{
    Duration,
    Instant,
  },
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{
  debug,
  warn,
};

use crate::jsonrpc::{
  FrameError,
  Message,
};

/// How to launch the engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
  pub program:     PathBuf,
  pub args:        Vec<OsString>,
  pub env:         Vec<(OsString, OsString)>,
  pub working_dir: Option<PathBuf>,
}

impl EngineCommand {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program:     program.into(),
      args:        Vec::new(),
      env:         Vec::new(),
      working_dir: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
    self.env.push((key.into(), value.into()));
    self
  }

  pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  fn to_command(&self) -> Command {
    let mut command = Command::new(&self.program);
    command
      .args(&self.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    for (key, value) in &self.env {
      command.env(key, value);
    }
    if let Some(dir) = &self.working_dir {
      command.current_dir(dir);
    }
    command
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
  Line(String),
  Stderr(String),
  ReadError(String),
  Closed,
}

/// Where outbound messages go.
pub trait MessageSink {
  fn send_message(&self, message: &Message) -> Result<(), TransportError>;
}

/// Newline-framed writer shared between callers. Each message is written and
/// flushed under the lock so concurrent senders never interleave mid-line.
pub struct LineWriter<W: Write> {
  inner: Mutex<Option<BufWriter<W>>>,
}

impl<W: Write> LineWriter<W> {
  pub fn new(writer: W) -> Self {
    Self {
      inner: Mutex::new(Some(BufWriter::new(writer))),
    }
  }

  pub fn write_line(&self, line: &str) -> Result<(), TransportError> {
    let mut guard = self.inner.lock();
    let writer = guard.as_mut().ok_or(TransportError::Closed)?;
    writer
      .write_all(line.as_bytes())
      .map_err(TransportError::Write)?;
    writer.flush().map_err(TransportError::Flush)
  }

  /// Drops the underlying writer. Returns `false` if it was already closed.
  pub fn close(&self) -> bool {
    let Some(mut writer) = self.inner.lock().take() else {
      return false;
    };
    if let Err(err) = writer.flush() {
      debug!(error = %err, "flush on close failed");
    }
    true
  }

  pub fn is_closed(&self) -> bool {
    self.inner.lock().is_none()
  }
}

impl<W: Write> MessageSink for LineWriter<W> {
  fn send_message(&self, message: &Message) -> Result<(), TransportError> {
    let line = message.to_line()?;
    self.write_line(&line)
  }
}

/// Sink that keeps messages in memory instead of writing them anywhere.
/// Used to drive a `Bridge` without an engine process.
#[derive(Debug, Default)]
pub struct MemorySink {
  messages: Mutex<Vec<Message>>,
  closed:   AtomicBool,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Removes and returns everything sent so far.
  pub fn take(&self) -> Vec<Message> {
    std::mem::take(&mut *self.messages.lock())
  }

  pub fn len(&self) -> usize {
    self.messages.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
  }
}

impl MessageSink for MemorySink {
  fn send_message(&self, message: &Message) -> Result<(), TransportError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(TransportError::Closed);
    }
    self.messages.lock().push(message.clone());
    Ok(())
  }
}

pub struct Transport {
  child:         Child,
  writer:        Arc<LineWriter<ChildStdin>>,
  event_rx:      Receiver<TransportEvent>,
  stop:          Arc<AtomicBool>,
  reader_thread: Option<JoinHandle<()>>,
  stderr_thread: Option<JoinHandle<()>>,
}

impl Transport {
  pub fn spawn(command: &EngineCommand) -> Result<Self, LaunchError> {
    let mut child = command.to_command().spawn().map_err(|source| {
      LaunchError::Spawn {
        program: command.program.clone(),
        source,
      }
    })?;
    let stdin = child.stdin.take().ok_or(LaunchError::MissingPipe("stdin"))?;
    let stdout = child
      .stdout
      .take()
      .ok_or(LaunchError::MissingPipe("stdout"))?;
    let stderr = child
      .stderr
      .take()
      .ok_or(LaunchError::MissingPipe("stderr"))?;

    let (event_tx, event_rx) = channel();
    let stop = Arc::new(AtomicBool::new(false));

    let reader_thread = spawn_reader_thread(stdout, event_tx.clone(), stop.clone())
      .map_err(LaunchError::Thread)?;
    let stderr_thread = spawn_stderr_thread(stderr, event_tx).map_err(LaunchError::Thread)?;

    debug!(program = %command.program.display(), pid = child.id(), "engine started");

    Ok(Self {
      child,
      writer: Arc::new(LineWriter::new(stdin)),
      event_rx,
      stop,
      reader_thread: Some(reader_thread),
      stderr_thread: Some(stderr_thread),
    })
  }

  /// Shared handle to the write side, usable from any thread.
  pub fn writer(&self) -> Arc<LineWriter<ChildStdin>> {
    self.writer.clone()
  }

  pub fn send(&self, message: &Message) -> Result<(), TransportError> {
    self.writer.send_message(message)
  }

  pub fn try_recv_event(&self) -> Option<TransportEvent> {
    match self.event_rx.try_recv() {
      Ok(event) => Some(event),
      Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
  }

  pub fn recv_event_timeout(&self, timeout: Duration) -> Option<TransportEvent> {
    match self.event_rx.recv_timeout(timeout) {
      Ok(event) => Some(event),
      Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
    }
  }

  pub fn is_closed(&self) -> bool {
    self.writer.is_closed()
  }

  /// Closes the engine's input, which is its signal to exit, and asks the
  /// reader to stop. A read already blocked in the kernel finishes first.
  pub fn close(&self) {
    self.stop.store(true, Ordering::Release);
    if self.writer.close() {
      debug!(pid = self.child.id(), "engine input closed");
    }
  }

  pub fn try_exit_code(&mut self) -> Result<Option<i32>, TransportError> {
    let status = self.child.try_wait().map_err(TransportError::Wait)?;
    Ok(status.and_then(|status| status.code()))
  }

  pub fn kill(&mut self) -> Result<(), TransportError> {
    match self.child.kill() {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
      Err(err) => Err(TransportError::Kill(err)),
    }
  }

  /// Closes, waits up to `grace` for the engine to exit on its own, then
  /// kills it. Joins the reader threads afterwards.
  pub fn shutdown(&mut self, grace: Duration) -> Result<Option<i32>, TransportError> {
    self.close();

    let deadline = Instant::now() + grace;
    let exit_code = loop {
      if let Some(status) = self.child.try_wait().map_err(TransportError::Wait)? {
        break status.code();
      }
      if Instant::now() >= deadline {
        warn!(pid = self.child.id(), "engine did not exit in time, killing");
        self.kill()?;
        break self.child.wait().map_err(TransportError::Wait)?.code();
      }
      thread::sleep(Duration::from_millis(10));
    };

    join_thread(&mut self.reader_thread)?;
    join_thread(&mut self.stderr_thread)?;

    Ok(exit_code)
  }
}

impl MessageSink for Transport {
  fn send_message(&self, message: &Message) -> Result<(), TransportError> {
    self.send(message)
  }
}

impl Drop for Transport {
  fn drop(&mut self) {
    self.close();
  }
}

/// Blocking line reader. Stops on end of stream, on a read error, when the
/// stop flag is raised, or when the consumer side of the channel is gone.
/// A line that is not UTF-8 is dropped on its own.
pub fn read_lines<R: Read>(reader: R, event_tx: &Sender<TransportEvent>, stop: &AtomicBool) {
  let mut reader = BufReader::new(reader);
  let mut buf = Vec::new();
  while !stop.load(Ordering::Acquire) {
    buf.clear();
    let event = match reader.read_until(b'\n', &mut buf) {
      Ok(0) => {
        let _ = event_tx.send(TransportEvent::Closed);
        break;
      },
      Ok(len) => {
        let line = match std::str::from_utf8(&buf) {
          Ok(line) => line,
          Err(err) => {
            warn!(error = %err, len, "dropping engine line that is not UTF-8");
            continue;
          },
        };
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
          continue;
        }
        TransportEvent::Line(trimmed.to_string())
      },
      Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
      Err(err) => {
        let _ = event_tx.send(TransportEvent::ReadError(err.to_string()));
        break;
      },
    };
    if event_tx.send(event).is_err() {
      break;
    }
  }
  debug!("engine reader stopped");
}

fn spawn_reader_thread<R: Read + Send + 'static>(
  stdout: R,
  event_tx: Sender<TransportEvent>,
  stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
  thread::Builder::new()
    .name("xi-rpc-stdout".into())
    .spawn(move || read_lines(stdout, &event_tx, &stop))
}

fn spawn_stderr_thread<R: Read + Send + 'static>(
  stderr: R,
  event_tx: Sender<TransportEvent>,
) -> io::Result<JoinHandle<()>> {
  thread::Builder::new()
    .name("xi-rpc-stderr".into())
    .spawn(move || {
      let mut reader = BufReader::new(stderr);
      let mut buf = Vec::new();
      loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
          Ok(0) => break,
          Ok(_) => {
            let line = String::from_utf8_lossy(&buf)
              .trim_end_matches(['\r', '\n'])
              .to_string();
            if !line.is_empty() && event_tx.send(TransportEvent::Stderr(line)).is_err() {
              break;
            }
          },
          Err(err) => {
            debug!(error = %err, "engine stderr stream closed with error");
            break;
          },
        }
      }
    })
}

fn join_thread(handle: &mut Option<JoinHandle<()>>) -> Result<(), TransportError> {
  if let Some(handle) = handle.take() {
    handle.join().map_err(|_| TransportError::ThreadPanicked)?;
  }
  Ok(())
}

#[derive(Debug, Error)]
pub enum LaunchError {
  #[error("failed to spawn engine `{}`: {source}", program.display())]
  Spawn {
    program: PathBuf,
    source:  io::Error,
  },
  #[error("missing child {0} pipe")]
  MissingPipe(&'static str),
  #[error("failed to spawn transport thread: {0}")]
  Thread(io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("engine input is closed")]
  Closed,
  #[error(transparent)]
  Frame(#[from] FrameError),
  #[error("failed to write message: {0}")]
  Write(io::Error),
  #[error("failed to flush message: {0}")]
  Flush(io::Error),
  #[error("failed to kill engine process: {0}")]
  Kill(io::Error),
  #[error("failed to wait for engine process: {0}")]
  Wait(io::Error),
  #[error("transport thread panicked")]
  ThreadPanicked,
}

#[cfg(test)]
mod tests {
  use std::{
    io::Cursor,
    sync::mpsc::channel,
  };

  use serde_json::json;

  use super::*;

  #[test]
  fn reader_forwards_lines_and_reports_close() {
    let input = Cursor::new("{\"id\":0,\"result\":\"1\"}\n\n{\"method\":\"x\"}\r\n");
    let (tx, rx) = channel();
    let stop = AtomicBool::new(false);
    read_lines(input, &tx, &stop);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events, vec![
      TransportEvent::Line("{\"id\":0,\"result\":\"1\"}".into()),
      TransportEvent::Line("{\"method\":\"x\"}".into()),
      TransportEvent::Closed,
    ]);
  }

  #[test]
  fn reader_skips_lines_that_are_not_utf8() {
    let input = Cursor::new(b"\xff\xfe\n{\"id\":0,\"result\":\"1\"}\n".to_vec());
    let (tx, rx) = channel();
    let stop = AtomicBool::new(false);
    read_lines(input, &tx, &stop);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events, vec![
      TransportEvent::Line("{\"id\":0,\"result\":\"1\"}".into()),
      TransportEvent::Closed,
    ]);
  }

  #[test]
  fn reader_honors_stop_flag() {
    let input = Cursor::new("a\nb\n");
    let (tx, rx) = channel();
    let stop = AtomicBool::new(true);
    read_lines(input, &tx, &stop);
    assert_eq!(rx.try_iter().count(), 0);
  }

  #[test]
  fn line_writer_frames_messages() {
    let writer = LineWriter::new(Vec::new());
    writer
      .send_message(&Message::notification("edit", json!({ "method": "undo" })))
      .unwrap();
    writer
      .send_message(&Message::request(1, "new_tab", json!({})))
      .unwrap();

    let buffer = writer.inner.lock().take().unwrap().into_inner().unwrap();
    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines, vec![
      r#"{"method":"edit","params":{"method":"undo"}}"#,
      r#"{"id":1,"method":"new_tab","params":{}}"#,
    ]);
    assert!(text.ends_with('\n'));
  }

  #[test]
  fn closed_writer_rejects_sends() {
    let writer = LineWriter::new(Vec::new());
    assert!(writer.close());
    assert!(!writer.close());
    assert!(matches!(
      writer.write_line("x\n"),
      Err(TransportError::Closed)
    ));
  }

  #[test]
  fn concurrent_senders_do_not_interleave() {
    let writer = Arc::new(LineWriter::new(Vec::new()));
    let handles: Vec<_> = (0..4)
      .map(|worker| {
        let writer = writer.clone();
        thread::spawn(move || {
          for n in 0..50 {
            writer
              .send_message(&Message::notification(
                "edit",
                json!({ "worker": worker, "n": n, "pad": "x".repeat(512) }),
              ))
              .unwrap();
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let buffer = writer.inner.lock().take().unwrap().into_inner().unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert_eq!(text.lines().count(), 200);
    for line in text.lines() {
      assert!(Message::from_line(line).is_ok(), "torn line: {line}");
    }
  }

  #[test]
  fn spawn_failure_is_a_launch_error() {
    let command = EngineCommand::new("/nonexistent/xi-core-binary");
    assert!(matches!(
      Transport::spawn(&command),
      Err(LaunchError::Spawn { .. })
    ));
  }
}
