// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! An asynchronous, non-blocking append stream for access and error logs.
//!
//! [`LogStream::write_line`] enqueues and returns immediately; a dedicated
//! drainer task moves lines to the configured sinks (a file, generic
//! writers, or both, fanned out). The stream never propagates sink errors
//! to callers: they are captured on an internal error channel. When the
//! bounded queue overflows, the oldest line is dropped and counted.

pub mod access;
pub mod clock;
pub mod rotate;

pub use rotate::RotationPolicy;

use strum_macros::AsRefStr;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Notify};

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// The longest `caused by:` chain a dump will walk before truncating.
const MAX_CAUSE_DEPTH: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr)]
pub enum LogStreamError {
    /// `peek` was called without `start_buffering` having been enabled.
    BufferingDisabled,
}

impl std::fmt::Display for LogStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::error::Error for LogStreamError {}

enum Entry {
    Line(String),
    Flush(oneshot::Sender<()>),
    AttachFile(PathBuf),
    AttachWriter(Box<dyn Write + Send>),
    Rotate,
}

struct Ring {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

struct StreamState {
    queue: VecDeque<Entry>,
    queued_lines: usize,
    dropped_lines: u64,
    ring: Option<Ring>,
    sink_errors: Vec<String>,
    file_path: Option<PathBuf>,
    closed: bool,
}

pub(crate) struct Shared {
    state: Mutex<StreamState>,
    notify: Notify,
    queue_capacity: usize,
}

/// An append-only, thread-safe, non-blocking line writer.
pub struct LogStream {
    shared: Arc<Shared>,
}

impl LogStream {
    /// A stream with no sinks attached yet. Must be created inside a tokio
    /// runtime: the drainer task is spawned here.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    #[must_use]
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        let stream = Self::suspended(queue_capacity);
        tokio::spawn(drain_task(Arc::clone(&stream.shared)));
        stream
    }

    fn suspended(queue_capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(StreamState {
                queue: VecDeque::new(),
                queued_lines: 0,
                dropped_lines: 0,
                ring: None,
                sink_errors: Vec::new(),
                file_path: None,
                closed: false,
            }),
            notify: Notify::new(),
            queue_capacity: queue_capacity.max(1),
        });

        Self { shared }
    }

    /// A stream appending to the given file.
    #[must_use]
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        let stream = Self::new();
        stream.set_output_file(path);
        stream
    }

    /// A stream writing to standard output.
    #[must_use]
    pub fn to_console() -> Self {
        let stream = Self::new();
        stream.add_writer(Box::new(std::io::stdout()));
        stream
    }

    /// Attach (or replace) the file sink. The file is opened in append mode
    /// by the drainer; open failures land on the error channel.
    pub fn set_output_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.enqueue_control(move |state| {
            state.file_path = Some(path.clone());
            state.queue.push_back(Entry::AttachFile(path));
        });
    }

    /// Attach an additional generic writer sink. All sinks receive every
    /// line (fan-out).
    pub fn add_writer(&self, writer: Box<dyn Write + Send>) {
        self.enqueue_control(move |state| {
            state.queue.push_back(Entry::AttachWriter(writer));
        });
    }

    /// Enqueue a line. Returns immediately; never blocks on I/O and never
    /// fails. If the queue is full the oldest pending line is discarded.
    pub fn write_line(&self, line: impl Into<String>) {
        let line = line.into();

        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            return;
        }

        if let Some(ring) = &mut state.ring {
            ring.push(line.clone());
        }

        if state.queued_lines >= self.shared.queue_capacity {
            if let Some(position) = state.queue.iter().position(|entry| matches!(entry, Entry::Line(_))) {
                state.queue.remove(position);
                state.queued_lines -= 1;
                state.dropped_lines += 1;
            }
        }

        state.queue.push_back(Entry::Line(line));
        state.queued_lines += 1;
        drop(state);

        self.shared.notify.notify_one();
    }

    /// Dump an error and its cause chain, one indented `caused by:` line per
    /// inner error, truncated after [`MAX_CAUSE_DEPTH`] links.
    pub fn write_exception(&self, error: &dyn std::error::Error) {
        let civil = clock::civil_utc(SystemTime::now());
        let mut dump = format!(
            "[{:04}-{:02}-{:02} {:02}:{:02}:{:02} +0000] Unhandled exception: {error}",
            civil.year, civil.month, civil.day, civil.hour, civil.minute, civil.second,
        );

        let mut source = error.source();
        let mut depth = 0;
        while let Some(inner) = source {
            if depth == MAX_CAUSE_DEPTH {
                dump.push_str("\n  (cause chain truncated)");
                break;
            }
            dump.push_str("\n  caused by: ");
            dump.push_str(&inner.to_string());
            source = inner.source();
            depth += 1;
        }

        self.write_line(dump);
    }

    /// Wait until every line enqueued before this call has reached the
    /// sinks.
    pub async fn flush(&self) {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.queue.push_back(Entry::Flush(sender));
        }
        self.shared.notify.notify_one();
        _ = receiver.await;
    }

    /// Keep an in-memory ring of the most recent `capacity` lines for
    /// [`LogStream::peek`].
    pub fn start_buffering(&self, capacity: usize) {
        let mut state = self.shared.state.lock().unwrap();
        state.ring = Some(Ring {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        });
    }

    pub fn stop_buffering(&self) {
        self.shared.state.lock().unwrap().ring = None;
    }

    /// A newline-joined snapshot of the buffered ring.
    pub fn peek(&self) -> Result<String, LogStreamError> {
        let state = self.shared.state.lock().unwrap();
        match &state.ring {
            Some(ring) => Ok(ring.lines.iter().cloned().collect::<Vec<_>>().join("\n")),
            None => Err(LogStreamError::BufferingDisabled),
        }
    }

    /// How many lines were discarded due to queue overflow.
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.shared.state.lock().unwrap().dropped_lines
    }

    /// Drain the captured sink errors.
    #[must_use]
    pub fn take_sink_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.shared.state.lock().unwrap().sink_errors)
    }

    /// Start a size-based rotation timer for the file sink.
    pub fn attach_rotation(&self, policy: RotationPolicy) {
        rotate::spawn_rotation_timer(Arc::downgrade(&self.shared), policy);
    }

    /// Flush outstanding lines and stop the drainer.
    pub async fn close(&self) {
        self.flush().await;
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
        }
        self.shared.notify.notify_one();
    }

    fn enqueue_control(&self, enqueue: impl FnOnce(&mut StreamState)) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            enqueue(&mut state);
        }
        self.shared.notify.notify_one();
    }
}

impl Default for LogStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
        }
        self.shared.notify.notify_one();
    }
}

pub(crate) mod shared_access {
    //! Accessors for the rotation timer, which holds a weak reference to
    //! the stream internals rather than the public handle.

    use super::{Entry, Shared};
    use std::path::PathBuf;

    pub(crate) fn current_file_path(shared: &Shared) -> Option<PathBuf> {
        let state = shared.state.lock().unwrap();
        if state.closed {
            return None;
        }
        state.file_path.clone()
    }

    pub(crate) fn request_rotation(shared: &Shared) {
        {
            let mut state = shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.queue.push_back(Entry::Rotate);
        }
        shared.notify.notify_one();
    }
}

#[derive(Default)]
struct SinkSet {
    file: Option<(PathBuf, tokio::fs::File)>,
    writers: Vec<Box<dyn Write + Send>>,
}

async fn drain_task(shared: Arc<Shared>) {
    let mut sinks = SinkSet::default();

    loop {
        let batch: Vec<Entry> = {
            let mut state = shared.state.lock().unwrap();
            if state.queue.is_empty() {
                if state.closed {
                    break;
                }
                Vec::new()
            } else {
                state.queued_lines = 0;
                state.queue.drain(..).collect()
            }
        };

        if batch.is_empty() {
            shared.notify.notified().await;
            continue;
        }

        for entry in batch {
            match entry {
                Entry::Line(line) => write_line_to_sinks(&shared, &mut sinks, &line).await,
                Entry::Flush(sender) => {
                    flush_sinks(&shared, &mut sinks).await;
                    _ = sender.send(());
                }
                Entry::AttachFile(path) => attach_file(&shared, &mut sinks, path).await,
                Entry::AttachWriter(writer) => sinks.writers.push(writer),
                Entry::Rotate => rotate::rotate_file_sink(&shared, &mut sinks.file).await,
            }
        }
    }
}

async fn attach_file(shared: &Shared, sinks: &mut SinkSet, path: PathBuf) {
    match tokio::fs::OpenOptions::new().append(true).create(true).open(&path).await {
        Ok(file) => sinks.file = Some((path, file)),
        Err(error) => record_sink_error(shared, format!("failed to open {}: {error}", path.display())),
    }
}

async fn write_line_to_sinks(shared: &Shared, sinks: &mut SinkSet, line: &str) {
    if let Some((path, file)) = &mut sinks.file {
        let mut buffer = Vec::with_capacity(line.len() + 1);
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');
        if let Err(error) = file.write_all(&buffer).await {
            let message = format!("write to {} failed: {error}", path.display());
            record_sink_error(shared, message);
        }
    }

    for writer in &mut sinks.writers {
        if let Err(error) = writeln!(writer, "{line}") {
            record_sink_error(shared, format!("writer sink failed: {error}"));
        }
    }
}

async fn flush_sinks(shared: &Shared, sinks: &mut SinkSet) {
    if let Some((path, file)) = &mut sinks.file {
        if let Err(error) = file.flush().await {
            record_sink_error(shared, format!("flush of {} failed: {error}", path.display()));
        }
    }
    for writer in &mut sinks.writers {
        if let Err(error) = writer.flush() {
            record_sink_error(shared, format!("writer flush failed: {error}"));
        }
    }
}

pub(crate) fn record_sink_error(shared: &Shared, message: String) {
    let mut state = shared.state.lock().unwrap();
    // Bound the channel so a permanently broken sink cannot grow it forever.
    if state.sink_errors.len() < 64 {
        state.sink_errors.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lines_reach_the_sink_in_order() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let stream = LogStream::new();
        stream.add_writer(Box::new(SharedBuffer(Arc::clone(&buffer))));

        for index in 0..100 {
            stream.write_line(format!("line {index}"));
        }
        stream.flush().await;

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[0], "line 0");
        assert_eq!(lines[99], "line 99");
    }

    #[tokio::test]
    async fn file_sink_receives_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        let stream = LogStream::to_file(&path);
        stream.write_line("hello");
        stream.write_line("world");
        stream.flush().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "hello\nworld\n");
        stream.close().await;
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        // No drainer: fill the queue synchronously and inspect it.
        let stream = LogStream::suspended(3);
        for index in 0..5 {
            stream.write_line(format!("{index}"));
        }

        assert_eq!(stream.dropped_lines(), 2);

        let state = stream.shared.state.lock().unwrap();
        let queued: Vec<&str> = state.queue.iter()
            .filter_map(|entry| match entry {
                Entry::Line(line) => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(queued, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn peek_requires_buffering() {
        let stream = LogStream::new();
        assert_eq!(stream.peek(), Err(LogStreamError::BufferingDisabled));

        stream.start_buffering(2);
        stream.write_line("a");
        stream.write_line("b");
        stream.write_line("c");
        assert_eq!(stream.peek().unwrap(), "b\nc");

        stream.stop_buffering();
        assert!(stream.peek().is_err());
    }

    #[tokio::test]
    async fn exception_dump_walks_the_chain() {
        #[derive(Debug)]
        struct Layer(Option<Box<Layer>>, &'static str);

        impl std::fmt::Display for Layer {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.1)
            }
        }

        impl std::error::Error for Layer {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                self.0.as_deref().map(|layer| layer as &(dyn std::error::Error + 'static))
            }
        }

        let error = Layer(Some(Box::new(Layer(Some(Box::new(Layer(None, "root"))), "middle"))), "outer");

        let stream = LogStream::new();
        stream.start_buffering(4);
        stream.write_exception(&error);

        let dump = stream.peek().unwrap();
        assert!(dump.contains("Unhandled exception: outer"));
        assert!(dump.contains("caused by: middle"));
        assert!(dump.contains("caused by: root"));
    }

    #[tokio::test]
    async fn writes_after_close_are_ignored() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let stream = LogStream::new();
        stream.add_writer(Box::new(SharedBuffer(Arc::clone(&buffer))));

        stream.write_line("before");
        stream.close().await;
        stream.write_line("after");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(contents, "before\n");
    }
}
