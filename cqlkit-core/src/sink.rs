//! Output sink and progress reporting
//!
//! Records produced by concurrent workers are serialized through one lock, so
//! every record lands on the writer as a whole line.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// How records are laid out on the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One record per line
    Lines,
    /// Records nested in a single top-level JSON array
    JsonArray,
}

struct SinkState {
    writer: Box<dyn Write + Send>,
    records: u64,
    opened: bool,
    finished: bool,
}

/// Shared, line-atomic record writer
pub struct OutputSink {
    layout: Layout,
    state: Mutex<SinkState>,
}

impl OutputSink {
    pub fn new(writer: impl Write + Send + 'static, layout: Layout) -> Self {
        Self {
            layout,
            state: Mutex::new(SinkState {
                writer: Box::new(writer),
                records: 0,
                opened: false,
                finished: false,
            }),
        }
    }

    /// Newline-delimited records
    pub fn lines(writer: impl Write + Send + 'static) -> Self {
        Self::new(writer, Layout::Lines)
    }

    /// Records wrapped in `[` … `]`
    pub fn json_array(writer: impl Write + Send + 'static) -> Self {
        Self::new(writer, Layout::JsonArray)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Write the opening bracket in array layout; idempotent
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::open(self.layout, &mut state)
    }

    fn open(layout: Layout, state: &mut SinkState) -> Result<()> {
        if !state.opened {
            state.opened = true;
            if layout == Layout::JsonArray {
                state.writer.write_all(b"[")?;
            }
        }
        Ok(())
    }

    /// Write the header line ahead of every record
    pub fn write_header(&self, header: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.writer.write_all(header.as_bytes())?;
        state.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Write one encoded record
    pub fn write_record(&self, record: &str) -> Result<()> {
        let mut state = self.state.lock();
        match self.layout {
            Layout::Lines => {
                state.writer.write_all(record.as_bytes())?;
                state.writer.write_all(b"\n")?;
            }
            Layout::JsonArray => {
                Self::open(self.layout, &mut state)?;
                let separator: &[u8] = if state.records == 0 { b"\n" } else { b",\n" };
                state.writer.write_all(separator)?;
                state.writer.write_all(record.as_bytes())?;
            }
        }
        state.records += 1;
        Ok(())
    }

    /// Records written so far
    pub fn records(&self) -> u64 {
        self.state.lock().records
    }

    /// Push buffered bytes to the writer without closing the layout
    pub fn flush(&self) -> Result<()> {
        self.state.lock().writer.flush()?;
        Ok(())
    }

    /// Close the array layout and flush; idempotent
    pub fn finish(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.finished {
            state.finished = true;
            if self.layout == Layout::JsonArray {
                Self::open(self.layout, &mut state)?;
                let closing: &[u8] = if state.records == 0 { b"]\n" } else { b"\n]\n" };
                state.writer.write_all(closing)?;
            }
        }
        state.writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("layout", &self.layout)
            .field("records", &self.records())
            .finish()
    }
}

/// Cloneable in-memory writer, for capturing output
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `completed/total` counters for a parallel run
///
/// Lines go straight to the diagnostic writer, independent of log filtering.
pub struct Progress {
    enabled: bool,
    completed: AtomicUsize,
    total: AtomicUsize,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Progress {
    pub fn new(enabled: bool, writer: impl Write + Send + 'static) -> Self {
        Self {
            enabled,
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Reporter writing to standard error
    pub fn stderr(enabled: bool) -> Self {
        Self::new(enabled, io::stderr())
    }

    /// Count one more enumerated task
    pub fn add_task(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a finished task and report it
    pub fn task_done(&self) {
        if !self.enabled {
            self.completed.fetch_add(1, Ordering::SeqCst);
            return;
        }
        // counted under the writer lock so printed lines never go backwards
        let mut writer = self.writer.lock();
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        // a broken diagnostic stream must not fail the export
        let _ = writeln!(writer, "Progress: {}/{}", completed, total);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.enabled)
            .field("completed", &self.completed())
            .field("total", &self.total())
            .finish()
    }
}
