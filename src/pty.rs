//! Host side of the session: a PTY running the configured command.
//!
//! Data flows:
//!
//! ```text
//! [PTY master] ──reader thread──mpsc──► session core (terminal feed)
//! session core ──mpsc──writer thread──► ChunkQueue ──► [PTY master]
//! ```
//!
//! Both threads block on the PTY; the session core never does. The writer
//! side keeps a [`ChunkQueue`] so a slow or briefly unwritable host never
//! drops queued keystrokes: a partial write leaves the tail queued, and the
//! queue is only abandoned on a fatal error.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// ChunkQueue
// ---------------------------------------------------------------------------

/// FIFO of byte chunks with partial-write bookkeeping.
///
/// `write()` first drains what is already queued, then attempts the new
/// payload in place; whatever the descriptor does not accept is appended as
/// a new chunk. Nothing is dropped short of a fatal I/O error.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of the head chunk already written.
    head_off: usize,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() - self.head_off
    }

    /// Push bytes without attempting a write.
    pub fn push(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.chunks.push_back(data.to_vec());
        }
    }

    /// Drain as much of the queue as the sink accepts. Returns `Ok(true)`
    /// when the queue is empty, `Ok(false)` when the sink stopped taking
    /// bytes (`WouldBlock` or a short write of zero).
    pub fn flush_into(&mut self, sink: &mut dyn Write) -> io::Result<bool> {
        while let Some(head) = self.chunks.front() {
            match sink.write(&head[self.head_off..]) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.head_off += n;
                    if self.head_off >= head.len() {
                        self.chunks.pop_front();
                        self.head_off = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Best-effort write: drain the queue head first, then try `data` in
    /// place; the unwritten tail is queued.
    pub fn write(&mut self, sink: &mut dyn Write, data: &[u8]) -> io::Result<()> {
        if !self.flush_into(sink)? {
            self.push(data);
            return Ok(());
        }
        let mut off = 0;
        while off < data.len() {
            match sink.write(&data[off..]) {
                Ok(0) => break,
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.push(&data[off..]);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host events and sink
// ---------------------------------------------------------------------------

/// Events from the host side into the session core.
#[derive(Debug)]
pub enum HostEvent {
    /// A chunk of PTY output.
    Output(Vec<u8>),
    /// The PTY hit EOF or a read error; the child is gone.
    Closed,
}

/// Byte sink the server pushes terminal input into.
///
/// The PTY consumes bytes; hosts driven by key events rather than byte
/// streams take the scancode path instead, which a PTY has no use for.
pub trait HostSink {
    fn write_bytes(&mut self, bytes: &[u8]);
    fn write_scancode(&mut self, scancode: u16, down: bool);
}

// ---------------------------------------------------------------------------
// HostPty
// ---------------------------------------------------------------------------

/// A spawned PTY with its reader/writer plumbing.
pub struct HostPty {
    master: Box<dyn MasterPty + Send>,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl std::fmt::Debug for HostPty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPty").finish_non_exhaustive()
    }
}

impl HostPty {
    /// Spawn `command` (argv) on a fresh PTY of the given cell geometry.
    /// Host output is delivered as [`HostEvent`]s on `events_tx`.
    pub fn spawn(
        command: &[String],
        cols: u16,
        rows: u16,
        events_tx: mpsc::UnboundedSender<HostEvent>,
    ) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("openpty failed")?;

        let mut cmd = if command.is_empty() {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
            CommandBuilder::new(shell)
        } else {
            let mut c = CommandBuilder::new(&command[0]);
            c.args(&command[1..]);
            c
        };
        cmd.env("TERM", "linux");

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("failed to spawn host command")?;
        let killer = child.clone_killer();
        info!(pid = child.process_id(), "host command spawned");

        // Reader thread: blocking reads, chunks into the session channel.
        let reader = pair
            .master
            .try_clone_reader()
            .context("cloning PTY reader failed")?;
        {
            let events_tx = events_tx.clone();
            std::thread::spawn(move || {
                let mut reader = reader;
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if events_tx.send(HostEvent::Output(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = events_tx.send(HostEvent::Closed);
                debug!("PTY reader thread finished");
            });
        }

        // Writer thread: drains the input channel through a ChunkQueue.
        let writer = pair.master.take_writer().context("taking PTY writer failed")?;
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        std::thread::spawn(move || {
            let mut writer = writer;
            let mut queue = ChunkQueue::new();
            while let Some(data) = input_rx.blocking_recv() {
                if let Err(e) = queue.write(&mut writer, &data) {
                    warn!(error = %e, "PTY write failed; dropping input queue");
                    break;
                }
                // Opportunistically retry anything a partial write left over.
                while !queue.is_empty() {
                    match queue.flush_into(&mut writer) {
                        Ok(true) => break,
                        Ok(false) => std::thread::yield_now(),
                        Err(e) => {
                            warn!(error = %e, "PTY flush failed; dropping input queue");
                            return;
                        }
                    }
                }
                let _ = writer.flush();
            }
            debug!("PTY writer thread finished");
        });

        Ok(Self {
            master: pair.master,
            input_tx,
            killer,
        })
    }

    /// Propagate a terminal resize to the host.
    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        });
    }

    /// Ask the child to go away (used on shutdown).
    pub fn kill(&mut self) {
        let _ = self.killer.kill();
    }
}

impl HostSink for HostPty {
    fn write_bytes(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            let _ = self.input_tx.send(bytes.to_vec());
        }
    }

    fn write_scancode(&mut self, scancode: u16, down: bool) {
        // A PTY host has no key-event channel.
        debug!(scancode, down, "scancode dropped on byte-stream host");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write sink that accepts a limited number of bytes, then WouldBlock.
    struct Throttled {
        accepted: Vec<u8>,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "full"));
            }
            let n = buf.len().min(self.budget);
            self.accepted.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_write_keeps_tail_queued() {
        let mut q = ChunkQueue::new();
        let mut sink = Throttled {
            accepted: Vec::new(),
            budget: 3,
        };
        q.write(&mut sink, b"abcdef").unwrap();
        assert_eq!(sink.accepted, b"abc");
        assert_eq!(q.queued_bytes(), 3);

        // Budget refilled: the tail goes out first, then new data.
        sink.budget = 16;
        q.write(&mut sink, b"gh").unwrap();
        assert_eq!(sink.accepted, b"abcdefgh");
        assert!(q.is_empty());
    }

    #[test]
    fn blocked_sink_queues_everything_in_order() {
        let mut q = ChunkQueue::new();
        let mut sink = Throttled {
            accepted: Vec::new(),
            budget: 0,
        };
        q.write(&mut sink, b"one").unwrap();
        q.write(&mut sink, b"two").unwrap();
        assert_eq!(q.queued_bytes(), 6);

        sink.budget = 64;
        assert!(q.flush_into(&mut sink).unwrap());
        assert_eq!(sink.accepted, b"onetwo");
    }

    #[test]
    fn fatal_error_propagates() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut q = ChunkQueue::new();
        assert!(q.write(&mut Broken, b"x").is_err());
    }
}
