//! Framed, non-blocking serial delivery of composited LED frames.
//!
//! The simulation tick must never stall on a slow or disconnected link, so
//! frames cross to a dedicated worker thread through a small latest-wins
//! queue: depth two, oldest evicted on overflow. The worker owns the
//! physical connection for its whole life; any I/O fault stops the worker
//! and the simulation simply keeps dropping frames. Restarting a dead link
//! is the supervisor's job, not ours.
//!
//! Wire format per frame: one magic byte, then `3 * N` channel bytes in
//! pixel-index order. No length prefix, no checksum, no acknowledgment;
//! the receiver knows `N` a priori and resynchronizes on the magic byte.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Sentinel byte marking the start of every wire frame.
pub const FRAME_MAGIC: u8 = 0x7E;

/// Outbound queue depth. Two is enough to decouple producer jitter from the
/// link while keeping worst-case staleness at one frame.
const QUEUE_DEPTH: usize = 2;

/// How long the worker blocks on the queue before rechecking for shutdown.
const QUEUE_WAIT: Duration = Duration::from_millis(100);

/// Errors surfaced while opening or driving the physical link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The serial device could not be opened.
    #[error("failed to open serial link")]
    Open(#[from] serialport::Error),
}

/// Channel byte order expected by the deployed LED controller.
///
/// Strips in the field disagree about channel order; the remap happens here,
/// while flattening, so the simulation always works in RGB.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ColorOrder {
    #[default]
    Rgb,
    Grb,
    Brg,
}

impl ColorOrder {
    /// Reorder one RGB triple into wire order.
    #[must_use]
    pub const fn permute(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            Self::Rgb => rgb,
            Self::Grb => [rgb[1], rgb[0], rgb[2]],
            Self::Brg => [rgb[2], rgb[0], rgb[1]],
        }
    }
}

/// Flatten a pixel buffer into one wire frame: magic byte plus payload.
#[must_use]
pub fn encode_frame(pixels: &[[u8; 3]], order: ColorOrder) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + pixels.len() * 3);
    bytes.push(FRAME_MAGIC);
    for &pixel in pixels {
        bytes.extend_from_slice(&order.permute(pixel));
    }
    bytes
}

/// Destination a wire frame is written to, one atomic frame per call.
///
/// Seam for tests and alternative links; production uses [`SerialSink`].
pub trait FrameSink: Send {
    /// Write one complete frame. Errors stop the transport worker.
    fn write_frame(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

/// [`FrameSink`] backed by a real serial port.
pub struct SerialSink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialSink {
    /// Open the serial device at `path` with the given baud rate.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_secs(1))
            .open()?;
        Ok(Self { port })
    }
}

impl FrameSink for SerialSink {
    fn write_frame(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}

/// Bounded single-producer queue where a full push evicts the oldest frame.
///
/// Stale frames are never sent once a newer one exists; losing frames under
/// backpressure is the intended behavior, not a fault.
#[derive(Debug, Clone)]
pub struct LatestFrameQueue {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl LatestFrameQueue {
    /// Create a queue holding at most `depth` frames.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let (sender, receiver) = bounded(depth.max(1));
        Self { sender, receiver }
    }

    /// Enqueue a frame, evicting the oldest one when full. Returns false
    /// only when the consuming side has gone away entirely.
    pub fn push(&self, frame: Vec<u8>) -> bool {
        let mut frame = frame;
        loop {
            match self.sender.try_send(frame) {
                Ok(()) => return true,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.receiver.try_recv();
                    frame = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Dequeue without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }

    /// Number of frames currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    fn pop_wait(&self, timeout: Duration) -> Result<Vec<u8>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Owns the outbound queue and the worker thread driving the physical link.
///
/// `send` is non-blocking from the caller's perspective; the worker blocks
/// only on its own queue wait and on the link write, never on the
/// simulation. There is no retry: if the link cannot be opened or a write
/// fails, the worker stops and `is_running` turns false.
pub struct SerialTransport {
    queue: LatestFrameQueue,
    order: ColorOrder,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Spawn the worker around an arbitrary sink opener. The opener runs on
    /// the worker thread, so a slow device probe cannot delay the caller.
    pub fn spawn<F>(open: F, order: ColorOrder) -> Self
    where
        F: FnOnce() -> Result<Box<dyn FrameSink>, TransportError> + Send + 'static,
    {
        let queue = LatestFrameQueue::new(QUEUE_DEPTH);
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_queue = queue.clone();
        let worker_running = Arc::clone(&running);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = std::thread::Builder::new()
            .name("pondglow-serial".to_string())
            .spawn(move || {
                worker_loop(open, &worker_queue, &worker_running, &worker_shutdown);
            })
            .ok();
        if worker.is_none() {
            error!("could not spawn serial worker thread; transport disabled");
            running.store(false, Ordering::Release);
        }

        Self {
            queue,
            order,
            running,
            shutdown,
            worker,
        }
    }

    /// Spawn a transport writing to the serial device at `path`.
    #[must_use]
    pub fn serial(path: impl Into<String>, baud_rate: u32, order: ColorOrder) -> Self {
        let path = path.into();
        Self::spawn(
            move || SerialSink::open(&path, baud_rate).map(|sink| Box::new(sink) as Box<dyn FrameSink>),
            order,
        )
    }

    /// Whether the worker still owns a live link.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enqueue the latest composited frame. Never blocks; returns false when
    /// the worker is not running and the frame was dropped.
    pub fn send(&self, pixels: &[[u8; 3]]) -> bool {
        if !self.is_running() {
            return false;
        }
        self.queue.push(encode_frame(pixels, self.order))
    }

    /// Request cooperative shutdown and wait for the worker to exit. The
    /// worker notices at its next queue-wait boundary.
    pub fn close(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn worker_loop<F>(
    open: F,
    queue: &LatestFrameQueue,
    running: &AtomicBool,
    shutdown: &AtomicBool,
) where
    F: FnOnce() -> Result<Box<dyn FrameSink>, TransportError>,
{
    let mut sink = match open() {
        Ok(sink) => {
            info!("serial link open");
            sink
        }
        Err(err) => {
            error!(error = %err, "could not open serial link; transport disabled");
            running.store(false, Ordering::Release);
            return;
        }
    };

    while !shutdown.load(Ordering::Acquire) {
        match queue.pop_wait(QUEUE_WAIT) {
            Ok(frame) => {
                if let Err(err) = sink.write_frame(&frame) {
                    error!(error = %err, "serial write failed; stopping transport worker");
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    running.store(false, Ordering::Release);
    info!("serial transport worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct MemorySink {
        written: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl FrameSink for MemorySink {
        fn write_frame(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            self.written.lock().expect("sink lock").push(bytes.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn write_frame(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::other("link gone"))
        }
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn wire_frame_is_magic_byte_plus_rgb_payload() {
        let pixels = [[1, 2, 3], [4, 5, 6], [7, 8, 9], [10, 11, 12]];
        let bytes = encode_frame(&pixels, ColorOrder::Rgb);
        assert_eq!(
            bytes,
            [0x7E, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C]
        );
    }

    #[test]
    fn color_order_remaps_channels() {
        assert_eq!(ColorOrder::Rgb.permute([1, 2, 3]), [1, 2, 3]);
        assert_eq!(ColorOrder::Grb.permute([1, 2, 3]), [2, 1, 3]);
        assert_eq!(ColorOrder::Brg.permute([1, 2, 3]), [3, 1, 2]);

        let bytes = encode_frame(&[[1, 2, 3]], ColorOrder::Grb);
        assert_eq!(bytes, [0x7E, 0x02, 0x01, 0x03]);
    }

    #[test]
    fn backpressure_keeps_the_two_most_recent_frames() {
        let queue = LatestFrameQueue::new(2);
        assert!(queue.push(vec![1]));
        assert!(queue.push(vec![2]));
        assert!(queue.push(vec![3]));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(vec![2]));
        assert_eq!(queue.try_pop(), Some(vec![3]));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn worker_writes_queued_frames_to_the_sink() {
        let sink = MemorySink::default();
        let written = Arc::clone(&sink.written);
        let transport = SerialTransport::spawn(
            move || Ok(Box::new(sink) as Box<dyn FrameSink>),
            ColorOrder::Rgb,
        );

        assert!(transport.send(&[[9, 9, 9]]));
        assert!(
            wait_until(Duration::from_secs(2), || !written
                .lock()
                .expect("sink lock")
                .is_empty()),
            "worker never delivered the frame"
        );
        transport.close();

        let frames = written.lock().expect("sink lock");
        assert_eq!(frames[0], [0x7E, 9, 9, 9]);
    }

    #[test]
    fn open_failure_leaves_the_transport_not_running() {
        let transport = SerialTransport::spawn(
            || {
                Err(TransportError::Open(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "no such device",
                )))
            },
            ColorOrder::Rgb,
        );

        assert!(
            wait_until(Duration::from_secs(2), || !transport.is_running()),
            "transport should notice the failed open"
        );
        assert!(!transport.send(&[[1, 2, 3]]), "frames are dropped when dead");
        transport.close();
    }

    #[test]
    fn write_failure_stops_the_worker_without_touching_the_caller() {
        let transport = SerialTransport::spawn(
            || Ok(Box::new(FailingSink) as Box<dyn FrameSink>),
            ColorOrder::Rgb,
        );

        assert!(transport.send(&[[1, 1, 1]]));
        assert!(
            wait_until(Duration::from_secs(2), || !transport.is_running()),
            "worker should halt on the first write error"
        );
        transport.close();
    }

    #[test]
    fn close_joins_the_worker() {
        let sink = MemorySink::default();
        let transport = SerialTransport::spawn(
            move || Ok(Box::new(sink) as Box<dyn FrameSink>),
            ColorOrder::Rgb,
        );
        assert!(transport.is_running());
        transport.close();
        // nothing to assert beyond "close returned": the join guarantees the
        // worker observed shutdown at its queue-wait boundary
    }
}
