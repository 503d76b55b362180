//! Hardware seam for the capture engine
//!
//! A backend answers "what is the minimum buffer for this configuration?" and
//! opens streams. A stream is read synchronously into a caller-owned buffer,
//! the same way a blocking record API is driven.

use std::fmt;

use thiserror::Error;

use crate::audio::frame::{CaptureConfig, CaptureSpec};

/// Device error codes a read can report. All of them end the capture loop.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("invalid operation")]
    InvalidOperation,
    #[error("bad value")]
    BadValue,
    #[error("dead object")]
    DeadObject,
    #[error("device error code {0}")]
    Other(i32),
}

/// Why the hardware refused to report a minimum buffer size.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinBufferError {
    /// The parameter combination is not supported at all
    #[error("invalid parameters")]
    InvalidParameters,
    #[error("{0}")]
    Unavailable(String),
}

/// An opened, running capture stream.
pub trait CaptureStream: Send + 'static {
    /// Read into `buf`, returning the number of valid bytes.
    ///
    /// Implementations must return within a bounded time; `Ok(0)` means no
    /// data arrived before their internal timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError>;

    /// Stop the hardware and free it. Called exactly once, after the last
    /// `read` has returned.
    fn release(&mut self);
}

/// Source of capture streams.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Hardware-reported minimum buffer size in bytes for `spec`.
    fn min_buffer_size(&self, spec: &CaptureSpec) -> Result<usize, MinBufferError>;

    /// Initialize a stream for `config`.
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>, String>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn CaptureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBackend")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    //! Scripted backend for hardware-free tests.

    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::audio::frame::SourceKind;

    /// What the next `read` call does
    #[derive(Debug, Clone)]
    pub enum Step {
        Data(Vec<u8>),
        Fail(ReadError),
        Panic,
    }

    #[derive(Default)]
    struct Script {
        steps: VecDeque<Step>,
    }

    /// Backend whose minimum-buffer answers, open results and reads are
    /// scripted. Once the read script runs out, reads return a 64-byte block
    /// of silence every millisecond.
    #[derive(Clone, Default)]
    pub struct ScriptedBackend {
        invalid: Arc<Mutex<HashSet<(SourceKind, u32)>>>,
        open_failures: Arc<Mutex<HashSet<(SourceKind, u32)>>>,
        script: Arc<Mutex<Script>>,
        opened: Arc<Mutex<Vec<CaptureConfig>>>,
        released: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reject(self, source: SourceKind, sample_rate: u32) -> Self {
            self.invalid.lock().insert((source, sample_rate));
            self
        }

        pub fn fail_open(self, source: SourceKind, sample_rate: u32) -> Self {
            self.open_failures.lock().insert((source, sample_rate));
            self
        }

        pub fn then(self, step: Step) -> Self {
            self.script.lock().steps.push_back(step);
            self
        }

        pub fn opened(&self) -> Vec<CaptureConfig> {
            self.opened.lock().clone()
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn min_buffer_size(&self, spec: &CaptureSpec) -> Result<usize, MinBufferError> {
            if self.invalid.lock().contains(&(spec.source, spec.sample_rate)) {
                return Err(MinBufferError::InvalidParameters);
            }
            Ok(spec.sample_rate as usize / 50 * spec.bytes_per_frame())
        }

        fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>, String> {
            let key = (config.spec.source, config.spec.sample_rate);
            if self.open_failures.lock().contains(&key) {
                return Err("device busy".to_string());
            }
            self.opened.lock().push(*config);
            Ok(Box::new(ScriptedStream {
                backend: self.clone(),
            }))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct ScriptedStream {
        backend: ScriptedBackend,
    }

    impl CaptureStream for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
            self.backend.reads.fetch_add(1, Ordering::SeqCst);
            let step = self.backend.script.lock().steps.pop_front();
            match step {
                Some(Step::Data(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Step::Fail(err)) => Err(err),
                Some(Step::Panic) => panic!("scripted read panic"),
                None => {
                    std::thread::sleep(Duration::from_millis(1));
                    let n = buf.len().min(64);
                    buf[..n].fill(0);
                    Ok(n)
                }
            }
        }

        fn release(&mut self) {
            self.backend.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
