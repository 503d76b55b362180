//! Audio capture engine
//!
//! Acquires a capture stream by walking an ordered fallback list, then runs a
//! blocking read loop on a dedicated thread. `stop` cancels the loop, joins
//! the thread and only then releases the stream.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::backend::{CaptureBackend, CaptureStream};
use crate::audio::frame::{CaptureConfig, FallbackCandidate, PcmFrame};
use crate::constants::STATS_LOG_INTERVAL;
use crate::error::{CaptureError, ConfigAttempt};

/// Capture engine over a single backend
pub struct CaptureEngine {
    backend: Arc<dyn CaptureBackend>,

    /// Ordered acquisition policy
    fallbacks: Vec<FallbackCandidate>,

    /// Cancellation token checked by the read loop
    cancel: Arc<AtomicBool>,

    /// Whether the read loop is still executing
    running: Arc<AtomicBool>,

    /// Capture thread; yields the stream back for release
    thread_handle: Option<JoinHandle<Box<dyn CaptureStream>>>,

    /// Configuration of the current stream
    active: Option<CaptureConfig>,

    frames_captured: Arc<AtomicU64>,
    bytes_captured: Arc<AtomicU64>,
}

impl CaptureEngine {
    pub fn new(backend: Arc<dyn CaptureBackend>, fallbacks: Vec<FallbackCandidate>) -> Self {
        Self {
            backend,
            fallbacks,
            cancel: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            active: None,
            frames_captured: Arc::new(AtomicU64::new(0)),
            bytes_captured: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Try each fallback candidate in order and return the first stream that
    /// initializes, or every attempt's failure.
    pub fn acquire(&self) -> Result<(CaptureConfig, Box<dyn CaptureStream>), CaptureError> {
        let mut attempts = Vec::with_capacity(self.fallbacks.len());

        for candidate in &self.fallbacks {
            let spec = candidate.spec();

            let min_buffer = match self.backend.min_buffer_size(&spec) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Rejecting capture config {}: {}", spec, e);
                    attempts.push(ConfigAttempt {
                        description: spec.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let config =
                CaptureConfig::from_minimum(spec, min_buffer, candidate.buffer_multiplier);
            tracing::debug!(
                "Trying {} on {} (hardware minimum {} bytes)",
                config,
                self.backend.name(),
                min_buffer
            );

            match self.backend.open(&config) {
                Ok(stream) => {
                    tracing::info!("Capture initialized: {}", config);
                    return Ok((config, stream));
                }
                Err(reason) => {
                    tracing::warn!("Failed to open {}: {}", config, reason);
                    attempts.push(ConfigAttempt {
                        description: config.to_string(),
                        reason,
                    });
                }
            }
        }

        tracing::error!("All {} capture configurations failed", attempts.len());
        Err(CaptureError::Configuration(attempts))
    }

    /// Start capturing. Returns as soon as the read loop is spawned.
    ///
    /// `on_frame` receives every successful read; `on_error` is called at most
    /// once, when the loop dies on a device error. Neither is called after
    /// [`stop`](Self::stop) returns.
    pub fn start<F, E>(&mut self, on_frame: F, on_error: E) -> Result<CaptureConfig, CaptureError>
    where
        F: FnMut(PcmFrame) + Send + 'static,
        E: FnMut(CaptureError) + Send + 'static,
    {
        self.start_with(move |_| on_frame, on_error)
    }

    /// Like [`start`](Self::start), but the frame handler is built from the
    /// configuration that won acquisition.
    pub fn start_with<M, F, E>(&mut self, make_on_frame: M, mut on_error: E) -> Result<CaptureConfig, CaptureError>
    where
        M: FnOnce(&CaptureConfig) -> F,
        F: FnMut(PcmFrame) + Send + 'static,
        E: FnMut(CaptureError) + Send + 'static,
    {
        if self.running.load(Ordering::SeqCst) {
            tracing::warn!("Capture already running");
            return self
                .active
                .ok_or_else(|| CaptureError::Backend("running without a configuration".into()));
        }

        // Reap a loop that ended on its own error
        if self.thread_handle.is_some() {
            self.stop();
        }

        let (config, mut stream) = self.acquire()?;
        let mut on_frame = make_on_frame(&config);

        self.cancel.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        self.frames_captured.store(0, Ordering::SeqCst);
        self.bytes_captured.store(0, Ordering::SeqCst);

        let cancel = self.cancel.clone();
        let running = self.running.clone();
        let frames_captured = self.frames_captured.clone();
        let bytes_captured = self.bytes_captured.clone();
        let buffer_bytes = config.buffer_bytes;

        let spawned = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                tracing::debug!("Capture loop started");
                let mut buffer = vec![0u8; buffer_bytes];

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    while !cancel.load(Ordering::Acquire) {
                        match stream.read(&mut buffer) {
                            Ok(0) => continue,
                            Ok(n) => {
                                let count = frames_captured.fetch_add(1, Ordering::Relaxed) + 1;
                                bytes_captured.fetch_add(n as u64, Ordering::Relaxed);
                                if count % STATS_LOG_INTERVAL == 0 {
                                    tracing::debug!(
                                        "Captured {} frames, {} bytes",
                                        count,
                                        bytes_captured.load(Ordering::Relaxed)
                                    );
                                }
                                on_frame(PcmFrame::copy_from(&buffer, n));
                            }
                            Err(code) => {
                                tracing::error!("Capture read failed: {}", code);
                                return Err(CaptureError::TransientIo(code.to_string()));
                            }
                        }
                    }
                    Ok(())
                }));

                let result = outcome.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Capture loop panicked: {}", message);
                    Err(CaptureError::TransientIo(message))
                });

                running.store(false, Ordering::SeqCst);

                if let Err(err) = result {
                    if cancel.load(Ordering::Acquire) {
                        tracing::debug!("Suppressing capture error during stop: {}", err);
                    } else {
                        on_error(err);
                    }
                }
                tracing::debug!("Capture loop finished");
                stream
            });

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                self.active = Some(config);
                Ok(config)
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CaptureError::Backend(e.to_string()))
            }
        }
    }

    /// Stop capturing. Blocks until the read loop has exited, then releases
    /// the stream.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            tracing::debug!("Capture not running");
            return;
        };

        self.cancel.store(true, Ordering::SeqCst);

        match handle.join() {
            Ok(mut stream) => {
                stream.release();
                tracing::info!(
                    "Capture stopped after {} frames",
                    self.frames_captured.load(Ordering::Relaxed)
                );
            }
            Err(_) => tracing::error!("Capture thread panicked; stream could not be released"),
        }

        self.running.store(false, Ordering::SeqCst);
        self.active = None;
    }

    /// Check if the read loop is executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Configuration of the current stream, if one is held
    pub fn active_config(&self) -> Option<CaptureConfig> {
        self.active
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn bytes_captured(&self) -> u64 {
        self.bytes_captured.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "capture loop panicked".to_string()
    }
}
