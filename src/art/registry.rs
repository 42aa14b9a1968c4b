use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::ArtError;

/// Opaque reference to an image owned by the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArtHandle(u64);

impl ArtHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Decoded artwork re-encoded as PNG, ready to hand over for display.
#[derive(Clone, Debug)]
pub struct EncodedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Turns image bytes into a display handle. Implemented by the presentation
/// layer; the resolver only calls it from its worker threads.
pub trait ImageRegistrar: Send + Sync {
    fn register(&self, image: EncodedImage) -> Result<ArtHandle, ArtError>;
}

// ==============================================================
// In-memory registry (headless use)
// ==============================================================

/// Keeps registered images in memory and hands out sequential handles.
#[derive(Default)]
pub struct MemoryRegistry {
    next_id: AtomicU64,
    images: Mutex<HashMap<ArtHandle, Arc<EncodedImage>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: ArtHandle) -> Option<Arc<EncodedImage>> {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.images.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageRegistrar for MemoryRegistry {
    fn register(&self, image: EncodedImage) -> Result<ArtHandle, ArtError> {
        let handle = ArtHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::new(image));
        Ok(handle)
    }
}

// ==============================================================
// Cross-context hand-off
// ==============================================================

/// A pending registration waiting for the owning context.
pub struct RegistrationRequest {
    pub image: EncodedImage,
    reply: Sender<Option<ArtHandle>>,
}

/// Registrar used from worker threads when registration must happen on a
/// specific thread (e.g. a render thread). Each call waits at most `timeout`.
#[derive(Clone)]
pub struct HandoffRegistrar {
    tx: Sender<RegistrationRequest>,
    timeout: Duration,
}

/// The owning context's end. Call [`RegistrationInbox::pump`] from that
/// context, typically once per frame.
pub struct RegistrationInbox {
    rx: Receiver<RegistrationRequest>,
}

/// Creates a connected registrar/inbox pair.
pub fn handoff(timeout: Duration) -> (HandoffRegistrar, RegistrationInbox) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (HandoffRegistrar { tx, timeout }, RegistrationInbox { rx })
}

impl ImageRegistrar for HandoffRegistrar {
    fn register(&self, image: EncodedImage) -> Result<ArtHandle, ArtError> {
        let (reply, answer) = bounded(1);
        self.tx
            .send(RegistrationRequest { image, reply })
            .map_err(|_| ArtError::Registration("owning context is gone".into()))?;

        match answer.recv_timeout(self.timeout) {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) => Err(ArtError::Registration("rejected by owning context".into())),
            Err(RecvTimeoutError::Timeout) => Err(ArtError::RegistrationTimeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ArtError::Registration("request dropped unanswered".into()))
            }
        }
    }
}

impl RegistrationInbox {
    /// Serves every pending request without blocking. Returns how many were handled.
    pub fn pump<F>(&self, mut register: F) -> usize
    where
        F: FnMut(&EncodedImage) -> Option<ArtHandle>,
    {
        let mut served = 0;
        while let Ok(request) = self.rx.try_recv() {
            let handle = register(&request.image);
            // The worker may have timed out already; that's fine.
            let _ = request.reply.send(handle);
            served += 1;
        }
        served
    }

    /// Blocks until one request arrives (or `timeout` passes) and serves it.
    pub fn pump_one<F>(&self, timeout: Duration, register: F) -> bool
    where
        F: FnOnce(&EncodedImage) -> Option<ArtHandle>,
    {
        match self.rx.recv_timeout(timeout) {
            Ok(request) => {
                let handle = register(&request.image);
                let _ = request.reply.send(handle);
                true
            }
            Err(_) => false,
        }
    }
}
