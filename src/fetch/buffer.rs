//! Response body accumulation.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Why a [`ResponseBuffer`] refused a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Accepting the chunk would exceed the configured body bound.
    #[error("body would grow to {attempted} bytes, limit is {limit}")]
    LimitExceeded {
        /// Configured bound.
        limit: usize,
        /// Size the body would have reached.
        attempted: usize,
    },

    /// The allocator could not grow the buffer.
    #[error("out of memory growing body buffer by {requested} bytes")]
    OutOfMemory {
        /// Bytes that could not be reserved.
        requested: usize,
    },
}

/// Growable response body with an upper bound.
///
/// Once a chunk is refused the buffer stays rejected: later chunks are refused
/// too, and the bytes accepted before the failure are kept as the partial body.
#[derive(Debug)]
pub struct ResponseBuffer {
    data: Vec<u8>,
    limit: usize,
    rejection: Option<BufferError>,
}

impl ResponseBuffer {
    /// Creates an empty buffer accepting at most `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            rejection: None,
        }
    }

    /// Appends a chunk, returning the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError`] if the chunk would exceed the limit or memory
    /// cannot be reserved. The buffer is left unchanged and marked rejected.
    pub fn append(&mut self, chunk: &[u8]) -> Result<usize, BufferError> {
        if let Some(rejection) = &self.rejection {
            return Err(rejection.clone());
        }

        let attempted = self.data.len().saturating_add(chunk.len());
        if attempted > self.limit {
            return Err(self.reject(BufferError::LimitExceeded {
                limit: self.limit,
                attempted,
            }));
        }
        if self.data.try_reserve(chunk.len()).is_err() {
            return Err(self.reject(BufferError::OutOfMemory {
                requested: chunk.len(),
            }));
        }

        self.data.extend_from_slice(chunk);
        Ok(chunk.len())
    }

    fn reject(&mut self, error: BufferError) -> BufferError {
        self.rejection = Some(error.clone());
        error
    }

    /// Returns the accumulated bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the body as text, if it is valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Returns the number of accumulated bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no bytes have been accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the error that stopped accumulation, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<&BufferError> {
        self.rejection.as_ref()
    }
}

/// Shared handle to one fetch's [`ResponseBuffer`].
///
/// The fetch context keeps one handle and the transfer engine writes through
/// a clone. Both live on the reactor thread, so no locking is involved.
#[derive(Debug, Clone)]
pub struct BodySink(Rc<RefCell<ResponseBuffer>>);

impl BodySink {
    /// Creates a sink over an empty buffer bounded by `limit`.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self(Rc::new(RefCell::new(ResponseBuffer::new(limit))))
    }

    /// Appends a chunk of response body.
    ///
    /// # Errors
    ///
    /// See [`ResponseBuffer::append`].
    pub fn write(&self, chunk: &[u8]) -> Result<usize, BufferError> {
        self.0.borrow_mut().append(chunk)
    }

    /// Returns the number of bytes accumulated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Returns true if nothing has been accumulated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Returns the error that stopped accumulation, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<BufferError> {
        self.0.borrow().rejection().cloned()
    }

    /// Moves the accumulated bytes out, leaving the buffer empty.
    pub(crate) fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().data)
    }
}
