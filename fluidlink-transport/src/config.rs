//! Transport configuration.

use std::time::Duration;

/// Default baud rate for the instrument link.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default read/write timeout on the port.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(200);

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Minimum read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 64;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for a serial link.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Baud rate.
    pub baud: u32,
    /// Port read/write timeout.
    pub io_timeout: Duration,
    /// Read buffer size for chunked reads.
    pub read_buffer_size: usize,
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            io_timeout: DEFAULT_IO_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}
