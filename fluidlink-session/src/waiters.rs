//! Token-correlation table.

use dashmap::DashMap;
use fluidlink_protocol::ResultCode;
use tokio::sync::oneshot;

/// Maps each in-flight token to the waiter that will receive its result.
///
/// The writer loop inserts; the reader loop and the timeout watchdog race to
/// remove. Removal is atomic per token, so every waiter resolves exactly once
/// no matter which side wins.
pub struct WaiterTable {
    entries: DashMap<u32, oneshot::Sender<ResultCode>>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers the waiter for a freshly assigned token.
    pub fn arm(&self, token: u32, waiter: oneshot::Sender<ResultCode>) {
        let previous = self.entries.insert(token, waiter);
        debug_assert!(previous.is_none(), "token {token} already in flight");
    }

    /// Removes the entry for `token` and resolves its waiter with `code`.
    ///
    /// Returns `false` when no entry exists (already resolved by the other
    /// path, or the reply was unsolicited); that case is not an error.
    pub fn complete(&self, token: u32, code: ResultCode) -> bool {
        match self.entries.remove(&token) {
            Some((_, waiter)) => {
                // A dropped receiver just means the caller went away first.
                let _ = waiter.send(code);
                true
            }
            None => false,
        }
    }

    /// Resolves every outstanding waiter with `code` and empties the table.
    pub fn fail_all(&self, code: ResultCode) -> usize {
        let tokens: Vec<u32> = self.entries.iter().map(|entry| *entry.key()).collect();
        tokens
            .into_iter()
            .filter(|&token| self.complete(token, code))
            .count()
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for WaiterTable {
    fn default() -> Self {
        Self::new()
    }
}
