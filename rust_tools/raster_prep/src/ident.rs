use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Draws allowed before giving up on finding an unused identifier.
pub const MAX_ID_ATTEMPTS: usize = 16;

/// Source of the short identifiers attached to region nodes and staged rasters.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> String;

    /// Number of distinct identifiers the source can produce, when bounded.
    fn capacity(&self) -> Option<u64> {
        None
    }
}

/// Random identifiers: the leading hex digits of a v4 UUID.
#[derive(Debug, Clone)]
pub struct RandomIds {
    width: usize,
}

impl RandomIds {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.clamp(1, 32),
        }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new(4)
    }
}

impl IdSource for RandomIds {
    fn next_id(&self) -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(self.width);
        id
    }

    fn capacity(&self) -> Option<u64> {
        16u64.checked_pow(self.width as u32)
    }
}

/// Zero-padded hex counter, for reproducible runs.
#[derive(Debug)]
pub struct SequentialIds {
    width: usize,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            next: AtomicU64::new(0),
        }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{:0width$x}", n, width = self.width)
    }
}
