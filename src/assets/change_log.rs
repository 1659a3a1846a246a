use super::classify::AssetType;
use super::id::AssetId;
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_CHANGE_LOG_CAPACITY: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Moved,
    Metadata,
}

impl ChangeKind {
    /// Whether products cached for the asset must be dropped.
    pub fn invalidates_cache(self) -> bool {
        matches!(self, ChangeKind::Removed | ChangeKind::Modified | ChangeKind::Moved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetChange {
    pub id: AssetId,
    pub asset_type: AssetType,
    pub kind: ChangeKind,
    pub serial: u64,
}

impl fmt::Display for AssetChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?} {} {}", self.serial, self.kind, self.asset_type, self.id)
    }
}

/// Bounded ring of change events. Serials start at 1 and strictly increase; the oldest events are
/// dropped once the capacity is reached.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    events: VecDeque<AssetChange>,
    capacity: usize,
    last_serial: u64,
}

impl ChangeLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: VecDeque::with_capacity(capacity.min(DEFAULT_CHANGE_LOG_CAPACITY)), capacity, last_serial: 0 }
    }

    pub fn push(&mut self, id: AssetId, asset_type: AssetType, kind: ChangeKind) -> AssetChange {
        self.last_serial += 1;
        let change = AssetChange { id, asset_type, kind, serial: self.last_serial };
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(change);
        change
    }

    /// Events with `serial > after`, ascending.
    pub fn since(&self, after: u64) -> Vec<AssetChange> {
        let start = self.events.partition_point(|change| change.serial <= after);
        self.events.range(start..).copied().collect()
    }

    pub fn last_serial(&self) -> u64 {
        self.last_serial
    }

    /// Serial of the oldest retained event, or the next serial to be issued when empty. A consumer
    /// whose last seen serial is below `oldest_retained() - 1` missed events.
    pub fn oldest_retained(&self) -> u64 {
        self.events.front().map(|change| change.serial).unwrap_or(self.last_serial + 1)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.last_serial = 0;
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_LOG_CAPACITY)
    }
}
