//! Disk Request Queues
//!
//! Per-disk queues that order pending requests to minimise head movement.
//! Reconstruction reads are usually enqueued at low priority so foreground
//! I/O is served first; a reconstruction worker that needs a specific RU
//! right away can promote its low-priority requests.
//!
//! # Disciplines
//!
//! ```text
//!            last_sector
//!                 │
//!   left  ◀───────┼───────▶  right          low
//!   [.. 10 ..]    │    [50 .. 80 ..]       [..]
//!
//!   sstf : nearer of left tail / right head
//!   scan : sweep right until empty, then sweep left
//!   cscan: sweep right; when empty, rewind to the lowest left entry
//!   fifo : arrival order
//! ```
//!
//! Low-priority entries are only served when both normal sides are empty.

pub mod fifo;
pub mod seek;

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};
use crate::recon::RuKey;

pub use fifo::FifoQueue;
pub use seek::SeekQueue;

// =============================================================================
// Request Types
// =============================================================================

/// Request priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Low,
}

/// Preferred direction of head travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Either,
}

/// Head position and sweep state of one disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmState {
    /// Sector of the most recently dequeued request
    pub last_sector: u64,
    pub dir: Direction,
    /// Whether the low queue may be served against `dir`
    pub allow_reverse: bool,
}

/// A queued disk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskQueueEntry<T> {
    pub sector: u64,
    pub priority: Priority,
    /// Parity stripe and RU the request belongs to, for promotion
    pub key: RuKey,
    pub payload: T,
}

impl<T> DiskQueueEntry<T> {
    pub fn new(sector: u64, priority: Priority, key: RuKey, payload: T) -> Self {
        Self {
            sector,
            priority,
            key,
            payload,
        }
    }

    pub fn normal(sector: u64, key: RuKey, payload: T) -> Self {
        Self::new(sector, Priority::Normal, key, payload)
    }

    pub fn low(sector: u64, key: RuKey, payload: T) -> Self {
        Self::new(sector, Priority::Low, key, payload)
    }
}

// =============================================================================
// Discipline Selection
// =============================================================================

/// Scheduling discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDiscipline {
    #[default]
    Sstf,
    Scan,
    Cscan,
    Fifo,
}

impl QueueDiscipline {
    /// Arm state a fresh queue of this discipline starts from.
    pub fn default_arm(&self) -> ArmState {
        let (dir, allow_reverse) = match self {
            QueueDiscipline::Sstf | QueueDiscipline::Fifo => (Direction::Either, true),
            QueueDiscipline::Scan => (Direction::Right, true),
            QueueDiscipline::Cscan => (Direction::Right, false),
        };
        ArmState {
            last_sector: 0,
            dir,
            allow_reverse,
        }
    }
}

impl fmt::Display for QueueDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueDiscipline::Sstf => write!(f, "sstf"),
            QueueDiscipline::Scan => write!(f, "scan"),
            QueueDiscipline::Cscan => write!(f, "cscan"),
            QueueDiscipline::Fifo => write!(f, "fifo"),
        }
    }
}

impl FromStr for QueueDiscipline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sstf" => Ok(QueueDiscipline::Sstf),
            "scan" => Ok(QueueDiscipline::Scan),
            "cscan" => Ok(QueueDiscipline::Cscan),
            "fifo" => Ok(QueueDiscipline::Fifo),
            other => Err(Error::InvalidConfig(format!(
                "unknown queue discipline '{}' (expected sstf, scan, cscan or fifo)",
                other
            ))),
        }
    }
}

/// Queue configuration. Unset arm fields take the discipline's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskQueueConfig {
    pub discipline: QueueDiscipline,
    /// Initial head position
    pub start_sector: u64,
    pub direction: Option<Direction>,
    pub allow_reverse: Option<bool>,
}

impl DiskQueueConfig {
    pub fn new(discipline: QueueDiscipline) -> Self {
        Self {
            discipline,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.discipline == QueueDiscipline::Cscan
            && matches!(self.direction, Some(Direction::Left | Direction::Either))
        {
            return Err(Error::InvalidConfig(
                "cscan only sweeps right".into(),
            ));
        }
        Ok(())
    }

    /// Initial arm state after applying overrides
    pub fn arm(&self) -> ArmState {
        let defaults = self.discipline.default_arm();
        ArmState {
            last_sector: self.start_sector,
            dir: self.direction.unwrap_or(defaults.dir),
            allow_reverse: self.allow_reverse.unwrap_or(defaults.allow_reverse),
        }
    }

    /// Build the queue this configuration describes.
    pub fn build<T: Send + 'static>(&self) -> Result<Box<dyn DiskQueue<T>>> {
        self.validate()?;
        let arm = self.arm();
        Ok(match self.discipline {
            QueueDiscipline::Fifo => Box::new(FifoQueue::with_arm(arm)),
            seek => Box::new(SeekQueue::with_arm(seek, arm)),
        })
    }
}

// =============================================================================
// Queue Trait
// =============================================================================

/// A single disk's request queue. Not synchronised; see
/// [`DiskRequestQueue`] for the shared wrapper.
pub trait DiskQueue<T>: Send {
    fn discipline(&self) -> QueueDiscipline;

    /// Queue a request according to its priority.
    fn enqueue(&mut self, entry: DiskQueueEntry<T>);

    /// Remove the next request and move the arm to it.
    fn dequeue(&mut self) -> Option<DiskQueueEntry<T>>;

    /// The request `dequeue` would return, without side effects.
    fn peek(&self) -> Option<&DiskQueueEntry<T>>;

    /// Raise every low-priority request for (stripe_id, ru) to normal
    /// priority. Returns how many moved.
    fn promote(&mut self, stripe_id: u64, ru: u32) -> usize;

    /// Requests queued at any priority
    fn len(&self) -> usize;

    /// Requests queued at low priority
    fn low_len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn arm(&self) -> ArmState;
}

// =============================================================================
// Shared Queue
// =============================================================================

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub low_depth: usize,
    pub enqueued: u64,
    pub dequeued: u64,
    pub promoted: u64,
}

struct QueueInner<T> {
    queue: Box<dyn DiskQueue<T>>,
    enqueued: u64,
    dequeued: u64,
    promoted: u64,
}

/// Thread-safe request queue for one disk.
///
/// Any number of producers may enqueue; a single service loop consumes with
/// [`next`](Self::next) or [`dequeue`](Self::dequeue).
pub struct DiskRequestQueue<T> {
    column: usize,
    inner: Mutex<QueueInner<T>>,
    ready: Notify,
}

impl<T: Send + 'static> DiskRequestQueue<T> {
    pub fn new(column: usize, config: &DiskQueueConfig) -> Result<Self> {
        let queue = config.build()?;
        debug!(
            "Created {} queue for column {} at sector {}",
            config.discipline, column, config.start_sector
        );
        Ok(Self {
            column,
            inner: Mutex::new(QueueInner {
                queue,
                enqueued: 0,
                dequeued: 0,
                promoted: 0,
            }),
            ready: Notify::new(),
        })
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.inner.lock().queue.discipline()
    }

    pub fn enqueue(&self, entry: DiskQueueEntry<T>) {
        {
            let mut inner = self.inner.lock();
            inner.queue.enqueue(entry);
            inner.enqueued += 1;
        }
        self.ready.notify_one();
    }

    pub fn dequeue(&self) -> Option<DiskQueueEntry<T>> {
        let mut inner = self.inner.lock();
        let entry = inner.queue.dequeue()?;
        inner.dequeued += 1;
        Some(entry)
    }

    /// Wait for the next request.
    pub async fn next(&self) -> DiskQueueEntry<T> {
        loop {
            let notified = self.ready.notified();
            if let Some(entry) = self.dequeue() {
                return entry;
            }
            notified.await;
        }
    }

    /// Inspect the request `dequeue` would return.
    pub fn peek_with<R>(&self, f: impl FnOnce(&DiskQueueEntry<T>) -> R) -> Option<R> {
        let inner = self.inner.lock();
        inner.queue.peek().map(f)
    }

    pub fn promote(&self, stripe_id: u64, ru: u32) -> usize {
        let moved = {
            let mut inner = self.inner.lock();
            let moved = inner.queue.promote(stripe_id, ru);
            inner.promoted += moved as u64;
            moved
        };
        if moved > 0 {
            debug!(
                "Promoted {} requests for psid {} ru {} on column {}",
                moved, stripe_id, ru, self.column
            );
        }
        moved
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn arm(&self) -> ArmState {
        self.inner.lock().queue.arm()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            depth: inner.queue.len(),
            low_depth: inner.queue.low_len(),
            enqueued: inner.enqueued,
            dequeued: inner.dequeued,
            promoted: inner.promoted,
        }
    }
}

impl<T> fmt::Debug for DiskRequestQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DiskRequestQueue")
            .field("column", &self.column)
            .field("discipline", &inner.queue.discipline())
            .field("depth", &inner.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[test]
    fn test_discipline_from_str() {
        assert_eq!("sstf".parse::<QueueDiscipline>().unwrap(), QueueDiscipline::Sstf);
        assert_eq!("SCAN".parse::<QueueDiscipline>().unwrap(), QueueDiscipline::Scan);
        assert_eq!("cscan".parse::<QueueDiscipline>().unwrap(), QueueDiscipline::Cscan);
        assert_eq!("fifo".parse::<QueueDiscipline>().unwrap(), QueueDiscipline::Fifo);
        assert_matches!(
            "elevator".parse::<QueueDiscipline>(),
            Err(Error::InvalidConfig(_))
        );
    }

    #[test]
    fn test_default_arms() {
        let sstf = QueueDiscipline::Sstf.default_arm();
        assert_eq!((sstf.dir, sstf.allow_reverse), (Direction::Either, true));
        let scan = QueueDiscipline::Scan.default_arm();
        assert_eq!((scan.dir, scan.allow_reverse), (Direction::Right, true));
        let cscan = QueueDiscipline::Cscan.default_arm();
        assert_eq!((cscan.dir, cscan.allow_reverse), (Direction::Right, false));
    }

    #[test]
    fn test_config_overrides() {
        let config = DiskQueueConfig {
            discipline: QueueDiscipline::Sstf,
            start_sector: 40,
            direction: Some(Direction::Right),
            allow_reverse: Some(false),
        };
        let arm = config.arm();
        assert_eq!(arm.last_sector, 40);
        assert_eq!(arm.dir, Direction::Right);
        assert!(!arm.allow_reverse);

        let bad = DiskQueueConfig {
            direction: Some(Direction::Left),
            ..DiskQueueConfig::new(QueueDiscipline::Cscan)
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let config: DiskQueueConfig =
            serde_yaml::from_str("discipline: cscan\nstart_sector: 20\n").unwrap();
        assert_eq!(config.discipline, QueueDiscipline::Cscan);
        assert_eq!(config.arm().dir, Direction::Right);
        assert_eq!(config.arm().last_sector, 20);
    }

    #[test]
    fn test_shared_queue_stats() {
        let queue: DiskRequestQueue<u32> =
            DiskRequestQueue::new(2, &DiskQueueConfig::new(QueueDiscipline::Sstf)).unwrap();
        queue.enqueue(DiskQueueEntry::normal(10, RuKey::new(1, 0), 1));
        queue.enqueue(DiskQueueEntry::low(20, RuKey::new(2, 0), 2));
        queue.enqueue(DiskQueueEntry::low(30, RuKey::new(2, 0), 3));

        assert_eq!(queue.peek_with(|e| e.sector), Some(10));
        assert_eq!(queue.promote(2, 0), 2);
        assert_eq!(queue.dequeue().unwrap().payload, 1);

        let stats = queue.stats();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.low_depth, 0);
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dequeued, 1);
        assert_eq!(stats.promoted, 2);
        assert_eq!(queue.arm().last_sector, 10);
    }

    #[tokio::test]
    async fn test_next_waits_for_enqueue() {
        let queue: Arc<DiskRequestQueue<&'static str>> =
            Arc::new(DiskRequestQueue::new(0, &DiskQueueConfig::new(QueueDiscipline::Fifo)).unwrap());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await.payload })
        };
        tokio::task::yield_now().await;
        queue.enqueue(DiskQueueEntry::normal(7, RuKey::new(0, 0), "read"));

        assert_eq!(consumer.await.unwrap(), "read");
        assert!(queue.is_empty());
    }
}
