//! Reconstruction buffers and the arena that owns pool buffers
//!
//! A [`ReconBuffer`] carries one reconstruction unit worth of bytes plus the
//! identity of the parity stripe it belongs to. Buffers owned by the pool
//! live in a [`BufferArena`] and are addressed by generation-checked
//! [`BufferHandle`]s, so the free lists, the parity stripe table and the full
//! buffer list only ever hold plain handles.

use std::fmt;

// =============================================================================
// Identity
// =============================================================================

/// Key of one reconstruction unit: (parity stripe id, RU index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuKey {
    /// Parity stripe id
    pub stripe_id: u64,
    /// Reconstruction unit within the parity stripe
    pub ru: u32,
}

impl RuKey {
    pub fn new(stripe_id: u64, ru: u32) -> Self {
        Self { stripe_id, ru }
    }
}

impl fmt::Display for RuKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "psid {} ru {}", self.stripe_id, self.ru)
    }
}

/// How a buffer came to exist, which decides what releasing it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    /// Pool buffer not tied to any stripe; recycled on release
    Floating,
    /// Pool buffer earmarked for a specific blocked waiter
    Committed,
    /// Ad hoc buffer from forced reconstruction; freed after use
    Forced,
    /// A worker's private per-column read buffer; never enters the pool
    Exclusive,
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferType::Floating => write!(f, "floating"),
            BufferType::Committed => write!(f, "committed"),
            BufferType::Forced => write!(f, "forced"),
            BufferType::Exclusive => write!(f, "exclusive"),
        }
    }
}

// =============================================================================
// ReconBuffer
// =============================================================================

/// One reconstruction unit worth of data for a single column.
#[derive(Debug, Clone)]
pub struct ReconBuffer {
    /// RAID row this buffer belongs to
    pub row: usize,

    /// Column the data was read from (the failed column once in the pool)
    pub column: usize,

    /// Parity stripe and RU the data contributes to
    pub key: RuKey,

    /// Sector offset on the failed disk where the rebuilt data goes
    pub failed_disk_sector_offset: u64,

    /// Number of columns XORed into this buffer so far
    pub count: usize,

    kind: BufferType,
    data: Vec<u8>,
}

impl ReconBuffer {
    fn with_kind(row: usize, column: usize, kind: BufferType, data: Vec<u8>) -> Self {
        Self {
            row,
            column,
            key: RuKey::new(0, 0),
            failed_disk_sector_offset: 0,
            count: 0,
            kind,
            data,
        }
    }

    /// Private read buffer for the worker reconstructing from `column`.
    pub fn exclusive(row: usize, column: usize, ru_bytes: usize) -> Self {
        Self::with_kind(row, column, BufferType::Exclusive, vec![0u8; ru_bytes])
    }

    /// Ad hoc buffer used when reconstruction of an RU is forced.
    pub fn forced(
        row: usize,
        column: usize,
        key: RuKey,
        failed_disk_sector_offset: u64,
        data: Vec<u8>,
    ) -> Self {
        let mut buffer = Self::with_kind(row, column, BufferType::Forced, data);
        buffer.key = key;
        buffer.failed_disk_sector_offset = failed_disk_sector_offset;
        buffer
    }

    pub(crate) fn floating(row: usize, ru_bytes: usize) -> Self {
        Self::with_kind(row, 0, BufferType::Floating, vec![0u8; ru_bytes])
    }

    /// Point the buffer at the RU its current contents belong to.
    pub fn set_target(&mut self, key: RuKey, failed_disk_sector_offset: u64) {
        self.key = key;
        self.failed_disk_sector_offset = failed_disk_sector_offset;
    }

    /// Buffer type
    #[inline]
    pub fn kind(&self) -> BufferType {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: BufferType) {
        self.kind = kind;
    }

    /// Buffer contents
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable buffer contents
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size of the buffer in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take over `other`'s contents and target, giving it ours in exchange.
    ///
    /// The row stays ours and the column becomes `failed_column`: a pool
    /// buffer that adopts a contribution stands in for the failed disk.
    pub(crate) fn adopt(&mut self, other: &mut ReconBuffer, failed_column: usize) {
        std::mem::swap(&mut self.data, &mut other.data);
        self.column = failed_column;
        self.key = other.key;
        self.failed_disk_sector_offset = other.failed_disk_sector_offset;
    }

    pub(crate) fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub(crate) fn put_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Stable handle to a buffer in a [`BufferArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

impl BufferHandle {
    /// Slot index, for diagnostics
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rbuf#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot {
    Vacant { generation: u32 },
    Resident { generation: u32, buffer: ReconBuffer },
    CheckedOut { generation: u32 },
}

impl Slot {
    fn generation(&self) -> u32 {
        match self {
            Slot::Vacant { generation }
            | Slot::Resident { generation, .. }
            | Slot::CheckedOut { generation } => *generation,
        }
    }
}

/// Owns every pool and forced buffer of one row.
///
/// Any access through a stale or checked-out handle is an invariant
/// violation and panics.
#[derive(Debug, Default)]
pub struct BufferArena {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    resident: usize,
    checked_out: usize,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a buffer and return its handle.
    pub fn insert(&mut self, buffer: ReconBuffer) -> BufferHandle {
        self.resident += 1;
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = slot.generation();
            *slot = Slot::Resident { generation, buffer };
            return BufferHandle { index, generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Resident {
            generation: 0,
            buffer,
        });
        BufferHandle {
            index,
            generation: 0,
        }
    }

    /// Whether `handle` refers to a buffer currently stored here.
    pub fn contains(&self, handle: BufferHandle) -> bool {
        matches!(
            self.slots.get(handle.index as usize),
            Some(Slot::Resident { generation, .. }) if *generation == handle.generation
        )
    }

    pub fn get(&self, handle: BufferHandle) -> &ReconBuffer {
        match self.slots.get(handle.index as usize) {
            Some(Slot::Resident { generation, buffer }) if *generation == handle.generation => {
                buffer
            }
            _ => panic!("stale or checked-out buffer handle {}", handle),
        }
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> &mut ReconBuffer {
        match self.slots.get_mut(handle.index as usize) {
            Some(Slot::Resident { generation, buffer }) if *generation == handle.generation => {
                buffer
            }
            _ => panic!("stale or checked-out buffer handle {}", handle),
        }
    }

    /// Remove a buffer for good. The handle becomes stale.
    pub fn remove(&mut self, handle: BufferHandle) -> ReconBuffer {
        let slot = self.resident_slot(handle);
        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: handle.generation.wrapping_add(1),
            },
        );
        self.vacant.push(handle.index);
        self.resident -= 1;
        match old {
            Slot::Resident { buffer, .. } => buffer,
            _ => unreachable!(),
        }
    }

    /// Move a buffer out while keeping its slot (and handle) reserved.
    pub fn check_out(&mut self, handle: BufferHandle) -> ReconBuffer {
        let slot = self.resident_slot(handle);
        let old = std::mem::replace(
            slot,
            Slot::CheckedOut {
                generation: handle.generation,
            },
        );
        self.resident -= 1;
        self.checked_out += 1;
        match old {
            Slot::Resident { buffer, .. } => buffer,
            _ => unreachable!(),
        }
    }

    /// Return a checked-out buffer to its slot.
    pub fn check_in(&mut self, handle: BufferHandle, buffer: ReconBuffer) {
        let slot = self.checked_out_slot(handle);
        *slot = Slot::Resident {
            generation: handle.generation,
            buffer,
        };
        self.checked_out -= 1;
        self.resident += 1;
    }

    /// Free the slot of a checked-out buffer that will not come back.
    pub fn discard_checked_out(&mut self, handle: BufferHandle) {
        let slot = self.checked_out_slot(handle);
        *slot = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
        };
        self.vacant.push(handle.index);
        self.checked_out -= 1;
    }

    /// Buffers currently stored
    pub fn len(&self) -> usize {
        self.resident
    }

    pub fn is_empty(&self) -> bool {
        self.resident == 0
    }

    /// Buffers handed out to the write-back consumer
    pub fn checked_out(&self) -> usize {
        self.checked_out
    }

    /// Handles of all resident buffers
    pub fn handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Resident { generation, .. } => Some(BufferHandle {
                    index: index as u32,
                    generation: *generation,
                }),
                _ => None,
            })
    }

    fn resident_slot(&mut self, handle: BufferHandle) -> &mut Slot {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot)
                if matches!(slot, Slot::Resident { .. }) && slot.generation() == handle.generation =>
            {
                slot
            }
            _ => panic!("stale or checked-out buffer handle {}", handle),
        }
    }

    fn checked_out_slot(&mut self, handle: BufferHandle) -> &mut Slot {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot)
                if matches!(slot, Slot::CheckedOut { .. })
                    && slot.generation() == handle.generation =>
            {
                slot
            }
            _ => panic!("buffer handle {} is not checked out", handle),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
