//! Host buffer allocation.
//!
//! The encoder never owns chunk memory. It asks a [`HostAllocator`] for a
//! region, writes the chunk, and hands the region back with
//! [`HostAllocator::notify_ready`]. From that point on reclamation is
//! entirely the host's business.
//!
//! [`HeapAllocator`] is the in-process host: it keeps every region alive
//! until the consumer takes it with [`HeapAllocator::take`] (freeing it on
//! drop) or releases it explicitly.

use std::fmt;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use batchline_common::constants::CHUNK_ALIGNMENT;
use batchline_common::memory::AlignedBuffer;
use batchline_common::types::ChunkAddress;

use crate::error::{ChunkError, ChunkResult};
use crate::reader::ChunkReader;

/// Provider of host-owned chunk memory.
///
/// # Safety
///
/// Implementors guarantee that an address returned by `allocate`:
/// - is never `ChunkAddress::TERMINAL`
/// - points to at least `byte_size` writable, zero-filled bytes
/// - is aligned to [`CHUNK_ALIGNMENT`]
/// - stays valid and is not read, written, moved, or freed by the host until
///   `notify_ready` or `discard` is called for it
pub unsafe trait HostAllocator: Send + Sync {
    /// Reserves a region of `byte_size` bytes.
    fn allocate(&self, byte_size: usize) -> ChunkResult<ChunkAddress>;

    /// Signals that the chunk at `address` is fully written.
    fn notify_ready(&self, address: ChunkAddress);

    /// Returns a region the encoder could not populate.
    fn discard(&self, address: ChunkAddress) {
        let _ = address;
    }
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Regions handed out.
    pub allocations: u64,
    /// Regions marked ready.
    pub notifications: u64,
    /// Regions freed by take, release, or discard.
    pub releases: u64,
    /// Bytes currently held.
    pub bytes_in_use: usize,
}

struct Region {
    buffer: AlignedBuffer,
    ready: bool,
}

/// Heap-backed host allocator.
///
/// # Example
///
/// ```rust
/// use batchline_chunk::allocator::{HeapAllocator, HostAllocator};
///
/// let host = HeapAllocator::new();
/// let address = host.allocate(64).unwrap();
/// assert!(host.take(address).is_none()); // not ready yet
/// host.notify_ready(address);
/// let chunk = host.take(address).unwrap();
/// assert_eq!(chunk.len(), 64);
/// ```
pub struct HeapAllocator {
    regions: DashMap<u64, Region>,
    limit: Option<usize>,
    stats: Mutex<AllocatorStats>,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapAllocator {
    /// Creates an allocator without a byte budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: DashMap::new(),
            limit: None,
            stats: Mutex::new(AllocatorStats::default()),
        }
    }

    /// Creates an allocator that refuses to hold more than `max_bytes`.
    #[must_use]
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            limit: Some(max_bytes),
            ..Self::new()
        }
    }

    /// Moves a ready chunk to the consumer.
    ///
    /// Returns `None` for unknown addresses and for chunks that are still
    /// being written.
    pub fn take(&self, address: ChunkAddress) -> Option<OwnedChunk> {
        let (_, region) = self
            .regions
            .remove_if(&address.as_u64(), |_, region| region.ready)?;
        self.record_release(region.buffer.len());
        Some(OwnedChunk {
            address,
            buffer: region.buffer,
        })
    }

    /// Frees a ready chunk without reading it.
    ///
    /// Returns false for unknown addresses and for chunks that are still
    /// being written; those belong to the encoder until `notify_ready` or
    /// `discard`.
    pub fn release(&self, address: ChunkAddress) -> bool {
        self.remove_where(address, |region| region.ready)
    }

    /// Returns true if the chunk at `address` has been marked ready.
    pub fn is_ready(&self, address: ChunkAddress) -> bool {
        self.regions
            .get(&address.as_u64())
            .is_some_and(|region| region.ready)
    }

    /// Number of regions currently held.
    pub fn outstanding(&self) -> usize {
        self.regions.len()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> AllocatorStats {
        *self.stats.lock()
    }

    fn remove_where(&self, address: ChunkAddress, predicate: impl Fn(&Region) -> bool) -> bool {
        match self
            .regions
            .remove_if(&address.as_u64(), |_, region| predicate(region))
        {
            Some((_, region)) => {
                self.record_release(region.buffer.len());
                true
            }
            None => false,
        }
    }

    fn record_release(&self, bytes: usize) {
        let mut stats = self.stats.lock();
        stats.releases += 1;
        stats.bytes_in_use = stats.bytes_in_use.saturating_sub(bytes);
    }
}

// SAFETY: regions come from `AlignedBuffer`, which is zero-filled, aligned to
// CHUNK_ALIGNMENT and never moves. A pending region is only dropped by
// `discard`; take and release require `notify_ready` first.
unsafe impl HostAllocator for HeapAllocator {
    fn allocate(&self, byte_size: usize) -> ChunkResult<ChunkAddress> {
        {
            let mut stats = self.stats.lock();
            if let Some(limit) = self.limit {
                if stats.bytes_in_use + byte_size > limit {
                    return Err(ChunkError::Allocation {
                        size: byte_size,
                        reason: format!("budget of {limit} bytes exhausted"),
                    });
                }
            }
            stats.allocations += 1;
            stats.bytes_in_use += byte_size;
        }

        let buffer = match AlignedBuffer::new(byte_size, CHUNK_ALIGNMENT) {
            Ok(buffer) => buffer,
            Err(e) => {
                let mut stats = self.stats.lock();
                stats.allocations -= 1;
                stats.bytes_in_use -= byte_size;
                return Err(ChunkError::Allocation {
                    size: byte_size,
                    reason: e.to_string(),
                });
            }
        };
        let address = ChunkAddress::from_ptr(buffer.as_ptr());
        debug!(%address, byte_size, "allocated chunk region");
        self.regions.insert(
            address.as_u64(),
            Region {
                buffer,
                ready: false,
            },
        );
        Ok(address)
    }

    fn notify_ready(&self, address: ChunkAddress) {
        match self.regions.get_mut(&address.as_u64()) {
            Some(mut region) => {
                region.ready = true;
                self.stats.lock().notifications += 1;
            }
            None => warn!(%address, "ready notification for unknown chunk"),
        }
    }

    fn discard(&self, address: ChunkAddress) {
        if !self.remove_where(address, |_| true) {
            warn!(%address, "discard of unknown chunk");
        }
    }
}

impl fmt::Debug for HeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("outstanding", &self.regions.len())
            .field("limit", &self.limit)
            .finish()
    }
}

/// A chunk taken from a [`HeapAllocator`]. The memory is freed on drop.
#[derive(Debug)]
pub struct OwnedChunk {
    address: ChunkAddress,
    buffer: AlignedBuffer,
}

impl OwnedChunk {
    /// The address the chunk was delivered under.
    #[must_use]
    pub fn address(&self) -> ChunkAddress {
        self.address
    }

    /// Size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true for an empty region.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The raw chunk bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Parses the chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Malformed`] if the layout is invalid.
    pub fn reader(&self) -> ChunkResult<ChunkReader<'_>> {
        ChunkReader::new(self.as_bytes())
    }
}
