//! A conservative, non-moving, mark-and-sweep garbage collector for a tiny
//! embedded interpreter: one contiguous heap carved into 16-byte blocks,
//! tracked by a packed 2-bit-per-block state table and a 1-bit-per-block
//! finalizer table.
//!
//! Pointers never move, roots are scanned conservatively (any aligned word
//! that lands on the head of an allocation keeps it alive), and the host can
//! bias an allocation toward the short-lived region at the bottom of the
//! heap or the long-lived region at the top.
//!
//! Here's an example of creating a heap over a chunk of memory, allocating
//! from it, and collecting the garbage:
//!
//! ```rust
//! use embergc::{AllocFlags, Heap};
//!
//! let mut data: [u8; 1024] = [0; 1024];
//! let mut h = Heap::from_bytes(&mut data);
//! let p = h.alloc(32, AllocFlags::empty(), false).unwrap();
//! h.collect_start();
//! h.collect_root(&[p.as_ptr() as *const u8]);
//! h.collect_end();
//! assert_eq!(h.nbytes(p.as_ptr() as *const u8), 32);
//! ```

#![no_std]

#[macro_use]
extern crate static_assertions;
#[macro_use]
extern crate bitflags;

#[cfg(test)]
#[macro_use]
extern crate std;

mod block_map;
mod finalizer_map;
mod heap;
mod mark_stack;
mod memory;

pub use self::heap::{Finalizer, Heap, HeapInfo};
pub use self::memory::Memory;

/// how many bytes are in each block of memory?
/// smaller means more overhead wasted for tracking memory. larger means more wasted memory.
pub const BLOCK_SIZE_BYTES: usize = 16;

// block size must be a power of two, so block math stays shifts and masks.
const_assert!(block_size_pow2; BLOCK_SIZE_BYTES & (BLOCK_SIZE_BYTES - 1) == 0);

// block size must be big enough that a permanent-registry node can hold its
// next link plus at least one pointer slot.
const_assert!(block_size; BLOCK_SIZE_BYTES >= 2 * core::mem::size_of::<usize>());

bitflags! {
    /// options for [`Heap::alloc`]
    pub struct AllocFlags: u32 {
        /// run the host finalizer on this object before its memory is reclaimed
        const FINALIZER = 0b0001;
    }
}

// odd that this isn't in the stdlib, but apparently neither is divmod!
fn div_ceil(numerator: usize, denominator: usize) -> usize {
    let floor = numerator / denominator;
    let rem = numerator % denominator;
    if rem == 0 { floor } else { floor + 1 }
}

fn floor_to(n: usize, chunk: usize) -> usize {
    n / chunk * chunk
}
