use core::fmt;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use log::trace;

use crate::{AllocFlags, BLOCK_SIZE_BYTES, div_ceil, floor_to};
use crate::block_map::{BlockKind, BlockMap, BLOCKS_PER_ATB_BYTE};
use crate::finalizer_map::{FinalizerMap, BLOCKS_PER_FTB_BYTE};
use crate::mark_stack::MarkStack;
use crate::memory::Memory;

// allocations up to this many blocks each get their own "first free" scan
// hint; bigger requests share the last bucket's.
const FIRST_FREE_BUCKETS: usize = 8;

// pointer slots in one permanent-registry node (slot 0 is the next link).
const REGISTRY_SLOTS: usize = BLOCK_SIZE_BYTES / size_of::<*const u8>();

/// The host callback that runs an object's finalizer, given the object's
/// address. Invoked from the sweep with the heap locked, so any allocation
/// it attempts returns `None`; it must not unwind into the collector.
pub type Finalizer = fn(*mut u8);

/// Stats returned from [`Heap::info`](struct.Heap.html#method.info).
#[derive(Debug, PartialEq)]
pub struct HeapInfo {
    /// bytes in the block pool: provided memory minus table overhead
    pub total_bytes: usize,

    /// bytes in blocks currently allocated
    pub used_bytes: usize,

    /// bytes in blocks free for future allocations
    pub free_bytes: usize,

    /// longest run of free blocks, in blocks
    pub max_free: usize,

    /// how many allocations are exactly one block long
    pub num_1block: usize,

    /// how many allocations are exactly two blocks long
    pub num_2block: usize,

    /// longest allocation, in blocks
    pub max_block: usize,

    /// for testing & debugging: the extent of the pool
    pub start: *const u8,

    /// for testing & debugging: the extent of the pool
    pub end: *const u8,
}

/// Takes ownership of a region of [`Memory`](struct.Memory.html), carves it
/// into an allocation table, a finalizer table, and a pool of fixed-size
/// blocks, and garbage collects unreachable allocations on demand.
///
/// Each block has a 2-bit state in the allocation table: free, the head of
/// an allocation, a tail continuing one, or a head reached by the current
/// mark phase. The collector is conservative: a root is any pointer-sized
/// word that, interpreted as an address, lands block-aligned on a head.
/// Nothing is ever moved by a collection, so pointers stay valid across it.
///
/// The heap is split into two regions by a watermark that starts at the top
/// and follows the lowest long-lived allocation down: short-lived
/// allocations scan forward from the bottom, long-lived allocations scan
/// backward from the top. Churn stays compacted at the bottom and the
/// stable objects at the top stay out of its way.
pub struct Heap<'heap> {
    atb: BlockMap<'heap>,
    ftb: FinalizerMap<'heap>,
    pool_start: *mut u8,
    pool_end: *mut u8,

    // scan hints. loose bounds, not truth: a bucket's entry may point
    // earlier than the first free run of that size, never later.
    first_free_atb: [usize; FIRST_FREE_BUCKETS],
    last_free_atb: usize,

    // everything at or above this address is the long-lived region.
    lowest_long_lived: *const u8,

    // gc state:
    mark_stack: MarkStack,
    lock_depth: usize,
    bytes_allocated: usize,
    threshold: Option<usize>,

    // host-registered word ranges scanned as roots at every collection.
    vm_roots: Option<(*const *const u8, usize)>,
    stack_roots: Option<(*const *const u8, usize)>,

    // head of the in-heap chain of never-free nodes (null when empty).
    permanent: *const u8,

    finalizer: Option<Finalizer>,
}

impl<'heap> Heap<'heap> {
    /// Create a new heap out of a mutable chunk of memory. The region is
    /// trimmed to block alignment at both ends, then carved into
    /// `[ allocation table | finalizer table | pool ]` with the pool kept
    /// end-aligned and the table sized as large as the region allows.
    pub fn new(m: Memory<'heap>) -> Heap<'heap> {
        let m = m.align_up(BLOCK_SIZE_BYTES);
        let total = floor_to(m.len(), BLOCK_SIZE_BYTES);

        // one table byte accounts for itself, half a finalizer byte, and
        // four pool blocks. start from that ratio, then nudge to the
        // largest size that fits exactly.
        let mut atb_len = total * 2 / (2 + 1 + 2 * BLOCKS_PER_ATB_BYTE * BLOCK_SIZE_BYTES);
        while atb_len > 0 && !Heap::fits(atb_len, total) { atb_len -= 1 }
        while Heap::fits(atb_len + 1, total) { atb_len += 1 }

        let ftb_len = div_ceil(atb_len * BLOCKS_PER_ATB_BYTE, BLOCKS_PER_FTB_BYTE);
        let pool_len = atb_len * BLOCKS_PER_ATB_BYTE * BLOCK_SIZE_BYTES;

        let m = m.truncate(total);
        let (atb_mem, rest) = m.split_at(atb_len);
        let (ftb_mem, rest) = rest.split_at(ftb_len);
        // any slack lands between the tables and the pool, so the pool
        // stays end-aligned.
        let slack = rest.len() - pool_len;
        let (_, pool) = rest.split_at(slack);

        let pool_start = pool.start() as *mut u8;
        let pool_end = pool.end() as *mut u8;

        Heap {
            atb: BlockMap::new(atb_mem),
            ftb: FinalizerMap::new(ftb_mem),
            pool_start,
            pool_end,
            first_free_atb: [0; FIRST_FREE_BUCKETS],
            last_free_atb: atb_len.saturating_sub(1),
            lowest_long_lived: pool_end,
            mark_stack: MarkStack::new(),
            lock_depth: 0,
            bytes_allocated: 0,
            threshold: None,
            vm_roots: None,
            stack_roots: None,
            permanent: ptr::null(),
            finalizer: None,
        }
    }

    /// Create a new heap out of a mutable byte-slice.
    pub fn from_bytes(bytes: &'heap mut [u8]) -> Heap<'heap> {
        Heap::new(Memory::new(bytes))
    }

    fn fits(atb_len: usize, total: usize) -> bool {
        let ftb_len = div_ceil(atb_len * BLOCKS_PER_ATB_BYTE, BLOCKS_PER_FTB_BYTE);
        atb_len + ftb_len + atb_len * BLOCKS_PER_ATB_BYTE * BLOCK_SIZE_BYTES <= total
    }

    #[inline]
    fn total_blocks(&self) -> usize {
        self.atb.len()
    }

    #[inline]
    fn ptr_of(&self, block: usize) -> *mut u8 {
        ((self.pool_start as usize) + block * BLOCK_SIZE_BYTES) as *mut u8
    }

    // conservative pointer test: in the pool, block-aligned. the caller
    // checks what state the block is in.
    fn block_of(&self, p: *const u8) -> Option<usize> {
        let (p, start, end) = (p as usize, self.pool_start as usize, self.pool_end as usize);
        if p < start || p >= end { return None }
        let offset = p - start;
        if offset & (BLOCK_SIZE_BYTES - 1) != 0 { return None }
        Some(offset / BLOCK_SIZE_BYTES)
    }

    fn head_of(&self, p: *const u8) -> Option<usize> {
        self.block_of(p).filter(|&b| self.atb.get(b) == BlockKind::Head)
    }

    // the block index of the short-lived / long-lived boundary.
    fn crossover_block(&self) -> usize {
        ((self.lowest_long_lived as usize) - (self.pool_start as usize)) / BLOCK_SIZE_BYTES
    }

    /// Register the interpreter's root section: `len` pointer-sized words
    /// starting at `ptrs`, scanned conservatively at every collection.
    ///
    /// # Safety
    /// The range must be readable for as long as this heap exists.
    pub unsafe fn set_root_range(&mut self, ptrs: *const *const u8, len: usize) {
        self.vm_roots = Some((ptrs, len));
    }

    /// Register an auxiliary stack range scanned the same way as the root
    /// section.
    ///
    /// # Safety
    /// The range must be readable for as long as this heap exists.
    pub unsafe fn set_stack_range(&mut self, ptrs: *const *const u8, len: usize) {
        self.stack_roots = Some((ptrs, len));
    }

    /// Install the host callback that runs an object's finalizer.
    pub fn set_finalizer(&mut self, finalizer: Finalizer) {
        self.finalizer = Some(finalizer);
    }

    /// Collect automatically once this many bytes have been allocated since
    /// the last collection. `None` turns the trigger off.
    pub fn set_threshold(&mut self, threshold: Option<usize>) {
        self.threshold = threshold;
    }

    /// Request `n_bytes` of memory, rounded up to a whole number of blocks
    /// and zeroed. Returns `None` for a zero-size request, while the heap
    /// is locked, or if no run of free blocks can be found even after a
    /// collection.
    ///
    /// `long_lived` biases placement: short-lived allocations are placed
    /// bottom-up, long-lived ones top-down. When a scan would have to
    /// cross into the other region, one collection is run first to try to
    /// make room on the proper side.
    ///
    /// `AllocFlags::FINALIZER` marks the new head in the finalizer table;
    /// the object's first word (its type tag) starts out null, and the
    /// sweep skips the finalizer until the host fills it in.
    pub fn alloc(&mut self, n_bytes: usize, flags: AllocFlags, long_lived: bool) -> Option<NonNull<u8>> {
        if n_bytes == 0 { return None }
        if self.lock_depth > 0 { return None }

        let n_blocks = div_ceil(n_bytes, BLOCK_SIZE_BYTES);

        let mut collected = false;
        if let Some(threshold) = self.threshold {
            if self.bytes_allocated >= threshold {
                self.collect();
                collected = true;
            }
        }

        let start_block = loop {
            let found = if long_lived {
                self.scan_reverse(n_blocks, collected)
            } else {
                self.scan_forward(n_blocks, collected)
            };
            match found {
                Some(block) => break block,
                None if collected => {
                    trace!("alloc {} bytes: no space", n_bytes);
                    return None;
                }
                None => {
                    self.collect();
                    collected = true;
                }
            }
        };

        self.atb.free_to_head(start_block);
        for b in (start_block + 1)..(start_block + n_blocks) {
            self.atb.free_to_tail(b);
        }

        if long_lived {
            // the next reverse scan can start just below this run.
            self.last_free_atb = start_block.saturating_sub(1) / BLOCKS_PER_ATB_BYTE;
        } else {
            // no free run of this size (or larger) exists before this one
            // anymore, so those buckets can all start after it.
            let hint = (start_block + n_blocks) / BLOCKS_PER_ATB_BYTE;
            for bucket in (n_blocks - 1)..FIRST_FREE_BUCKETS {
                self.first_free_atb[bucket] = hint;
            }
        }

        let p = self.ptr_of(start_block);
        if long_lived && (p as *const u8) < self.lowest_long_lived {
            self.lowest_long_lived = p;
        }

        // zero the whole allocation, so stale pointer-shaped bits can't
        // keep unrelated objects alive through a conservative scan.
        unsafe { ptr::write_bytes(p, 0, n_blocks * BLOCK_SIZE_BYTES) }

        if flags.contains(AllocFlags::FINALIZER) {
            self.ftb.set(start_block);
        }

        self.bytes_allocated += n_blocks * BLOCK_SIZE_BYTES;
        trace!("alloc {} bytes -> block {} ({} blocks)", n_bytes, start_block, n_blocks);
        NonNull::new(p)
    }

    // forward scan of the allocation table for a run of `n_blocks` free
    // blocks, for a short-lived allocation. `collected` means a collection
    // has already happened during this allocation, so the scan is allowed
    // to start a run inside the long-lived region.
    fn scan_forward(&self, n_blocks: usize, collected: bool) -> Option<usize> {
        let bucket = n_blocks.min(FIRST_FREE_BUCKETS) - 1;
        let crossover = self.crossover_block();
        let start = self.first_free_atb[bucket] * BLOCKS_PER_ATB_BYTE;
        let end = ((self.last_free_atb + 1) * BLOCKS_PER_ATB_BYTE).min(self.total_blocks());
        let mut n_free = 0;
        for i in start..end {
            if self.atb.get(i) != BlockKind::Free {
                n_free = 0;
                continue;
            }
            if n_free == 0 && !collected && i >= crossover { return None }
            n_free += 1;
            if n_free == n_blocks { return Some(i + 1 - n_blocks) }
        }
        None
    }

    // reverse scan from the top of the heap, for a long-lived allocation.
    // returns the lowest block of the found run.
    fn scan_reverse(&self, n_blocks: usize, collected: bool) -> Option<usize> {
        let bucket = n_blocks.min(FIRST_FREE_BUCKETS) - 1;
        let crossover = self.crossover_block();
        let low = self.first_free_atb[bucket] * BLOCKS_PER_ATB_BYTE;
        let high = ((self.last_free_atb + 1) * BLOCKS_PER_ATB_BYTE).min(self.total_blocks());
        let mut n_free = 0;
        for i in (low..high).rev() {
            if self.atb.get(i) != BlockKind::Free {
                n_free = 0;
                continue;
            }
            if n_free == 0 && !collected && i < crossover { return None }
            n_free += 1;
            if n_free == n_blocks { return Some(i) }
        }
        None
    }

    /// Return an allocation to the free pool. An invalid pointer is
    /// ignored. While the heap is locked this does nothing; the block is
    /// reclaimed by the next collection at the earliest, and callers get
    /// no stronger promise than that.
    pub fn free(&mut self, p: *const u8) {
        if self.lock_depth > 0 { return }
        let block = match self.block_of(p) {
            Some(block) => block,
            None => return,
        };
        // freeing a tail, a free block (double free), or mid-collection
        // garbage is a caller bug.
        debug_assert!(self.atb.get(block) == BlockKind::Head);
        if self.atb.get(block) != BlockKind::Head { return }
        self.ftb.clear(block);
        let n_blocks = self.atb.chain_len(block);
        for b in block..(block + n_blocks) {
            self.atb.any_to_free(b);
        }
        trace!("free block {} ({} blocks)", block, n_blocks);
        // loosen the hints so the next scans can see this run. a run of
        // this length also serves every smaller request.
        let atb_index = block / BLOCKS_PER_ATB_BYTE;
        for bucket in 0..n_blocks.min(FIRST_FREE_BUCKETS) {
            if atb_index < self.first_free_atb[bucket] {
                self.first_free_atb[bucket] = atb_index;
            }
        }
        if atb_index > self.last_free_atb {
            self.last_free_atb = atb_index;
        }
    }

    /// How many bytes are allocated to the object at `p`? Zero if `p` is
    /// not a live allocation on this heap.
    pub fn nbytes(&self, p: *const u8) -> usize {
        match self.head_of(p) {
            Some(block) => self.atb.chain_len(block) * BLOCK_SIZE_BYTES,
            None => 0,
        }
    }

    /// Does the allocation at `p` have its finalizer bit set?
    pub fn has_finalizer(&self, p: *const u8) -> bool {
        self.head_of(p).map_or(false, |block| self.ftb.get(block))
    }

    /// Resize an allocation. A null `p` is a plain allocation; a zero
    /// `n_bytes` is a free. Shrinking always happens in place. Growing
    /// happens in place when enough free blocks follow; otherwise, if
    /// `allow_move` is set, the object is copied to a fresh allocation
    /// (keeping its finalizer bit) and the old one freed. Returns `None`
    /// when the space can't be found, or while the heap is locked.
    ///
    /// A move can trigger a collection, so the caller must keep the old
    /// object reachable as a root until the call returns.
    pub fn realloc(&mut self, p: *const u8, n_bytes: usize, allow_move: bool) -> Option<NonNull<u8>> {
        if p.is_null() { return self.alloc(n_bytes, AllocFlags::empty(), false) }
        if n_bytes == 0 {
            self.free(p);
            return None;
        }
        if self.lock_depth > 0 { return None }

        let block = self.head_of(p)?;
        let old_blocks = self.atb.chain_len(block);
        let new_blocks = div_ceil(n_bytes, BLOCK_SIZE_BYTES);

        if new_blocks == old_blocks {
            return NonNull::new(p as *mut u8);
        }

        if new_blocks < old_blocks {
            // drop the trailing tails and let the hints see them.
            for b in (block + new_blocks)..(block + old_blocks) {
                self.atb.any_to_free(b);
            }
            let atb_index = (block + new_blocks) / BLOCKS_PER_ATB_BYTE;
            for bucket in 0..(old_blocks - new_blocks).min(FIRST_FREE_BUCKETS) {
                if atb_index < self.first_free_atb[bucket] {
                    self.first_free_atb[bucket] = atb_index;
                }
            }
            if atb_index > self.last_free_atb {
                self.last_free_atb = atb_index;
            }
            return NonNull::new(p as *mut u8);
        }

        // count free blocks directly after the chain, stopping at the end
        // of the pool.
        let mut n_free = 0;
        while old_blocks + n_free < new_blocks
            && block + old_blocks + n_free < self.total_blocks()
            && self.atb.get(block + old_blocks + n_free) == BlockKind::Free {
            n_free += 1;
        }
        if old_blocks + n_free >= new_blocks {
            // grow in place: claim the following free blocks as tails.
            for b in (block + old_blocks)..(block + new_blocks) {
                self.atb.free_to_tail(b);
            }
            let grown = self.ptr_of(block + old_blocks);
            unsafe { ptr::write_bytes(grown, 0, (new_blocks - old_blocks) * BLOCK_SIZE_BYTES) }
            return NonNull::new(p as *mut u8);
        }

        if !allow_move { return None }

        let flags = if self.ftb.get(block) { AllocFlags::FINALIZER } else { AllocFlags::empty() };
        let fresh = self.alloc(n_bytes, flags, false)?;
        unsafe { ptr::copy_nonoverlapping(p, fresh.as_ptr(), old_blocks * BLOCK_SIZE_BYTES) }
        self.free(p);
        Some(fresh)
    }

    /// Move an object into the long-lived region, if that would place it
    /// higher in the heap; otherwise return it unchanged. The old copy is
    /// left for the next collection to reclaim, so the caller must
    /// guarantee no references to the old address remain, interior ones
    /// included.
    pub fn make_long_lived(&mut self, p: *mut u8) -> *mut u8 {
        if p as *const u8 >= self.lowest_long_lived { return p }
        let n_bytes = self.nbytes(p);
        if n_bytes == 0 { return p }

        let flags = if self.has_finalizer(p) { AllocFlags::FINALIZER } else { AllocFlags::empty() };
        let fresh = match self.alloc(n_bytes, flags, true) {
            Some(fresh) => fresh.as_ptr(),
            None => return p,
        };
        if fresh as usize <= p as usize {
            // no closer to the long-lived region than it already was.
            self.free(fresh);
            return p;
        }
        unsafe { ptr::copy_nonoverlapping(p, fresh, n_bytes) }
        fresh
    }

    /// Keep the object at `p` alive unconditionally, forever. Returns
    /// false if `p` is not a live allocation, or if a registry node was
    /// needed and couldn't be allocated.
    ///
    /// The registry lives on the heap itself, as a chain of block-sized
    /// nodes. It isn't special-cased out of the sweep; it survives only
    /// because the head of the chain is marked as a root at every
    /// collection.
    pub fn never_free(&mut self, p: *const u8) -> bool {
        if self.head_of(p).is_none() { return false }

        // walk the chain looking for an empty slot.
        let mut node = self.permanent as *mut *const u8;
        let mut last: *mut *const u8 = ptr::null_mut();
        while !node.is_null() {
            for i in 1..REGISTRY_SLOTS {
                unsafe {
                    if (*node.add(i)).is_null() {
                        *node.add(i) = p;
                        return true;
                    }
                }
            }
            last = node;
            node = unsafe { *node } as *mut *const u8;
        }

        // every node is full: link in a fresh long-lived one. it comes
        // back zeroed, so its slots are already empty.
        let fresh = match self.alloc(BLOCK_SIZE_BYTES, AllocFlags::empty(), true) {
            Some(fresh) => fresh.as_ptr() as *mut *const u8,
            None => return false,
        };
        unsafe { *fresh.add(1) = p }
        if last.is_null() {
            self.permanent = fresh as *const u8;
        } else {
            unsafe { *last = fresh as *const u8 }
        }
        true
    }

    /// Run a full collection: mark everything reachable from the
    /// registered root ranges and the permanent registry, then sweep.
    pub fn collect(&mut self) {
        self.collect_start();
        self.collect_end();
    }

    /// Begin a collection: lock the heap and mark the registered roots.
    /// The host may submit more roots with
    /// [`collect_root`](struct.Heap.html#method.collect_root) and
    /// [`collect_ptr`](struct.Heap.html#method.collect_ptr) before calling
    /// [`collect_end`](struct.Heap.html#method.collect_end).
    pub fn collect_start(&mut self) {
        trace!("collect start");
        self.lock_depth += 1;
        self.mark_stack.reset();
        self.bytes_allocated = 0;
        let permanent = self.permanent;
        if !permanent.is_null() {
            self.mark(permanent);
        }
        if let Some((ptrs, len)) = self.vm_roots {
            unsafe { self.scan_words(ptrs, len) }
        }
        if let Some((ptrs, len)) = self.stack_roots {
            unsafe { self.scan_words(ptrs, len) }
        }
    }

    /// Mark every word of `roots` that conservatively looks like a heap
    /// pointer, along with everything reachable from it.
    pub fn collect_root(&mut self, roots: &[*const u8]) {
        for &p in roots {
            self.mark(p);
        }
    }

    /// Mark a single candidate pointer, along with everything reachable
    /// from it.
    pub fn collect_ptr(&mut self, p: *const u8) {
        self.mark(p);
    }

    /// Finish a collection: recover from any mark-stack overflow, sweep
    /// the unreached allocations, and unlock the heap. The scan hints are
    /// reset, and the long-lived watermark returns to the top of the heap
    /// until long-lived allocations lower it again.
    pub fn collect_end(&mut self) {
        while self.mark_stack.take_overflow() {
            trace!("mark stack overflowed: rescanning");
            for block in 0..self.total_blocks() {
                if self.atb.get(block) == BlockKind::Mark {
                    self.mark_subtree(block);
                }
            }
        }
        self.sweep();
        self.lowest_long_lived = self.pool_end;
        for bucket in 0..FIRST_FREE_BUCKETS {
            self.first_free_atb[bucket] = 0;
        }
        self.last_free_atb = self.atb.byte_len().saturating_sub(1);
        self.lock_depth -= 1;
        trace!("collect end");
    }

    /// Sweep every allocation on the heap, running finalizers, without
    /// having marked anything. For teardown.
    pub fn sweep_all(&mut self) {
        self.lock_depth += 1;
        self.mark_stack.reset();
        self.permanent = ptr::null();
        self.collect_end();
    }

    /// Tear the heap down: finalize and free every object, then consume
    /// the heap.
    pub fn deinit(mut self) {
        self.sweep_all();
    }

    unsafe fn scan_words(&mut self, ptrs: *const *const u8, len: usize) {
        for i in 0..len {
            self.mark(*ptrs.add(i));
        }
    }

    // conservative mark: if `p` lands block-aligned on an unmarked head,
    // mark it and walk everything reachable from it.
    fn mark(&mut self, p: *const u8) {
        if let Some(block) = self.block_of(p) {
            if self.atb.get(block) == BlockKind::Head {
                self.atb.head_to_mark(block);
                self.mark_subtree(block);
            }
        }
    }

    // walk the object graph from `block`, which must already be marked.
    // children that don't fit on the mark stack raise its overflow flag
    // and are picked up by the rescan loop in collect_end.
    fn mark_subtree(&mut self, mut block: usize) {
        loop {
            let n_blocks = self.atb.chain_len(block);
            // scan the object's memory as words, marking any heads found.
            let mut p = self.ptr_of(block) as *const *const u8;
            let end = ((p as usize) + n_blocks * BLOCK_SIZE_BYTES) as *const *const u8;
            while p < end {
                let word = unsafe { *p };
                if let Some(child) = self.block_of(word) {
                    if self.atb.get(child) == BlockKind::Head {
                        self.atb.head_to_mark(child);
                        self.mark_stack.push(child);
                    }
                }
                p = unsafe { p.add(1) };
            }
            match self.mark_stack.pop() {
                Some(next) => block = next,
                None => break,
            }
        }
    }

    // linear pass over the allocation table: marked heads survive and are
    // demoted back to plain heads; unmarked heads are finalized (when
    // flagged) and freed along with their tails.
    fn sweep(&mut self) {
        let mut freed = 0;
        let mut free_tail = false;
        for block in 0..self.total_blocks() {
            match self.atb.get(block) {
                BlockKind::Head => {
                    if self.ftb.get(block) {
                        let obj = self.ptr_of(block);
                        // a null type tag means the host never finished
                        // initializing the object; skip its finalizer.
                        let type_tag = unsafe { *(obj as *const *const u8) };
                        if !type_tag.is_null() {
                            if let Some(finalizer) = self.finalizer {
                                finalizer(obj);
                            }
                        }
                        self.ftb.clear(block);
                    }
                    self.atb.any_to_free(block);
                    freed += 1;
                    free_tail = true;
                }
                BlockKind::Tail if free_tail => {
                    self.atb.any_to_free(block);
                    freed += 1;
                }
                BlockKind::Tail => {}
                BlockKind::Mark => {
                    self.atb.mark_to_head(block);
                    free_tail = false;
                }
                BlockKind::Free => {}
            }
        }
        trace!("sweep freed {} blocks", freed);
    }

    /// Prevent collection (and allocation) until the matching
    /// [`unlock`](struct.Heap.html#method.unlock). While locked, `alloc`
    /// and `realloc` return `None` and `free` does nothing. Locks nest.
    pub fn lock(&mut self) {
        self.lock_depth += 1;
    }

    /// Undo one [`lock`](struct.Heap.html#method.lock).
    pub fn unlock(&mut self) {
        debug_assert!(self.lock_depth > 0);
        self.lock_depth -= 1;
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    /// Walk the allocation table and report totals: bytes used and free,
    /// the longest free run, counts of one- and two-block allocations,
    /// and the longest allocation.
    pub fn info(&self) -> HeapInfo {
        let total_blocks = self.total_blocks();
        let mut used = 0;
        let mut free = 0;
        let mut max_free = 0;
        let mut max_block = 0;
        let mut num_1block = 0;
        let mut num_2block = 0;
        let mut len = 0;
        let mut len_free = 0;
        for block in 0..=total_blocks {
            let kind = if block < total_blocks { self.atb.get(block) } else { BlockKind::Free };
            if kind == BlockKind::Tail {
                used += 1;
                len += 1;
                continue;
            }
            // anything but a tail ends the allocation run in progress.
            match len {
                0 => {}
                1 => num_1block += 1,
                2 => num_2block += 1,
                _ => {}
            }
            if len > max_block { max_block = len }
            len = 0;
            if block == total_blocks { break }
            match kind {
                BlockKind::Free => {
                    free += 1;
                    len_free += 1;
                    if len_free > max_free { max_free = len_free }
                }
                _ => {
                    // a head, marked or not
                    used += 1;
                    len = 1;
                    len_free = 0;
                }
            }
        }
        HeapInfo {
            total_bytes: total_blocks * BLOCK_SIZE_BYTES,
            used_bytes: used * BLOCK_SIZE_BYTES,
            free_bytes: free * BLOCK_SIZE_BYTES,
            max_free,
            num_1block,
            num_2block,
            max_block,
            start: self.pool_start,
            end: self.pool_end,
        }
    }

    /// For debugging: write one character per block (`.` free, `h` head,
    /// `=` tail, `m` mark).
    pub fn dump<W: fmt::Write>(&self, buffer: &mut W) -> fmt::Result {
        self.atb.dump(buffer)
    }
}

impl<'heap> fmt::Debug for Heap<'heap> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Heap(pool={:?}, blocks={}x{}, ", self.pool_start, self.total_blocks(), BLOCK_SIZE_BYTES)?;
        self.dump(f)?;
        write!(f, ")")
    }
}
