use quickcheck_macros::quickcheck;
use std::{prelude::v1::*, vec};

use super::*;
use crate::{
    bucket_of, region::VecRegion, tests::ShadowAllocator, DEFAULT_CHUNK_SIZE, DEFAULT_REALLOC_SLACK,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn checked_heap(region: VecRegion) -> Heap<VecRegion> {
    init_logger();
    Heap::with_config(region, HeapConfig::INIT.with_debug_checks(true)).unwrap()
}

fn checked_heap_with(region: VecRegion, chunk_size: usize) -> Heap<VecRegion> {
    init_logger();
    let config = HeapConfig::INIT
        .with_chunk_size(chunk_size)
        .with_debug_checks(true);
    Heap::with_config(region, config).unwrap()
}

fn new_heap() -> Heap<VecRegion> {
    checked_heap(VecRegion::new())
}

/// `(offset, size, allocated)` of every block
fn layout(heap: &Heap<VecRegion>) -> Vec<(usize, usize, bool)> {
    heap.blocks()
        .map(|block| (block.offset, block.size, block.allocated))
        .collect()
}

fn free_list(heap: &Heap<VecRegion>, bucket: usize) -> Vec<usize> {
    heap.free_list(bucket).map(|block| block.offset).collect()
}

#[test]
fn init_layout() {
    let heap = new_heap();

    assert_eq!(heap.region().len(), INITIAL_LEN + DEFAULT_CHUNK_SIZE);
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, DEFAULT_CHUNK_SIZE, false)]);
    assert_eq!(
        free_list(&heap, bucket_of(DEFAULT_CHUNK_SIZE)),
        vec![FIRST_BLOCK]
    );
    assert_eq!(
        heap.stats(),
        HeapStats {
            region_len: INITIAL_LEN + DEFAULT_CHUNK_SIZE,
            free_bytes: DEFAULT_CHUNK_SIZE,
            free_blocks: 1,
            allocated_bytes: 0,
            allocated_blocks: 0,
        }
    );
    assert_eq!(heap.check(), Ok(()));
}

#[test]
fn init_rejects_non_empty_region() {
    init_logger();
    let mut region = VecRegion::new();
    region.grow(8).unwrap();
    assert_eq!(
        Heap::init(region).unwrap_err(),
        InitError::RegionNotEmpty { len: 8 }
    );
}

#[test]
fn init_fails_on_exhausted_region() {
    init_logger();
    assert_eq!(
        Heap::init(VecRegion::with_limit(0)).unwrap_err(),
        InitError::Exhausted {
            requested: INITIAL_LEN
        }
    );
    assert_eq!(
        Heap::init(VecRegion::with_limit(INITIAL_LEN + 100)).unwrap_err(),
        InitError::Exhausted {
            requested: DEFAULT_CHUNK_SIZE
        }
    );
}

#[test]
fn custom_chunk_size() {
    let heap = checked_heap_with(VecRegion::new(), 100);
    // Rounded up to the alignment unit
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, 104, false)]);

    // Requests larger than a chunk grow the region by exactly what they need
    let mut heap = heap;
    let ptr = heap.allocate(200).unwrap();
    assert_eq!(heap.region().len(), INITIAL_LEN + 104 + 208);
    assert_eq!(
        layout(&heap),
        vec![(FIRST_BLOCK, 208, true), (FIRST_BLOCK + 208, 104, false)]
    );
    heap.free(ptr);

    let heap = checked_heap_with(VecRegion::new(), 1);
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, MIN_BLOCK_SIZE, false)]);
}

#[test]
fn payloads_are_aligned() {
    let mut heap = new_heap();
    let ptrs: Vec<_> = (1..50).map(|size| heap.allocate(size).unwrap()).collect();
    for (size, &ptr) in (1..50).zip(&ptrs) {
        assert_eq!(ptr.offset() % ALIGNMENT, 0);
        assert!(heap.usable_size(ptr) >= size);
        assert_eq!(heap.payload(ptr).len(), heap.usable_size(ptr));
    }
}

#[test]
fn allocate_small() {
    let mut heap = new_heap();
    let ptr = heap.allocate(8).unwrap();
    assert_eq!(ptr.offset(), FIRST_BLOCK + WORD_SIZE);
    assert_eq!(heap.usable_size(ptr), 8);
    assert_eq!(
        layout(&heap),
        vec![
            (FIRST_BLOCK, MIN_BLOCK_SIZE, true),
            (
                FIRST_BLOCK + MIN_BLOCK_SIZE,
                DEFAULT_CHUNK_SIZE - MIN_BLOCK_SIZE,
                false
            ),
        ]
    );
}

#[test]
fn allocate_zero() {
    let mut heap = new_heap();
    let stats = heap.stats();
    assert_eq!(heap.allocate(0), None);
    assert_eq!(heap.stats(), stats);
}

#[test]
fn allocate_unrepresentable() {
    let mut heap = new_heap();
    let stats = heap.stats();
    assert_eq!(heap.allocate(usize::MAX), None);
    assert_eq!(heap.allocate(MAX_BLOCK_SIZE), None);
    assert_eq!(heap.stats(), stats);
}

#[test]
fn remainder_below_minimum_is_not_split() {
    let mut heap = new_heap();
    // Leaves 8 bytes, which can't form a block
    let ptr = heap.allocate(DEFAULT_CHUNK_SIZE - OVERHEAD - 8).unwrap();
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, DEFAULT_CHUNK_SIZE, true)]);
    assert_eq!(heap.usable_size(ptr), DEFAULT_CHUNK_SIZE - OVERHEAD);
}

#[test]
fn freed_space_is_reused() {
    let mut heap = new_heap();

    let ptr = heap.allocate(4096).unwrap();
    let len = heap.region().len();
    heap.free(ptr);
    assert_eq!(heap.stats().free_blocks, 1);

    let ptr2 = heap.allocate(4096).unwrap();
    assert_eq!(heap.region().len(), len);
    assert_eq!(ptr2, ptr);
}

#[test]
fn allocate_free_cycles_do_not_grow() {
    let mut heap = new_heap();
    let len = heap.region().len();
    for i in 0..1000 {
        let ptr = heap.allocate(64 + i % 300).unwrap();
        heap.free(ptr);
    }
    assert_eq!(heap.region().len(), len);
    assert_eq!(heap.stats().free_blocks, 1);
}

#[test]
fn large_allocation_grows_by_request() {
    let mut heap = new_heap();
    let ptr = heap.allocate(10_000).unwrap();
    let size = codec::adjust(10_000).unwrap();

    assert_eq!(heap.region().len(), INITIAL_LEN + DEFAULT_CHUNK_SIZE + size);
    // The new space was merged with the free block at the old end before
    // being split
    assert_eq!(
        layout(&heap),
        vec![
            (FIRST_BLOCK, size, true),
            (FIRST_BLOCK + size, DEFAULT_CHUNK_SIZE, false)
        ]
    );
    assert_eq!(heap.usable_size(ptr), 10_000);
}

#[test]
fn growth_after_allocated_tail() {
    let mut heap = new_heap();
    let a = heap.allocate(DEFAULT_CHUNK_SIZE - OVERHEAD).unwrap();
    let b = heap.allocate(100).unwrap();

    assert_eq!(b.offset(), a.offset() + DEFAULT_CHUNK_SIZE);
    assert_eq!(
        heap.region().len(),
        INITIAL_LEN + DEFAULT_CHUNK_SIZE * 2
    );
    assert_eq!(
        layout(&heap),
        vec![
            (FIRST_BLOCK, DEFAULT_CHUNK_SIZE, true),
            (FIRST_BLOCK + DEFAULT_CHUNK_SIZE, 112, true),
            (
                FIRST_BLOCK + DEFAULT_CHUNK_SIZE + 112,
                DEFAULT_CHUNK_SIZE - 112,
                false
            ),
        ]
    );
}

#[test]
fn neighbors_coalesce() {
    let mut heap = new_heap();

    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(100).unwrap();
    assert_eq!(b.offset(), a.offset() + 112);

    heap.free(a);
    assert_eq!(free_list(&heap, bucket_of(112)), vec![a.block()]);
    assert_eq!(
        layout(&heap),
        vec![
            (a.block(), 112, false),
            (b.block(), 112, true),
            (b.block() + 112, DEFAULT_CHUNK_SIZE - 224, false),
        ]
    );

    heap.free(b);
    assert!(free_list(&heap, bucket_of(112)).is_empty());
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, DEFAULT_CHUNK_SIZE, false)]);
}

#[test]
fn coalesce_all_cases() {
    let mut heap = new_heap();
    let [a, b, c, d] = [(); 4].map(|()| heap.allocate(16).unwrap());
    let size = codec::adjust(16).unwrap();
    let tail = d.block() + size;
    let tail_size = DEFAULT_CHUNK_SIZE - size * 4;

    // Both neighbors allocated
    heap.free(b);
    assert_eq!(free_list(&heap, bucket_of(size)), vec![b.block()]);

    // The next block is free
    heap.free(a);
    assert!(free_list(&heap, bucket_of(size)).is_empty());
    assert_eq!(free_list(&heap, bucket_of(size * 2)), vec![a.block()]);

    // The previous block is free
    heap.free(c);
    assert_eq!(
        layout(&heap),
        vec![
            (a.block(), size * 3, false),
            (d.block(), size, true),
            (tail, tail_size, false),
        ]
    );

    // Both neighbors free
    heap.free(d);
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, DEFAULT_CHUNK_SIZE, false)]);
    assert_eq!(
        free_list(&heap, bucket_of(DEFAULT_CHUNK_SIZE)),
        vec![FIRST_BLOCK]
    );
}

#[test]
fn first_fit_prefers_lower_addresses() {
    let mut heap = new_heap();
    let ptrs: Vec<_> = (0..6).map(|_| heap.allocate(40).unwrap()).collect();
    heap.free(ptrs[4]);
    heap.free(ptrs[1]);

    assert_eq!(heap.allocate(40), Some(ptrs[1]));
    assert_eq!(heap.allocate(40), Some(ptrs[4]));
}

#[test]
fn reallocate_none_allocates() {
    let mut heap = new_heap();
    let ptr = heap.reallocate(None, 100).unwrap();
    assert!(heap.usable_size(ptr) >= 100);
    assert_eq!(heap.reallocate(None, 0), None);
}

#[test]
fn reallocate_zero_frees() {
    let mut heap = new_heap();
    let ptr = heap.allocate(100).unwrap();
    assert_eq!(heap.reallocate(Some(ptr), 0), None);
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, DEFAULT_CHUNK_SIZE, false)]);
}

#[test]
fn reallocate_shrink_keeps_block() {
    let mut heap = new_heap();
    let ptr = heap.allocate(200).unwrap();
    heap.payload_mut(ptr)[..50].copy_from_slice(&[0x5a; 50]);

    assert_eq!(heap.reallocate(Some(ptr), 50), Some(ptr));
    assert_eq!(&heap.payload(ptr)[..50], &[0x5a; 50]);
    assert_eq!(heap.usable_size(ptr), codec::usable_size(codec::adjust(200).unwrap()));
}

#[test]
fn reallocate_grows_into_free_successor() {
    let mut heap = new_heap();
    let ptr = heap.allocate(100).unwrap();
    heap.payload_mut(ptr)[..100].copy_from_slice(&[0xc3; 100]);
    let len = heap.region().len();

    assert_eq!(heap.reallocate(Some(ptr), 1000), Some(ptr));
    assert_eq!(&heap.payload(ptr)[..100], &[0xc3; 100]);
    // The whole successor was absorbed
    assert_eq!(heap.usable_size(ptr), DEFAULT_CHUNK_SIZE - OVERHEAD);
    assert_eq!(heap.region().len(), len);
    assert_eq!(heap.stats().free_blocks, 0);
}

#[test]
fn reallocate_moves_with_slack() {
    let mut heap = new_heap();
    let ptr = heap.allocate(100).unwrap();
    let _guard = heap.allocate(100).unwrap();
    let data: Vec<u8> = (0..100).collect();
    heap.payload_mut(ptr)[..100].copy_from_slice(&data);

    let new_ptr = heap.reallocate(Some(ptr), 200).unwrap();
    assert_ne!(new_ptr, ptr);
    assert_eq!(&heap.payload(new_ptr)[..100], &data[..]);
    assert!(heap.usable_size(new_ptr) >= 200 + DEFAULT_REALLOC_SLACK);

    // The old block is free again
    let old = heap.blocks().find(|b| b.offset == ptr.block()).unwrap();
    assert!(!old.allocated);
    assert_eq!(old.size, 112);
}

#[test]
fn reallocate_preserves_whole_payload() {
    let mut heap = new_heap();
    let ptr = heap.allocate(64).unwrap();
    let _guard = heap.allocate(8).unwrap();
    heap.payload_mut(ptr).fill(0x77);

    let new_ptr = heap.reallocate(Some(ptr), 80).unwrap();
    assert_ne!(new_ptr, ptr);
    let usable = codec::usable_size(codec::adjust(64).unwrap());
    assert!(heap.payload(new_ptr)[..usable].iter().all(|&b| b == 0x77));
}

#[test]
fn reallocate_failure_keeps_block() {
    let mut heap = checked_heap(VecRegion::with_limit(INITIAL_LEN + DEFAULT_CHUNK_SIZE));
    let ptr = heap.allocate(100).unwrap();
    let _guard = heap.allocate(100).unwrap();
    heap.payload_mut(ptr)[..4].copy_from_slice(b"keep");
    let stats = heap.stats();

    assert_eq!(heap.reallocate(Some(ptr), 8000), None);
    assert_eq!(heap.reallocate(Some(ptr), usize::MAX), None);
    assert_eq!(heap.stats(), stats);
    assert_eq!(&heap.payload(ptr)[..4], b"keep");
}

#[test]
fn exhaustion_leaves_heap_unchanged() {
    let mut heap = checked_heap(VecRegion::with_limit(INITIAL_LEN + DEFAULT_CHUNK_SIZE));
    let stats = heap.stats();

    assert_eq!(heap.allocate(8192), None);
    assert_eq!(heap.stats(), stats);

    // Smaller requests still succeed
    let ptr = heap.allocate(100).unwrap();
    heap.free(ptr);
    assert_eq!(heap.stats(), stats);

    let mut ptrs = Vec::new();
    while let Some(ptr) = heap.allocate(200) {
        ptrs.push(ptr);
    }
    assert_eq!(ptrs.len(), DEFAULT_CHUNK_SIZE / codec::adjust(200).unwrap());
    assert_eq!(heap.region().len(), INITIAL_LEN + DEFAULT_CHUNK_SIZE);

    for ptr in ptrs {
        heap.free(ptr);
    }
    assert_eq!(heap.stats(), stats);
}

#[test]
fn allocate_on_exhausted_empty_heap() {
    // Only a minimum-size block, and no room to grow
    let mut heap = checked_heap_with(VecRegion::with_limit(INITIAL_LEN + MIN_BLOCK_SIZE), 1);
    assert_eq!(heap.allocate(100), None);
    assert_eq!(heap.allocate(1 << 20), None);
    assert_eq!(layout(&heap), vec![(FIRST_BLOCK, MIN_BLOCK_SIZE, false)]);

    let ptr = heap.allocate(8).unwrap();
    assert_eq!(heap.allocate(1), None);
    heap.free(ptr);
}

#[test]
fn into_region_returns_bytes() {
    let mut heap = new_heap();
    let ptr = heap.allocate(5).unwrap();
    heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");

    let region = heap.into_region();
    assert_eq!(&region.as_slice()[ptr.offset()..][..5], b"hello");
    assert_eq!(region.len(), INITIAL_LEN + DEFAULT_CHUNK_SIZE);
}

#[test]
fn check_detects_footer_mismatch() {
    let mut heap = new_heap();
    let ptr = heap.allocate(100).unwrap();
    let block = ptr.block();
    heap.arena.write_word(block + 112 - WORD_SIZE, codec::encode(120, true));
    assert_eq!(heap.check(), Err(Violation::HeaderFooterMismatch(block)));
}

#[test]
fn check_detects_bad_prologue() {
    let mut heap = new_heap();
    heap.arena.write_word(PROLOGUE, codec::encode(16, true));
    assert_eq!(heap.check(), Err(Violation::BadPrologue));
    assert_eq!(Violation::BadPrologue.offset(), None);
}

#[test]
fn check_detects_bad_epilogue() {
    let mut heap = new_heap();
    let epilogue = heap.region().len() - WORD_SIZE;
    heap.arena.write_word(epilogue, codec::encode(0, false));
    assert_eq!(heap.check(), Err(Violation::BadEpilogue(epilogue)));
}

#[test]
fn check_detects_unindexed_free_block() {
    let mut heap = new_heap();
    let _ptr = heap.allocate(100).unwrap();
    let tail = heap.index.head(bucket_of(DEFAULT_CHUNK_SIZE - 112)).unwrap();
    heap.index.remove(&mut heap.arena, tail);

    let violation = heap.check().unwrap_err();
    assert_eq!(violation, Violation::FreeBlockNotIndexed(tail));
    assert_eq!(violation.offset(), Some(tail));
}

#[test]
fn check_detects_indexed_allocated_block() {
    let mut heap = new_heap();
    let tail_size = DEFAULT_CHUNK_SIZE - 112;
    let _ptr = heap.allocate(100).unwrap();
    let tail = heap.index.head(bucket_of(tail_size)).unwrap();
    heap.arena.set_tags(tail, tail_size, true);
    assert_eq!(heap.check(), Err(Violation::AllocatedBlockIndexed(tail)));
}

#[test]
fn check_detects_adjacent_free_blocks() {
    let mut heap = new_heap();
    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(100).unwrap();
    heap.free(a);

    // Free `b` without coalescing
    heap.arena.set_tags(b.block(), 112, false);
    heap.index.insert(&mut heap.arena, b.block());
    assert_eq!(heap.check(), Err(Violation::AdjacentFreeBlocks(b.block())));
}

#[test]
fn check_detects_link_corruption() {
    let mut heap = new_heap();
    let ptrs: Vec<_> = (0..4).map(|_| heap.allocate(100).unwrap()).collect();
    heap.free(ptrs[0]);
    heap.free(ptrs[2]);
    assert_eq!(
        free_list(&heap, bucket_of(112)),
        vec![ptrs[0].block(), ptrs[2].block()]
    );

    heap.arena.set_prev_free(ptrs[2].block(), None);
    assert_eq!(heap.check(), Err(Violation::LinkAsymmetry(ptrs[2].block())));

    // A cycle is reported rather than walked forever
    heap.arena.set_prev_free(ptrs[2].block(), Some(ptrs[0].block()));
    heap.arena.set_next_free(ptrs[2].block(), Some(ptrs[0].block()));
    assert_eq!(heap.check(), Err(Violation::UnorderedFreeList(ptrs[0].block())));
}

#[test]
fn check_detects_stale_index_entry() {
    let mut heap = new_heap();
    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(100).unwrap();
    let _c = heap.allocate(100).unwrap();
    heap.free(b);

    // Merge `b` into `a` without unlinking `b`
    heap.arena.set_tags(a.block(), 224, false);
    heap.index.insert(&mut heap.arena, a.block());
    assert_eq!(
        free_list(&heap, bucket_of(112)),
        vec![a.block(), b.block()]
    );

    let violation = heap.check().unwrap_err();
    assert_eq!(violation, Violation::IndexedNonBlock(b.block()));
    assert_eq!(violation.offset(), Some(b.block()));
}

#[test]
fn check_detects_wrong_bucket() {
    let mut heap = new_heap();
    let a = heap.allocate(100).unwrap();
    let _guard = heap.allocate(100).unwrap();
    heap.free(a);

    // Shrink the block in place, leaving it in the bucket for 112 bytes
    heap.arena.set_tags(a.block(), 56, false);
    heap.arena.set_tags(a.block() + 56, 56, true);
    assert_eq!(
        heap.check(),
        Err(Violation::WrongBucket {
            offset: a.block(),
            bucket: bucket_of(112)
        })
    );
}

#[test]
fn check_detects_malformed_size() {
    let mut heap = new_heap();
    let ptr = heap.allocate(100).unwrap();
    heap.arena.write_word(ptr.block(), codec::encode(8, true));
    assert_eq!(
        heap.check(),
        Err(Violation::MalformedSize {
            offset: ptr.block(),
            size: 8
        })
    );
}

#[test]
fn check_detects_out_of_bounds_block() {
    let mut heap = new_heap();
    let ptr = heap.allocate(100).unwrap();
    heap.arena.write_word(ptr.block(), codec::encode(1 << 20, true));
    assert_eq!(heap.check(), Err(Violation::BlockOutOfBounds(ptr.block())));
}

#[test]
#[should_panic(expected = "heap corrupted after free")]
fn debug_checks_panic_on_corruption() {
    let mut heap = new_heap();
    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(100).unwrap();
    heap.arena.write_word(b.block() + 112 - WORD_SIZE, 0);
    heap.free(a);
}

#[quickcheck]
fn random(chunk_size: u16, limit: u32, bytecode: Vec<u8>) {
    random_inner(chunk_size, limit, bytecode);
}

fn random_inner(chunk_size: u16, limit: u32, bytecode: Vec<u8>) -> Option<()> {
    init_logger();

    let config = HeapConfig::INIT
        .with_chunk_size(chunk_size as usize)
        .with_debug_checks(true);
    let limit = INITIAL_LEN + chunk_size as usize + (limit % (1 << 18)) as usize;
    let mut heap = Heap::with_config(VecRegion::with_limit(limit), config).ok()?;
    let mut sa = ShadowAllocator::new();

    #[derive(Debug)]
    struct Alloc {
        ptr: BlockPtr,
        len: usize,
        fill: u8,
    }
    let mut allocs: Vec<Alloc> = Vec::new();
    let mut next_fill = 0u8;

    let verify = |heap: &Heap<VecRegion>, alloc: &Alloc| {
        assert!(
            heap.payload(alloc.ptr)[..alloc.len]
                .iter()
                .all(|&b| b == alloc.fill),
            "{alloc:?} was overwritten"
        );
    };

    let mut it = bytecode.iter().cloned();
    loop {
        match it.next()? % 3 {
            0 => {
                let len = u16::from_le_bytes([it.next()?, it.next()?]) as usize % 5000;
                log::trace!("alloc {len}");

                let ptr = heap.allocate(len);
                log::trace!(" -> {ptr:?}");

                if let Some(ptr) = ptr {
                    next_fill = next_fill.wrapping_add(1);
                    heap.payload_mut(ptr)[..len].fill(next_fill);
                    sa.allocate(ptr.offset()..ptr.offset() + heap.usable_size(ptr));
                    allocs.push(Alloc {
                        ptr,
                        len,
                        fill: next_fill,
                    });
                } else {
                    // Only refused growth can fail a nonzero request
                    let size = codec::adjust(len).unwrap().max(heap.chunk_size());
                    assert!(len == 0 || heap.region().len() + size > limit);
                }
            }
            1 => {
                let alloc_i = it.next()?;
                if !allocs.is_empty() {
                    let alloc = allocs.swap_remove(alloc_i as usize % allocs.len());
                    log::trace!("dealloc {alloc:?}");

                    verify(&heap, &alloc);
                    sa.deallocate(alloc.ptr.offset()..alloc.ptr.offset() + heap.usable_size(alloc.ptr));
                    heap.free(alloc.ptr);
                }
            }
            2 => {
                let alloc_i = it.next()?;
                let len = u16::from_le_bytes([it.next()?, it.next()?]) as usize % 5000;
                if allocs.is_empty() {
                    continue;
                }
                let alloc_i = alloc_i as usize % allocs.len();
                let alloc = &mut allocs[alloc_i];
                log::trace!("realloc {alloc:?} to {len}");

                verify(&heap, alloc);
                let old_payload = alloc.ptr.offset()..alloc.ptr.offset() + heap.usable_size(alloc.ptr);
                let new_ptr = heap.reallocate(Some(alloc.ptr), len);
                log::trace!(" -> {new_ptr:?}");

                match new_ptr {
                    Some(new_ptr) => {
                        sa.deallocate(old_payload);
                        sa.allocate(new_ptr.offset()..new_ptr.offset() + heap.usable_size(new_ptr));

                        // The common prefix survives
                        alloc.len = alloc.len.min(len);
                        alloc.ptr = new_ptr;
                        verify(&heap, alloc);
                    }
                    None if len == 0 => {
                        sa.deallocate(old_payload);
                        allocs.swap_remove(alloc_i);
                    }
                    None => {
                        // The original block is intact
                        verify(&heap, alloc);
                    }
                }
            }
            _ => unreachable!(),
        }
    }
}
