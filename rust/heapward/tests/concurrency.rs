use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;

use heapward::{
    BorrowKind, BorrowLedger, BorrowState, FreePolicy, Heap, HeapOptions, LedgerOptions,
    MemoryBlock, Owner, ProviderKind,
};

fn system_heap() -> Heap {
    Heap::with_options(HeapOptions::default().provider(ProviderKind::System)).unwrap()
}

#[test]
fn test_racing_exclusive_borrows_have_one_winner() {
    let heap = system_heap();
    let owner = Owner::new();

    for _ in 0..200 {
        let block = heap.allocate(64, &owner).unwrap();
        let barrier = Barrier::new(2);
        let results = std::thread::scope(|s| {
            let handles = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        heap.borrow(&block, BorrowKind::Exclusive)
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = results.into_iter().find_map(|r| r.err()).unwrap();
        assert!(loser.is_borrow_conflict());
        assert_eq!(heap.state(&block), BorrowState::Exclusive);
        heap.free(&block, &owner).unwrap();
    }
}

#[test]
fn test_many_threads_racing_for_a_fresh_block() {
    let ledger = BorrowLedger::new();
    let heap = system_heap();
    let owner = Owner::new();
    let threads = 8;

    for _ in 0..50 {
        let block = heap.allocate(8, &owner).unwrap();
        let barrier = Barrier::new(threads);
        let winners = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    barrier.wait();
                    if ledger.borrow(&block, BorrowKind::Exclusive).is_ok() {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(winners.load(Ordering::Relaxed), 1);
        assert_eq!(ledger.forget(&block), BorrowState::Exclusive);
    }
}

#[test]
fn test_stale_loans_never_release_a_new_borrow() {
    let ledger = BorrowLedger::new();
    let heap = system_heap();
    let owner = Owner::new();
    let threads = 4;

    for _ in 0..50 {
        let block = heap.allocate(8, &owner).unwrap();
        let loans = (0..threads)
            .map(|_| ledger.lend(&block, BorrowKind::Shared).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ledger.forget(&block), BorrowState::Shared(threads));
        ledger.borrow(&block, BorrowKind::Exclusive).unwrap();

        let barrier = Barrier::new(threads);
        std::thread::scope(|s| {
            for loan in loans {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    drop(loan);
                });
            }
        });
        assert_eq!(ledger.state(&block), BorrowState::Exclusive);
        assert_eq!(ledger.forget(&block), BorrowState::Exclusive);
    }
}

#[test]
fn test_concurrent_shared_borrows_are_counted() {
    let heap = system_heap();
    let owner = Owner::new();
    let block = heap.allocate(256, &owner).unwrap();
    let threads = 8;
    let per_thread = 250;

    std::thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                for _ in 0..per_thread {
                    heap.borrow(&block, BorrowKind::Shared).unwrap();
                }
            });
        }
    });
    assert_eq!(heap.state(&block), BorrowState::Shared(threads * per_thread));

    std::thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                for _ in 0..per_thread {
                    heap.return_borrow(&block, BorrowKind::Shared);
                }
            });
        }
    });
    assert_eq!(heap.state(&block), BorrowState::Free);
    heap.free(&block, &owner).unwrap();
}

#[test]
fn test_exclusive_holder_is_never_aliased() {
    // Every thread repeatedly tries to take the block. Whoever holds it checks
    // that nobody else got in while it was held.
    let heap = system_heap();
    let owner = Owner::new();
    let block = heap.allocate(64, &owner).unwrap();
    let inside = AtomicUsize::new(0);
    let readers = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for t in 0..6 {
            let heap = &heap;
            let block = &block;
            let inside = &inside;
            let readers = &readers;
            s.spawn(move || {
                for i in 0..2000 {
                    let kind = if (t + i) % 3 == 0 {
                        BorrowKind::Exclusive
                    } else {
                        BorrowKind::Shared
                    };
                    let Ok(_loan) = heap.lend(block, kind) else {
                        continue;
                    };
                    if kind.is_exclusive() {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        readers.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(inside.load(Ordering::SeqCst), 0);
                        readers.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });
    assert_eq!(heap.state(&block), BorrowState::Free);
}

#[test]
fn test_concurrent_allocate_and_free() {
    let heap = Heap::with_options(
        HeapOptions::default()
            .provider(ProviderKind::System)
            .shards(4)
            .free_policy(FreePolicy::RejectBorrowed),
    )
    .unwrap();

    std::thread::scope(|s| {
        for t in 0..8 {
            let heap = &heap;
            s.spawn(move || {
                let owner = Owner::new();
                let mut blocks = Vec::new();
                for i in 0..100 {
                    let block = heap.allocate(16 + t * 8 + i, &owner).unwrap();
                    heap.borrow(&block, BorrowKind::Shared).unwrap();
                    blocks.push(block);
                }
                for block in &blocks {
                    assert!(heap.free(block, &owner).is_err());
                    heap.return_borrow(block, BorrowKind::Shared);
                    heap.free(block, &owner).unwrap();
                }
            });
        }
    });

    let stats = heap.stats();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.reserved_bytes, 0);
    assert!(heap.ledger().is_empty());
}

#[test]
fn test_free_races_with_borrowers() {
    // Borrowers hammer a block while its owner frees it under the strict
    // policy. The free may only succeed at an instant with no borrows held,
    // and afterwards no borrow may be granted.
    let heap = Heap::with_options(
        HeapOptions::default()
            .provider(ProviderKind::System)
            .free_policy(FreePolicy::RejectBorrowed),
    )
    .unwrap();
    let owner = Owner::new();

    for _ in 0..20 {
        let block = heap.allocate(32, &owner).unwrap();
        let freed = std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        if let Ok(loan) = heap.lend(&block, BorrowKind::Shared) {
                            drop(loan);
                        }
                    }
                });
            }
            s.spawn(|| {
                loop {
                    if heap.free(&block, &owner).is_ok() {
                        return true;
                    }
                    std::thread::yield_now();
                }
            })
            .join()
            .unwrap()
        });
        assert!(freed);
        assert!(!heap.is_live(&block));
        assert!(heap.borrow(&block, BorrowKind::Shared).is_err());
    }
}

#[test]
fn test_random_walk_matches_model() {
    fastrand::seed(1897362415);
    let ledger = BorrowLedger::with_options(LedgerOptions::default().shards(2)).unwrap();
    let heap = system_heap();
    let owner = Owner::new();
    let blocks: Vec<MemoryBlock> = (0..8)
        .map(|_| heap.allocate(8, &owner).unwrap())
        .collect();
    let mut model = vec![BorrowState::Free; blocks.len()];

    for _ in 0..20_000 {
        let i = fastrand::usize(..blocks.len());
        let kind = if fastrand::bool() {
            BorrowKind::Exclusive
        } else {
            BorrowKind::Shared
        };
        let before = ledger.state(&blocks[i]);
        assert_eq!(before, model[i]);

        if fastrand::u8(0..3) == 0 {
            let res = ledger.try_return_borrow(&blocks[i], kind);
            match model[i].release(kind) {
                Some(next) => {
                    res.unwrap();
                    model[i] = next;
                }
                None => assert!(res.is_err()),
            }
        } else {
            let res = ledger.borrow(&blocks[i], kind);
            match model[i].acquire(kind) {
                Ok(next) => {
                    res.unwrap();
                    model[i] = next;
                }
                Err(reason) => {
                    let err = res.unwrap_err();
                    assert!(err.to_string().contains(&reason.to_string()));
                }
            }
        }

        let after = ledger.state(&blocks[i]);
        assert_eq!(after, model[i]);
        assert!(!(after.exclusive_held() && after.shared_count() > 0));
    }
}
