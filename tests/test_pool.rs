// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_bufring::{
    buffer::{Buffer, BufferFlags, BufferMemory, BufferMeta},
    pool::{BufferPool, BufferState, Owner},
    Error,
};
use std::error::Error as _;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn assert_one_state_each(pool: &BufferPool) {
    let total = pool.count(BufferState::Free)
        + pool.count(BufferState::Submitted)
        + pool.count(BufferState::Completed);
    assert_eq!(total, pool.len());
}

#[test]
fn test_ownership_cycle() -> TestResult {
    let mut pool = BufferPool::with_heap("cycle", 3, 64)?;
    assert!(pool.all_free());
    assert_eq!(pool.buffer_size(), 64);

    let buffer = pool.submit(1)?;
    assert_eq!(pool.state(1), Some(BufferState::Submitted));
    assert_eq!(BufferState::Submitted.owner(), Owner::ExternalEntity);
    assert_eq!(pool.in_flight(), 1);
    assert_one_state_each(&pool);

    pool.complete(buffer)?;
    assert_eq!(pool.state(1), Some(BufferState::Completed));
    assert_eq!(BufferState::Completed.owner(), Owner::Application);
    assert_one_state_each(&pool);

    pool.release(1)?;
    assert!(pool.all_free());
    assert_one_state_each(&pool);
    Ok(())
}

#[test]
fn test_release_free_rejected() -> TestResult {
    let mut pool = BufferPool::with_heap("release", 2, 16)?;
    let err = pool.release(0).unwrap_err();
    assert!(err.is_contract_violation());
    assert!(matches!(
        err,
        Error::ContractViolation {
            index: 0,
            state: BufferState::Free,
            op: "release",
            ..
        }
    ));
    assert!(pool.all_free());
    Ok(())
}

#[test]
fn test_double_submit_rejected() -> TestResult {
    let mut pool = BufferPool::with_heap("double", 2, 16)?;
    let _held = pool.submit(0)?;
    let err = pool.submit(0).unwrap_err();
    assert!(matches!(
        err,
        Error::ContractViolation {
            state: BufferState::Submitted,
            ..
        }
    ));

    // The application cannot touch a buffer the entity owns.
    assert!(pool.get(0).unwrap_err().is_contract_violation());
    Ok(())
}

#[test]
fn test_complete_requires_submit() -> TestResult {
    let mut pool = BufferPool::with_heap("complete", 2, 16)?;
    let stray = Buffer::new(1, BufferMemory::heap(16));
    let err = pool.complete(stray).unwrap_err();
    assert!(matches!(
        err,
        Error::ContractViolation {
            index: 1,
            state: BufferState::Free,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_invalid_index() -> TestResult {
    let mut pool = BufferPool::with_heap("index", 2, 16)?;
    let err = pool.submit(7).unwrap_err();
    assert!(matches!(err, Error::InvalidIndex { index: 7, count: 2, .. }));
    Ok(())
}

#[test]
fn test_no_stale_data_after_release() -> TestResult {
    let mut pool = BufferPool::with_heap("stale", 2, 64)?;

    let mut buffer = pool.submit(0)?;
    buffer.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
    buffer.record_fill(BufferMeta {
        length: 4,
        sequence: Some(7),
        flags: BufferFlags::FRAME_END,
        timestamp: None,
    })?;
    pool.complete(buffer)?;

    let completed = pool.get(0)?;
    assert_eq!(completed.data(), &[1, 2, 3, 4]);
    assert_eq!(completed.sequence(), Some(7));

    pool.release(0)?;
    let released = pool.get(0)?;
    assert!(released.data().is_empty());
    assert_eq!(released.sequence(), None);
    assert_eq!(released.flags(), BufferFlags::NONE);
    assert_eq!(released.capacity(), 64);
    Ok(())
}

#[test]
fn test_fill_overflow_rejected() -> TestResult {
    let mut buffer = Buffer::new(0, BufferMemory::heap(8));
    let err = buffer
        .record_fill(BufferMeta {
            length: 9,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Overflow {
            length: 9,
            capacity: 8,
            ..
        }
    ));
    assert!(buffer.is_empty());
    Ok(())
}

#[test]
fn test_teardown_busy() -> TestResult {
    let mut pool = BufferPool::with_heap("teardown", 3, 32)?;
    let held = pool.submit(2)?;

    let err = pool.teardown().unwrap_err();
    assert!(matches!(err, Error::ResourceBusy { in_flight: 1, .. }));
    assert_eq!(pool.state(2), Some(BufferState::Submitted));

    pool.reclaim(held)?;
    let buffers = pool.teardown()?;
    assert_eq!(buffers.len(), 3);
    assert!(buffers.iter().enumerate().all(|(i, b)| b.index() == i));
    Ok(())
}

#[test]
fn test_acquire_free_exhausted() -> TestResult {
    let mut pool = BufferPool::with_heap("acquire", 2, 8)?;
    let a = pool.acquire_free()?.index();
    let _a = pool.submit(a)?;
    let b = pool.acquire_free()?.index();
    let _b = pool.submit(b)?;
    assert_eq!((a, b), (0, 1));

    let err = pool.acquire_free().unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { .. }));
    Ok(())
}

#[test]
fn test_create_validation() -> TestResult {
    let err = BufferPool::create("empty", Vec::new()).err().unwrap();
    assert!(matches!(err, Error::ResourceExhausted { .. }));

    let mixed = vec![
        Buffer::new(0, BufferMemory::heap(8)),
        Buffer::new(1, BufferMemory::heap(16)),
    ];
    let err = BufferPool::create("mixed", mixed).err().unwrap();
    assert!(matches!(err, Error::Config(_)));

    let shuffled = vec![
        Buffer::new(1, BufferMemory::heap(8)),
        Buffer::new(0, BufferMemory::heap(8)),
    ];
    assert!(BufferPool::create("shuffled", shuffled).is_err());
    Ok(())
}

#[test]
fn test_session_error_source() {
    let err = Error::Session {
        cycle: 3,
        source: Box::new(Error::firmware("dequeue", 5, "Input/output error")),
    };
    assert_eq!(
        err.to_string(),
        "steady-state failure at cycle 3: dequeue failed 5(Input/output error)"
    );
    assert!(err.source().is_some());
}
