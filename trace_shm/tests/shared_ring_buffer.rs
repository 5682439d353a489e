//! Producer and daemon attached to the same file-backed objects

use std::sync::Arc;
use trace_common::ErrorCode;
use trace_common::types::{GlobalTraceContextId, SharedMemoryChunk, SharedMemoryLocation};
use trace_shm::{
    ChunkListReader, FlexibleCircularAllocator, LocalDataChunkList, MemoryResourceRegistry,
    ShmDataChunkList, ShmRegion, ShmRingBuffer, ShmRingBufferImpl, TraceJobStatus,
};

const METADATA_HANDLE: i32 = 1;
const PAYLOAD_HANDLE: i32 = 2;

#[test]
fn test_daemon_sees_producer_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let ring_path = dir.path().join("ring");

    let mut daemon = ShmRingBufferImpl::new(&ring_path, 8, true);
    daemon.create_or_open(true).unwrap();
    let mut producer = ShmRingBufferImpl::new(&ring_path, 8, true);
    producer.create_or_open(false).unwrap();
    assert_eq!(daemon.attached_users(), 2);

    let element = producer.get_empty_element().unwrap();
    element.set_global_context_id(GlobalTraceContextId::new(4, 21));
    element.set_chunk_list(SharedMemoryLocation::new(METADATA_HANDLE, 64));
    element.set_status(TraceJobStatus::Ready);

    let received = daemon.get_ready_element().unwrap();
    assert_eq!(received.index(), element.index());
    assert_eq!(received.global_context_id(), GlobalTraceContextId::new(4, 21));
    assert_eq!(received.chunk_list(), SharedMemoryLocation::new(METADATA_HANDLE, 64));

    received.release();
    // The producer observes completion through its own mapping.
    assert_eq!(element.status(), TraceJobStatus::Empty);
    assert_eq!(element.global_context_id(), GlobalTraceContextId::default());

    producer.close();
    assert!(ring_path.exists());
    daemon.close();
    assert!(!ring_path.exists());
}

#[test]
fn test_owner_recreates_stale_ring() {
    let dir = tempfile::tempdir().unwrap();
    let ring_path = dir.path().join("ring");

    let mut first = ShmRingBufferImpl::new(&ring_path, 4, false);
    first.create_or_open(true).unwrap();
    first.get_empty_element().unwrap().set_status(TraceJobStatus::Ready);

    let mut second = ShmRingBufferImpl::new(&ring_path, 4, false);
    second.create_or_open(false).unwrap();
    assert_eq!(second.use_count(), Ok(1));

    let mut owner = ShmRingBufferImpl::new(&ring_path, 4, false);
    owner.create_or_open(true).unwrap();
    assert_eq!(owner.use_count(), Ok(0));
    assert_eq!(owner.attached_users(), 1);
}

#[test]
fn test_non_owner_adopts_existing_size() {
    let dir = tempfile::tempdir().unwrap();
    let ring_path = dir.path().join("ring");

    let mut owner = ShmRingBufferImpl::new(&ring_path, 16, false);
    owner.create_or_open(true).unwrap();
    let mut client = ShmRingBufferImpl::new(&ring_path, 4, false);
    client.create_or_open(false).unwrap();
    assert_eq!(client.size(), 16);
}

#[test]
fn test_corrupted_object_is_rejected_for_clients() {
    let dir = tempfile::tempdir().unwrap();
    let ring_path = dir.path().join("ring");
    std::fs::write(&ring_path, vec![0xAB; 4096]).unwrap();

    let mut client = ShmRingBufferImpl::new(&ring_path, 4, false);
    assert_eq!(
        client.create_or_open(false),
        Err(ErrorCode::RingBufferInvalidMemoryResourceRecoverable)
    );

    let mut owner = ShmRingBufferImpl::new(&ring_path, 4, false);
    owner.create_or_open(true).unwrap();
    assert_eq!(owner.is_buffer_empty(), Ok(true));
}

#[test]
fn test_chunk_list_readable_through_second_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let metadata_path = dir.path().join("metadata");
    let payload_path = dir.path().join("payload");

    // Producer side.
    let metadata = Arc::new(ShmRegion::create(&metadata_path, 8192).unwrap());
    let payload = Arc::new(ShmRegion::create(&payload_path, 4096).unwrap());
    // SAFETY: offset 256 is inside the payload mapping.
    unsafe {
        std::ptr::copy_nonoverlapping(b"sample".as_ptr(), payload.base_ptr().as_ptr().add(256), 6)
    };
    let allocator = FlexibleCircularAllocator::for_region(Arc::clone(&metadata)).unwrap();

    let mut shm_list = ShmDataChunkList::with_root(SharedMemoryChunk::new(
        SharedMemoryLocation::new(PAYLOAD_HANDLE, 256),
        6,
    ));
    // SAFETY: offset 512 is inside the payload mapping.
    unsafe {
        std::ptr::copy_nonoverlapping(b"tail".as_ptr(), payload.base_ptr().as_ptr().add(512), 4)
    };
    shm_list.append(SharedMemoryChunk::new(
        SharedMemoryLocation::new(PAYLOAD_HANDLE, 512),
        4,
    ));
    let location = shm_list
        .save_to_shared_memory(&metadata, METADATA_HANDLE, &allocator)
        .unwrap();

    // Daemon side, with its own mappings.
    let registry = MemoryResourceRegistry::new();
    assert!(registry.insert(METADATA_HANDLE, Arc::new(ShmRegion::open(&metadata_path).unwrap())));
    assert!(registry.insert(PAYLOAD_HANDLE, Arc::new(ShmRegion::open(&payload_path).unwrap())));

    let chunks = ChunkListReader::chunks(&location, &registry).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(
        ChunkListReader::read(&location, &registry).unwrap(),
        vec![b"sample".to_vec(), b"tail".to_vec()]
    );
}

#[test]
fn test_local_copies_readable_through_second_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let metadata_path = dir.path().join("metadata");
    let metadata = Arc::new(ShmRegion::create(&metadata_path, 8192).unwrap());
    let allocator = FlexibleCircularAllocator::for_region(Arc::clone(&metadata)).unwrap();

    let mut list = LocalDataChunkList::with_root(b"payload".as_slice());
    list.append_front(7u64.to_le_bytes().to_vec());
    let location = list
        .save_to_shared_memory(&metadata, METADATA_HANDLE, &allocator)
        .unwrap();

    let registry = MemoryResourceRegistry::new();
    assert!(registry.insert(METADATA_HANDLE, Arc::new(ShmRegion::open(&metadata_path).unwrap())));
    let read = ChunkListReader::read(&location, &registry).unwrap();
    assert_eq!(read, vec![7u64.to_le_bytes().to_vec(), b"payload".to_vec()]);
}
