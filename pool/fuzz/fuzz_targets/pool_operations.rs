#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use prometheus_client::registry::Registry;
use recycle_pool::{Config, Error, Manager, RecyclableStream};
use std::io::{Read, Seek, SeekFrom, Write};

const BLOCK_SIZE: usize = 32;
const LARGE_BUFFER_MULTIPLE: usize = 64;
const MAXIMUM_BUFFER_SIZE: usize = 8 * LARGE_BUFFER_MULTIPLE;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    operations: Vec<PoolOperation>,
}

#[derive(Arbitrary, Debug)]
enum PoolOperation {
    AcquireBlock,
    ReturnBlocks { count: u8 },
    AcquireLarge { size: u16 },
    ReturnLarge { index: u8 },
    ReturnForeignLarge { size: u16 },
    SetSmallCap { blocks: u8 },
    SetLargeCap { buffers: u8 },
    SetAggressive { enabled: bool },
    CreateStream { capacity: u16, contiguous: bool },
    StreamWrite { data: Vec<u8> },
    StreamSeek { position: u16 },
    StreamRead { size: u16 },
    StreamSetLen { length: u16 },
    StreamGetBuffer,
    DropStream,
}

fn fuzz(input: FuzzInput) {
    let mut registry = Registry::default();
    let config = Config {
        block_size: BLOCK_SIZE,
        large_buffer_multiple: LARGE_BUFFER_MULTIPLE,
        maximum_buffer_size: MAXIMUM_BUFFER_SIZE,
        ..Config::default()
    };
    let manager = Manager::new(config, &mut registry).unwrap();

    let mut blocks: Vec<BytesMut> = Vec::new();
    let mut large: Vec<BytesMut> = Vec::new();
    let mut stream: Option<RecyclableStream> = None;
    let mut shadow: Vec<u8> = Vec::new();
    let mut position = 0usize;

    for op in input.operations {
        match op {
            PoolOperation::AcquireBlock => {
                let block = manager.acquire_block();
                assert_eq!(block.len(), BLOCK_SIZE);
                blocks.push(block);
            }
            PoolOperation::ReturnBlocks { count } => {
                let count = (count as usize).min(blocks.len());
                let batch = blocks.split_off(blocks.len() - count);
                manager.return_blocks(batch, "fuzz").unwrap();
            }
            PoolOperation::AcquireLarge { size } => {
                let result = manager.acquire_large_buffer(size as usize, "fuzz");
                if size == 0 {
                    assert!(matches!(result, Err(Error::InvalidArgument(_))));
                    continue;
                }
                let buffer = result.unwrap();
                assert!(buffer.len() >= size as usize);
                assert_eq!(buffer.len() % LARGE_BUFFER_MULTIPLE, 0);
                assert!(buffer.len() - (size as usize) < LARGE_BUFFER_MULTIPLE);
                large.push(buffer);
            }
            PoolOperation::ReturnLarge { index } => {
                if large.is_empty() {
                    continue;
                }
                let buffer = large.swap_remove(index as usize % large.len());
                manager.return_large_buffer(buffer, "fuzz").unwrap();
            }
            PoolOperation::ReturnForeignLarge { size } => {
                let size = size as usize;
                if size % LARGE_BUFFER_MULTIPLE == 0 {
                    continue;
                }
                let before = manager.stats();
                let result = manager.return_large_buffer(BytesMut::zeroed(size), "fuzz");
                assert!(matches!(result, Err(Error::InvalidBuffer(_))));
                assert_eq!(manager.stats(), before);
            }
            PoolOperation::SetSmallCap { blocks } => {
                manager.set_maximum_free_small_pool_bytes(blocks as usize * BLOCK_SIZE);
            }
            PoolOperation::SetLargeCap { buffers } => {
                manager.set_maximum_free_large_pool_bytes(
                    buffers as usize * LARGE_BUFFER_MULTIPLE,
                );
            }
            PoolOperation::SetAggressive { enabled } => {
                manager.set_aggressive_buffer_return(enabled);
            }
            PoolOperation::CreateStream {
                capacity,
                contiguous,
            } => {
                stream = Some(
                    manager
                        .get_stream_contiguous("fuzz", capacity as usize, contiguous)
                        .unwrap(),
                );
                shadow.clear();
                position = 0;
            }
            PoolOperation::StreamWrite { data } => {
                let Some(stream) = stream.as_mut() else {
                    continue;
                };
                stream.write_all(&data).unwrap();
                if data.is_empty() {
                    continue;
                }
                if position > shadow.len() {
                    shadow.resize(position, 0);
                }
                let end = position + data.len();
                if end > shadow.len() {
                    shadow.resize(end, 0);
                }
                shadow[position..end].copy_from_slice(&data);
                position = end;
            }
            PoolOperation::StreamSeek { position: target } => {
                let Some(stream) = stream.as_mut() else {
                    continue;
                };
                stream.seek(SeekFrom::Start(target as u64)).unwrap();
                position = target as usize;
            }
            PoolOperation::StreamRead { size } => {
                let Some(stream) = stream.as_mut() else {
                    continue;
                };
                let mut buf = vec![0u8; size as usize];
                let read = stream.read(&mut buf).unwrap();
                let expected = shadow.len().saturating_sub(position).min(size as usize);
                assert_eq!(read, expected);
                if read > 0 {
                    assert_eq!(&buf[..read], &shadow[position..position + read]);
                    position += read;
                }
            }
            PoolOperation::StreamSetLen { length } => {
                let Some(stream) = stream.as_mut() else {
                    continue;
                };
                stream.set_len(length as usize).unwrap();
                shadow.resize(length as usize, 0);
                position = position.min(length as usize);
            }
            PoolOperation::StreamGetBuffer => {
                let Some(stream) = stream.as_mut() else {
                    continue;
                };
                assert_eq!(stream.get_buffer().unwrap(), &shadow[..]);
            }
            PoolOperation::DropStream => {
                stream = None;
                shadow.clear();
                position = 0;
            }
        }

        if let Some(stream) = stream.as_ref() {
            assert_eq!(stream.len(), shadow.len());
            assert_eq!(stream.position(), position as u64);
        }
    }

    drop(stream);
    manager.return_blocks(blocks, "fuzz").unwrap();
    for buffer in large {
        manager.return_large_buffer(buffer, "fuzz").unwrap();
    }

    // Every buffer is back, so nothing is in use and free counts match the free-lists.
    let stats = manager.stats();
    assert_eq!(stats.small_pool_in_use_bytes, 0);
    assert_eq!(stats.large_pool_in_use_bytes, 0);
    assert_eq!(
        stats.small_pool_free_bytes,
        (stats.small_blocks_free * BLOCK_SIZE) as i64
    );
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
