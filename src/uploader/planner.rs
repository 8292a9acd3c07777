//! Chunk size math

use thiserror::Error;

/// Chunk size shared with the remote store: 2 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Invalid planner input. These indicate a caller bug, not a runtime fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk index {index} out of range (total chunks: {total})")]
    IndexOutOfRange { index: u64, total: u64 },
}

/// Number of chunks needed to cover `file_size` bytes
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Result<u64, PlanError> {
    if chunk_size == 0 {
        return Err(PlanError::ZeroChunkSize);
    }
    Ok(file_size.div_ceil(chunk_size))
}

/// Half-open byte range `[start, end)` of chunk `index`
pub fn chunk_range(index: u64, file_size: u64, chunk_size: u64) -> Result<(u64, u64), PlanError> {
    let total = total_chunks(file_size, chunk_size)?;
    if index >= total {
        return Err(PlanError::IndexOutOfRange { index, total });
    }
    let start = index * chunk_size;
    let end = (start + chunk_size).min(file_size);
    Ok((start, end))
}

/// Size in bytes of chunk `index`
pub fn chunk_len(index: u64, file_size: u64, chunk_size: u64) -> Result<u64, PlanError> {
    let (start, end) = chunk_range(index, file_size, chunk_size)?;
    Ok(end - start)
}

/// Total bytes covered by a set of chunk indices. Out-of-range indices are ignored.
pub fn bytes_covered<'a, I>(indices: I, file_size: u64, chunk_size: u64) -> u64
where
    I: IntoIterator<Item = &'a u64>,
{
    indices
        .into_iter()
        .filter_map(|&index| chunk_len(index, file_size, chunk_size).ok())
        .sum()
}
