// SPDX-License-Identifier: MIT

//! Read & Write utility functions for the big-endian wire fields.

/// Number of octets (bytes) in a u32.
pub const U32_SIZE: usize = size_of::<u32>();

/// Number of octets (bytes) in a u64.
pub const U64_SIZE: usize = size_of::<u64>();

/// Convert the slice of U32_SIZE u8 into a u32, using big endian encoding.
///
/// Returns an `InvalidData` error if the slice is not exactly U32_SIZE long.
#[inline]
pub fn get_be_u32(buff: &[u8]) -> Result<u32, std::io::Error> {
    let buff: [u8; U32_SIZE] = buff.try_into().map_err(|_| short_field())?;
    Ok(u32::from_be_bytes(buff))
}

/// Convert the slice of U32_SIZE u8 into an i32, using big endian encoding.
#[inline]
pub fn get_be_i32(buff: &[u8]) -> Result<i32, std::io::Error> {
    let buff: [u8; U32_SIZE] = buff.try_into().map_err(|_| short_field())?;
    Ok(i32::from_be_bytes(buff))
}

/// Convert the slice of U64_SIZE u8 into a u64, using big endian encoding.
#[inline]
pub fn get_be_u64(buff: &[u8]) -> Result<u64, std::io::Error> {
    let buff: [u8; U64_SIZE] = buff.try_into().map_err(|_| short_field())?;
    Ok(u64::from_be_bytes(buff))
}

/// Read the `count` number of bytes from the reader in chunks.
///
/// The chunking keeps a hostile length from forcing one huge allocation
/// before any data has arrived.
pub fn read_chunked_bytes<R: std::io::Read, const COUNT: usize>(
    source: &mut R,
    count: usize,
    buff: &mut [u8; COUNT],
) -> Result<Vec<u8>, std::io::Error> {
    let mut payload = Vec::with_capacity(std::cmp::min(COUNT, count));
    let mut count = count;
    while count > 0 {
        let read_count = std::cmp::min(COUNT, count);
        source.read_exact(&mut buff[0..read_count])?;
        payload.extend_from_slice(&buff[0..read_count]);
        count -= read_count;
    }
    Ok(payload)
}

/// Read and throw away `count` bytes from the reader.
pub fn discard_bytes<R: std::io::Read, const COUNT: usize>(
    source: &mut R,
    count: usize,
    buff: &mut [u8; COUNT],
) -> Result<(), std::io::Error> {
    let mut count = count;
    while count > 0 {
        let read_count = std::cmp::min(COUNT, count);
        source.read_exact(&mut buff[0..read_count])?;
        count -= read_count;
    }
    Ok(())
}

fn short_field() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "field truncated")
}
