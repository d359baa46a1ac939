//! Stream traits shared by the converter and the inspector

use std::io::{Read, Seek, Write};

/// Combined trait for Read + Seek
pub trait ReadSeek: Read + Seek + Send {}

/// Blanket implementation for any type that implements Read + Seek
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Combined trait for Write + Seek
pub trait WriteSeek: Write + Seek + Send {}

/// Blanket implementation for any type that implements Write + Seek
impl<T: Write + Seek + Send> WriteSeek for T {}

/// Length of a seekable stream, leaving the cursor at the start
pub fn stream_len<S: Seek + ?Sized>(stream: &mut S) -> std::io::Result<u64> {
    let len = stream.seek(std::io::SeekFrom::End(0))?;
    stream.seek(std::io::SeekFrom::Start(0))?;
    Ok(len)
}
