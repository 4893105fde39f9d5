use std::io::{self, ErrorKind, Read, Write};

use sluice_types::Digest;
use tracing::trace;

use crate::error::{ChecksumError, ChecksumResult};
use crate::hasher::ContentHasher;

/// Default chunk size for streaming copies (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Read adapter that hashes every byte handed to the caller.
///
/// The digest only becomes available once the underlying reader has reported
/// end-of-stream; asking before that is [`ChecksumError::NotFinished`].
pub struct ChecksumReader<R> {
    inner: R,
    hasher: ContentHasher,
    finished: bool,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
            finished: false,
        }
    }

    /// Bytes read through the adapter so far.
    pub fn bytes_read(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Whether end-of-stream has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read and discard the rest of the stream in `chunk_size` pieces.
    /// Returns the total number of bytes hashed.
    pub fn drain(&mut self, chunk_size: usize) -> ChecksumResult<u64> {
        pump(self, &mut io::sink(), chunk_size)?;
        Ok(self.bytes_read())
    }

    /// The finalized digest, if the stream has been fully consumed.
    pub fn digest(&self) -> ChecksumResult<Digest> {
        if !self.finished {
            return Err(ChecksumError::NotFinished {
                consumed: self.bytes_read(),
            });
        }
        Ok(self.hasher.clone().finalize())
    }

    /// Finalize and hand back the inner reader.
    pub fn finish(self) -> ChecksumResult<(Digest, R)> {
        let digest = self.digest()?;
        Ok((digest, self.inner))
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.finished = true;
        } else {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// Write adapter that hashes every byte accepted by the inner writer.
pub struct ChecksumWriter<W> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    /// Access the inner writer, e.g. to sync it before finishing.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Flush the inner writer and finalize. The writer is consumed, so no
    /// bytes can follow the digest.
    pub fn finish(mut self) -> ChecksumResult<(Digest, W)> {
        self.inner.flush()?;
        Ok((self.hasher.finalize(), self.inner))
    }

    /// Give up on the digest and hand back the inner writer unflushed.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `reader` into `writer` using a buffer of `chunk_size` bytes.
///
/// Returns the number of bytes copied. Only one chunk is ever resident.
pub fn pump<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> ChecksumResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    if chunk_size == 0 {
        return Err(ChecksumError::InvalidChunkSize);
    }
    let mut chunk = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&chunk[..n])?;
        total += n as u64;
        trace!(chunk = n, total, "pumped chunk");
    }
    Ok(total)
}

/// Hash a whole stream without retaining it.
pub fn digest_stream<R: Read>(reader: R, chunk_size: usize) -> ChecksumResult<(Digest, u64)> {
    let mut reader = ChecksumReader::new(reader);
    let n = reader.drain(chunk_size)?;
    Ok((reader.digest()?, n))
}
