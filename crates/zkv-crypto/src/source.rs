//! Byte sources feeding a [`DecryptSession`](crate::DecryptSession).

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// An ordered, non-restartable source of ciphertext bytes.
///
/// Semantics match [`AsyncReadExt::read`]: `Ok(0)` means end of input.
pub trait CiphertextSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Adapts any [`AsyncRead`] (file, in-memory cursor, network body).
#[derive(Debug)]
pub struct ReaderSource<R>(pub R);

impl<R> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self(reader)
    }

    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: AsyncRead + Unpin + Send> CiphertextSource for ReaderSource<R> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }
}

/// Fill `buf` completely, or return how many bytes were read before EOF.
pub(crate) async fn read_full<S: CiphertextSource>(
    source: &mut S,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl CiphertextSource for Trickle {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_read_full_across_short_reads() {
        let mut src = Trickle {
            data: (0u8..50).collect(),
            pos: 0,
            step: 7,
        };
        let mut buf = [0u8; 40];
        assert_eq!(read_full(&mut src, &mut buf).await.unwrap(), 40);
        assert_eq!(buf[39], 39);

        let mut rest = [0u8; 40];
        assert_eq!(read_full(&mut src, &mut rest).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_reader_source_over_slice() {
        let data = b"ciphertext bytes".to_vec();
        let mut src = ReaderSource::new(std::io::Cursor::new(data));
        let mut buf = [0u8; 10];
        assert_eq!(read_full(&mut src, &mut buf).await.unwrap(), 10);
        assert_eq!(&buf, b"ciphertext");
    }
}
