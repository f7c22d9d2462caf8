//! Defines the register bus every transport to the instrument must implement

pub mod mock;

use packed_struct::PackingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Mock(#[from] mock::Error),
    #[error("Failed to unpack a record read from the device")]
    Packing(#[from] PackingError),
}

pub type TransportResult<T> = Result<T, Error>;

/// Types that implement this trait can be built from a burst of consecutive register words.
/// The chunk holds the words in address order, each in big-endian byte order.
pub trait Deserialize: Sized {
    type Chunk;
    fn deserialize(chunk: Self::Chunk) -> TransportResult<Self>;
}

/// The trait that is implemented by every way of reaching the FPGA's memory-mapped registers.
///
/// Addresses are absolute byte addresses of 32-bit words. Implementations report their own
/// faults and never interpret the words they move.
pub trait Transport {
    /// Read the 32-bit word at byte address `addr`
    fn read_word(&mut self, addr: u32) -> TransportResult<u32>;

    /// Write the 32-bit word `word` to byte address `addr`
    fn write_word(&mut self, addr: u32, word: u32) -> TransportResult<()>;

    /// Read `n` consecutive words starting at `addr`
    fn read_words(&mut self, addr: u32, n: usize) -> TransportResult<Vec<u32>> {
        let mut words = Vec::with_capacity(n);
        let mut next = addr;
        for _ in 0..n {
            words.push(self.read_word(next)?);
            next = next.wrapping_add(4);
        }
        Ok(words)
    }

    /// Generically read a `Deserialize` record spanning `N / 4` words starting at `addr`.
    /// # Example
    /// ```
    /// # use rpfpga::transport::{mock::Mock, Deserialize, Transport, TransportResult};
    /// struct Pair(u32, u32);
    ///
    /// impl Deserialize for Pair {
    ///     type Chunk = [u8; 8];
    ///     fn deserialize(chunk: Self::Chunk) -> TransportResult<Self> {
    ///         let (hi, lo) = chunk.split_at(4);
    ///         Ok(Pair(
    ///             u32::from_be_bytes(hi.try_into().unwrap()),
    ///             u32::from_be_bytes(lo.try_into().unwrap()),
    ///         ))
    ///     }
    /// }
    ///
    /// let mut transport = Mock::default();
    /// transport.poke(0x10, 7);
    /// transport.poke(0x14, 9);
    /// let pair: Pair = transport.read(0x10).unwrap();
    /// assert_eq!((pair.0, pair.1), (7, 9));
    /// ```
    fn read<D, const N: usize>(&mut self, addr: u32) -> TransportResult<D>
    where
        D: Deserialize<Chunk = [u8; N]>,
    {
        let words = self.read_words(addr, N / 4)?;
        let mut chunk = [0u8; N];
        for (bytes, word) in chunk.chunks_exact_mut(4).zip(&words) {
            bytes.copy_from_slice(&word.to_be_bytes());
        }
        D::deserialize(chunk)
    }
}
