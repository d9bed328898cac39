use std::io;

/// A type that can be read back from a received frame.
pub trait Deserialize<'a>: Sized {
    /// Deserializes a value borrowing from `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame body, without the length prefix.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
