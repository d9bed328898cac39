use std::io;

/// A type that can be written into a frame.
pub trait Serialize<'a> {
    /// Serializes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length prefix.
    ///
    /// # Returns
    /// An optional trailing slice that is written after `buf` without being copied,
    /// or an io error if the value can't be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
