//! Message status information.
//!
//! This module provides the [`Status`] struct returned by completed receives,
//! describing where a message came from and how much of it arrived.

/// Information about a received message.
///
/// Returned by [`Communicator::recv`](crate::Communicator::recv) and by
/// waiting on a receive [`Request`](crate::Request). The element count is
/// derived lazily from the received byte count, so a status obtained from the
/// substrate in wire words can be reinterpreted in logical elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Source rank of the message.
    pub source: i32,
    /// Tag of the message.
    pub tag: i32,
    bytes: usize,
    element_width: usize,
}

impl Status {
    pub(crate) fn new(source: i32, tag: i32, bytes: usize, element_width: usize) -> Self {
        Status {
            source,
            tag,
            bytes,
            element_width: element_width.max(1),
        }
    }

    /// Reinterpret the received byte count in units of `element_width` bytes.
    pub(crate) fn with_element_width(self, element_width: usize) -> Self {
        Status::new(self.source, self.tag, self.bytes, element_width)
    }

    /// Number of elements received.
    ///
    /// Never larger than the buffer that was provisioned for the receive; it
    /// may be smaller when the receive was over-provisioned.
    pub fn count(&self) -> usize {
        self.bytes / self.element_width
    }

    /// Number of bytes received.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_in_elements() {
        let status = Status::new(3, 7, 48, 8);
        assert_eq!(status.count(), 6);
        assert_eq!(status.bytes(), 48);
        assert_eq!(status.with_element_width(16).count(), 3);
    }

    #[test]
    fn empty_message() {
        let status = Status::new(0, 0, 0, 4);
        assert_eq!(status.count(), 0);
    }
}
