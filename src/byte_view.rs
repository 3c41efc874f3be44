use crate::traits::ValueSize;
use bytes::Bytes;
use std::fmt::{Debug, Display};

/// Immutable view of a cached value.
///
/// The buffer is never mutated after construction. Whoever needs the bytes as their own gets a copy via
/// [`ByteView::to_vec()`]; cloning the view itself only shares the immutable buffer.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    b: Bytes,
}

impl ByteView {
    /// Copies `data` so that later changes to the source buffer can't leak into the cache.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            b: Bytes::copy_from_slice(data),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.b.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// A defensive copy of the data.
    pub fn to_vec(&self) -> Vec<u8> {
        self.b.to_vec()
    }

    /// Cheap handle to the immutable buffer. Used to write response bodies without copying.
    pub fn to_bytes(&self) -> Bytes {
        self.b.clone()
    }

    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.b)
    }
}

// Taking ownership of a buffer is fine: nobody else holds it anymore.
impl From<Vec<u8>> for ByteView {
    fn from(v: Vec<u8>) -> Self {
        Self { b: Bytes::from(v) }
    }
}

impl From<Bytes> for ByteView {
    fn from(b: Bytes) -> Self {
        Self { b }
    }
}

impl From<&str> for ByteView {
    fn from(s: &str) -> Self {
        Self::copy_from_slice(s.as_bytes())
    }
}

impl ValueSize for ByteView {
    #[inline]
    fn size(&self) -> usize {
        self.len()
    }
}

impl PartialEq<[u8]> for ByteView {
    fn eq(&self, other: &[u8]) -> bool {
        self.b.as_ref() == other
    }
}

impl PartialEq<&str> for ByteView {
    fn eq(&self, other: &&str) -> bool {
        self.b.as_ref() == other.as_bytes()
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str_lossy())
    }
}

impl Debug for ByteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ByteView").field(&self.b).finish()
    }
}
