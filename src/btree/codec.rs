use std::cmp::Ordering;

/// A value with a fixed-size little-endian page encoding.
pub trait FixedCodec: Copy {
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_codec_for_int {
    ($($ty:ty),*) => {
        $(
            impl FixedCodec for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&buf[..Self::SIZE]);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_fixed_codec_for_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl<const N: usize> FixedCodec for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        bytes
    }
}

/// Ordering strategy for B+Tree keys.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their `Ord` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Orders keys descending.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseOrder;

impl<K: Ord> KeyComparator<K> for ReverseOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        b.cmp(a)
    }
}
