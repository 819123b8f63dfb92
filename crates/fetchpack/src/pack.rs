//! Typed values over the byte codec.
//!
//! `Pack` writes a value into an `Encoder`; `Unpack` reads it back from a
//! `Decoder`. Tuples pack their elements in order, which is how argument
//! lists travel over the wire.

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::Result;

/// A value that can be written into an `Encoder`.
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// A value that can be read back from a `Decoder`.
pub trait Unpack: Sized {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self>;
}

/// A raw byte blob, packed as `[Len: u32][Data]`.
///
/// `Vec<u8>` packs as a sequence of `u8` items, which is the same layout.
/// `Bytes` exists so callers can say "opaque payload" in a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self { Bytes(v) }
}

impl From<&[u8]> for Bytes {
    fn from(v: &[u8]) -> Self { Bytes(v.to_vec()) }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl Pack for Bytes {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.bytes(&self.0) }
}

impl Unpack for Bytes {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { Ok(Bytes(dec.bytes()?.to_vec())) }
}

macro_rules! scalar {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl Pack for $ty {
                fn pack(&self, enc: &mut Encoder) -> Result<()> {
                    enc.$method(*self);
                    Ok(())
                }
            }

            impl Unpack for $ty {
                fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
                    dec.$method()
                }
            }
        )*
    };
}

scalar! {
    bool => bool,
    u8 => u8,
    i8 => i8,
    u16 => u16,
    i16 => i16,
    u32 => u32,
    i32 => i32,
    u64 => u64,
    i64 => i64,
    f32 => f32,
    f64 => f64,
    char => char,
}

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Unpack for String {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { Ok(dec.str()?.to_owned()) }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { (**self).pack(enc) }
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.length(self.len())?;
        for item in self {
            item.pack(enc)?;
        }
        Ok(())
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { self.as_slice().pack(enc) }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let count = dec.length()?;
        // Every item takes at least one byte on the wire, except zero-sized
        // ones, so cap the up-front allocation by what is actually left.
        let mut items = Vec::with_capacity(count.min(dec.remaining()));
        for _ in 0..count {
            items.push(T::unpack(dec)?);
        }
        Ok(items)
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            None => {
                enc.u8(0);
                Ok(())
            }
            Some(v) => {
                enc.u8(1);
                v.pack(enc)
            }
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        match dec.u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::unpack(dec)?)),
            b => Err(Error::InvalidOption(b)),
        }
    }
}

impl Pack for () {
    fn pack(&self, _enc: &mut Encoder) -> Result<()> { Ok(()) }
}

impl Unpack for () {
    fn unpack(_dec: &mut Decoder<'_>) -> Result<Self> { Ok(()) }
}

macro_rules! tuple {
    ($($name:ident),+) => {
        impl<$($name: Pack),+> Pack for ($($name,)+) {
            #[allow(non_snake_case)]
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                let ($($name,)+) = self;
                $($name.pack(enc)?;)+
                Ok(())
            }
        }

        impl<$($name: Unpack),+> Unpack for ($($name,)+) {
            fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
                Ok(($($name::unpack(dec)?,)+))
            }
        }
    };
}

tuple!(A);
tuple!(A, B);
tuple!(A, B, C);
tuple!(A, B, C, D);
tuple!(A, B, C, D, E);
tuple!(A, B, C, D, E, F);
tuple!(A, B, C, D, E, F, G);
tuple!(A, B, C, D, E, F, G, H);
