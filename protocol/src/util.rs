use {
    byte_unit::Byte,
    serde::de::{self, Deserializer, Unexpected, Visitor},
    std::fmt,
    tokio::{
        runtime::{Handle, RuntimeFlavor},
        task::block_in_place,
    },
};

/// Runs blocking filesystem work without stalling other tasks of a multi-thread
/// runtime. Falls back to a plain call elsewhere (current-thread runtime, no runtime).
#[inline]
pub fn maybe_block_in_place<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

struct ByteSizeVisitor;

impl Visitor<'_> for ByteSizeVisitor {
    type Value = Byte;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number of bytes or a string such as \"10 MB\"")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Byte, E> {
        Ok(Byte::from_u64(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Byte, E> {
        let value = u64::try_from(value)
            .map_err(|_| E::invalid_value(Unexpected::Signed(value), &self))?;
        Ok(Byte::from_u64(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Byte, E> {
        value.parse().map_err(E::custom)
    }
}

/// Reads a size written either as a plain number of bytes (`1000`) or with a unit (`"10 MB"`).
///
/// Use with `#[serde(deserialize_with = "...")]`.
#[inline]
pub fn deserialize_byte_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Byte, D::Error> {
    deserializer.deserialize_any(ByteSizeVisitor)
}
