use std::fmt;

use serde::{de, Deserializer, Serializer};

/// Use this to define a many-to-one mapping
macro_rules! many_to_one {
    (match $target:ident {
        $($output:path: [$($input:path),* $(,)?]),* $(,)?
    }) => {
        match $target {
            $($($input)|* => $output,)*
        }
    };
}

pub(crate) use many_to_one;

/// Serialize a height as a decimal string so that consumers which parse JSON
/// numbers as doubles do not lose precision.
pub fn serialize_u64_as_string<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

/// Accept a `u64` given either as a JSON number or as a decimal (or `0x`
/// prefixed hex) string.
pub fn deserialize_u64_from_str_or_int<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(StrOrIntVisitor)
}

/// Optional variant of [`deserialize_u64_from_str_or_int`].
pub fn deserialize_opt_u64_from_str_or_int<'de, D>(
    deserializer: D,
) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OptVisitor;

    impl<'de> de::Visitor<'de> for OptVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an optional unsigned integer or numeric string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(StrOrIntVisitor).map(Some)
        }
    }

    deserializer.deserialize_option(OptVisitor)
}

struct StrOrIntVisitor;

impl<'de> de::Visitor<'de> for StrOrIntVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned integer or numeric string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative height {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        parse_u64(v).ok_or_else(|| E::custom(format!("invalid unsigned integer {v:?}")))
    }
}

/// Parse a decimal or `0x` prefixed hex string. A trailing `n` (as written
/// by some job tooling for big integers) is accepted.
pub fn parse_u64(value: &str) -> Option<u64> {
    let value = value.trim();
    let value = value.strip_suffix('n').unwrap_or(value);
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}
