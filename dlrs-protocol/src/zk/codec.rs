//! Serde bridge for arkworks values
//!
//! Group elements, scalars and proof structs travel inside JSON messages as
//! lowercase hex of their compressed canonical encoding. Deserialization runs
//! the full curve and subgroup validation of `ark-serialize`.

use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{de, Deserialize, Deserializer, Serializer};

/// Field-level adapter: `#[serde(with = "crate::zk::codec::canonical")]`
pub mod canonical {
    use super::*;

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: CanonicalSerialize,
        S: Serializer,
    {
        serializer.serialize_str(&to_hex(value))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: CanonicalDeserialize,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        from_hex(&s).map_err(de::Error::custom)
    }
}

pub fn to_hex<T: CanonicalSerialize>(value: &T) -> String {
    hex::encode(super::group::canonical_bytes(value))
}

pub fn from_hex<T: CanonicalDeserialize>(s: &str) -> Result<T, String> {
    let bytes = hex::decode(s).map_err(|e| e.to_string())?;
    T::deserialize_compressed(&bytes[..]).map_err(|e| e.to_string())
}

/// Implement serde for a type through its canonical encoding
macro_rules! canonical_serde {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl serde::Serialize for $ty {
                fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    $crate::zk::codec::canonical::serialize(self, serializer)
                }
            }

            impl<'de> serde::Deserialize<'de> for $ty {
                fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    $crate::zk::codec::canonical::deserialize(deserializer)
                }
            }
        )+
    };
}

pub(crate) use canonical_serde;

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::{Fr, G1Affine};
    use ark_ec::AffineRepr;
    use serde::Serialize;

    #[derive(Serialize, serde::Deserialize)]
    struct Wrapper {
        #[serde(with = "canonical")]
        point: G1Affine,
        #[serde(with = "canonical")]
        scalars: Vec<Fr>,
    }

    #[test]
    fn test_json_embedding() {
        let w = Wrapper {
            point: G1Affine::generator(),
            scalars: vec![Fr::from(3u64), Fr::from(7u64)],
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.point, w.point);
        assert_eq!(back.scalars, w.scalars);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(from_hex::<G1Affine>("zz").is_err());
        assert!(from_hex::<G1Affine>(&"11".repeat(10)).is_err());
    }
}
