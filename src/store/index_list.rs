/// The store materialises list-shaped children as objects with integer
/// string keys (`{"0": .., "1": ..}`), while freshly built values still
/// carry real JSON arrays. `int_keyed::deserialize` accepts both and
/// restores numeric order, so struct fields can stay plain `Vec`s.
pub mod int_keyed {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::Deserialize;
    use serde::de::{Deserializer, Error, MapAccess, SeqAccess, Visitor};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        struct IntKeyed<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for IntKeyed<T> {
            type Value = Vec<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a list or an object with integer string keys")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<T>, A::Error> {
                let mut out = Vec::new();
                while let Some(item) = seq.next_element()? {
                    out.push(item);
                }
                Ok(out)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Vec<T>, A::Error> {
                let mut entries: Vec<(u64, T)> = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    let idx = key
                        .parse()
                        .map_err(|_| A::Error::custom(format!("non-integer key {key}")))?;
                    entries.push((idx, value));
                }
                entries.sort_by_key(|&(idx, _)| idx);
                Ok(entries.into_iter().map(|(_, value)| value).collect())
            }

            fn visit_unit<E: Error>(self) -> Result<Vec<T>, E> {
                Ok(Vec::new())
            }
        }

        deserializer.deserialize_any(IntKeyed(PhantomData))
    }
}
