//! Variant codec.
//!
//! `CALL_FUNCTION` tank packets carry their arguments as a variant list:
//! a leading u8 entry count, then per entry a u8 argument index, a u8 type
//! tag, and a type-dependent payload. Decoding keeps the original encoded
//! slice of every entry so that untouched entries re-emit byte-identically;
//! only replaced entries go through the canonical writer.

pub const TYPE_FLOAT: u8 = 1;
pub const TYPE_STRING: u8 = 2;
pub const TYPE_VEC2: u8 = 3;
pub const TYPE_VEC3: u8 = 4;
pub const TYPE_UNSIGNED: u8 = 5;
pub const TYPE_SIGNED: u8 = 9;

/// A single typed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Float(f32),
    Str(String),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Unsigned(u32),
    Signed(i32),
}

impl Variant {
    pub fn type_tag(&self) -> u8 {
        match self {
            Variant::Float(_) => TYPE_FLOAT,
            Variant::Str(_) => TYPE_STRING,
            Variant::Vec2(_) => TYPE_VEC2,
            Variant::Vec3(_) => TYPE_VEC3,
            Variant::Unsigned(_) => TYPE_UNSIGNED,
            Variant::Signed(_) => TYPE_SIGNED,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used where the wire may carry any numeric tag.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Float(f) => Some(*f as i64),
            Variant::Unsigned(u) => Some(i64::from(*u)),
            Variant::Signed(i) => Some(i64::from(*i)),
            _ => None,
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Variant::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
            Variant::Str(s) => {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Variant::Vec2(v) => {
                for f in v {
                    out.extend_from_slice(&f.to_le_bytes());
                }
            }
            Variant::Vec3(v) => {
                for f in v {
                    out.extend_from_slice(&f.to_le_bytes());
                }
            }
            Variant::Unsigned(u) => out.extend_from_slice(&u.to_le_bytes()),
            Variant::Signed(i) => out.extend_from_slice(&i.to_le_bytes()),
        }
    }
}

/// A loosely typed argument as accepted by the injection API. Encoding
/// selects the smallest faithful wire tag.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantArg {
    Num(f64),
    Text(String),
    List(Vec<f64>),
}

impl From<f64> for VariantArg {
    fn from(n: f64) -> Self {
        VariantArg::Num(n)
    }
}

impl From<u32> for VariantArg {
    fn from(n: u32) -> Self {
        VariantArg::Num(f64::from(n))
    }
}

impl From<i32> for VariantArg {
    fn from(n: i32) -> Self {
        VariantArg::Num(f64::from(n))
    }
}

impl From<&str> for VariantArg {
    fn from(s: &str) -> Self {
        VariantArg::Text(s.to_string())
    }
}

impl From<String> for VariantArg {
    fn from(s: String) -> Self {
        VariantArg::Text(s)
    }
}

impl From<Vec<f64>> for VariantArg {
    fn from(v: Vec<f64>) -> Self {
        VariantArg::List(v)
    }
}

impl VariantArg {
    /// Tag selection rules:
    /// - strings stay strings;
    /// - finite integers in `[0, 2^32)` become `UNSIGNED`, otherwise in
    ///   `[-2^31, 2^31)` become `SIGNED`;
    /// - other finite numbers become `FLOAT`;
    /// - non-finite or out-of-integer-range numbers are stringified;
    /// - 2- and 3-element lists become `VEC2`/`VEC3`, any other length an
    ///   empty string.
    pub fn classify(&self) -> Variant {
        match self {
            VariantArg::Text(s) => Variant::Str(s.clone()),
            VariantArg::Num(n) => {
                if !n.is_finite() {
                    Variant::Str(n.to_string())
                } else if n.fract() == 0.0 {
                    if (0.0..=f64::from(u32::MAX)).contains(n) {
                        Variant::Unsigned(*n as u32)
                    } else if (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(n) {
                        Variant::Signed(*n as i32)
                    } else {
                        Variant::Str(n.to_string())
                    }
                } else {
                    Variant::Float(*n as f32)
                }
            }
            VariantArg::List(v) => match v.len() {
                2 => Variant::Vec2([v[0] as f32, v[1] as f32]),
                3 => Variant::Vec3([v[0] as f32, v[1] as f32, v[2] as f32]),
                _ => Variant::Str(String::new()),
            },
        }
    }
}

/// One decoded entry, paired with its original encoded slice when it came
/// off the wire and has not been replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantEntry {
    index: u8,
    value: Variant,
    raw: Option<Vec<u8>>,
}

impl VariantEntry {
    pub fn new(index: u8, value: Variant) -> Self {
        Self {
            index,
            value,
            raw: None,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn value(&self) -> &Variant {
        &self.value
    }

    /// Replaces the value; the entry re-emits through the canonical writer
    /// from here on.
    pub fn set(&mut self, value: Variant) {
        self.value = value;
        self.raw = None;
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        if let Some(raw) = &self.raw {
            out.extend_from_slice(raw);
        } else {
            out.push(self.index);
            out.push(self.value.type_tag());
            self.value.write_payload(out);
        }
    }
}

/// The full argument list of one `CALL_FUNCTION` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantList {
    entries: Vec<VariantEntry>,
}

impl VariantList {
    /// Decodes an extra buffer. Any out-of-range read or unknown type tag
    /// fails the whole buffer and yields an empty list.
    pub fn decode(buf: &[u8]) -> Self {
        decode_entries(buf).map(|entries| Self { entries }).unwrap_or_default()
    }

    /// Builds a list from loosely typed arguments, indexed in order.
    pub fn from_args<A: Into<VariantArg> + Clone>(args: &[A]) -> Self {
        let entries = args
            .iter()
            .enumerate()
            .map(|(i, arg)| VariantEntry::new(i as u8, arg.clone().into().classify()))
            .collect();
        Self { entries }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.entries.len() * 8);
        out.push(self.entries.len() as u8);
        for entry in &self.entries {
            entry.encode_into(&mut out);
        }
        out
    }

    /// Looks up an entry by its wire argument index.
    pub fn get(&self, index: u8) -> Option<&Variant> {
        self.entries
            .iter()
            .find(|e| e.index == index)
            .map(|e| &e.value)
    }

    pub fn get_mut(&mut self, index: u8) -> Option<&mut VariantEntry> {
        self.entries.iter_mut().find(|e| e.index == index)
    }

    /// The first string argument, conventionally the called function name.
    pub fn function_name(&self) -> Option<&str> {
        self.entries.iter().find_map(|e| e.value.as_str())
    }

    pub fn entries(&self) -> &[VariantEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn decode_entries(buf: &[u8]) -> Option<Vec<VariantEntry>> {
    let count = *buf.first()? as usize;
    let mut entries = Vec::with_capacity(count);
    let mut pos = 1usize;

    for _ in 0..count {
        let start = pos;
        let index = *buf.get(pos)?;
        let tag = *buf.get(pos + 1)?;
        pos += 2;

        let value = match tag {
            TYPE_FLOAT => Variant::Float(f32::from_le_bytes(read4(buf, &mut pos)?)),
            TYPE_STRING => {
                let len = u32::from_le_bytes(read4(buf, &mut pos)?) as usize;
                let bytes = buf.get(pos..pos + len)?;
                pos += len;
                Variant::Str(String::from_utf8_lossy(bytes).into_owned())
            }
            TYPE_VEC2 => {
                let x = f32::from_le_bytes(read4(buf, &mut pos)?);
                let y = f32::from_le_bytes(read4(buf, &mut pos)?);
                Variant::Vec2([x, y])
            }
            TYPE_VEC3 => {
                let x = f32::from_le_bytes(read4(buf, &mut pos)?);
                let y = f32::from_le_bytes(read4(buf, &mut pos)?);
                let z = f32::from_le_bytes(read4(buf, &mut pos)?);
                Variant::Vec3([x, y, z])
            }
            TYPE_UNSIGNED => Variant::Unsigned(u32::from_le_bytes(read4(buf, &mut pos)?)),
            TYPE_SIGNED => Variant::Signed(i32::from_le_bytes(read4(buf, &mut pos)?)),
            _ => return None,
        };

        entries.push(VariantEntry {
            index,
            value,
            raw: Some(buf[start..pos].to_vec()),
        });
    }

    Some(entries)
}

fn read4(buf: &[u8], pos: &mut usize) -> Option<[u8; 4]> {
    let bytes = buf.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(bytes.try_into().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(list: &VariantList) -> VariantList {
        VariantList::decode(&list.encode())
    }

    #[test]
    fn all_types_roundtrip_bit_exact() {
        let mut list = VariantList::default();
        list.entries = vec![
            VariantEntry::new(0, Variant::Str("OnChangeSkin".into())),
            VariantEntry::new(1, Variant::Float(1.5)),
            VariantEntry::new(2, Variant::Vec2([0.25, -8.0])),
            VariantEntry::new(3, Variant::Vec3([1.0, 2.0, 3.0])),
            VariantEntry::new(4, Variant::Unsigned(4294967295)),
            VariantEntry::new(5, Variant::Signed(-2147483648)),
        ];
        let back = roundtrip(&list);
        assert_eq!(back.len(), 6);
        for (a, b) in list.entries().iter().zip(back.entries()) {
            assert_eq!(a.index(), b.index());
            assert_eq!(a.value(), b.value());
        }
    }

    #[test]
    fn decoded_entries_reencode_byte_identical() {
        let list = VariantList::from_args(&[
            VariantArg::from("OnSendToServer"),
            VariantArg::from(17000u32),
        ]);
        let wire = list.encode();
        let decoded = VariantList::decode(&wire);
        assert_eq!(decoded.encode(), wire);
    }

    #[test]
    fn modified_entry_uses_canonical_writer() {
        let list = VariantList::from_args(&[VariantArg::from("x"), VariantArg::from(5u32)]);
        let mut decoded = VariantList::decode(&list.encode());
        decoded.get_mut(1).unwrap().set(Variant::Unsigned(16999));
        let back = VariantList::decode(&decoded.encode());
        assert_eq!(back.get(1), Some(&Variant::Unsigned(16999)));
        assert_eq!(back.get(0), Some(&Variant::Str("x".into())));
    }

    #[test]
    fn tag_selection() {
        assert_eq!(
            VariantArg::from(4294967295u32).classify(),
            Variant::Unsigned(4294967295)
        );
        assert_eq!(VariantArg::from(0.0).classify(), Variant::Unsigned(0));
        assert_eq!(VariantArg::from(-1.0).classify(), Variant::Signed(-1));
        assert_eq!(
            VariantArg::Num(f64::from(i32::MIN)).classify(),
            Variant::Signed(i32::MIN)
        );
        assert_eq!(VariantArg::from(1.5).classify(), Variant::Float(1.5));
        assert_eq!(
            VariantArg::Num(f64::NAN).classify(),
            Variant::Str("NaN".into())
        );
        assert_eq!(
            VariantArg::Num(1e12).classify(),
            Variant::Str("1000000000000".into())
        );
        assert_eq!(
            VariantArg::from(vec![1.0, 2.0]).classify(),
            Variant::Vec2([1.0, 2.0])
        );
        assert_eq!(
            VariantArg::from(vec![1.0, 2.0, 3.0]).classify(),
            Variant::Vec3([1.0, 2.0, 3.0])
        );
        assert_eq!(
            VariantArg::from(vec![1.0]).classify(),
            Variant::Str(String::new())
        );
    }

    #[test]
    fn malformed_buffer_yields_no_entries() {
        // Announces two entries but truncates inside the second.
        let mut wire = VariantList::from_args(&[VariantArg::from("ok")]).encode();
        wire[0] = 2;
        wire.push(1);
        assert!(VariantList::decode(&wire).is_empty());

        // Unknown type tag fails the whole buffer.
        let bad = [1u8, 0, 42, 0, 0, 0, 0];
        assert!(VariantList::decode(&bad).is_empty());
    }

    #[test]
    fn function_name_is_first_string() {
        let list = VariantList::from_args(&[
            VariantArg::from(3u32),
            VariantArg::from("OnSpawn"),
        ]);
        assert_eq!(list.function_name(), Some("OnSpawn"));
    }
}
