//! Event schema store
//!
//! Binary layouts come from a schema directory:
//!
//! - `structure_protocol.json`: one entry per event kind with a struct-style format
//!   string and the ordered field list, e.g.
//!   `{"avis_event": {"format": "!BIHB", "fields": [{"name": "event_type"}, ...]}}`
//! - `event_type_map.json`: event kind name → type code carried in byte 0
//! - symbol maps referenced by a field's `map` key (name → integer code)
//!
//! Any of these files may omit the outer braces. Everything is validated once at load
//! time; a malformed directory is a startup error, never an empty store.

use crate::error::SchemaError;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STRUCTURE_FILE: &str = "structure_protocol.json";
pub const EVENT_TYPE_FILE: &str = "event_type_map.json";

/// Name of the leading type-code field in every layout
pub const EVENT_TYPE_FIELD: &str = "event_type";

/// Placeholder returned for codes missing from a symbol map
pub const UNKNOWN_SYMBOL: &str = "Unknown";

/// Keys of the logged uplink record that event fields are flattened next to
pub const RESERVED_FIELDS: &[&str] = &[
    "received_at",
    "devaddr",
    "fcnt",
    "fport",
    "encrypted_frm",
    "mic",
    "decrypted_hex",
    "raw_signature",
    "event_timestamp",
    "target",
    "radio",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Fixed-width wire types, named after their struct format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl WireType {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'B' => Some(Self::U8),
            'b' => Some(Self::I8),
            'H' => Some(Self::U16),
            'h' => Some(Self::I16),
            'I' | 'L' => Some(Self::U32),
            'i' | 'l' => Some(Self::I32),
            'f' => Some(Self::F32),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F32 => "f32",
        }
    }

    /// Inclusive integer range, `None` for floating point
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            Self::U8 => Some((0, u8::MAX as i64)),
            Self::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            Self::U16 => Some((0, u16::MAX as i64)),
            Self::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::U32 => Some((0, u32::MAX as i64)),
            Self::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::F32 => None,
        }
    }
}

/// Bidirectional name ↔ code lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolMap {
    forward: HashMap<String, u32>,
    reverse: HashMap<u32, String>,
}

impl SymbolMap {
    /// Build from name/code pairs; names and codes must both be unique
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut map = Self::default();
        for (name, code) in pairs {
            let name = name.into();
            if let Some(existing) = map.reverse.get(&code) {
                return Err(format!(
                    "code {} assigned to both '{}' and '{}'",
                    code, existing, name
                ));
            }
            if map.forward.insert(name.clone(), code).is_some() {
                return Err(format!("duplicate name '{}'", name));
            }
            map.reverse.insert(code, name);
        }
        Ok(map)
    }

    /// Code for `name`, 0 when unmapped
    pub fn encode(&self, name: &str) -> u32 {
        self.forward.get(name).copied().unwrap_or(0)
    }

    /// Name for `code`, [`UNKNOWN_SYMBOL`] when unmapped
    pub fn decode(&self, code: u32) -> &str {
        self.reverse
            .get(&code)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_SYMBOL)
    }

    pub fn contains_code(&self, code: u32) -> bool {
        self.reverse.contains_key(&code)
    }

    pub fn max_code(&self) -> Option<u32> {
        self.reverse.keys().copied().max()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub wire: WireType,
    pub map: Option<Arc<SymbolMap>>,
}

/// Fixed binary layout of one event kind
#[derive(Debug, Clone)]
pub struct EventSchema {
    pub name: String,
    pub code: u8,
    pub byte_order: ByteOrder,
    /// Fields after the leading type-code byte, in wire order
    pub fields: Vec<FieldSpec>,
    size: usize,
}

impl EventSchema {
    /// Exact encoded length including the type-code byte
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    format: String,
    fields: Vec<RawField>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(default)]
    map: Option<String>,
}

/// All event layouts, indexed by name and by type code
#[derive(Debug, Clone, Default)]
pub struct SchemaStore {
    by_name: HashMap<String, EventSchema>,
    by_code: HashMap<u8, String>,
}

impl SchemaStore {
    /// Load `structure_protocol.json`, `event_type_map.json` and every referenced map
    /// from `dir`
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let dir = dir.as_ref();
        let structure = read_file(&dir.join(STRUCTURE_FILE))?;
        let event_types = read_file(&dir.join(EVENT_TYPE_FILE))?;

        Self::parse(&structure, &event_types, |map_ref| {
            read_file(&resolve(dir, map_ref))
        })
    }

    /// Build a store from file contents; `load_map` resolves a field's `map` reference
    pub fn parse<F>(structure: &str, event_types: &str, mut load_map: F) -> Result<Self, SchemaError>
    where
        F: FnMut(&str) -> Result<String, SchemaError>,
    {
        let raw_schemas: BTreeMap<String, RawSchema> =
            parse_object(STRUCTURE_FILE, structure)?;
        let type_codes: BTreeMap<String, i64> = parse_object(EVENT_TYPE_FILE, event_types)?;

        let mut maps: HashMap<String, Arc<SymbolMap>> = HashMap::new();
        let mut store = Self::default();

        for (name, raw) in raw_schemas {
            let invalid = |reason: String| SchemaError::Invalid {
                event_type: name.clone(),
                reason,
            };

            let code = *type_codes
                .get(&name)
                .ok_or_else(|| invalid(format!("no code in {}", EVENT_TYPE_FILE)))?;
            let code = u8::try_from(code)
                .map_err(|_| invalid(format!("type code {} does not fit in one byte", code)))?;

            let (byte_order, wires) = parse_format(&raw.format).map_err(invalid)?;
            if wires.len() != raw.fields.len() {
                return Err(invalid(format!(
                    "format '{}' has {} codes but {} fields are listed",
                    raw.format,
                    wires.len(),
                    raw.fields.len()
                )));
            }
            match (raw.fields.first(), wires.first()) {
                (Some(first), Some(WireType::U8)) if first.name == EVENT_TYPE_FIELD => {}
                _ => {
                    return Err(invalid(format!(
                        "first field must be '{}' encoded as B",
                        EVENT_TYPE_FIELD
                    )))
                }
            }

            let mut fields = Vec::with_capacity(raw.fields.len() - 1);
            for (field, wire) in raw.fields.into_iter().zip(wires).skip(1) {
                if field.name == EVENT_TYPE_FIELD || fields.iter().any(|f: &FieldSpec| f.name == field.name) {
                    return Err(invalid(format!("duplicate field '{}'", field.name)));
                }
                if RESERVED_FIELDS.contains(&field.name.as_str()) {
                    return Err(invalid(format!("field name '{}' is reserved", field.name)));
                }

                let map = match field.map {
                    Some(map_ref) => {
                        let Some((_, max)) = wire.int_range() else {
                            return Err(invalid(format!(
                                "mapped field '{}' must use an integer type",
                                field.name
                            )));
                        };
                        let map = match maps.get(&map_ref) {
                            Some(map) => Arc::clone(map),
                            None => {
                                let map = Arc::new(parse_symbol_map(&map_ref, &load_map(&map_ref)?)?);
                                maps.insert(map_ref.clone(), Arc::clone(&map));
                                map
                            }
                        };
                        if map.max_code().is_some_and(|c| c as i64 > max) {
                            return Err(invalid(format!(
                                "map '{}' has codes that do not fit field '{}' ({})",
                                map_ref,
                                field.name,
                                wire.name()
                            )));
                        }
                        Some(map)
                    }
                    None => None,
                };

                fields.push(FieldSpec {
                    name: field.name,
                    wire,
                    map,
                });
            }

            if let Some(other) = store.by_code.get(&code) {
                return Err(invalid(format!("type code {} already used by '{}'", code, other)));
            }

            let size = 1 + fields.iter().map(|f| f.wire.size()).sum::<usize>();
            store.by_code.insert(code, name.clone());
            store.by_name.insert(
                name.clone(),
                EventSchema {
                    name,
                    code,
                    byte_order,
                    fields,
                    size,
                },
            );
        }

        Ok(store)
    }

    pub fn get(&self, name: &str) -> Option<&EventSchema> {
        self.by_name.get(name)
    }

    pub fn by_code(&self, code: u8) -> Option<&EventSchema> {
        self.by_code.get(&code).and_then(|name| self.by_name.get(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Split a format string like `!BIHB` into byte order and field types
///
/// `!` and `>` select big-endian, `<` little-endian. Without a prefix the layout is
/// read in network order. Whitespace is ignored; repeat counts are not supported.
pub fn parse_format(format: &str) -> Result<(ByteOrder, Vec<WireType>), String> {
    let mut chars = format.chars().filter(|c| !c.is_whitespace()).peekable();

    let byte_order = match chars.peek() {
        Some('!') | Some('>') => {
            chars.next();
            ByteOrder::Big
        }
        Some('<') => {
            chars.next();
            ByteOrder::Little
        }
        _ => ByteOrder::Big,
    };

    let wires = chars
        .map(|c| WireType::from_code(c).ok_or_else(|| format!("unsupported format code '{}'", c)))
        .collect::<Result<Vec<_>, _>>()?;

    if wires.is_empty() {
        return Err(format!("format '{}' has no fields", format));
    }
    Ok((byte_order, wires))
}

fn parse_symbol_map(map_ref: &str, raw: &str) -> Result<SymbolMap, SchemaError> {
    let entries: BTreeMap<String, i64> = parse_object(map_ref, raw)?;
    let invalid = |reason: String| SchemaError::InvalidMap {
        path: map_ref.to_string(),
        reason,
    };

    let pairs = entries
        .into_iter()
        .map(|(name, code)| {
            u32::try_from(code)
                .map(|code| (name.clone(), code))
                .map_err(|_| invalid(format!("code {} for '{}' is negative or too large", code, name)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    SymbolMap::from_pairs(pairs).map_err(invalid)
}

/// Parse a JSON object, tolerating files that leave out the outer braces
fn parse_object<T: serde::de::DeserializeOwned>(path: &str, raw: &str) -> Result<T, SchemaError> {
    let trimmed = raw.trim();
    let result = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed)
    } else {
        serde_json::from_str(&format!("{{{}}}", trimmed))
    };
    result.map_err(|source| SchemaError::Parse {
        path: path.to_string(),
        source,
    })
}

fn read_file(path: &Path) -> Result<String, SchemaError> {
    fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn resolve(dir: &Path, map_ref: &str) -> PathBuf {
    let path = Path::new(map_ref);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const STRUCTURE: &str = r#"{
        "avis_event": {
            "format": "!BIHB",
            "fields": [
                {"name": "event_type"},
                {"name": "timestamp"},
                {"name": "common_name", "map": "taxonomy_map.json"},
                {"name": "confidence_bin"}
            ]
        },
        "weather_event": {
            "format": "!BIbBH",
            "fields": [
                {"name": "event_type"},
                {"name": "timestamp"},
                {"name": "temperature"},
                {"name": "humidity"},
                {"name": "pressure"}
            ]
        },
        "telemetry_event": {
            "format": "!BIfff",
            "fields": [
                {"name": "event_type"},
                {"name": "timestamp"},
                {"name": "lat"},
                {"name": "lon"},
                {"name": "alt"}
            ]
        }
    }"#;

    // Brace-less on purpose
    pub const EVENT_TYPES: &str = r#""avis_event": 1, "weather_event": 2, "telemetry_event": 3"#;

    pub const TAXONOMY: &str = r#"{
        "Unknown": 0,
        "American Robin": 1,
        "Northern Cardinal": 2,
        "Black-capped Chickadee": 768
    }"#;

    pub fn store() -> SchemaStore {
        SchemaStore::parse(STRUCTURE, EVENT_TYPES, |map_ref| {
            assert_eq!(map_ref, "taxonomy_map.json");
            Ok(TAXONOMY.to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_parse_format() {
        let (order, wires) = parse_format("!BIHB").unwrap();
        assert_eq!(order, ByteOrder::Big);
        assert_eq!(wires, vec![WireType::U8, WireType::U32, WireType::U16, WireType::U8]);

        let (order, wires) = parse_format("< B h").unwrap();
        assert_eq!(order, ByteOrder::Little);
        assert_eq!(wires, vec![WireType::U8, WireType::I16]);

        assert_eq!(parse_format("BB").unwrap().0, ByteOrder::Big);
        assert!(parse_format("!B2H").is_err());
        assert!(parse_format("!Bq").is_err());
        assert!(parse_format("!").is_err());
    }

    #[test]
    fn test_store_layouts() {
        let store = store();
        assert_eq!(store.len(), 3);

        let avis = store.get("avis_event").unwrap();
        assert_eq!(avis.code, 1);
        assert_eq!(avis.size(), 8);
        assert_eq!(avis.fields.len(), 3);
        assert!(avis.field("common_name").unwrap().map.is_some());
        assert!(avis.field("timestamp").unwrap().map.is_none());

        assert_eq!(store.get("weather_event").unwrap().size(), 9);
        assert_eq!(store.get("telemetry_event").unwrap().size(), 17);
        assert_eq!(store.by_code(3).unwrap().name, "telemetry_event");
        assert!(store.by_code(9).is_none());
    }

    #[test]
    fn test_symbol_map() {
        let map = SymbolMap::from_pairs([("American Robin", 1), ("Blue Jay", 2)]).unwrap();
        assert_eq!(map.encode("Blue Jay"), 2);
        assert_eq!(map.encode("Dodo"), 0);
        assert_eq!(map.decode(1), "American Robin");
        assert_eq!(map.decode(99), UNKNOWN_SYMBOL);

        assert!(SymbolMap::from_pairs([("A", 1), ("B", 1)]).is_err());
    }

    #[test]
    fn test_rejects_inconsistent_schema() {
        let no_code = SchemaStore::parse(STRUCTURE, r#"{"avis_event": 1}"#, |_| {
            Ok(TAXONOMY.to_string())
        });
        assert!(matches!(no_code, Err(SchemaError::Invalid { .. })));

        let count_mismatch = SchemaStore::parse(
            r#"{"x": {"format": "!BH", "fields": [{"name": "event_type"}]}}"#,
            r#"{"x": 4}"#,
            |_| unreachable!(),
        );
        assert!(count_mismatch.is_err());

        let missing_type_byte = SchemaStore::parse(
            r#"{"x": {"format": "!HB", "fields": [{"name": "event_type"}, {"name": "a"}]}}"#,
            r#"{"x": 4}"#,
            |_| unreachable!(),
        );
        assert!(missing_type_byte.is_err());

        let float_map = SchemaStore::parse(
            r#"{"x": {"format": "!Bf", "fields": [{"name": "event_type"}, {"name": "a", "map": "m"}]}}"#,
            r#"{"x": 4}"#,
            |_| Ok(r#"{"a": 1}"#.to_string()),
        );
        assert!(float_map.is_err());

        let map_too_wide = SchemaStore::parse(
            r#"{"x": {"format": "!BB", "fields": [{"name": "event_type"}, {"name": "a", "map": "m"}]}}"#,
            r#"{"x": 4}"#,
            |_| Ok(r#"{"a": 300}"#.to_string()),
        );
        assert!(map_too_wide.is_err());

        let shared_code = SchemaStore::parse(
            r#"{
                "x": {"format": "!B", "fields": [{"name": "event_type"}]},
                "y": {"format": "!B", "fields": [{"name": "event_type"}]}
            }"#,
            r#"{"x": 4, "y": 4}"#,
            |_| unreachable!(),
        );
        assert!(shared_code.is_err());

        for reserved in ["target", "fcnt", "devaddr", "mic"] {
            let structure = format!(
                r#"{{"x": {{"format": "!BB", "fields": [{{"name": "event_type"}}, {{"name": "{}"}}]}}}}"#,
                reserved
            );
            assert!(matches!(
                SchemaStore::parse(&structure, r#"{"x": 4}"#, |_| unreachable!()),
                Err(SchemaError::Invalid { .. })
            ));
        }

        assert!(matches!(
            SchemaStore::parse("not json", EVENT_TYPES, |_| unreachable!()),
            Err(SchemaError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STRUCTURE_FILE), STRUCTURE).unwrap();
        fs::write(dir.path().join(EVENT_TYPE_FILE), EVENT_TYPES).unwrap();
        fs::write(dir.path().join("taxonomy_map.json"), TAXONOMY).unwrap();

        let store = SchemaStore::load_dir(dir.path()).unwrap();
        let avis = store.get("avis_event").unwrap();
        let map = avis.field("common_name").unwrap().map.as_ref().unwrap();
        assert_eq!(map.encode("Black-capped Chickadee"), 768);

        fs::remove_file(dir.path().join("taxonomy_map.json")).unwrap();
        assert!(matches!(
            SchemaStore::load_dir(dir.path()),
            Err(SchemaError::Io { .. })
        ));
    }
}
