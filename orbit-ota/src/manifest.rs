//! OTA manifest codec: an integer-keyed CBOR map (spec §4.G, "Manifest encoding").
//!
//! The wire format only names keys 1-6; `compressed` has no assigned key in spec.md's
//! table even though §3's data model requires it on every `Component`. We follow
//! `golioth_fw_block_processor.c`'s `is_compressed` field and assign it key 7,
//! defaulting to `false` when absent so manifests written before this field existed
//! still decode (see DESIGN.md, "Manifest compressed flag").

use ciborium::value::Value;
use orbit_core::error::{Error, Result};

const KEY_SEQUENCE_NUMBER: i64 = 1;
const KEY_COMPONENTS: i64 = 3;

const COMPONENT_KEY_PACKAGE: i64 = 1;
const COMPONENT_KEY_VERSION: i64 = 2;
const COMPONENT_KEY_HASH: i64 = 3;
const COMPONENT_KEY_SIZE: i64 = 4;
const COMPONENT_KEY_URI: i64 = 5;
const COMPONENT_KEY_BOOTLOADER: i64 = 6;
const COMPONENT_KEY_COMPRESSED: i64 = 7;

/// One firmware component named by a manifest (spec §3, "OTA manifest").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub package: String,
    pub version: String,
    pub size: i64,
    pub hash: [u8; 32],
    pub uri: String,
    pub compressed: bool,
    pub bootloader: Option<String>,
}

/// Cloud description of the firmware a device should be running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub sequence_number: i64,
    pub components: Vec<Component>,
}

impl Manifest {
    pub fn find_component(&self, package: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.package == package)
    }
}

pub fn encode_manifest(manifest: &Manifest) -> Result<Vec<u8>> {
    let components = manifest
        .components
        .iter()
        .map(|component| {
            let mut entries = vec![
                (Value::Integer(COMPONENT_KEY_PACKAGE.into()), Value::Text(component.package.clone())),
                (Value::Integer(COMPONENT_KEY_VERSION.into()), Value::Text(component.version.clone())),
                (Value::Integer(COMPONENT_KEY_HASH.into()), Value::Text(hex::encode(component.hash))),
                (Value::Integer(COMPONENT_KEY_SIZE.into()), Value::Integer(component.size.into())),
                (Value::Integer(COMPONENT_KEY_URI.into()), Value::Text(component.uri.clone())),
                (Value::Integer(COMPONENT_KEY_COMPRESSED.into()), Value::Bool(component.compressed)),
            ];
            if let Some(bootloader) = &component.bootloader {
                entries.push((Value::Integer(COMPONENT_KEY_BOOTLOADER.into()), Value::Text(bootloader.clone())));
            }
            Value::Map(entries)
        })
        .collect();

    let root = Value::Map(vec![
        (Value::Integer(KEY_SEQUENCE_NUMBER.into()), Value::Integer(manifest.sequence_number.into())),
        (Value::Integer(KEY_COMPONENTS.into()), Value::Array(components)),
    ]);

    let mut buf = Vec::new();
    ciborium::ser::into_writer(&root, &mut buf).map_err(|e| Error::Serialize(e.to_string()))?;
    Ok(buf)
}

pub fn decode_manifest(bytes: &[u8]) -> Result<Manifest> {
    let value: Value = ciborium::de::from_reader(bytes).map_err(|e| Error::Serialize(e.to_string()))?;
    let map = as_map(&value)?;

    let sequence_number = map_get_int(map, KEY_SEQUENCE_NUMBER)?.unwrap_or(0);
    let components_value = map_get(map, KEY_COMPONENTS).ok_or(Error::InvalidFormat)?;
    let components = components_value.as_array().ok_or(Error::InvalidFormat)?;

    let components = components.iter().map(decode_component).collect::<Result<Vec<_>>>()?;

    Ok(Manifest { sequence_number, components })
}

fn decode_component(value: &Value) -> Result<Component> {
    let map = as_map(value)?;

    let package = map_get_text(map, COMPONENT_KEY_PACKAGE)?.ok_or(Error::InvalidFormat)?;
    let version = map_get_text(map, COMPONENT_KEY_VERSION)?.ok_or(Error::InvalidFormat)?;
    let size = map_get_int(map, COMPONENT_KEY_SIZE)?.ok_or(Error::InvalidFormat)?;
    let uri = map_get_text(map, COMPONENT_KEY_URI)?.ok_or(Error::InvalidFormat)?;
    let bootloader = map_get_text(map, COMPONENT_KEY_BOOTLOADER)?;
    let compressed = map_get(map, COMPONENT_KEY_COMPRESSED).and_then(Value::as_bool).unwrap_or(false);

    let hash_hex = map_get_text(map, COMPONENT_KEY_HASH)?.ok_or(Error::InvalidFormat)?;
    let hash = decode_hash(&hash_hex)?;

    Ok(Component { package, version, size, hash, uri, compressed, bootloader })
}

fn decode_hash(hex_str: &str) -> Result<[u8; 32]> {
    if hex_str.len() != 64 {
        return Err(Error::InvalidFormat);
    }
    let bytes = hex::decode(hex_str).map_err(|_| Error::InvalidFormat)?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

fn as_map(value: &Value) -> Result<&Vec<(Value, Value)>> {
    value.as_map().ok_or(Error::InvalidFormat)
}

fn map_get<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    map.iter().find(|(k, _)| k.as_integer() == Some(key.into())).map(|(_, v)| v)
}

fn map_get_int(map: &[(Value, Value)], key: i64) -> Result<Option<i64>> {
    match map_get(map, key) {
        Some(value) => value
            .as_integer()
            .and_then(|i| i64::try_from(i).ok())
            .map(Some)
            .ok_or(Error::InvalidFormat),
        None => Ok(None),
    }
}

fn map_get_text(map: &[(Value, Value)], key: i64) -> Result<Option<String>> {
    match map_get(map, key) {
        Some(value) => value.as_text().map(|s| Some(s.to_string())).ok_or(Error::InvalidFormat),
        None => Ok(None),
    }
}
