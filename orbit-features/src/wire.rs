//! CoAP Content-Format values the feature APIs negotiate (spec §6, "Payload
//! encodings"). Matches the IANA CoAP Content-Formats registry.

pub(crate) const CONTENT_FORMAT_JSON: u16 = 50;
pub(crate) const CONTENT_FORMAT_CBOR: u16 = 60;
pub(crate) const CONTENT_FORMAT_OCTET_STREAM: u16 = 42;

pub(crate) fn encode_cbor<T: serde::Serialize>(value: &T) -> orbit_core::error::Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| orbit_core::error::Error::Serialize(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn decode_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> orbit_core::error::Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| orbit_core::error::Error::Serialize(e.to_string()))
}
