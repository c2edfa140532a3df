//! Location: POSTs network info (Wi-Fi, cellular) to `.l/v1/net` and receives
//! resolved coordinates back synchronously (spec §4.H).

use crate::wire::{decode_cbor, CONTENT_FORMAT_CBOR};
use orbit_core::client::Client;
use orbit_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PREFIX: &str = ".l/";

#[derive(Debug, Clone, Serialize)]
pub struct WifiAccessPoint {
    pub mac: String,
    pub rssi: i32,
}

/// Cellular radio type, wire-encoded as the lowercase strings the cloud platform
/// expects (grounded on `net_info_cellular.c`'s `cellular_type_to_str`).
#[derive(Debug, Clone, Copy, Serialize)]
pub enum CellularType {
    #[serde(rename = "ltecatm")]
    LteCatM,
    #[serde(rename = "nbiot")]
    NbIot,
}

/// A single cellular attachment's identifying info (spec §4.H "Wi-Fi, cellular";
/// grounded on `net_info_cellular.c`'s `golioth_net_info_cellular_append`, same
/// field set and the same optional `strength`).
#[derive(Debug, Clone, Serialize)]
pub struct CellularInfo {
    #[serde(rename = "type")]
    pub network_type: CellularType,
    pub mcc: u32,
    pub mnc: u32,
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct NetworkInfo {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub wifi: Vec<WifiAccessPoint>,
    #[serde(rename = "cell", skip_serializing_if = "Option::is_none")]
    pub cellular: Option<CellularInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedLocation {
    pub lat: f64,
    pub lon: f64,
}

pub struct Location<'a> {
    client: &'a Client,
}

impl<'a> Location<'a> {
    pub fn new(client: &'a Client) -> Self {
        Location { client }
    }

    pub fn resolve_sync(&self, info: &NetworkInfo, timeout: Duration) -> Result<ResolvedLocation> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(info, &mut buf).map_err(|e| Error::Serialize(e.to_string()))?;
        let response = self.client.post_sync(PREFIX, "v1/net", CONTENT_FORMAT_CBOR, buf, timeout)?;
        decode_cbor(&response.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;

    #[test]
    fn cellular_info_encodes_alongside_wifi() {
        let info = NetworkInfo {
            wifi: vec![WifiAccessPoint { mac: "aa:bb:cc:dd:ee:ff".into(), rssi: -60 }],
            cellular: Some(CellularInfo { network_type: CellularType::LteCatM, mcc: 310, mnc: 410, id: 12345, strength: Some(-85) }),
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&info, &mut buf).unwrap();
        let value: Value = ciborium::de::from_reader(buf.as_slice()).unwrap();
        let map = value.as_map().unwrap();

        assert!(map.iter().any(|(k, _)| k.as_text() == Some("wifi")));

        let cell = map.iter().find(|(k, _)| k.as_text() == Some("cell")).unwrap().1.as_map().unwrap();
        let network_type = cell.iter().find(|(k, _)| k.as_text() == Some("type")).unwrap().1.as_text();
        assert_eq!(network_type, Some("ltecatm"));
        let mcc = cell.iter().find(|(k, _)| k.as_text() == Some("mcc")).unwrap().1.as_integer();
        assert_eq!(mcc.and_then(|i| i64::try_from(i).ok()), Some(310));
        let strength = cell.iter().find(|(k, _)| k.as_text() == Some("strength")).unwrap().1.as_integer();
        assert_eq!(strength.and_then(|i| i64::try_from(i).ok()), Some(-85));
    }

    #[test]
    fn no_cellular_attachment_omits_the_cell_key() {
        let info = NetworkInfo { wifi: vec![], cellular: None };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&info, &mut buf).unwrap();
        let value: Value = ciborium::de::from_reader(buf.as_slice()).unwrap();
        let map = value.as_map().unwrap();
        assert!(map.iter().all(|(k, _)| k.as_text() != Some("cell")));
        assert!(map.iter().all(|(k, _)| k.as_text() != Some("wifi")));
    }
}
