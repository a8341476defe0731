//! Wire types for the inventory API.
//!
//! Every field is optional. Anything absent, null or of the wrong JSON
//! type decodes to its zero value instead of failing the page.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Query body sent with every page. It never changes between pages.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryQuery {
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<MetricField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub field: &'static str,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricField {
    pub field: &'static str,
    pub agg_type: &'static str,
}

impl InventoryQuery {
    /// Instances keyed by uuid and name, with summed cpu and averaged ram.
    pub fn instances() -> Self {
        Self {
            dimensions: vec![
                Dimension { field: "uuid", index: 1 },
                Dimension { field: "name", index: 2 },
            ],
            metrics: vec![
                MetricField { field: "cpusize", agg_type: "sum" },
                MetricField { field: "ramsize", agg_type: "avg" },
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageResponse {
    pub total_size: i64,
    pub page_no: i64,
    pub page_size: i64,
    #[serde(deserialize_with = "records")]
    pub datas: Vec<InventoryRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InventoryRecord {
    #[serde(rename = "object.name", deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "vdc.vdcLevel2", deserialize_with = "lenient_string")]
    pub vdc_level2: String,
    #[serde(rename = "otherInfo.status", deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(rename = "otherInfo.osVersion", deserialize_with = "lenient_string")]
    pub os_version: String,
    #[serde(rename = "otherInfo.flavorName", deserialize_with = "lenient_string")]
    pub flavor_name: String,
    #[serde(rename = "logicLoc.azoneName", deserialize_with = "lenient_string")]
    pub azone: String,
    #[serde(rename = "logicLoc.clusterName", deserialize_with = "lenient_string")]
    pub cluster: String,
    #[serde(rename = "tenant.projectName", deserialize_with = "lenient_string")]
    pub project: String,
    #[serde(rename = "runningTime", deserialize_with = "lenient_number")]
    pub running_time: f64,
    #[serde(rename = "ramSize", deserialize_with = "lenient_number")]
    pub ram_size: f64,
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// `null` and `[null, {...}]` both decode; null entries become empty records.
fn records<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<InventoryRecord>, D::Error> {
    let raw: Option<Vec<Option<InventoryRecord>>> = Option::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}
