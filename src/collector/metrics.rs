//! Metric families exported per instance and the record → sample mapping.

use prometheus::core::Desc;
use std::collections::HashMap;

use super::record::InventoryRecord;

pub const RUNNING_TIME_METRIC: &str = "ecs_instance_running_time_seconds";
pub const RAM_METRIC: &str = "ecs_instance_ram_gb";

const RUNNING_TIME_LABELS: [&str; 8] = [
    "name",
    "vdc_level2",
    "status",
    "os_version",
    "flavor_name",
    "azone",
    "cluster",
    "project",
];
const RAM_LABELS: [&str; 1] = ["name"];

/// One gauge observation. `labels` lines up with the family's label schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: &'static str,
    pub value: f64,
    pub labels: Vec<String>,
}

/// The fixed descriptors of both families. Built once at startup so the
/// label schema exists before any scrape does.
#[derive(Debug, Clone)]
pub struct MetricDescs {
    pub running_time: Desc,
    pub ram: Desc,
}

impl MetricDescs {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            running_time: gauge_desc(
                RUNNING_TIME_METRIC,
                "Running time of ECS instance",
                &RUNNING_TIME_LABELS,
            )?,
            ram: gauge_desc(RAM_METRIC, "RAM size of ECS instance (GB)", &RAM_LABELS)?,
        })
    }

    pub fn all(&self) -> Vec<&Desc> {
        vec![&self.running_time, &self.ram]
    }
}

fn gauge_desc(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<Desc> {
    Desc::new(
        name.to_string(),
        help.to_string(),
        labels.iter().map(|l| l.to_string()).collect(),
        HashMap::new(),
    )
}

/// Map one record onto exactly one sample per family. Missing fields were
/// already zeroed during decoding, so this never fails.
pub fn map_record(record: &InventoryRecord) -> [Sample; 2] {
    [
        Sample {
            metric: RUNNING_TIME_METRIC,
            value: record.running_time,
            labels: vec![
                record.name.clone(),
                record.vdc_level2.clone(),
                record.status.clone(),
                record.os_version.clone(),
                record.flavor_name.clone(),
                record.azone.clone(),
                record.cluster.clone(),
                record.project.clone(),
            ],
        },
        Sample {
            metric: RAM_METRIC,
            value: record.ram_size,
            labels: vec![record.name.clone()],
        },
    ]
}
