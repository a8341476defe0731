//! Render scraped samples in the Prometheus text exposition format.
//!
//! Each scrape gets a fresh [`Registry`], so series from an earlier scrape
//! never linger. The registry owns label validation: a sample whose label
//! set does not match its family's schema is dropped, and two samples with
//! the same label set collapse into one series (last value wins).

use prometheus::core::Desc;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::collector::Sample;

/// Register the process collector where the platform supports it.
fn register_process_metrics(registry: &Registry) -> prometheus::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use prometheus::process_collector::ProcessCollector;
        registry.register(Box::new(ProcessCollector::for_self()))?;
    }
    #[cfg(not(target_os = "linux"))]
    let _ = registry;

    Ok(())
}

/// Build a registry holding one gauge family per descriptor, filled from
/// `samples`.
pub fn registry(descs: &[&Desc], samples: &[Sample]) -> prometheus::Result<Registry> {
    let registry = Registry::new();
    register_process_metrics(&registry)?;

    let mut families: HashMap<&str, GaugeVec> = HashMap::with_capacity(descs.len());
    for desc in descs {
        let labels: Vec<&str> = desc.variable_labels.iter().map(String::as_str).collect();
        let family = GaugeVec::new(Opts::new(desc.fq_name.clone(), desc.help.clone()), &labels)?;
        registry.register(Box::new(family.clone()))?;
        families.insert(desc.fq_name.as_str(), family);
    }

    let mut rejected = 0usize;
    for sample in samples {
        let Some(family) = families.get(sample.metric) else {
            rejected += 1;
            continue;
        };
        let values: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
        match family.get_metric_with_label_values(&values) {
            Ok(gauge) => gauge.set(sample.value),
            Err(e) => {
                rejected += 1;
                debug!(metric = sample.metric, "sample rejected: {}", e);
            }
        }
    }
    if rejected > 0 {
        warn!(rejected, "samples dropped: label set does not match family schema");
    }

    Ok(registry)
}

/// Gather and encode everything in one pass. Families without samples are
/// left out by the registry.
pub fn render(descs: &[&Desc], samples: &[Sample]) -> prometheus::Result<String> {
    let registry = registry(descs, samples)?;
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
