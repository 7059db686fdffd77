use dashmap::DashMap;
use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, HistogramVec};
use tracing::error;

use crate::DEFAULT_HISTOGRAM_BUCKETS;

static HISTOGRAMS: Lazy<DashMap<String, HistogramVec>> = Lazy::new(DashMap::new);

/// Record `value` in the histogram `family`, registering it on first use.
pub fn observe(
    family: &str,
    description: Option<&str>,
    labels: &[&str],
    label_values: &[&str],
    value: f64,
) {
    let entry = HISTOGRAMS.entry(family.to_string()).or_try_insert_with(|| {
        register_histogram_vec!(
            family,
            description.unwrap_or(family),
            labels,
            DEFAULT_HISTOGRAM_BUCKETS.to_vec()
        )
    });

    match entry {
        Ok(histogram) => match histogram.get_metric_with_label_values(label_values) {
            Ok(h) => h.observe(value),
            Err(e) => error!("Mismatched labels for histogram '{family}': {e}"),
        },
        Err(e) => error!("Failed to register histogram '{family}': {e}"),
    }
}

/// Number of samples recorded so far, mostly useful for tests.
pub fn sample_count(family: &str, label_values: &[&str]) -> Option<u64> {
    let histogram = HISTOGRAMS.get(family)?;
    histogram
        .get_metric_with_label_values(label_values)
        .ok()
        .map(|h| h.get_sample_count())
}

#[macro_export]
macro_rules! histogram {
    ($family:expr, $description:expr, $value:expr $(, $($label:expr => $val:expr),*)?) => {
        {
            let labels: Vec<&str> = vec![$crate::MODULE_LABEL $($(, $label)*)?];
            let values: Vec<&str> = vec![module_path!() $($(, $val)*)?];
            $crate::histogram::observe($family, $description, &labels, &values, $value);
        }
    };
}
