use dashmap::DashMap;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};
use tracing::error;

static COUNTERS: Lazy<DashMap<String, Family>> = Lazy::new(DashMap::new);

struct Family {
    labels: Vec<String>,
    counter: IntCounterVec,
}

/// Increment the counter `family` by `count`, registering it on first use.
///
/// A family is bound to the label names it was first used with, later calls with a
/// different label set are dropped with an error log.
pub fn increment_by(
    count: u64,
    family: &str,
    description: Option<&str>,
    labels: &[&str],
    label_values: &[&str],
) {
    if let Some(existing) = COUNTERS.get(family) {
        if !same_labels(&existing.labels, labels) {
            error!(
                "Mismatched labels for family '{}'. Existing labels: {:?}, New labels: {:?}",
                family, existing.labels, labels
            );
            return;
        }
        existing.counter.with_label_values(label_values).inc_by(count);
        return;
    }

    let entry = COUNTERS.entry(family.to_string()).or_try_insert_with(|| {
        register_int_counter_vec!(family, description.unwrap_or(family), labels).map(|counter| {
            Family {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                counter,
            }
        })
    });

    match entry {
        Ok(family) => family.counter.with_label_values(label_values).inc_by(count),
        Err(e) => error!("Failed to register counter '{family}': {e}"),
    }
}

/// Current value of a counter, mostly useful for tests.
pub fn get(family: &str, label_values: &[&str]) -> Option<u64> {
    let family = COUNTERS.get(family)?;
    family
        .counter
        .get_metric_with_label_values(label_values)
        .ok()
        .map(|c| c.get())
}

fn same_labels(existing: &[String], new: &[&str]) -> bool {
    let mut existing: Vec<&str> = existing.iter().map(String::as_str).collect();
    let mut new = new.to_vec();
    existing.sort_unstable();
    new.sort_unstable();
    existing == new
}

#[macro_export]
macro_rules! increment_counter_by {
    ($count:expr, $family:expr, $description:expr $(, $($label:expr => $value:expr),*)?) => {
        {
            let labels: Vec<&str> = vec![$crate::MODULE_LABEL $($(, $label)*)?];
            let values: Vec<&str> = vec![module_path!() $($(, $value)*)?];
            $crate::counter::increment_by($count, $family, $description, &labels, &values);
        }
    };
}

#[macro_export]
macro_rules! increment_counter {
    ($family:expr, $description:expr $(, $($label:expr => $value:expr),*)?) => {
        $crate::increment_counter_by!(1u64, $family, $description$(, $($label => $value),*)?)
    };
}
