// DERP relay latency summary

use std::collections::{BTreeMap, HashMap};

/// Label reported when the device has not picked a relay yet.
pub const NO_PREFERRED_RELAY: &str = "x";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
    Unspecified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub relay: String,
    pub family: IpFamily,
    /// Round-trip time in seconds.
    pub seconds: f64,
}

impl LatencySample {
    /// Build a sample from a device report key such as `"fra-v4"`.
    pub fn from_report(key: &str, seconds: f64) -> Self {
        let (relay, family) = match key.rsplit_once('-') {
            Some((relay, "v4")) => (relay, IpFamily::V4),
            Some((relay, "v6")) => (relay, IpFamily::V6),
            _ => (key, IpFamily::Unspecified),
        };
        LatencySample {
            relay: relay.to_string(),
            family,
            seconds,
        }
    }
}

pub fn samples_from_report(report: &HashMap<String, f64>) -> Vec<LatencySample> {
    report
        .iter()
        .map(|(key, seconds)| LatencySample::from_report(key, *seconds))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerpPreference {
    /// Effective latency per relay in whole milliseconds.
    pub effective: Option<BTreeMap<String, i64>>,
    pub preferred_label: String,
}

#[derive(Default)]
struct RelayLatency {
    v4: Option<f64>,
    v6: Option<f64>,
    unspecified: Option<f64>,
}

impl RelayLatency {
    fn record(&mut self, family: IpFamily, seconds: f64) {
        let slot = match family {
            IpFamily::V4 => &mut self.v4,
            IpFamily::V6 => &mut self.v6,
            IpFamily::Unspecified => &mut self.unspecified,
        };
        *slot = Some(slot.map_or(seconds, |current| current.min(seconds)));
    }

    fn effective(&self) -> Option<f64> {
        match (self.v4, self.v6) {
            (Some(v4), Some(v6)) => Some(v4.min(v6)),
            (Some(v4), None) => Some(v4),
            (None, Some(v6)) => Some(v6),
            (None, None) => self.unspecified,
        }
    }
}

/// Derive one latency per relay and the label of the relay the device prefers.
///
/// The preferred relay is the device's own choice and is not recomputed from
/// the latencies. A `preferred_relay_id` of 0 means no measurements yet.
pub fn compute_preference(samples: &[LatencySample], preferred_relay_id: u32) -> DerpPreference {
    if preferred_relay_id == 0 {
        return DerpPreference {
            effective: None,
            preferred_label: NO_PREFERRED_RELAY.to_string(),
        };
    }

    let mut relays: HashMap<&str, RelayLatency> = HashMap::new();
    for sample in samples {
        relays
            .entry(sample.relay.as_str())
            .or_default()
            .record(sample.family, sample.seconds);
    }

    let effective = relays
        .into_iter()
        .filter_map(|(relay, latency)| {
            latency
                .effective()
                .map(|seconds| (relay.to_string(), (seconds * 1000.0) as i64))
        })
        .collect();

    DerpPreference {
        effective: Some(effective),
        preferred_label: preferred_relay_id.to_string(),
    }
}
