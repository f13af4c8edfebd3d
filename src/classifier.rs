use std::collections::{BTreeMap, HashMap};

use crate::models::{AccountMatch, AddressHealth, AddressRecord, HealthStatus, OpticsReading};

/// Normalizes a CPE/device identifier for matching: trim, lowercase, keep
/// the substring before the first underscore. An all-underscore-prefix value
/// falls back to the whole lowered string; empty input stays empty and never
/// matches anything.
pub fn normalize_cpe_name(value: &str) -> String {
    let lower = value.trim().to_lowercase();
    match lower.split('_').next() {
        Some(head) if !head.is_empty() => head.to_string(),
        _ => lower,
    }
}

/// Readings from one cycle, indexed by normalized device name.
///
/// The first reading in extraction order claims its key; later duplicates
/// are ignored, matching lookup-by-scan over the original extraction order.
pub struct ReadingIndex<'a> {
    by_key: HashMap<String, &'a OpticsReading>,
    total: usize,
}

impl<'a> ReadingIndex<'a> {
    pub fn build(readings: &'a [OpticsReading]) -> Self {
        let mut by_key: HashMap<String, &OpticsReading> = HashMap::new();
        for reading in readings {
            let Some(name) = reading.name.as_deref() else {
                continue;
            };
            let key = normalize_cpe_name(name);
            if key.is_empty() {
                continue;
            }
            if by_key.contains_key(&key) {
                tracing::debug!("Duplicate normalized optics key {}; keeping the first", key);
                continue;
            }
            by_key.insert(key, reading);
        }
        Self {
            by_key,
            total: readings.len(),
        }
    }

    /// Exact-equality lookup on normalized keys.
    pub fn lookup(&self, cpe_value: &str) -> Option<&'a OpticsReading> {
        let key = normalize_cpe_name(cpe_value);
        if key.is_empty() {
            return None;
        }
        self.by_key.get(&key).copied()
    }

    /// Whether the cycle produced any readings at all, matched or not.
    /// Nameless readings count: they prove the cycle ran.
    pub fn has_readings(&self) -> bool {
        self.total > 0
    }
}

/// Derives the discrete health state for addresses. Classification never
/// fails; every address gets exactly one state.
pub struct StatusClassifier {
    low_light_threshold_dbm: f64,
}

impl StatusClassifier {
    pub fn new(low_light_threshold_dbm: f64) -> Self {
        Self {
            low_light_threshold_dbm,
        }
    }

    /// Applies the fixed precedence:
    ///
    /// 1. any inactive account;
    /// 2. any suspended account;
    /// 3. drop not completed;
    /// 4. drop completed with no status-bearing account;
    /// 5. with readings present: unmatched is offline, matched receive power
    ///    at or below the threshold is low light, otherwise online;
    /// 6. no readings at all: online.
    pub fn classify(&self, address: &AddressRecord, index: &ReadingIndex) -> AddressHealth {
        let accounts = &address.accounts;

        let inactive = accounts.iter().any(|a| {
            a.account_status_id == Some(2)
                || matches_label(a.account_status_text.as_deref(), "inactive")
        });
        let suspended = accounts.iter().any(|a| {
            a.account_status_id == Some(4)
                || matches_label(a.account_status_text.as_deref(), "suspended")
        });
        let has_status = accounts.iter().any(|a| a.account_status_id.is_some());
        let completed = address.drop_completed() == Some(true);

        let matched: Vec<AccountMatch> = accounts
            .iter()
            .map(|a| AccountMatch {
                account_id: a.account_id,
                value: a.value.clone(),
                reading: a
                    .value
                    .as_deref()
                    .and_then(|v| index.lookup(v))
                    .cloned(),
            })
            .collect();

        // A match only counts as light when it actually carries a receive
        // power value.
        let mut has_light = false;
        let mut low_light = false;
        if index.has_readings() {
            for entry in &matched {
                if let Some(reading) = &entry.reading {
                    if let Some(rx) = reading.metrics.rx_power {
                        has_light = true;
                        if rx <= self.low_light_threshold_dbm {
                            low_light = true;
                            break;
                        }
                    }
                }
            }
        }

        let health = if inactive {
            HealthStatus::Inactive
        } else if suspended {
            HealthStatus::Suspended
        } else if !completed {
            HealthStatus::DropIncomplete
        } else if !has_status {
            HealthStatus::DropCompleteNoAccount
        } else if index.has_readings() {
            if !has_light {
                HealthStatus::Offline
            } else if low_light {
                HealthStatus::LowLight
            } else {
                HealthStatus::Online
            }
        } else {
            HealthStatus::Online
        };

        AddressHealth {
            address: address.clone(),
            health,
            matched,
        }
    }
}

/// Counts per state over a classified set, every state present even at zero.
pub fn summarize(classified: &[AddressHealth]) -> BTreeMap<HealthStatus, usize> {
    let mut counts = BTreeMap::new();
    for status in HealthStatus::ALL {
        counts.insert(status, 0usize);
    }
    for entry in classified {
        *counts.entry(entry.health).or_insert(0) += 1;
    }
    counts
}

fn matches_label(text: Option<&str>, expected: &str) -> bool {
    text.map(|t| t.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}
