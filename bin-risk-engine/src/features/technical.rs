//! Technical features of the requested BIN

use super::{names, FeatureExtractor};
use crate::config::{BinRange, SignalConfig, TestBin};
use crate::store::EventStore;
use crate::types::RequestContext;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Canonical BIN length
pub const BIN_LENGTH: usize = 6;

/// Length of the synthetic PAN used for the Luhn check
const SYNTHETIC_PAN_LENGTH: usize = 16;

/// Shortest input that may be resolved against the test-BIN table
const MIN_PREFIX_DIGITS: usize = 4;

/// Technical feature record.
///
/// Fallback: canonical BIN with every flag neutral (not a test BIN, Luhn
/// valid, not in a suspicious range).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalFeatures {
    /// Canonical six-digit BIN
    pub bin_number: String,

    /// Known test BIN
    pub is_test_bin: bool,

    /// Synthetic PAN under this BIN passes the Luhn check
    pub is_luhn_valid: bool,

    /// BIN lies in a known suspicious numeric range
    pub is_suspicious_range: bool,
}

impl TechnicalFeatures {
    /// Direct technical risk (0-100), independent of the ensemble
    pub fn risk(&self) -> f64 {
        let mut score = 0.0;
        if self.is_test_bin {
            score += 15.0;
        }
        if !self.is_luhn_valid {
            score += 50.0;
        }
        if self.is_suspicious_range {
            score += 35.0;
        }
        f64::min(score, 100.0)
    }
}

/// Luhn (mod 10) check over the digits of `number`
pub fn luhn_valid(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 2 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// Checks the BIN against static tables; never touches the event store
#[derive(Debug, Clone)]
pub struct TechnicalExtractor {
    test_bins: Vec<TestBin>,
    suspicious_ranges: Vec<BinRange>,
}

impl TechnicalExtractor {
    /// Create extractor
    pub fn new(signals: &SignalConfig) -> Self {
        Self {
            test_bins: signals.test_bins.clone(),
            suspicious_ranges: signals.suspicious_ranges.clone(),
        }
    }

    /// Canonical six-digit BIN.
    ///
    /// Non-digits are dropped and the first six digits kept. A 4-5 digit
    /// input that prefixes a known test BIN resolves to that BIN; any other
    /// short input is right-padded with zeros.
    pub fn canonicalize(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.len() >= BIN_LENGTH {
            return digits[..BIN_LENGTH].to_string();
        }

        if digits.len() >= MIN_PREFIX_DIGITS {
            if let Some(test) = self.test_bins.iter().find(|t| t.bin.starts_with(&digits)) {
                return test.bin.clone();
            }
        }

        format!("{:0<width$}", digits, width = BIN_LENGTH)
    }

    /// PAN the Luhn check runs against: the published reference PAN for a
    /// test BIN, otherwise the BIN zero-padded to 16 digits
    pub fn synthetic_pan(&self, bin: &str) -> String {
        match self.test_bin(bin) {
            Some(test) => test.reference_pan.clone(),
            None => format!("{:0<width$}", bin, width = SYNTHETIC_PAN_LENGTH),
        }
    }

    fn test_bin(&self, bin: &str) -> Option<&TestBin> {
        self.test_bins.iter().find(|t| t.bin == bin)
    }

    /// Compute features for a raw BIN
    pub fn analyze(&self, raw_bin: &str) -> TechnicalFeatures {
        let bin_number = self.canonicalize(raw_bin);
        let numeric: u32 = bin_number.parse().unwrap_or(0);

        TechnicalFeatures {
            is_test_bin: self.test_bin(&bin_number).is_some(),
            is_luhn_valid: luhn_valid(&self.synthetic_pan(&bin_number)),
            is_suspicious_range: self.suspicious_ranges.iter().any(|r| r.contains(numeric)),
            bin_number,
        }
    }
}

#[async_trait]
impl FeatureExtractor for TechnicalExtractor {
    type Output = TechnicalFeatures;

    fn name(&self) -> &'static str {
        names::TECHNICAL
    }

    async fn extract(&self, ctx: &RequestContext, _store: &dyn EventStore) -> Result<TechnicalFeatures> {
        Ok(self.analyze(&ctx.bin))
    }

    fn fallback(&self, ctx: &RequestContext) -> TechnicalFeatures {
        TechnicalFeatures {
            bin_number: self.canonicalize(&ctx.bin),
            is_test_bin: false,
            is_luhn_valid: true,
            is_suspicious_range: false,
        }
    }
}
