use crate::vcf_header::{InfoType, VcfHeader};
use anyhow::{anyhow, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap, fmt};

/// Placeholder for missing values in VCF columns and exports.
pub const EMPTY_VALUE: &str = ".";

/// A single INFO value, typed according to the header declaration of its key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl InfoValue {
    /// Coerces a raw INFO token to the declared type. Values that do not
    /// parse as the declared number type are kept as text rather than lost.
    pub fn parse(raw: &str, info_type: InfoType) -> Self {
        match info_type {
            InfoType::Flag => InfoValue::Flag(true),
            InfoType::Integer => match raw.parse::<i64>() {
                Ok(i) => InfoValue::Integer(i),
                Err(_) => InfoValue::Text(raw.to_string()),
            },
            InfoType::Float => match raw.parse::<f64>() {
                Ok(f) => InfoValue::Float(f),
                Err(_) => InfoValue::Text(raw.to_string()),
            },
            InfoType::String | InfoType::Character => InfoValue::Text(raw.to_string()),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            InfoValue::Flag(b) => b.to_string(),
            InfoValue::Integer(i) => i.to_string(),
            InfoValue::Float(f) => f.to_string(),
            InfoValue::Text(s) => s.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            InfoValue::Integer(i) => Some(*i as f64),
            InfoValue::Float(f) => Some(*f),
            InfoValue::Text(s) => s.parse().ok(),
            InfoValue::Flag(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            InfoValue::Integer(i) => Some(*i),
            InfoValue::Float(f) => Some(*f as i64),
            InfoValue::Text(s) => s.parse().ok(),
            InfoValue::Flag(_) => None,
        }
    }
}

/// The INFO column of one variant: key to typed value.
/// Flags are stored only when present; a false flag is simply absent.
pub type Info = BTreeMap<String, InfoValue>;

/// One VCF data line. Ordered by (chromosome, position) so that variant
/// lists keep a stable genome order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variant {
    chrom: String,
    position: u64,
    id: String,
    reference: String,
    alternative: String,
    quality: Option<f64>,
    filter: String,
    info: Info,
    #[serde(default)]
    format: Vec<String>,
    #[serde(default)]
    samples: Vec<Vec<String>>,
}

impl Variant {
    /// Parses one tab-separated VCF data line. INFO values are typed through
    /// the header; keys the header does not declare are kept as text.
    pub fn from_vcf_line(line: &str, header: &VcfHeader) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return Err(anyhow!(
                "VCF line has {} fields, expected at least 8: {line}",
                fields.len()
            ));
        }
        let position = fields[1]
            .parse::<u64>()
            .map_err(|e| anyhow!("Invalid POS '{}': {e}", fields[1]))?;
        if fields[3].is_empty() {
            return Err(anyhow!("VCF line has an empty REF column: {line}"));
        }
        let quality = match fields[5] {
            EMPTY_VALUE => None,
            qual => Some(
                qual.parse::<f64>()
                    .map_err(|e| anyhow!("Invalid QUAL '{qual}': {e}"))?,
            ),
        };

        let mut info = Info::new();
        if fields[7] != EMPTY_VALUE {
            for entry in fields[7].split(';').filter(|e| !e.is_empty()) {
                match entry.split_once('=') {
                    Some((key, raw)) => {
                        let info_type = header.info_type(key).unwrap_or(InfoType::String);
                        info.insert(key.to_string(), InfoValue::parse(raw, info_type));
                    }
                    None => {
                        info.insert(entry.to_string(), InfoValue::Flag(true));
                    }
                }
            }
        }

        let format: Vec<String> = fields
            .get(8)
            .filter(|f| !f.is_empty() && **f != EMPTY_VALUE)
            .map(|f| f.split(':').map(str::to_string).collect())
            .unwrap_or_default();
        let samples: Vec<Vec<String>> = fields
            .iter()
            .skip(9)
            .map(|s| s.split(':').map(str::to_string).collect())
            .collect();

        Ok(Self {
            chrom: fields[0].to_string(),
            position,
            id: fields[2].to_string(),
            reference: fields[3].to_string(),
            alternative: fields[4].to_string(),
            quality,
            filter: fields[6].to_string(),
            info,
            format,
            samples,
        })
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn alternative(&self) -> &str {
        &self.alternative
    }

    pub fn quality(&self) -> Option<f64> {
        self.quality
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut Info {
        &mut self.info
    }

    pub fn format(&self) -> &[String] {
        &self.format
    }

    /// Sample value for the given sample index and FORMAT key, if present.
    pub fn sample_value(&self, sample_index: usize, format_key: &str) -> Option<&str> {
        let key_index = self.format.iter().position(|k| k == format_key)?;
        self.samples
            .get(sample_index)?
            .get(key_index)
            .map(String::as_str)
    }

    /// Renders the variant back into one tab-separated VCF data line.
    pub fn to_vcf_line(&self) -> String {
        let qual = match self.quality {
            Some(q) => format_quality(q),
            None => EMPTY_VALUE.to_string(),
        };
        let info = if self.info.is_empty() {
            EMPTY_VALUE.to_string()
        } else {
            self.info
                .iter()
                .filter(|(_, v)| !matches!(v, InfoValue::Flag(false)))
                .map(|(k, v)| match v {
                    InfoValue::Flag(_) => k.clone(),
                    other => format!("{k}={}", other.as_text()),
                })
                .join(";")
        };
        let mut columns = vec![
            self.chrom.clone(),
            self.position.to_string(),
            self.id.clone(),
            self.reference.clone(),
            self.alternative.clone(),
            qual,
            self.filter.clone(),
            info,
        ];
        if !self.format.is_empty() {
            columns.push(self.format.join(":"));
            for sample in &self.samples {
                columns.push(sample.join(":"));
            }
        }
        columns.join("\t")
    }
}

/// Renders QUAL with at most three decimals, as the TSV saver expects.
pub fn format_quality(q: f64) -> String {
    let text = format!("{q:.3}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_vcf_line())
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.chrom == other.chrom
            && self.position == other.position
            && self.reference == other.reference
            && self.alternative == other.alternative
    }
}

impl Eq for Variant {}

impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        chromosome_rank(&self.chrom)
            .cmp(&chromosome_rank(&other.chrom))
            .then(self.position.cmp(&other.position))
            .then_with(|| self.reference.cmp(&other.reference))
            .then_with(|| self.alternative.cmp(&other.alternative))
    }
}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key for chromosome names: 1..22 numerically, then X, Y, MT,
/// then anything else alphabetically. A "chr" prefix is ignored.
fn chromosome_rank(chrom: &str) -> (u8, u32, String) {
    let name = chrom.strip_prefix("chr").unwrap_or(chrom);
    if let Ok(n) = name.parse::<u32>() {
        return (0, n, String::new());
    }
    match name.to_ascii_uppercase().as_str() {
        "X" => (1, 0, String::new()),
        "Y" => (2, 0, String::new()),
        "M" | "MT" => (3, 0, String::new()),
        other => (4, 0, other.to_string()),
    }
}
