use crate::{
    variant::{InfoValue, Variant, EMPTY_VALUE},
    vcf_header::{InfoType, VcfHeader},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison applied between a variant field and the filter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connector {
    Equals,
    IsNot,
    Contains,
    Matches,
    Differs,
    MoreThan,
    LessThan,
    True,
    False,
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Connector::Equals => "is equals to",
            Connector::IsNot => "is not",
            Connector::Contains => "contains",
            Connector::Matches => "matches",
            Connector::Differs => "differs",
            Connector::MoreThan => "is more than",
            Connector::LessThan => "is less than",
            Connector::True => "is true",
            Connector::False => "is false",
        };
        write!(f, "{text}")
    }
}

/// The variant field a filter reads: a fixed VCF column or a named INFO key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterField {
    Chrom,
    Pos,
    Id,
    Ref,
    Alt,
    Qual,
    Filter,
    Info(String),
}

impl FilterField {
    /// Parses a user-facing column name. `INFO` columns need a key and are
    /// built with [`FilterField::Info`] directly.
    pub fn from_column(column: &str) -> Option<Self> {
        match column.to_ascii_lowercase().as_str() {
            "chrom" | "chromosome" => Some(FilterField::Chrom),
            "pos" | "position" => Some(FilterField::Pos),
            "id" => Some(FilterField::Id),
            "ref" | "reference" => Some(FilterField::Ref),
            "alt" | "alternative" => Some(FilterField::Alt),
            "qual" | "quality" => Some(FilterField::Qual),
            "filter" => Some(FilterField::Filter),
            _ => None,
        }
    }

    /// Effective operand type, resolved against the header at evaluation
    /// time. Fixed columns carry fixed types; INFO keys resolve through the
    /// schema and undeclared keys stay `None`.
    pub fn resolved_type(&self, header: &VcfHeader) -> Option<InfoType> {
        match self {
            FilterField::Pos => Some(InfoType::Integer),
            FilterField::Qual => Some(InfoType::Float),
            FilterField::Chrom
            | FilterField::Id
            | FilterField::Ref
            | FilterField::Alt
            | FilterField::Filter => Some(InfoType::String),
            FilterField::Info(key) => header.info_type(key),
        }
    }

    fn value_of(&self, variant: &Variant) -> Option<InfoValue> {
        match self {
            FilterField::Chrom => Some(InfoValue::Text(variant.chrom().to_string())),
            FilterField::Pos => Some(InfoValue::Integer(variant.position() as i64)),
            FilterField::Id => Some(InfoValue::Text(variant.id().to_string())),
            FilterField::Ref => Some(InfoValue::Text(variant.reference().to_string())),
            FilterField::Alt => Some(InfoValue::Text(variant.alternative().to_string())),
            FilterField::Qual => variant.quality().map(InfoValue::Float),
            FilterField::Filter => Some(InfoValue::Text(variant.filter().to_string())),
            FilterField::Info(key) => variant.info().get(key).cloned(),
        }
    }
}

/// One filter expression: field, connector and user-supplied value. The
/// operand type is resolved from the header on every evaluation, so filters
/// keep working when annotation injects new INFO declarations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VcfFilter {
    pub field: FilterField,
    pub connector: Connector,
    pub value: String,
}

impl VcfFilter {
    pub fn new(field: FilterField, connector: Connector, value: &str) -> Self {
        Self {
            field,
            connector,
            value: value.to_string(),
        }
    }

    /// Evaluates this filter against one variant. Pure: neither the variant
    /// nor the header is touched, and no failure escapes. Malformed numeric
    /// operands and invalid regex patterns degrade to a pass-through `true`;
    /// an unresolvable field type is "no match".
    pub fn passes(&self, variant: &Variant, header: &VcfHeader) -> bool {
        let Some(field_type) = self.field.resolved_type(header) else {
            return false;
        };
        let actual = self.field.value_of(variant);
        match field_type {
            InfoType::String | InfoType::Character => self.passes_string(actual),
            InfoType::Integer => self.passes_integer(actual),
            InfoType::Float => self.passes_float(actual),
            InfoType::Flag => self.passes_flag(actual),
        }
    }

    fn passes_string(&self, actual: Option<InfoValue>) -> bool {
        let Some(actual) = actual else {
            // Absence is false-like: only negated connectors accept it.
            return matches!(
                self.connector,
                Connector::IsNot | Connector::Differs | Connector::False
            );
        };
        let text = actual.as_text();
        match self.connector {
            Connector::Equals => text == self.value,
            Connector::IsNot => text != self.value,
            Connector::Contains => text.to_lowercase().contains(&self.value.to_lowercase()),
            Connector::Matches => full_match(&self.value, &text).unwrap_or(true),
            Connector::Differs => full_match(&self.value, &text).map(|m| !m).unwrap_or(true),
            Connector::MoreThan => text.as_str() > self.value.as_str(),
            Connector::LessThan => text.as_str() < self.value.as_str(),
            Connector::True => text != EMPTY_VALUE,
            Connector::False => text == EMPTY_VALUE,
        }
    }

    fn passes_integer(&self, actual: Option<InfoValue>) -> bool {
        let Some(actual) = actual else {
            return self.connector == Connector::IsNot;
        };
        let Some(actual) = actual.as_i64() else {
            return true;
        };
        match self.connector {
            Connector::True => return actual != 0,
            Connector::False => return actual == 0,
            _ => {}
        }
        let Ok(threshold) = self.value.parse::<i64>() else {
            return true;
        };
        match self.connector {
            Connector::Equals => actual == threshold,
            Connector::IsNot => actual != threshold,
            Connector::MoreThan => actual > threshold,
            Connector::LessThan => actual < threshold,
            _ => false,
        }
    }

    fn passes_float(&self, actual: Option<InfoValue>) -> bool {
        let Some(actual) = actual else {
            return self.connector == Connector::IsNot;
        };
        let Some(actual) = actual.as_f64() else {
            return true;
        };
        match self.connector {
            Connector::True => return actual != 0.0,
            Connector::False => return actual == 0.0,
            _ => {}
        }
        let Ok(threshold) = self.value.parse::<f64>() else {
            return true;
        };
        match self.connector {
            Connector::Equals => actual == threshold,
            Connector::IsNot => actual != threshold,
            Connector::MoreThan => actual > threshold,
            Connector::LessThan => actual < threshold,
            _ => false,
        }
    }

    fn passes_flag(&self, actual: Option<InfoValue>) -> bool {
        let set = matches!(actual, Some(InfoValue::Flag(true)));
        match self.connector {
            Connector::True => set,
            Connector::False => !set,
            _ => false,
        }
    }
}

impl fmt::Display for VcfFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let field = match &self.field {
            FilterField::Info(key) => key.clone(),
            fixed => format!("{fixed:?}").to_uppercase(),
        };
        write!(f, "{field} {} {}", self.connector, self.value)
    }
}

/// Whole-string regex match in the manner of `String.matches`. `None`
/// signals an invalid pattern, which callers treat as pass-through.
fn full_match(pattern: &str, text: &str) -> Option<bool> {
    let regex = Regex::new(&format!("^(?:{pattern})$")).ok()?;
    Some(regex.is_match(text))
}

/// A variant survives a filter list only if every filter passes.
pub fn passes_all(filters: &[VcfFilter], variant: &Variant, header: &VcfHeader) -> bool {
    filters.iter().all(|filter| filter.passes(variant, header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant_set::VariantSet;

    const FIXTURE: &str = "\
##fileformat=VCFv4.1
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">
##INFO=<ID=AF,Number=1,Type=Float,Description=\"Frequency\">
##INFO=<ID=CONS,Number=1,Type=String,Description=\"Consequence type\">
##INFO=<ID=DB,Number=0,Type=Flag,Description=\"dbSNP membership\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
1\t500\t.\tA\tC\t40\tPASS\tDP=10;AF=0.3;CONS=stop_gained,missense_variant;DB
1\t999\trs77\tG\tT\t.\tPASS\tDP=0;CONS=synonymous_variant
1\t1500\t.\tT\tA\t12\tq10\tAF=0.01
";

    fn fixture() -> VariantSet {
        VariantSet::from_vcf_reader(FIXTURE.as_bytes()).unwrap()
    }

    fn surviving_positions(filters: &[VcfFilter], set: &VariantSet) -> Vec<u64> {
        set.variants()
            .iter()
            .filter(|v| passes_all(filters, v, set.header()))
            .map(|v| v.position())
            .collect()
    }

    #[test]
    fn pos_less_than_keeps_lower_positions() {
        let set = fixture();
        let filter = VcfFilter::new(FilterField::Pos, Connector::LessThan, "1000");
        assert_eq!(surviving_positions(&[filter], &set), vec![500, 999]);
    }

    #[test]
    fn contains_matches_substring_of_consequence_list() {
        let set = fixture();
        let filter = VcfFilter::new(
            FilterField::Info("CONS".to_string()),
            Connector::Contains,
            "stop",
        );
        assert_eq!(surviving_positions(&[filter], &set), vec![500]);
    }

    #[test]
    fn contains_is_case_insensitive() {
        let set = fixture();
        let filter = VcfFilter::new(
            FilterField::Info("CONS".to_string()),
            Connector::Contains,
            "STOP",
        );
        assert_eq!(surviving_positions(&[filter], &set), vec![500]);
    }

    #[test]
    fn matches_anchors_the_whole_value() {
        let set = fixture();
        let filter = VcfFilter::new(
            FilterField::Info("CONS".to_string()),
            Connector::Matches,
            "stop.*",
        );
        assert_eq!(surviving_positions(&[filter], &set), vec![500]);
        let partial = VcfFilter::new(
            FilterField::Info("CONS".to_string()),
            Connector::Matches,
            "stop",
        );
        // "stop" alone does not match the full value.
        assert_eq!(surviving_positions(&[partial], &set), Vec::<u64>::new());
    }

    #[test]
    fn invalid_regex_is_pass_through() {
        let set = fixture();
        let filter = VcfFilter::new(
            FilterField::Info("CONS".to_string()),
            Connector::Matches,
            "stop[",
        );
        // All variants with a CONS value pass; the one without fails absence.
        assert_eq!(surviving_positions(&[filter], &set), vec![500, 999]);
    }

    #[test]
    fn numeric_absence_passes_only_negation() {
        let set = fixture();
        let less = VcfFilter::new(FilterField::Info("AF".to_string()), Connector::LessThan, "1");
        assert_eq!(surviving_positions(&[less], &set), vec![500, 1500]);
        let is_not = VcfFilter::new(FilterField::Info("AF".to_string()), Connector::IsNot, "0.3");
        assert_eq!(surviving_positions(&[is_not], &set), vec![999, 1500]);
    }

    #[test]
    fn malformed_numeric_operand_is_pass_through() {
        let set = fixture();
        let filter = VcfFilter::new(FilterField::Info("DP".to_string()), Connector::MoreThan, "abc");
        assert_eq!(surviving_positions(&[filter], &set), vec![500, 999]);
    }

    #[test]
    fn integer_true_false_mean_nonzero_zero() {
        let set = fixture();
        let truthy = VcfFilter::new(FilterField::Info("DP".to_string()), Connector::True, "");
        assert_eq!(surviving_positions(&[truthy], &set), vec![500]);
        let falsy = VcfFilter::new(FilterField::Info("DP".to_string()), Connector::False, "");
        assert_eq!(surviving_positions(&[falsy], &set), vec![999]);
    }

    #[test]
    fn flag_false_accepts_absent_flag() {
        let set = fixture();
        let truthy = VcfFilter::new(FilterField::Info("DB".to_string()), Connector::True, "");
        assert_eq!(surviving_positions(&[truthy], &set), vec![500]);
        let falsy = VcfFilter::new(FilterField::Info("DB".to_string()), Connector::False, "");
        assert_eq!(surviving_positions(&[falsy], &set), vec![999, 1500]);
    }

    #[test]
    fn undeclared_info_key_never_matches() {
        let set = fixture();
        let filter = VcfFilter::new(
            FilterField::Info("NOPE".to_string()),
            Connector::Equals,
            "x",
        );
        assert_eq!(surviving_positions(&[filter], &set), Vec::<u64>::new());
    }

    #[test]
    fn filters_combine_with_logical_and() {
        let set = fixture();
        let filters = vec![
            VcfFilter::new(FilterField::Pos, Connector::LessThan, "1000"),
            VcfFilter::new(FilterField::Filter, Connector::Equals, "PASS"),
            VcfFilter::new(FilterField::Id, Connector::True, ""),
        ];
        assert_eq!(surviving_positions(&filters, &set), vec![999]);
    }

    #[test]
    fn missing_qual_fails_comparisons() {
        let set = fixture();
        let filter = VcfFilter::new(FilterField::Qual, Connector::MoreThan, "0");
        assert_eq!(surviving_positions(&[filter], &set), vec![500, 1500]);
    }

    #[test]
    fn evaluation_is_deterministic_and_pure() {
        let set = fixture();
        let before = set.variants()[0].clone();
        let filter = VcfFilter::new(FilterField::Chrom, Connector::Equals, "1");
        let first = filter.passes(&set.variants()[0], set.header());
        let second = filter.passes(&set.variants()[0], set.header());
        assert_eq!(first, second);
        assert_eq!(set.variants()[0], before);
        assert_eq!(set.variants()[0].info(), before.info());
    }

    #[test]
    fn resolved_type_follows_header_changes() {
        let mut set = fixture();
        let field = FilterField::Info("GMAF".to_string());
        assert_eq!(field.resolved_type(set.header()), None);
        set.header_mut()
            .add_meta_line("##INFO=<ID=GMAF,Number=1,Type=String,Description=\"MAF\">")
            .unwrap();
        assert_eq!(
            field.resolved_type(set.header()),
            Some(InfoType::String)
        );
    }
}
