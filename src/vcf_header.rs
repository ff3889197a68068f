use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const FIXED_COLUMNS: [&str; 8] = [
    "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO",
];

/// Declared type of an INFO or FORMAT field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoType {
    String,
    Character,
    Integer,
    Float,
    Flag,
}

impl InfoType {
    fn from_str(text: &str) -> Result<Self> {
        match text {
            "String" => Ok(InfoType::String),
            "Character" => Ok(InfoType::Character),
            "Integer" => Ok(InfoType::Integer),
            "Float" => Ok(InfoType::Float),
            "Flag" => Ok(InfoType::Flag),
            other => Err(anyhow!("Unknown header type '{other}'")),
        }
    }
}

impl fmt::Display for InfoType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            InfoType::String => "String",
            InfoType::Character => "Character",
            InfoType::Integer => "Integer",
            InfoType::Float => "Float",
            InfoType::Flag => "Flag",
        };
        write!(f, "{text}")
    }
}

/// One `##INFO=<...>` or `##FORMAT=<...>` declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexHeaderLine {
    pub id: String,
    pub number: String,
    pub value_type: InfoType,
    pub description: String,
}

impl ComplexHeaderLine {
    fn render(&self, kind: &str) -> String {
        format!(
            "##{kind}=<ID={},Number={},Type={},Description=\"{}\">",
            self.id, self.number, self.value_type, self.description
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum HeaderLine {
    Info(ComplexHeaderLine),
    Format(ComplexHeaderLine),
    Other(String),
}

/// The `##` metadata block of a VCF file plus the sample names of the
/// `#CHROM` column line. Declared INFO types drive both filter operand
/// resolution and INFO value coercion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VcfHeader {
    lines: Vec<HeaderLine>,
    samples: Vec<String>,
}

impl VcfHeader {
    /// Adds one `##` metadata line, parsing INFO and FORMAT declarations.
    pub fn add_meta_line(&mut self, line: &str) -> Result<()> {
        if let Some(body) = line.strip_prefix("##INFO=<") {
            let parsed = parse_complex_line(body.trim_end_matches('>'))?;
            self.add_info_line(parsed);
        } else if let Some(body) = line.strip_prefix("##FORMAT=<") {
            let parsed = parse_complex_line(body.trim_end_matches('>'))?;
            if !self.format_lines().any(|f| f.id == parsed.id) {
                self.lines.push(HeaderLine::Format(parsed));
            }
        } else if line.starts_with("##") {
            self.lines.push(HeaderLine::Other(line.to_string()));
        } else {
            return Err(anyhow!("Not a metadata line: {line}"));
        }
        Ok(())
    }

    /// Reads the `#CHROM ...` column line, keeping any sample names.
    pub fn set_column_line(&mut self, line: &str) -> Result<()> {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < FIXED_COLUMNS.len() {
            return Err(anyhow!("Column line has too few columns: {line}"));
        }
        self.samples = columns.iter().skip(9).map(|s| s.to_string()).collect();
        Ok(())
    }

    /// Inserts an INFO declaration unless the ID is already present.
    pub fn add_info_line(&mut self, line: ComplexHeaderLine) {
        if self.info_line(&line.id).is_none() {
            self.lines.push(HeaderLine::Info(line));
        }
    }

    pub fn info_line(&self, id: &str) -> Option<&ComplexHeaderLine> {
        self.info_lines().find(|line| line.id == id)
    }

    /// Declared type of an INFO key; `None` if the key is undeclared.
    pub fn info_type(&self, id: &str) -> Option<InfoType> {
        self.info_line(id).map(|line| line.value_type)
    }

    pub fn info_lines(&self) -> impl Iterator<Item = &ComplexHeaderLine> {
        self.lines.iter().filter_map(|line| match line {
            HeaderLine::Info(info) => Some(info),
            _ => None,
        })
    }

    pub fn format_lines(&self) -> impl Iterator<Item = &ComplexHeaderLine> {
        self.lines.iter().filter_map(|line| match line {
            HeaderLine::Format(format) => Some(format),
            _ => None,
        })
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Renders the full header block, column line included.
    pub fn to_vcf_lines(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .lines
            .iter()
            .map(|line| match line {
                HeaderLine::Info(info) => info.render("INFO"),
                HeaderLine::Format(format) => format.render("FORMAT"),
                HeaderLine::Other(raw) => raw.clone(),
            })
            .collect();
        let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
        if !self.samples.is_empty() {
            columns.push("FORMAT".to_string());
            columns.extend(self.samples.iter().cloned());
        }
        out.push(columns.join("\t"));
        out
    }
}

/// Parses the `key=value` pairs inside a `##INFO=<...>` declaration,
/// honouring commas inside the quoted description.
fn parse_complex_line(body: &str) -> Result<ComplexHeaderLine> {
    let mut id = None;
    let mut number = None;
    let mut value_type = None;
    let mut description = None;

    let mut rest = body;
    while !rest.is_empty() {
        let Some((key, tail)) = rest.split_once('=') else {
            break;
        };
        let (value, remaining) = if let Some(quoted) = tail.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| anyhow!("Unterminated description in header line: {body}"))?;
            let value = &quoted[..end];
            let after = &quoted[end + 1..];
            (value, after.strip_prefix(',').unwrap_or(after))
        } else {
            match tail.split_once(',') {
                Some((value, after)) => (value, after),
                None => (tail, ""),
            }
        };
        match key.trim() {
            "ID" => id = Some(value.to_string()),
            "Number" => number = Some(value.to_string()),
            "Type" => value_type = Some(InfoType::from_str(value)?),
            "Description" => description = Some(value.to_string()),
            _ => {}
        }
        rest = remaining;
    }

    Ok(ComplexHeaderLine {
        id: id.ok_or_else(|| anyhow!("Header line without ID: {body}"))?,
        number: number.unwrap_or_else(|| ".".to_string()),
        value_type: value_type.ok_or_else(|| anyhow!("Header line without Type: {body}"))?,
        description: description.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_declaration_with_commas_in_description() {
        let mut header = VcfHeader::default();
        header
            .add_meta_line(
                "##INFO=<ID=CONS,Number=1,Type=String,Description=\"Consequence, comma separated\">",
            )
            .unwrap();
        let line = header.info_line("CONS").unwrap();
        assert_eq!(line.number, "1");
        assert_eq!(line.value_type, InfoType::String);
        assert_eq!(line.description, "Consequence, comma separated");
    }

    #[test]
    fn info_type_resolution_falls_back_to_none() {
        let mut header = VcfHeader::default();
        header
            .add_meta_line("##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">")
            .unwrap();
        assert_eq!(header.info_type("DP"), Some(InfoType::Integer));
        assert_eq!(header.info_type("NOPE"), None);
    }

    #[test]
    fn duplicate_info_injection_is_idempotent() {
        let mut header = VcfHeader::default();
        let line = ComplexHeaderLine {
            id: "GENE".to_string(),
            number: "1".to_string(),
            value_type: InfoType::String,
            description: "Ensemble gene ID".to_string(),
        };
        header.add_info_line(line.clone());
        header.add_info_line(line);
        assert_eq!(header.info_lines().count(), 1);
    }

    #[test]
    fn column_line_keeps_samples() {
        let mut header = VcfHeader::default();
        header
            .set_column_line("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA001\tNA002")
            .unwrap();
        assert_eq!(header.samples(), &["NA001", "NA002"]);
    }

    #[test]
    fn renders_header_lines_in_order() {
        let mut header = VcfHeader::default();
        header.add_meta_line("##fileformat=VCFv4.1").unwrap();
        header
            .add_meta_line("##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">")
            .unwrap();
        let lines = header.to_vcf_lines();
        assert_eq!(lines[0], "##fileformat=VCFv4.1");
        assert_eq!(
            lines[1],
            "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">"
        );
        assert_eq!(lines[2], FIXED_COLUMNS.join("\t"));
    }
}
