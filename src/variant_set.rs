use crate::{
    variant::{format_quality, Variant, EMPTY_VALUE},
    vcf_header::VcfHeader,
};
use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
};

/// Default name of the annotation checkpoint inside the system temp dir.
const CHECKPOINT_FILE_NAME: &str = "coat_checkpoint.vcf";

/// A fully loaded VCF file: header schema plus the variants in genome order.
#[derive(Clone, Debug, Default)]
pub struct VariantSet {
    header: VcfHeader,
    variants: Vec<Variant>,
    changed: bool,
}

impl VariantSet {
    pub fn new(header: VcfHeader, mut variants: Vec<Variant>) -> Self {
        variants.sort();
        Self {
            header,
            variants,
            changed: false,
        }
    }

    /// Loads a `.vcf` or `.vcf.gz` file. Malformed data lines are skipped
    /// with a warning instead of aborting the whole load.
    pub fn from_vcf_file(path: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Could not open '{path}'"))?;
        if path.ends_with(".gz") {
            Self::from_vcf_reader(GzDecoder::new(file))
        } else {
            Self::from_vcf_reader(file)
        }
    }

    pub fn from_vcf_reader<R: Read>(reader: R) -> Result<Self> {
        let mut header = VcfHeader::default();
        let mut variants = Vec::new();
        let mut saw_column_line = false;
        for line in BufReader::new(reader).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            if line.starts_with("##") {
                header.add_meta_line(&line)?;
            } else if line.starts_with('#') {
                header.set_column_line(&line)?;
                saw_column_line = true;
            } else {
                match Variant::from_vcf_line(&line, &header) {
                    Ok(variant) => variants.push(variant),
                    Err(e) => eprintln!("Skipping malformed VCF line: {e}"),
                }
            }
        }
        if !saw_column_line {
            return Err(anyhow!("VCF input has no #CHROM column line"));
        }
        Ok(Self::new(header, variants))
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut VcfHeader {
        self.changed = true;
        &mut self.header
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variants_mut(&mut self) -> &mut Vec<Variant> {
        self.changed = true;
        &mut self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Whether the in-memory set differs from what was last loaded or saved.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    /// Writes the header and all variants as VCF. `indices` restricts the
    /// output to a filtered subset; `None` writes everything.
    pub fn save_vcf(&self, path: &str, indices: Option<&[usize]>) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Could not create '{path}'"))?;
        let mut writer = std::io::BufWriter::new(file);
        self.write_vcf(&mut writer, indices)?;
        Ok(())
    }

    fn write_vcf<W: Write>(&self, writer: &mut W, indices: Option<&[usize]>) -> Result<()> {
        for line in self.header.to_vcf_lines() {
            writeln!(writer, "{line}")?;
        }
        match indices {
            Some(indices) => {
                for &i in indices {
                    let variant = self
                        .variants
                        .get(i)
                        .ok_or_else(|| anyhow!("Variant index {i} out of range"))?;
                    writeln!(writer, "{}", variant.to_vcf_line())?;
                }
            }
            None => {
                for variant in &self.variants {
                    writeln!(writer, "{}", variant.to_vcf_line())?;
                }
            }
        }
        Ok(())
    }

    /// Flattened TSV export: fixed columns, one column per declared INFO key,
    /// one column per sample and FORMAT key. Missing values render as
    /// `empty_value`.
    pub fn save_tsv(&self, path: &str, indices: Option<&[usize]>, empty_value: &str) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("Could not create '{path}'"))?;
        writer.write_record(self.tsv_headers())?;
        let rows: Box<dyn Iterator<Item = &Variant>> = match indices {
            Some(indices) => Box::new(indices.iter().filter_map(|&i| self.variants.get(i))),
            None => Box::new(self.variants.iter()),
        };
        for variant in rows {
            writer.write_record(self.tsv_fields(variant, empty_value))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn tsv_headers(&self) -> Vec<String> {
        let mut headers: Vec<String> = ["CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        headers.extend(self.header.info_lines().map(|line| line.id.clone()));
        for sample in self.header.samples() {
            for format in self.header.format_lines() {
                headers.push(format!("{sample}.{}", format.id));
            }
        }
        headers
    }

    fn tsv_fields(&self, variant: &Variant, empty_value: &str) -> Vec<String> {
        let mut fields = vec![
            variant.chrom().to_string(),
            variant.position().to_string(),
            variant.id().to_string(),
            variant.reference().to_string(),
            variant.alternative().to_string(),
            variant
                .quality()
                .map(format_quality)
                .unwrap_or_else(|| empty_value.to_string()),
            variant.filter().to_string(),
        ];
        for line in self.header.info_lines() {
            fields.push(
                variant
                    .info()
                    .get(&line.id)
                    .map(|v| v.as_text())
                    .unwrap_or_else(|| empty_value.to_string()),
            );
        }
        for (sample_index, _) in self.header.samples().iter().enumerate() {
            for format in self.header.format_lines() {
                fields.push(
                    variant
                        .sample_value(sample_index, &format.id)
                        .unwrap_or(empty_value)
                        .to_string(),
                );
            }
        }
        fields
    }

    /// Checkpoint write: the whole set goes to a fixed file in the system
    /// temp dir, via a uniquely named sibling so a crash mid-write never
    /// leaves a truncated checkpoint.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        self.save_checkpoint_to(&std::env::temp_dir().join(CHECKPOINT_FILE_NAME))
    }

    pub fn save_checkpoint_to(&self, path: &Path) -> Result<PathBuf> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Could not create checkpoint in '{}'", dir.display()))?;
        self.write_vcf(&mut temp, None)?;
        temp.persist(path)
            .with_context(|| format!("Could not persist checkpoint '{}'", path.display()))?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_VCF: &str = "\
##fileformat=VCFv4.1
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">
##INFO=<ID=AF,Number=1,Type=Float,Description=\"Frequency\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tNA001
2\t200\t.\tG\tT\t30\tPASS\tDP=10\tGT\t0/1
1\t100\trs1\tA\tC\t50.5\tPASS\tDP=20;AF=0.01\tGT\t1/1
";

    #[test]
    fn loads_and_sorts_variants() {
        let set = VariantSet::from_vcf_reader(SAMPLE_VCF.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.variants()[0].chrom(), "1");
        assert_eq!(set.variants()[1].chrom(), "2");
        assert_eq!(set.header().samples(), &["NA001"]);
    }

    #[test]
    fn malformed_data_lines_are_skipped_on_load() {
        let text = format!("{SAMPLE_VCF}1\t0\t.\t\tC\t.\tPASS\t.\nnot a vcf line\n");
        let set = VariantSet::from_vcf_reader(text.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn rejects_input_without_column_line() {
        let result = VariantSet::from_vcf_reader("##fileformat=VCFv4.1\n".as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn vcf_save_round_trips() {
        let set = VariantSet::from_vcf_reader(SAMPLE_VCF.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vcf");
        set.save_vcf(path.to_str().unwrap(), None).unwrap();
        let reloaded = VariantSet::from_vcf_file(path.to_str().unwrap()).unwrap();
        assert_eq!(reloaded.len(), set.len());
        for (a, b) in reloaded.variants().iter().zip(set.variants()) {
            assert_eq!(a, b);
            assert_eq!(a.info(), b.info());
        }
    }

    #[test]
    fn filtered_save_writes_subset() {
        let set = VariantSet::from_vcf_reader(SAMPLE_VCF.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subset.vcf");
        set.save_vcf(path.to_str().unwrap(), Some(&[1])).unwrap();
        let reloaded = VariantSet::from_vcf_file(path.to_str().unwrap()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.variants()[0].chrom(), "2");
    }

    #[test]
    fn tsv_export_flattens_info_and_samples() {
        let set = VariantSet::from_vcf_reader(SAMPLE_VCF.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        set.save_tsv(path.to_str().unwrap(), None, EMPTY_VALUE)
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tDP\tAF\tNA001.GT"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1\t100\trs1\tA\tC\t50.5\tPASS\t20\t0.01\t1/1"
        );
        assert_eq!(lines.next().unwrap(), "2\t200\t.\tG\tT\t30\tPASS\t10\t.\t0/1");
    }

    #[test]
    fn checkpoint_round_trips_through_parser() {
        let set = VariantSet::from_vcf_reader(SAMPLE_VCF.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = set
            .save_checkpoint_to(&dir.path().join("checkpoint.vcf"))
            .unwrap();
        let reloaded = VariantSet::from_vcf_file(path.to_str().unwrap()).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.header().info_type("AF"),
            Some(crate::vcf_header::InfoType::Float)
        );
    }

    #[test]
    fn gzip_input_is_transparent() {
        use flate2::write::GzEncoder;
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.vcf.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::fast());
        encoder.write_all(SAMPLE_VCF.as_bytes()).unwrap();
        encoder.finish().unwrap();
        let set = VariantSet::from_vcf_file(path.to_str().unwrap()).unwrap();
        assert_eq!(set.len(), 2);
    }
}
