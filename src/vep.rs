use crate::{
    variant::{InfoValue, Variant, EMPTY_VALUE},
    variant_set::VariantSet,
    vcf_header::{InfoType, VcfHeader},
};
use itertools::Itertools;
use lazy_static::lazy_static;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::{ops::Range, path::PathBuf, sync::mpsc, thread};

/// Ensembl GRCh37 VEP region endpoint.
pub const DEFAULT_VEP_URL: &str = "http://grch37.rest.ensembl.org/vep/human/region";

/// Variants per request; the VEP REST service caps POST bodies at 1000.
pub const CHUNK_SIZE: usize = 1000;

/// INFO declarations for every field the pipeline may write. Injected into
/// the header before annotation so downstream consumers can discover the
/// field semantics.
pub const VEP_INFO_HEADER_LINES: &[&str] = &[
    "##INFO=<ID=GENE,Number=1,Type=String,Description=\"Ensemble gene ID\">",
    "##INFO=<ID=FEAT,Number=1,Type=String,Description=\"Ensemble feature ID\">",
    "##INFO=<ID=TYPE,Number=1,Type=String,Description=\"Type of feature (Transcript, RegulatoryFeature, MotifFeature)\">",
    "##INFO=<ID=CONS,Number=1,Type=String,Description=\"Consequence type\">",
    "##INFO=<ID=CDNA,Number=1,Type=Integer,Description=\"Relative position of base pair in cDNA sequence\">",
    "##INFO=<ID=CDS,Number=1,Type=Integer,Description=\"Relative position of base pair in coding sequence\">",
    "##INFO=<ID=PROT,Number=1,Type=Integer,Description=\"Relative position of amino acid in protein\">",
    "##INFO=<ID=AMINO,Number=1,Type=String,Description=\"Amino acid change. Only given if the variation affects the protein-coding sequence\">",
    "##INFO=<ID=COD,Number=1,Type=String,Description=\"The alternative codons\">",
    "##INFO=<ID=DIST,Number=1,Type=String,Description=\"Shortest distance from variant to transcript\">",
    "##INFO=<ID=STR,Number=1,Type=String,Description=\"The DNA strand (1 or -1) on which the transcript/feature lies\">",
    "##INFO=<ID=SYMBOL,Number=1,Type=String,Description=\"Gene symbol or name\">",
    "##INFO=<ID=SRC,Number=1,Type=String,Description=\"The source of the gene symbol\">",
    "##INFO=<ID=ENSP,Number=1,Type=String,Description=\"Ensembl protein identifier of the affected transcript\">",
    "##INFO=<ID=SWPR,Number=1,Type=String,Description=\"UniProtKB/Swiss-Prot identifier of protein product\">",
    "##INFO=<ID=TRBL,Number=1,Type=String,Description=\"UniProtKB/TrEMBL identifier of protein product\">",
    "##INFO=<ID=UNI,Number=1,Type=String,Description=\"UniParc identifier of protein product\">",
    "##INFO=<ID=HGVSc,Number=1,Type=String,Description=\"HGVS coding sequence name\">",
    "##INFO=<ID=HGVSp,Number=1,Type=String,Description=\"HGVS protein sequence name\">",
    "##INFO=<ID=SIFTs,Number=1,Type=String,Description=\"SIFT score\">",
    "##INFO=<ID=SIFTp,Number=1,Type=String,Description=\"SIFT prediction\">",
    "##INFO=<ID=PPHs,Number=1,Type=String,Description=\"Polyphen score\">",
    "##INFO=<ID=PPHp,Number=1,Type=String,Description=\"Polyphen prediction\">",
    "##INFO=<ID=POLY,Number=1,Type=String,Description=\"PolyPhen prediction and/or score\">",
    "##INFO=<ID=MTFN,Number=1,Type=String,Description=\"source and identifier of a transcription factor binding profile aligned at this position\">",
    "##INFO=<ID=MTFP,Number=1,Type=String,Description=\"relative position of the variation in the aligned TFBP\">",
    "##INFO=<ID=HIP,Number=0,Type=Flag,Description=\"a flag indicating if the variant falls in a high information position of a transcription factor binding profile (TFBP)\">",
    "##INFO=<ID=MSC,Number=1,Type=String,Description=\"difference in motif score of the reference and variant sequences for the TFBP\">",
    "##INFO=<ID=CLLS,Number=1,Type=String,Description=\"List of cell types and classifications for regulatory feature\">",
    "##INFO=<ID=CANON,Number=0,Type=Flag,Description=\"Transcript is denoted as the canonical transcript for this gene\">",
    "##INFO=<ID=CCDS,Number=1,Type=String,Description=\"CCDS identifer for this transcript, where applicable\">",
    "##INFO=<ID=INTR,Number=1,Type=String,Description=\"Intron number (out of total number)\">",
    "##INFO=<ID=EXON,Number=1,Type=String,Description=\"Exon number (out of total number)\">",
    "##INFO=<ID=DOM,Number=1,Type=String,Description=\"the source and identifer of any overlapping protein domains\">",
    "##INFO=<ID=IND,Number=1,Type=String,Description=\"Individual name\">",
    "##INFO=<ID=ZYG,Number=1,Type=String,Description=\"Zygosity of individual genotype at this locus\">",
    "##INFO=<ID=SV,Number=1,Type=String,Description=\"IDs of overlapping structural variants\">",
    "##INFO=<ID=FRQ,Number=1,Type=String,Description=\"Frequencies of overlapping variants used in filtering\">",
    "##INFO=<ID=GMAF,Number=1,Type=String,Description=\"Minor allele and frequency of existing variation in 1000 Genomes Phase 1\">",
    "##INFO=<ID=AFR_MAF,Number=1,Type=String,Description=\"Minor allele and frequency of existing variation in 1000 Genomes Phase 1 combined African population\">",
    "##INFO=<ID=AMR_MAF,Number=1,Type=String,Description=\"Minor allele and frequency of existing variation in 1000 Genomes Phase 1 combined American population\">",
    "##INFO=<ID=ASN_MAF,Number=1,Type=String,Description=\"Minor allele and frequency of existing variation in 1000 Genomes Phase 1 combined Asian population\">",
    "##INFO=<ID=EUR_MAF,Number=1,Type=String,Description=\"Minor allele and frequency of existing variation in 1000 Genomes Phase 1 combined European population\">",
    "##INFO=<ID=AA_MAF,Number=1,Type=String,Description=\"Minor allele and frequency of existing variant in NHLBI-ESP African American population\">",
    "##INFO=<ID=EA_MAF,Number=1,Type=String,Description=\"Minor allele and frequency of existing variant in NHLBI-ESP European American population\">",
    "##INFO=<ID=CLIN,Number=1,Type=String,Description=\"Clinical significance of variant from dbSNP\">",
    "##INFO=<ID=BIO,Number=1,Type=String,Description=\"Biotype of transcript or regulatory feature\">",
    "##INFO=<ID=TSL,Number=1,Type=String,Description=\"Transcript support level\">",
    "##INFO=<ID=PUBM,Number=1,Type=String,Description=\"Pubmed ID(s) of publications that cite existing variant\">",
    "##INFO=<ID=SOMA,Number=1,Type=String,Description=\"Somatic status of existing variation(s)\">",
];

const COLOCATED_FIELDS: &[(&str, &str)] = &[
    ("minor_allele_freq", "GMAF"),
    ("amr_maf", "AMR_MAF"),
    ("asn_maf", "ASN_MAF"),
    ("eur_maf", "EUR_MAF"),
    ("afr_maf", "AFR_MAF"),
    ("ea_maf", "EA_MAF"),
    ("aa_maf", "AA_MAF"),
];

const TRANSCRIPT_FIELDS: &[(&str, &str)] = &[
    ("gene_symbol", "SYMBOL"),
    ("gene_id", "GENE"),
    ("distance", "DIST"),
    ("biotype", "BIO"),
    ("transcript_id", "FEAT"),
    ("codons", "COD"),
    ("amino_acids", "AMINO"),
    ("sift_score", "SIFTs"),
    ("sift_prediction", "SIFTp"),
    ("polyphen_score", "PPHs"),
    ("polyphen_prediction", "PPHp"),
];

lazy_static! {
    /// The header block above, parsed once into typed declarations.
    static ref VEP_HEADER_BLOCK: VcfHeader = {
        let mut header = VcfHeader::default();
        for line in VEP_INFO_HEADER_LINES {
            if let Err(e) = header.add_meta_line(line) {
                eprintln!("Bad builtin VEP header line: {e}");
            }
        }
        header
    };
}

#[derive(Serialize)]
struct RegionRequest {
    variants: Vec<String>,
}

/// Annotation fields parsed for one response element, still unmatched to a
/// variant. `id` and the INFO entries are applied by the merge consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantPatch {
    pub chrom: String,
    pub position: u64,
    pub id: Option<String>,
    pub info: Vec<(String, String)>,
}

struct ChunkOutcome {
    range: Range<usize>,
    result: Result<Vec<VariantPatch>, String>,
}

#[derive(Clone, Copy, Debug)]
pub struct AnnotationProgress {
    pub annotated: usize,
    pub total: usize,
}

#[derive(Clone, Debug, Default)]
pub struct AnnotationReport {
    pub total_variants: usize,
    pub chunk_count: usize,
    pub matched: usize,
    pub failed_chunks: Vec<String>,
    pub checkpoint: Option<PathBuf>,
}

/// Best-effort enrichment of a whole variant set from the VEP web service.
/// Chunks are fetched and parsed in parallel; parsed patches travel over a
/// channel to a single merge consumer, so the variant set is only ever
/// mutated from one thread.
pub struct VepAnnotator {
    endpoint: String,
    chunk_size: usize,
    checkpoint_path: Option<PathBuf>,
}

impl Default for VepAnnotator {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_VEP_URL.to_string(),
            chunk_size: CHUNK_SIZE,
            checkpoint_path: None,
        }
    }
}

impl VepAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Checkpoints go to this path instead of the system temp dir.
    pub fn with_checkpoint_path(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }

    pub fn annotate(
        &self,
        set: &mut VariantSet,
        on_progress: &mut dyn FnMut(AnnotationProgress),
    ) -> Result<AnnotationReport, String> {
        inject_vep_headers(set.header_mut());
        let total = set.len();
        let mut report = AnnotationReport {
            total_variants: total,
            ..AnnotationReport::default()
        };
        if total == 0 {
            return Ok(report);
        }

        let ranges = chunk_ranges(total, self.chunk_size);
        report.chunk_count = ranges.len();
        let requests: Vec<(Range<usize>, Vec<String>)> = ranges
            .into_iter()
            .map(|range| {
                let inputs = set.variants()[range.clone()]
                    .iter()
                    .map(region_string)
                    .collect();
                (range, inputs)
            })
            .collect();

        let client = reqwest::blocking::Client::new();
        let endpoint = self.endpoint.clone();
        let (tx, rx) = mpsc::channel::<ChunkOutcome>();
        let worker = thread::spawn(move || {
            requests.into_par_iter().for_each_with(tx, |tx, (range, inputs)| {
                let result = fetch_chunk(&client, &endpoint, inputs);
                // The receiver only goes away if the merge loop panicked.
                tx.send(ChunkOutcome { range, result }).ok();
            });
        });

        let mut chunks_done = 0usize;
        for outcome in rx {
            chunks_done += 1;
            match outcome.result {
                Ok(patches) => {
                    report.matched += merge_chunk(set, outcome.range, &patches);
                    report.checkpoint = self.write_checkpoint(set);
                }
                Err(message) => {
                    eprintln!("VEP chunk failed: {message}");
                    report.failed_chunks.push(message);
                }
            }
            on_progress(AnnotationProgress {
                annotated: (chunks_done * self.chunk_size).min(total),
                total,
            });
        }
        worker
            .join()
            .map_err(|_| "VEP request worker panicked".to_string())?;
        Ok(report)
    }

    fn write_checkpoint(&self, set: &VariantSet) -> Option<PathBuf> {
        let result = match &self.checkpoint_path {
            Some(path) => set.save_checkpoint_to(path),
            None => set.save_checkpoint(),
        };
        match result {
            Ok(path) => Some(path),
            Err(e) => {
                eprintln!("Could not write annotation checkpoint: {e}");
                None
            }
        }
    }
}

/// Injects the fixed VEP INFO declarations; already-present IDs are kept.
pub fn inject_vep_headers(header: &mut VcfHeader) {
    for line in VEP_HEADER_BLOCK.info_lines() {
        header.add_info_line(line.clone());
    }
}

/// Contiguous chunk ranges covering `0..total`, each at most `size` long.
pub fn chunk_ranges(total: usize, size: usize) -> Vec<Range<usize>> {
    (0..total)
        .step_by(size)
        .map(|start| start..(start + size).min(total))
        .collect()
}

/// The service's compact positional input format:
/// `"<chrom> <start> <end> <ref>/<alt>"` with `end = pos + len(ref) - 1`.
pub fn region_string(variant: &Variant) -> String {
    let start = variant.position();
    let end = (start + variant.reference().len() as u64).saturating_sub(1);
    format!(
        "{} {} {} {}/{}",
        variant.chrom(),
        start,
        end,
        variant.reference(),
        variant.alternative()
    )
}

fn fetch_chunk(
    client: &reqwest::blocking::Client,
    endpoint: &str,
    inputs: Vec<String>,
) -> Result<Vec<VariantPatch>, String> {
    let response = client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .json(&RegionRequest { variants: inputs })
        .send()
        .map_err(|e| format!("Could not reach VEP service at '{endpoint}': {e}"))?;
    if !response.status().is_success() {
        return Err(format!(
            "VEP service at '{endpoint}' answered HTTP {}",
            response.status()
        ));
    }
    let body = response
        .text()
        .map_err(|e| format!("Could not read VEP response body: {e}"))?;
    parse_chunk_response(&body)
}

/// Parses one JSON response array into patches. A malformed element is
/// skipped with a warning; a malformed body fails the whole chunk.
pub fn parse_chunk_response(body: &str) -> Result<Vec<VariantPatch>, String> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| format!("Malformed VEP response: {e}"))?;
    let elements = json
        .as_array()
        .ok_or_else(|| "VEP response is not a JSON array".to_string())?;
    let mut patches = Vec::with_capacity(elements.len());
    for element in elements {
        match patch_from_element(element) {
            Some(patch) => patches.push(patch),
            None => eprintln!("Skipping VEP element without usable input echo: {element}"),
        }
    }
    Ok(patches)
}

fn patch_from_element(element: &Value) -> Option<VariantPatch> {
    // "input":"1 156897 156897 A/C" — chrom and pos identify the variant.
    let input = element.get("input")?.as_str()?;
    let mut parts = input.split_whitespace();
    let chrom = parts.next()?.to_string();
    let position = parts.next()?.parse::<u64>().ok()?;

    let mut patch = VariantPatch {
        chrom,
        position,
        id: None,
        info: Vec::new(),
    };

    if let Some(colocated) = first_element(element, "colocated_variants") {
        patch.id = colocated
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        copy_fields(colocated, COLOCATED_FIELDS, &mut patch.info);
    }

    if let Some(transcript) = first_element(element, "transcript_consequences") {
        copy_fields(transcript, TRANSCRIPT_FIELDS, &mut patch.info);
        if let Some(terms) = joined_terms(transcript) {
            patch.info.push(("CONS".to_string(), terms));
        }
    } else if let Some(intergenic) = first_element(element, "intergenic_consequences") {
        if let Some(terms) = joined_terms(intergenic) {
            patch.info.push(("CONS".to_string(), terms));
        }
    }

    Some(patch)
}

fn first_element<'a>(element: &'a Value, key: &str) -> Option<&'a Value> {
    element.get(key)?.as_array()?.first()
}

fn copy_fields(source: &Value, fields: &[(&str, &str)], out: &mut Vec<(String, String)>) {
    for (source_key, target_key) in fields {
        if let Some(text) = source.get(*source_key).and_then(json_text) {
            out.push((target_key.to_string(), text));
        }
    }
}

fn joined_terms(source: &Value) -> Option<String> {
    let terms = source.get("consequence_terms")?.as_array()?;
    if terms.is_empty() {
        return None;
    }
    Some(terms.iter().filter_map(json_text).join(","))
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Applies a chunk's patches to the variants of `range`. Response elements
/// match back by chromosome and position; first match wins and leaves the
/// candidate pool, so duplicate echoes never annotate the same variant
/// twice. Returns the number of matched variants.
pub fn merge_chunk(set: &mut VariantSet, range: Range<usize>, patches: &[VariantPatch]) -> usize {
    let header = set.header().clone();
    let mut candidates: Vec<usize> = range.collect();
    let mut matched = 0;
    for patch in patches {
        let Some(slot) = candidates.iter().position(|&i| {
            let v = &set.variants()[i];
            v.chrom() == patch.chrom && v.position() == patch.position
        }) else {
            continue;
        };
        let index = candidates.swap_remove(slot);
        apply_patch(&mut set.variants_mut()[index], patch, &header);
        matched += 1;
    }
    matched
}

fn apply_patch(variant: &mut Variant, patch: &VariantPatch, header: &VcfHeader) {
    if let Some(id) = &patch.id {
        if variant.id() == EMPTY_VALUE {
            variant.set_id(id);
        }
    }
    for (key, text) in &patch.info {
        let info_type = header.info_type(key).unwrap_or(InfoType::String);
        variant
            .info_mut()
            .insert(key.clone(), InfoValue::parse(text, info_type));
    }
}
