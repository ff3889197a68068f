pub mod engine;
pub mod filter_runner;
pub mod mist;
pub mod variant;
pub mod variant_set;
pub mod vcf_filter;
pub mod vcf_header;
pub mod vep;
