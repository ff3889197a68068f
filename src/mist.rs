use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of a MIST coverage file: an exon interval and the poorly covered
/// region found inside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MistRecord {
    pub chrom: String,
    pub exon_start: u64,
    pub exon_end: u64,
    pub poor_start: u64,
    pub poor_end: u64,
    pub gene_id: String,
    pub gene_name: String,
    #[serde(rename = "match")]
    pub match_type: String,
}

/// Reads a tab-separated MIST file with a header row.
pub fn read_mist_file(path: &str) -> Result<Vec<MistRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Could not open MIST file '{path}'"))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: MistRecord =
            row.with_context(|| format!("Malformed MIST row in '{path}'"))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_mist_file(path: &str, records: &[MistRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Could not create MIST output '{path}'"))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Combines MIST files by intersecting their poorly covered regions: a
/// position stays poor only if every input marks it poor. Rows come from the
/// first file, trimmed to the intersected coordinates.
pub fn combine(inputs: &[Vec<MistRecord>]) -> Result<Vec<MistRecord>> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(anyhow!("No MIST inputs to combine"));
    };
    let mut combined: Vec<MistRecord> = first.clone();
    for other in rest {
        let intervals = poor_intervals_by_chrom(other);
        let mut next = Vec::new();
        for record in &combined {
            let Some(other_intervals) = intervals.get(&record.chrom) else {
                continue;
            };
            for &(start, end) in other_intervals {
                let poor_start = record.poor_start.max(start);
                let poor_end = record.poor_end.min(end);
                if poor_start <= poor_end {
                    next.push(MistRecord {
                        poor_start,
                        poor_end,
                        ..record.clone()
                    });
                }
            }
        }
        combined = next;
    }
    combined.sort_by(|a, b| {
        a.chrom
            .cmp(&b.chrom)
            .then(a.poor_start.cmp(&b.poor_start))
    });
    Ok(combined)
}

/// Reads every input, intersects them and writes the combined file.
/// Returns the number of surviving rows.
pub fn combine_files(input_paths: &[String], output_path: &str) -> Result<usize> {
    let inputs = input_paths
        .iter()
        .map(|path| read_mist_file(path))
        .collect::<Result<Vec<_>>>()?;
    let combined = combine(&inputs)?;
    write_mist_file(output_path, &combined)?;
    Ok(combined.len())
}

fn poor_intervals_by_chrom(records: &[MistRecord]) -> HashMap<String, Vec<(u64, u64)>> {
    let mut intervals: HashMap<String, Vec<(u64, u64)>> = HashMap::new();
    for record in records {
        intervals
            .entry(record.chrom.clone())
            .or_default()
            .push((record.poor_start, record.poor_end));
    }
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chrom: &str, poor_start: u64, poor_end: u64) -> MistRecord {
        MistRecord {
            chrom: chrom.to_string(),
            exon_start: poor_start.saturating_sub(50),
            exon_end: poor_end + 50,
            poor_start,
            poor_end,
            gene_id: "ENSG00000107295".to_string(),
            gene_name: "SH3GL2".to_string(),
            match_type: "exon".to_string(),
        }
    }

    #[test]
    fn intersection_trims_overlapping_regions() {
        let a = vec![record("1", 100, 200)];
        let b = vec![record("1", 150, 300)];
        let combined = combine(&[a, b]).unwrap();
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].poor_start, 150);
        assert_eq!(combined[0].poor_end, 200);
    }

    #[test]
    fn disjoint_inputs_combine_to_nothing() {
        let a = vec![record("1", 100, 200)];
        let b = vec![record("1", 300, 400)];
        assert!(combine(&[a, b]).unwrap().is_empty());
        let c = vec![record("2", 100, 200)];
        assert!(combine(&[vec![record("1", 100, 200)], c]).unwrap().is_empty());
    }

    #[test]
    fn one_region_can_split_against_two() {
        let a = vec![record("1", 100, 500)];
        let b = vec![record("1", 120, 150), record("1", 400, 600)];
        let combined = combine(&[a, b]).unwrap();
        let regions: Vec<(u64, u64)> = combined
            .iter()
            .map(|r| (r.poor_start, r.poor_end))
            .collect();
        assert_eq!(regions, vec![(120, 150), (400, 500)]);
    }

    #[test]
    fn empty_input_list_is_an_error() {
        assert!(combine(&[]).is_err());
    }

    #[test]
    fn mist_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.mist");
        let records = vec![record("1", 100, 200), record("X", 5, 10)];
        write_mist_file(path.to_str().unwrap(), &records).unwrap();
        let reloaded = read_mist_file(path.to_str().unwrap()).unwrap();
        assert_eq!(reloaded, records);
    }

    #[test]
    fn combine_files_writes_the_intersection() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.mist");
        let b_path = dir.path().join("b.mist");
        let out_path = dir.path().join("combined.mist");
        write_mist_file(a_path.to_str().unwrap(), &[record("1", 100, 200)]).unwrap();
        write_mist_file(b_path.to_str().unwrap(), &[record("1", 180, 220)]).unwrap();
        let count = combine_files(
            &[
                a_path.to_str().unwrap().to_string(),
                b_path.to_str().unwrap().to_string(),
            ],
            out_path.to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(count, 1);
        let combined = read_mist_file(out_path.to_str().unwrap()).unwrap();
        assert_eq!(combined[0].poor_start, 180);
        assert_eq!(combined[0].poor_end, 200);
    }
}
