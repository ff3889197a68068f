use crate::{
    variant_set::VariantSet,
    vcf_filter::{passes_all, VcfFilter},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};

/// How many variants the pass scans between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 1000;

/// Result of one filter pass over the full variant list.
#[derive(Clone, Debug, Default)]
pub struct FilterOutcome {
    pub total: usize,
    pub passed: Vec<usize>,
    pub interrupted: bool,
}

/// Runs filter passes on a background thread. Requesting a new pass
/// interrupts and joins the in-flight one first, so two passes never race
/// to produce a result for the same consumer.
#[derive(Default)]
pub struct FilterRunner {
    cancel: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
}

impl FilterRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a pass over `set`, cancelling any pass still running. The
    /// outcome arrives on the returned channel; an interrupted pass still
    /// reports what it scanned, flagged as interrupted.
    pub fn restart(
        &mut self,
        set: Arc<VariantSet>,
        filters: Vec<VcfFilter>,
    ) -> mpsc::Receiver<FilterOutcome> {
        self.cancel_and_join();
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Some(cancel.clone());
        let (tx, rx) = mpsc::channel();
        self.handle = Some(thread::spawn(move || {
            let outcome = scan(&set, &filters, &cancel);
            // The receiver may be gone if the caller moved on.
            tx.send(outcome).ok();
        }));
        rx
    }

    /// Interrupts the in-flight pass, if any, and waits for it to stop.
    pub fn cancel_and_join(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::Relaxed);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                eprintln!("Filter pass panicked");
            }
        }
    }
}

impl Drop for FilterRunner {
    fn drop(&mut self) {
        self.cancel_and_join();
    }
}

fn scan(set: &VariantSet, filters: &[VcfFilter], cancel: &AtomicBool) -> FilterOutcome {
    let mut outcome = FilterOutcome {
        total: set.len(),
        ..FilterOutcome::default()
    };
    for (index, variant) in set.variants().iter().enumerate() {
        if index % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            outcome.interrupted = true;
            return outcome;
        }
        if passes_all(filters, variant, set.header()) {
            outcome.passed.push(index);
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcf_filter::{Connector, FilterField};

    fn big_set(n: usize) -> Arc<VariantSet> {
        let mut text = String::from(
            "##fileformat=VCFv4.1\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n",
        );
        for i in 0..n {
            text.push_str(&format!("1\t{}\t.\tA\tC\t.\tPASS\t.\n", i + 1));
        }
        Arc::new(VariantSet::from_vcf_reader(text.as_bytes()).unwrap())
    }

    #[test]
    fn pass_reports_matching_indices() {
        let set = big_set(10);
        let mut runner = FilterRunner::new();
        let filters = vec![VcfFilter::new(FilterField::Pos, Connector::LessThan, "4")];
        let outcome = runner.restart(set, filters).recv().unwrap();
        assert_eq!(outcome.total, 10);
        assert_eq!(outcome.passed, vec![0, 1, 2]);
        assert!(!outcome.interrupted);
    }

    #[test]
    fn empty_filter_list_passes_everything() {
        let set = big_set(5);
        let mut runner = FilterRunner::new();
        let outcome = runner.restart(set, vec![]).recv().unwrap();
        assert_eq!(outcome.passed.len(), 5);
    }

    #[test]
    fn new_pass_interrupts_the_previous_one() {
        let set = big_set(50_000);
        let mut runner = FilterRunner::new();
        let slow = vec![VcfFilter::new(
            FilterField::Info("CONS".to_string()),
            Connector::Matches,
            "x+",
        )];
        let first = runner.restart(set.clone(), slow.clone());
        let second = runner.restart(set, slow);
        // The first pass was joined before the second started, so both
        // outcomes exist and only the first may be interrupted.
        let first_outcome = first.recv().unwrap();
        let second_outcome = second.recv().unwrap();
        assert!(!second_outcome.interrupted);
        assert_eq!(second_outcome.total, 50_000);
        if first_outcome.interrupted {
            assert!(first_outcome.passed.len() < 50_000);
        }
    }
}
