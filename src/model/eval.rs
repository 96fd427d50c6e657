use crate::util::create_progress_bar;
use crate::{DataSet, Label, Model, Weight};
use hashbrown::HashSet;
use log::info;
use rayon::prelude::*;
use std::sync::Mutex;

/// Precision at 1..=k from per-rank hit totals.
fn precisions_from_hits(hits: &[usize], n_examples: usize) -> Vec<f64> {
    let mut precisions = Vec::with_capacity(hits.len());
    let mut correct = 0;
    for (i, &h) in hits.iter().enumerate() {
        correct += h;
        precisions.push(correct as f64 / (n_examples * (i + 1)) as f64);
    }
    precisions
}

/// Predict every example in the dataset and report precision at 1..=k.
pub fn test_all(
    model: &Model,
    dataset: &DataSet,
    top_k: usize,
) -> (Vec<Vec<(Label, Weight)>>, Vec<f64>) {
    let n_examples = dataset.examples.len();
    info!("Testing on {} examples", n_examples);
    let start_t = time::precise_time_s();

    let pb = Mutex::new(create_progress_bar(n_examples as u64));
    let hits = Mutex::new(vec![0usize; top_k]);
    let predictions: Vec<_> = dataset
        .examples
        .par_iter()
        .map(|example| {
            let prediction = model.predict(&example.features, top_k);

            let truth: HashSet<Label> = example.labels.iter().copied().collect();
            let mut local_hits = vec![0usize; top_k];
            for (rank, &(label, _)) in prediction.iter().enumerate() {
                if truth.contains(&label) {
                    local_hits[rank] += 1;
                }
            }
            {
                let mut hits = hits.lock().expect("Failed to lock precision counters");
                for (total, local) in hits.iter_mut().zip(local_hits) {
                    *total += local;
                }
            }

            pb.lock().expect("Failed to lock progress bar").add(1);
            prediction
        })
        .collect();
    info!(
        "Done testing on {} examples; it took {:.2}s",
        n_examples,
        time::precise_time_s() - start_t
    );

    let hits = hits
        .into_inner()
        .expect("Failed to unwrap precision counters");
    let precisions = precisions_from_hits(&hits, n_examples);
    for (i, p) in precisions.iter().enumerate() {
        info!("P@{}: {:.4}", i + 1, p);
    }

    (predictions, precisions)
}
