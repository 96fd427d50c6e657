use super::node_file_name;
use crate::base::{self, Base, ProblemData};
use crate::data::ReaderState;
use crate::tree::{Tree, TreeType};
use crate::util::create_progress_bar;
use crate::{DataSet, Label, NodeIndex};
use hashbrown::HashSet;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Error, ErrorKind, Result, Write};
use std::path::Path;
use std::sync::Mutex;

#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Probabilistic label tree over multi-label rows.
    Plt,
    /// Hierarchical softmax: one label per row, so each row follows a single
    /// root-to-leaf path and the siblings along it become the negatives.
    Hsm,
}

/// Hyper-parameter settings for training a model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HyperParam {
    pub model_type: ModelType,
    pub tree_type: TreeType,
    pub arity: usize,
    /// Path to an external tree structure file; overrides `tree_type`.
    pub tree_structure: Option<String>,
    pub save_grads: bool,
    pub base: base::HyperParam,
}

impl Default for HyperParam {
    fn default() -> Self {
        Self {
            model_type: ModelType::Plt,
            tree_type: TreeType::CompleteInOrder,
            arity: 2,
            tree_structure: None,
            save_grads: false,
            base: base::HyperParam::default(),
        }
    }
}

impl HyperParam {
    /// Check if the hyper-parameter settings are valid.
    pub fn validate(&self) -> Result<()> {
        if self.arity < 2 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("arity must be at least 2, but is {}", self.arity),
            ));
        }
        self.base.validate()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(file, self).map_err(Error::from)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file)).map_err(Error::from)
    }

    /// Train a model on the given dataset and persist all artifacts into the
    /// output directory: `args.bin`, `data_reader.bin`, `tree.bin`, and one
    /// `node_<i>.bin` per tree node.
    pub fn train<P: AsRef<Path>>(&self, dataset: &DataSet, output: P) -> Result<()> {
        self.validate()?;
        let output = output.as_ref();
        fs::create_dir_all(output)?;
        let start_t = time::precise_time_s();

        let tree = match &self.tree_structure {
            Some(path) => Tree::from_structure_file(path)?,
            None => {
                if dataset.n_labels == 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "cannot build a tree over a dataset without labels",
                    ));
                }
                Tree::build_complete(
                    dataset.n_labels,
                    self.arity,
                    self.tree_type == TreeType::CompleteRandom,
                )
            }
        };

        let (bin_labels, bin_rows) = self.assign_dataset(&tree, dataset);

        info!(
            "Training {} node classifiers in {} threads",
            tree.n_nodes(),
            rayon::current_num_threads()
        );
        let train_start_t = time::precise_time_s();
        let n_rows = dataset.examples.len();
        let pb = Mutex::new(create_progress_bar(tree.n_nodes() as u64));
        let results: Vec<Result<()>> = bin_labels
            .into_par_iter()
            .zip(bin_rows.into_par_iter())
            .enumerate()
            .map(|(index, (labels, rows))| {
                let features = rows
                    .iter()
                    .map(|&r| &dataset.examples[r].features)
                    .collect();
                let problem = ProblemData::new(dataset.n_features, labels, features, n_rows);

                let mut base = Base::new();
                base.train(&problem, &self.base);
                save_node(output, index, &base, self.save_grads)?;

                pb.lock().expect("Failed to lock progress bar").add(1);
                Ok(())
            })
            .collect();
        // All classifiers ran to completion; a failure on any node makes the
        // whole model invalid.
        for result in results {
            result?;
        }
        info!(
            "Trained node classifiers; it took {:.2}s",
            time::precise_time_s() - train_start_t
        );

        tree.save_to_file(output.join("tree.bin"))?;
        self.save_to_file(output.join("args.bin"))?;
        ReaderState::from_dataset(dataset).save_to_file(output.join("data_reader.bin"))?;

        info!("Training took {:.2}s", time::precise_time_s() - start_t);
        Ok(())
    }

    /// Bucket every example into the tree nodes it trains, as positive or
    /// negative, returning per-node binary labels and example row indices.
    fn assign_dataset(&self, tree: &Tree, dataset: &DataSet) -> (Vec<Vec<f64>>, Vec<Vec<usize>>) {
        let n_rows = dataset.examples.len();
        info!("Assigning {} examples to tree nodes", n_rows);
        let mut pb = create_progress_bar(n_rows as u64);

        let mut bin_labels: Vec<Vec<f64>> = vec![Vec::new(); tree.n_nodes()];
        let mut bin_rows: Vec<Vec<usize>> = vec![Vec::new(); tree.n_nodes()];
        let mut node_count = 0usize;
        let mut label_count = 0usize;
        let mut multi_label_rows = 0usize;

        for (r, example) in dataset.examples.iter().enumerate() {
            let labels = match self.model_type {
                ModelType::Plt => &example.labels[..],
                ModelType::Hsm => {
                    if example.labels.len() > 1 {
                        multi_label_rows += 1;
                    }
                    &example.labels[..example.labels.len().min(1)]
                }
            };

            let (positive, negative) = assign_nodes(tree, labels);
            for &node in &positive {
                bin_labels[node].push(1.);
                bin_rows[node].push(r);
            }
            for &node in &negative {
                bin_labels[node].push(0.);
                bin_rows[node].push(r);
            }

            node_count += positive.len() + negative.len();
            label_count += labels.len();
            pb.inc();
        }
        pb.finish();

        if multi_label_rows > 0 {
            warn!(
                "{} examples have more than one label; hierarchical softmax trains on the first",
                multi_label_rows
            );
        }
        info!(
            "Points count: {}, nodes per point: {:.2}, labels per point: {:.2}",
            n_rows,
            node_count as f64 / n_rows as f64,
            label_count as f64 / n_rows as f64,
        );

        (bin_labels, bin_rows)
    }
}

/// Positive and negative tree nodes for one training row. Positives are the
/// union of root-to-leaf paths of the row's labels; negatives are children of
/// positive nodes whose subtrees contain none of the labels. A row without
/// labels trains the root negatively.
pub(crate) fn assign_nodes(
    tree: &Tree,
    labels: &[Label],
) -> (HashSet<NodeIndex>, HashSet<NodeIndex>) {
    let mut positive = HashSet::new();
    let mut negative = HashSet::new();

    if labels.is_empty() {
        negative.insert(tree.root());
        return (positive, negative);
    }

    for &label in labels {
        if let Some(leaf) = tree.leaf(label) {
            let mut node = leaf;
            while positive.insert(node) {
                match tree.node(node).parent {
                    Some(parent) => node = parent,
                    None => break,
                }
            }
        }
    }

    let mut queue = VecDeque::new();
    queue.push_back(tree.root());
    while let Some(node) = queue.pop_front() {
        for &child in &tree.node(node).children {
            if positive.contains(&child) {
                queue.push_back(child);
            } else {
                negative.insert(child);
            }
        }
    }

    (positive, negative)
}

fn save_node(output: &Path, index: NodeIndex, base: &Base, save_grads: bool) -> Result<()> {
    // Write through a temp file so a crashed run never leaves a truncated
    // node file under the final name.
    let tmp_path = output.join(format!("node_{}.bin.tmp", index));
    let mut out = BufWriter::new(File::create(&tmp_path)?);
    base.save(&mut out, save_grads)?;
    out.flush()?;
    drop(out);
    fs::rename(&tmp_path, output.join(node_file_name(index)))
}
