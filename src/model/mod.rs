use crate::base::Base;
use crate::tree::Tree;
use crate::vector::Representation;
use crate::{FeatureVec, Label, NodeIndex, Weight};
use log::info;
use ordered_float::NotNan;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, Result};
use std::path::Path;

pub mod eval;
pub mod train;

pub use self::train::{HyperParam, ModelType};

pub(crate) fn node_file_name(index: NodeIndex) -> String {
    format!("node_{}.bin", index)
}

/// A trained label tree together with one classifier per node.
pub struct Model {
    tree: Tree,
    bases: Vec<Base>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct NodeProb {
    prob: NotNan<Weight>,
    node: NodeIndex,
}

impl Ord for NodeProb {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prob
            .cmp(&other.prob)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for NodeProb {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Model {
    pub fn new(tree: Tree, bases: Vec<Base>) -> Model {
        assert_eq!(tree.n_nodes(), bases.len());
        Model { tree, bases }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn n_labels(&self) -> usize {
        self.tree.n_labels()
    }

    /// Best-first top-k traversal. The queue is ordered by cumulative path
    /// probability; since every classifier emits a probability in [0, 1],
    /// cumulative values only shrink toward the leaves, so the first k leaves
    /// popped are exactly the top k.
    pub fn predict(&self, features: &FeatureVec, k: usize) -> Vec<(Label, Weight)> {
        let mut queue = BinaryHeap::new();
        let root = self.tree.root();
        queue.push(NodeProb {
            prob: NotNan::new(self.bases[root].predict_probability(features)).unwrap(),
            node: root,
        });

        let mut predictions = Vec::with_capacity(k);
        while let Some(NodeProb { prob, node }) = queue.pop() {
            let node = self.tree.node(node);
            if let Some(label) = node.label {
                predictions.push((label, prob.into_inner()));
                if predictions.len() >= k {
                    break;
                }
            } else {
                for &child in &node.children {
                    let p = prob.into_inner() * self.bases[child].predict_probability(features);
                    queue.push(NodeProb {
                        prob: NotNan::new(p).unwrap(),
                        node: child,
                    });
                }
            }
        }
        predictions
    }

    /// Load a model trained into the given directory, materializing node
    /// weight vectors as `load_as`.
    pub fn load<P: AsRef<Path>>(dir: P, load_as: Representation) -> Result<Model> {
        let dir = dir.as_ref();
        info!("Loading model from {}", dir.display());
        let start_t = time::precise_time_s();

        let tree = Tree::load_from_file(dir.join("tree.bin"))?;
        let mut bases = Vec::with_capacity(tree.n_nodes());
        for i in 0..tree.n_nodes() {
            let mut input = BufReader::new(File::open(dir.join(node_file_name(i)))?);
            bases.push(Base::load(&mut input, false, load_as)?);
        }

        let model = Model::new(tree, bases);
        info!(
            "Loaded {} node classifiers ({} bytes); it took {:.2}s",
            model.bases.len(),
            model.mem(),
            time::precise_time_s() - start_t
        );
        Ok(model)
    }

    pub fn mem(&self) -> usize {
        self.bases.iter().map(Base::mem).sum()
    }
}
