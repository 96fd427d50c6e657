use crate::util::{read_i32, write_i32};
use crate::{Label, NodeIndex};
use hashbrown::HashMap;
use log::info;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Error, ErrorKind, Read, Result, Write};
use std::path::Path;

#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeType {
    CompleteInOrder,
    CompleteRandom,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub index: NodeIndex,
    /// External label id for leaves; internal nodes carry none.
    pub label: Option<Label>,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
}

/// A label tree stored as an arena of nodes indexed by id.
#[derive(Clone, Debug)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: NodeIndex,
    leaves: HashMap<Label, NodeIndex>,
    k: usize,
}

impl Tree {
    /// Build a complete tree of the given arity over `k` labels. Node `i > 0`
    /// hangs under `(i - 1) / arity`; leaves occupy the tail indices, with
    /// label ids assigned in order or shuffled.
    pub fn build_complete(k: usize, arity: usize, randomize: bool) -> Tree {
        assert!(k > 0);
        assert!(arity >= 2);

        let t = if arity > 2 {
            let k = k as f64;
            let arity = arity as f64;
            let a = arity.powf((k.ln() / arity.ln()).floor());
            let b = k - a;
            let c = (b / (arity - 1.)).ceil();
            let d = (arity * a - 1.) / (arity - 1.);
            let e = k - (a - c);
            (e + d).floor() as usize
        } else {
            2 * k - 1
        };
        let ti = t - k;

        let mut labels_order: Vec<Label> = (0..k as Label).collect();
        if randomize {
            labels_order.shuffle(&mut thread_rng());
        }

        let mut nodes: Vec<TreeNode> = Vec::with_capacity(t);
        let mut leaves = HashMap::with_capacity(k);
        for i in 0..t {
            let label = if i >= ti {
                Some(labels_order[i - ti])
            } else {
                None
            };
            let parent = if i > 0 { Some((i - 1) / arity) } else { None };

            if let Some(label) = label {
                leaves.insert(label, i);
            }
            if let Some(parent) = parent {
                nodes[parent].children.push(i);
            }
            nodes.push(TreeNode {
                index: i,
                label,
                parent,
                children: Vec::new(),
            });
        }

        info!(
            "Built complete tree; nodes: {}, leaves: {}, arity: {}",
            t, k, arity
        );
        Tree {
            nodes,
            root: 0,
            leaves,
            k,
        }
    }

    /// Read a tree structure from a whitespace-separated text file: `k t`
    /// followed by `(parent, child, label)` triples. A triple with parent -1
    /// designates the root instead of adding an edge.
    pub fn from_structure_file<P: AsRef<Path>>(path: P) -> Result<Tree> {
        let mut content = String::new();
        BufReader::new(File::open(path)?).read_to_string(&mut content)?;
        Self::from_structure_str(&content)
    }

    pub(crate) fn from_structure_str(content: &str) -> Result<Tree> {
        let mut tokens = content.split_whitespace().map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::new(ErrorKind::InvalidData, format!("bad tree token {:?}", s)))
        });
        let mut next = || {
            tokens
                .next()
                .unwrap_or_else(|| Err(ErrorKind::InvalidData.into()))
        };

        let k = next()? as usize;
        let t = next()? as usize;
        if k == 0 || t < k {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("bad tree header: k = {}, t = {}", k, t),
            ));
        }

        let mut nodes: Vec<TreeNode> = (0..t)
            .map(|i| TreeNode {
                index: i,
                label: None,
                parent: None,
                children: Vec::new(),
            })
            .collect();
        let mut leaves = HashMap::new();
        let mut root = 0;

        let mut edges = 0;
        while edges < t - 1 {
            let parent = next()?;
            let child = next()? as usize;
            let label = next()?;

            if child >= t {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("node id {} out of range", child),
                ));
            }
            if parent < 0 {
                root = child;
                continue;
            }

            let parent = parent as usize;
            if parent >= t {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("node id {} out of range", parent),
                ));
            }
            nodes[parent].children.push(child);
            nodes[child].parent = Some(parent);
            if label >= 0 {
                nodes[child].label = Some(label as Label);
                leaves.insert(label as Label, child);
            }
            edges += 1;
        }

        if leaves.len() != k {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("expected {} leaves, found {}", k, leaves.len()),
            ));
        }

        info!("Loaded tree structure; nodes: {}, leaves: {}", t, k);
        Ok(Tree {
            nodes,
            root,
            leaves,
            k,
        })
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_labels(&self) -> usize {
        self.k
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, index: NodeIndex) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn leaf(&self, label: Label) -> Option<NodeIndex> {
        self.leaves.get(&label).copied()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.save(&mut out)
    }

    /// Binary layout: `k`, `t`, per node `(index, label)`, the root index,
    /// then every node's parent index (-1 for the root).
    pub fn save<W: Write>(&self, out: &mut W) -> Result<()> {
        write_i32(out, self.k as i32)?;
        write_i32(out, self.nodes.len() as i32)?;
        for node in &self.nodes {
            write_i32(out, node.index as i32)?;
            write_i32(out, node.label.map_or(-1, |l| l as i32))?;
        }
        write_i32(out, self.root as i32)?;
        for node in &self.nodes {
            write_i32(out, node.parent.map_or(-1, |p| p as i32))?;
        }
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Tree> {
        let mut input = BufReader::new(File::open(path)?);
        Self::load(&mut input)
    }

    pub fn load<R: BufRead>(input: &mut R) -> Result<Tree> {
        let k = read_i32(input)? as usize;
        let t = read_i32(input)? as usize;
        if t == 0 || t < k {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("bad tree header: k = {}, t = {}", k, t),
            ));
        }

        let mut nodes: Vec<TreeNode> = Vec::with_capacity(t);
        let mut leaves = HashMap::with_capacity(k);
        for i in 0..t {
            let index = read_i32(input)? as usize;
            let label = match read_i32(input)? {
                l if l >= 0 => Some(l as Label),
                _ => None,
            };
            if index != i {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("node {} stored out of order as {}", i, index),
                ));
            }
            if let Some(label) = label {
                leaves.insert(label, i);
            }
            nodes.push(TreeNode {
                index,
                label,
                parent: None,
                children: Vec::new(),
            });
        }

        let root = read_i32(input)? as usize;
        for i in 0..t {
            let parent = read_i32(input)?;
            if parent >= 0 {
                let parent = parent as usize;
                nodes[parent].children.push(i);
                nodes[i].parent = Some(parent);
            }
        }

        info!("Loaded tree; nodes: {}, leaves: {}", t, leaves.len());
        Ok(Tree {
            nodes,
            root,
            leaves,
            k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn check_structure(tree: &Tree, k: usize, t: usize) {
        assert_eq!(t, tree.n_nodes());
        assert_eq!(k, tree.n_labels());
        assert_eq!(
            k,
            tree.nodes().iter().filter(|n| n.label.is_some()).count()
        );

        let mut root_count = 0;
        for node in tree.nodes() {
            match node.parent {
                None => {
                    assert_eq!(tree.root(), node.index);
                    root_count += 1;
                }
                Some(parent) => {
                    assert!(tree.node(parent).children.contains(&node.index));
                }
            }
        }
        assert_eq!(1, root_count);

        for label in 0..k as Label {
            let leaf = tree.leaf(label).expect("missing leaf");
            assert_eq!(Some(label), tree.node(leaf).label);
        }
    }

    #[test]
    fn test_complete_tree_arithmetic() {
        for &(k, arity, expected_t) in &[
            (1, 2, 1),
            (2, 2, 3),
            (7, 2, 13),
            (8, 2, 15),
            (9, 3, 13),
            (100, 4, 133),
        ] {
            let tree = Tree::build_complete(k, arity, false);
            assert_eq!(expected_t, tree.n_nodes(), "k = {}, arity = {}", k, arity);
            check_structure(&tree, k, expected_t);
        }
    }

    #[test]
    fn test_complete_binary_tree_layout() {
        let tree = Tree::build_complete(4, 2, false);
        assert_eq!(7, tree.n_nodes());
        assert_eq!(0, tree.root());
        for (label, leaf) in &[(0, 3), (1, 4), (2, 5), (3, 6)] {
            assert_eq!(Some(*leaf), tree.leaf(*label));
        }
        assert_eq!(vec![1, 2], tree.node(0).children);
    }

    #[test]
    fn test_complete_random_covers_all_labels() {
        let tree = Tree::build_complete(33, 2, true);
        check_structure(&tree, 33, 65);
    }

    #[test]
    fn test_structure_file_parsing() {
        let tree = Tree::from_structure_str(
            "4 7\n-1 0 -1\n0 1 -1\n0 2 -1\n1 3 0\n1 4 1\n2 5 2\n2 6 3\n",
        )
        .unwrap();
        assert_eq!(0, tree.root());
        check_structure(&tree, 4, 7);
        assert_eq!(Some(3), tree.leaf(0));
        assert_eq!(Some(6), tree.leaf(3));
    }

    #[test]
    fn test_structure_file_rejects_garbage() {
        assert!(Tree::from_structure_str("4 7\n-1 zero -1\n").is_err());
        assert!(Tree::from_structure_str("4 2\n").is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let tree = Tree::build_complete(9, 3, true);

        let mut buf = Vec::new();
        tree.save(&mut buf).unwrap();
        let loaded = Tree::load(&mut Cursor::new(&buf)).unwrap();

        assert_eq!(tree.root(), loaded.root());
        assert_eq!(tree.n_labels(), loaded.n_labels());
        assert_eq!(tree.nodes(), loaded.nodes());
    }
}
