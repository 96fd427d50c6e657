use crate::util::create_progress_bar;
use crate::{FeatureVec, Index, Label, Weight};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, Error, ErrorKind, Result};
use std::path::Path;

/// Offset applied to feature indices from data files: index 0 is reserved and
/// index 1 carries the bias feature, so raw feature `f` is stored as `f + 2`.
pub const FEATURE_OFFSET: Index = 2;
pub const BIAS_INDEX: Index = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct Example {
    pub features: FeatureVec,
    pub labels: Vec<Label>,
}

pub struct DataSet {
    /// Number of feature columns, including the reserved and bias columns.
    pub n_features: usize,
    pub n_labels: usize,
    pub examples: Vec<Example>,
}

impl DataSet {
    /// Parse a line in a data file from the Extreme Classification Repository
    ///
    /// The line should be in the following format:
    /// label1,label2,...labelk ft1:ft1_val ft2:ft2_val ft3:ft3_val .. ftd:ftd_val
    fn parse_xc_repo_data_line(line: &str) -> Result<Example> {
        let mut token_iter = line.split(' ');

        let mut labels = Vec::new();
        let labels_str = token_iter.next().ok_or(ErrorKind::InvalidData)?;
        for label_str in labels_str.split(',') {
            if !label_str.is_empty() {
                labels.push(
                    label_str
                        .parse::<Label>()
                        .ok()
                        .ok_or(ErrorKind::InvalidData)?,
                );
            }
        }
        labels.shrink_to_fit();

        let mut features = vec![(BIAS_INDEX, 1.)];
        for feature_value_pair_str in token_iter {
            let mut feature_value_pair_iter = feature_value_pair_str.split(':');
            let feature = feature_value_pair_iter
                .next()
                .and_then(|s| s.parse::<Index>().ok())
                .ok_or(ErrorKind::InvalidData)?;
            let value = feature_value_pair_iter
                .next()
                .and_then(|s| s.parse::<Weight>().ok())
                .ok_or(ErrorKind::InvalidData)?;
            if feature_value_pair_iter.next().is_some() {
                Err(ErrorKind::InvalidData)?;
            }
            features.push((feature + FEATURE_OFFSET, value));
        }
        features.sort_unstable_by_key(|&(i, _)| i);
        features.shrink_to_fit();
        if features.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            Err(ErrorKind::InvalidData)?;
        }

        Ok(Example { features, labels })
    }

    /// Load a data file from the Extreme Classification Repository
    pub fn load_xc_repo_data_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Loading data from {}", path.as_ref().display());
        let start_t = time::precise_time_s();

        let mut lines = BufReader::new(File::open(path)?).lines();

        let (n_examples, n_features, n_labels) = {
            let header_line = lines.next().ok_or(ErrorKind::InvalidData)??;
            let mut token_iter = header_line.split_whitespace();
            let n_examples = token_iter
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(ErrorKind::InvalidData)?;
            let n_features = token_iter
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(ErrorKind::InvalidData)?;
            let n_labels = token_iter
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(ErrorKind::InvalidData)?;
            if token_iter.next().is_some() {
                Err(ErrorKind::InvalidData)?;
            }

            (n_examples, n_features, n_labels)
        };

        let mut pb = create_progress_bar(n_examples as u64);
        let mut examples = Vec::with_capacity(n_examples);
        for line in lines {
            examples.push(Self::parse_xc_repo_data_line(&line?)?);
            pb.inc();
        }
        examples.shrink_to_fit();

        if n_examples != examples.len() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected {} examples, only read {} lines",
                    n_examples,
                    examples.len()
                ),
            ));
        }

        info!(
            "Loaded {} examples; it took {:.2}s",
            n_examples,
            time::precise_time_s() - start_t
        );
        Ok(Self {
            n_features: n_features + FEATURE_OFFSET,
            n_labels,
            examples,
        })
    }
}

/// Dataset dimensions remembered at training time and checked against later
/// test or predict data.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ReaderState {
    pub n_features: usize,
    pub n_labels: usize,
}

impl ReaderState {
    pub fn from_dataset(dataset: &DataSet) -> Self {
        Self {
            n_features: dataset.n_features,
            n_labels: dataset.n_labels,
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(file, self).map_err(Error::from)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file)).map_err(Error::from)
    }

    /// Warn when a dataset does not match the dimensions the model was
    /// trained with. Out-of-range features read as zero weights; labels
    /// beyond the trained range can never be predicted.
    pub fn check(&self, dataset: &DataSet) {
        if dataset.n_features != self.n_features {
            warn!(
                "Dataset has {} feature columns, model was trained with {}",
                dataset.n_features, self.n_features
            );
        }
        if dataset.n_labels > self.n_labels {
            warn!(
                "Dataset has {} labels, model was trained with {}",
                dataset.n_labels, self.n_labels
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xc_repo_data_line() {
        assert_eq!(
            Example {
                features: vec![(1, 1.), (23, 1.), (25, 2.), (26, 3.)],
                labels: vec![11, 12],
            },
            DataSet::parse_xc_repo_data_line("11,12 21:1 23:2 24:3").unwrap()
        );
    }

    #[test]
    fn test_parse_line_without_labels() {
        let example = DataSet::parse_xc_repo_data_line(" 0:1.5").unwrap();
        assert!(example.labels.is_empty());
        assert_eq!(vec![(1, 1.), (2, 1.5)], example.features);
    }

    #[test]
    fn test_parse_rejects_malformed_pairs() {
        assert!(DataSet::parse_xc_repo_data_line("1 21:1:9").is_err());
        assert!(DataSet::parse_xc_repo_data_line("1 21").is_err());
        assert!(DataSet::parse_xc_repo_data_line("x 21:1").is_err());
        // Duplicate feature index.
        assert!(DataSet::parse_xc_repo_data_line("1 3:1 3:2").is_err());
    }
}
