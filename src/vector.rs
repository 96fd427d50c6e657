use crate::util::{read_f64, read_i32, read_u64, skip_bytes, write_f64, write_i32, write_u64};
use crate::{Index, Weight};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::mem::size_of;

/// Storage layout of a weight vector.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    Dense,
    Map,
    Sparse,
}

/// A weight vector over feature indices, stored dense, as a hash map, or as
/// sorted index-value pairs. Absent indices read as zero in all three forms.
#[derive(Clone, Debug, PartialEq)]
pub enum WeightVec {
    Dense(Vec<Weight>),
    Map {
        dim: usize,
        weights: HashMap<Index, Weight>,
    },
    Sparse {
        dim: usize,
        entries: Vec<(Index, Weight)>,
    },
}

/// Estimated bytes for a dense layout of the given logical size.
pub fn estimate_dense_mem(size: usize, _nonzero: usize) -> usize {
    size * size_of::<Weight>()
}

/// Estimated bytes for a map layout holding the given number of entries.
pub fn estimate_map_mem(_size: usize, nonzero: usize) -> usize {
    nonzero * (size_of::<Index>() + size_of::<Weight>()) * 2
}

/// Estimated bytes for a sorted-pairs layout holding the given number of entries.
pub fn estimate_sparse_mem(_size: usize, nonzero: usize) -> usize {
    nonzero * (size_of::<i32>() + size_of::<Weight>())
}

/// The on-disk layout chosen for a vector with the given accounting. The same
/// rule runs on save and on load, so the reader always parses the blob the
/// writer produced. Only dense and sparse exist on disk; a map is written as
/// sorted pairs.
fn disk_format(size: usize, nonzero: usize) -> Representation {
    if estimate_sparse_mem(size, nonzero) < estimate_dense_mem(size, nonzero) || size == 0 {
        Representation::Sparse
    } else {
        Representation::Dense
    }
}

impl WeightVec {
    pub fn new_dense(dim: usize) -> Self {
        WeightVec::Dense(vec![0.; dim])
    }

    pub fn new_map(dim: usize) -> Self {
        WeightVec::Map {
            dim,
            weights: HashMap::new(),
        }
    }

    pub fn representation(&self) -> Representation {
        match self {
            WeightVec::Dense(_) => Representation::Dense,
            WeightVec::Map { .. } => Representation::Map,
            WeightVec::Sparse { .. } => Representation::Sparse,
        }
    }

    /// Logical dimension of the vector.
    pub fn size(&self) -> usize {
        match self {
            WeightVec::Dense(values) => values.len(),
            WeightVec::Map { dim, .. } | WeightVec::Sparse { dim, .. } => *dim,
        }
    }

    pub fn nonzero(&self) -> usize {
        match self {
            WeightVec::Dense(values) => values.iter().filter(|&&v| v != 0.).count(),
            WeightVec::Map { weights, .. } => weights.values().filter(|&&v| v != 0.).count(),
            WeightVec::Sparse { entries, .. } => {
                entries.iter().filter(|&&(_, v)| v != 0.).count()
            }
        }
    }

    pub fn at(&self, index: Index) -> Weight {
        match self {
            WeightVec::Dense(values) => values.get(index).copied().unwrap_or(0.),
            WeightVec::Map { weights, .. } => weights.get(&index).copied().unwrap_or(0.),
            WeightVec::Sparse { entries, .. } => entries
                .binary_search_by_key(&index, |&(i, _)| i)
                .map(|pos| entries[pos].1)
                .unwrap_or(0.),
        }
    }

    /// Set the entry at `index`, growing the map form as needed. The sparse
    /// form keeps its sort order.
    pub fn insert(&mut self, index: Index, value: Weight) {
        match self {
            WeightVec::Dense(values) => values[index] = value,
            WeightVec::Map { weights, .. } => {
                weights.insert(index, value);
            }
            WeightVec::Sparse { entries, .. } => {
                match entries.binary_search_by_key(&index, |&(i, _)| i) {
                    Ok(pos) => entries[pos].1 = value,
                    Err(pos) => entries.insert(pos, (index, value)),
                }
            }
        }
    }

    /// Dot product against a sparse feature row.
    pub fn dot(&self, features: &[(Index, Weight)]) -> Weight {
        match self {
            WeightVec::Dense(values) => features
                .iter()
                .map(|&(i, v)| values.get(i).copied().unwrap_or(0.) * v)
                .sum(),
            WeightVec::Map { weights, .. } => features
                .iter()
                .map(|&(i, v)| weights.get(&i).copied().unwrap_or(0.) * v)
                .sum(),
            WeightVec::Sparse { entries, .. } => {
                // Merge join over the two sorted pair lists.
                let mut sum = 0.;
                let mut l = &entries[..];
                let mut r = features;
                while let (Some(&(li, lv)), Some(&(ri, rv))) = (l.first(), r.first()) {
                    if li == ri {
                        sum += lv * rv;
                        l = &l[1..];
                        r = &r[1..];
                    } else if li < ri {
                        l = &l[1..];
                    } else {
                        r = &r[1..];
                    }
                }
                sum
            }
        }
    }

    /// Negate every stored weight.
    pub fn invert(&mut self) {
        match self {
            WeightVec::Dense(values) => {
                for v in values.iter_mut() {
                    *v = -*v;
                }
            }
            WeightVec::Map { weights, .. } => {
                for v in weights.values_mut() {
                    *v = -*v;
                }
            }
            WeightVec::Sparse { entries, .. } => {
                for (_, v) in entries.iter_mut() {
                    *v = -*v;
                }
            }
        }
    }

    /// Drop entries with magnitude below the threshold; the dense form zeroes
    /// them instead.
    pub fn prune(&mut self, threshold: Weight) {
        match self {
            WeightVec::Dense(values) => {
                for v in values.iter_mut() {
                    if v.abs() < threshold {
                        *v = 0.;
                    }
                }
            }
            WeightVec::Map { weights, .. } => {
                weights.retain(|_, v| v.abs() >= threshold);
            }
            WeightVec::Sparse { entries, .. } => {
                entries.retain(|&(_, v)| v.abs() >= threshold);
            }
        }
    }

    /// Stored nonzero entries, sorted by index.
    fn sorted_entries(&self) -> Vec<(Index, Weight)> {
        match self {
            WeightVec::Dense(values) => values
                .iter()
                .enumerate()
                .filter(|&(_, &v)| v != 0.)
                .map(|(i, &v)| (i, v))
                .collect(),
            WeightVec::Map { weights, .. } => {
                let mut entries: Vec<_> = weights
                    .iter()
                    .filter(|&(_, &v)| v != 0.)
                    .map(|(&i, &v)| (i, v))
                    .collect();
                entries.sort_unstable_by_key(|&(i, _)| i);
                entries
            }
            WeightVec::Sparse { entries, .. } => {
                entries.iter().filter(|&&(_, v)| v != 0.).cloned().collect()
            }
        }
    }

    fn from_entries(dim: usize, entries: Vec<(Index, Weight)>, repr: Representation) -> Self {
        match repr {
            Representation::Dense => {
                let mut values = vec![0.; dim];
                for (i, v) in entries {
                    values[i] = v;
                }
                WeightVec::Dense(values)
            }
            Representation::Map => WeightVec::Map {
                dim,
                weights: entries.into_iter().collect(),
            },
            Representation::Sparse => WeightVec::Sparse { dim, entries },
        }
    }

    /// Convert in place to the requested representation; no-op if already there.
    pub fn to(&mut self, repr: Representation) {
        if self.representation() == repr {
            return;
        }
        let dim = self.size();
        let entries = self.sorted_entries();
        *self = Self::from_entries(dim, entries, repr);
    }

    /// Approximate bytes held by the current representation.
    pub fn mem(&self) -> usize {
        size_of::<Self>()
            + match self {
                WeightVec::Dense(values) => estimate_dense_mem(values.len(), 0),
                WeightVec::Map { weights, .. } => estimate_map_mem(0, weights.len()),
                WeightVec::Sparse { entries, .. } => estimate_sparse_mem(0, entries.len()),
            }
    }

    pub fn sparse_mem(&self) -> usize {
        estimate_sparse_mem(self.size(), self.nonzero())
    }

    pub fn dense_mem(&self) -> usize {
        estimate_dense_mem(self.size(), self.nonzero())
    }

    /// Write the vector as `size: u64, nonzero: u64` followed by the payload.
    /// Used where no size accounting precedes the blob.
    pub fn save<W: Write>(&self, out: &mut W) -> Result<()> {
        write_u64(out, self.size() as u64)?;
        write_u64(out, self.nonzero() as u64)?;
        self.save_payload(out)
    }

    /// Write the payload only: either all `size` weights or `nonzero`
    /// `(i32 index, f64 weight)` pairs, whichever the estimator picks for
    /// `(size, nonzero)`. The caller persists that accounting pair itself.
    pub fn save_payload<W: Write>(&self, out: &mut W) -> Result<()> {
        let size = self.size();
        match disk_format(size, self.nonzero()) {
            Representation::Dense => {
                for i in 0..size {
                    write_f64(out, self.at(i))?;
                }
            }
            _ => {
                for (i, v) in self.sorted_entries() {
                    write_i32(out, i as i32)?;
                    write_f64(out, v)?;
                }
            }
        }
        Ok(())
    }

    /// Read a vector written by `save`, materialized as `load_as`.
    pub fn load<R: Read>(input: &mut R, load_as: Representation) -> Result<Self> {
        let size = read_u64(input)? as usize;
        let nonzero = read_u64(input)? as usize;
        Self::load_payload(input, size, nonzero, load_as)
    }

    /// Read a payload written by `save_payload` for the given accounting pair.
    pub fn load_payload<R: Read>(
        input: &mut R,
        size: usize,
        nonzero: usize,
        load_as: Representation,
    ) -> Result<Self> {
        let entries = match disk_format(size, nonzero) {
            Representation::Dense => {
                let mut entries = Vec::new();
                for i in 0..size {
                    let v = read_f64(input)?;
                    if v != 0. {
                        entries.push((i, v));
                    }
                }
                entries
            }
            _ => {
                let mut entries = Vec::with_capacity(nonzero);
                for _ in 0..nonzero {
                    let i = read_i32(input)?;
                    if i < 0 || i as usize >= size {
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            format!("weight index {} out of range for size {}", i, size),
                        ));
                    }
                    entries.push((i as Index, read_f64(input)?));
                }
                entries
            }
        };

        Ok(Self::from_entries(size, entries, load_as))
    }

    /// Advance past a vector written by `save` without materializing it.
    pub fn skip_load<R: Read>(input: &mut R) -> Result<()> {
        let size = read_u64(input)? as usize;
        let nonzero = read_u64(input)? as usize;
        let payload = match disk_format(size, nonzero) {
            Representation::Dense => size * size_of::<f64>(),
            _ => nonzero * (size_of::<i32>() + size_of::<f64>()),
        };
        skip_bytes(input, payload as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_vec() -> WeightVec {
        let mut w = WeightVec::new_dense(10);
        w.insert(1, 1.);
        w.insert(3, -0.5);
        w.insert(7, 0.25);
        w
    }

    #[test]
    fn test_representation_equivalence() {
        let features = vec![(1, 2.), (3, 4.), (6, 1.), (7, -2.)];
        let dense = sample_vec();
        let mut map = dense.clone();
        map.to(Representation::Map);
        let mut sparse = dense.clone();
        sparse.to(Representation::Sparse);

        for w in &[&dense, &map, &sparse] {
            assert_eq!(1. * 2. + -0.5 * 4. + 0.25 * -2., w.dot(&features));
            assert_eq!(1., w.at(1));
            assert_eq!(0., w.at(2));
            assert_eq!(3, w.nonzero());
            assert_eq!(10, w.size());
        }
    }

    #[test]
    fn test_conversion_round_trip() {
        let dense = sample_vec();
        let mut w = dense.clone();
        w.to(Representation::Sparse);
        w.to(Representation::Map);
        w.to(Representation::Dense);
        assert_eq!(dense, w);
    }

    #[test]
    fn test_invert_involution() {
        let original = sample_vec();
        let mut w = original.clone();
        w.invert();
        assert_eq!(-1., w.at(1));
        w.invert();
        assert_eq!(original, w);
    }

    #[test]
    fn test_prune() {
        for repr in &[
            Representation::Dense,
            Representation::Map,
            Representation::Sparse,
        ] {
            let mut w = sample_vec();
            w.to(*repr);
            w.prune(0.3);
            assert_eq!(1., w.at(1));
            assert_eq!(-0.5, w.at(3));
            assert_eq!(0., w.at(7));
            assert_eq!(2, w.nonzero());
        }
    }

    #[test]
    fn test_sparse_insert_keeps_order() {
        let mut w = WeightVec::Sparse {
            dim: 10,
            entries: vec![(2, 1.), (8, 2.)],
        };
        w.insert(5, 3.);
        w.insert(2, 4.);
        match &w {
            WeightVec::Sparse { entries, .. } => {
                assert_eq!(&[(2, 4.), (5, 3.), (8, 2.)][..], &entries[..]);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        // Mostly-zero vector goes to disk as pairs, a full one as an array.
        for (dim, filled) in &[(1000usize, 3usize), (8, 8)] {
            let mut w = WeightVec::new_dense(*dim);
            for i in 0..*filled {
                w.insert(i, (i + 1) as Weight / 2.);
            }

            let mut buf = Vec::new();
            w.save(&mut buf).unwrap();

            let expected_payload = match disk_format(*dim, w.nonzero()) {
                Representation::Dense => dim * 8,
                _ => w.nonzero() * 12,
            };
            assert_eq!(16 + expected_payload, buf.len());

            for load_as in &[
                Representation::Dense,
                Representation::Map,
                Representation::Sparse,
            ] {
                let loaded =
                    WeightVec::load(&mut Cursor::new(&buf), *load_as).unwrap();
                assert_eq!(*load_as, loaded.representation());
                assert_eq!(w.size(), loaded.size());
                for i in 0..*dim {
                    assert_eq!(w.at(i), loaded.at(i));
                }
            }
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let w = sample_vec();
        let mut buf = Vec::new();
        w.save_payload(&mut buf).unwrap();
        assert_eq!(w.nonzero() * 12, buf.len());

        let loaded = WeightVec::load_payload(
            &mut Cursor::new(&buf),
            w.size(),
            w.nonzero(),
            Representation::Map,
        )
        .unwrap();
        for i in 0..w.size() {
            assert_eq!(w.at(i), loaded.at(i));
        }
    }

    #[test]
    fn test_skip_load() {
        let mut buf = Vec::new();
        sample_vec().save(&mut buf).unwrap();
        let marker = 77i32;
        crate::util::write_i32(&mut buf, marker).unwrap();

        let mut cursor = Cursor::new(&buf);
        WeightVec::skip_load(&mut cursor).unwrap();
        assert_eq!(marker, crate::util::read_i32(&mut cursor).unwrap());
    }

    #[test]
    fn test_estimators_pick_sparse_for_long_tail() {
        assert_eq!(Representation::Sparse, disk_format(10_000, 10));
        assert_eq!(Representation::Dense, disk_format(8, 8));
        assert_eq!(Representation::Sparse, disk_format(0, 0));
    }
}
