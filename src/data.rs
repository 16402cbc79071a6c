use crate::error::{Error, Result};
use crate::model::Net;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;

/// MNIST pixel statistics used for input normalization.
pub const MNIST_MEAN: f32 = 0.1307;
pub const MNIST_STD: f32 = 0.3081;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Split {
    Training,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Training => write!(f, "Training"),
            Split::Test => write!(f, "Test"),
        }
    }
}

/// Labelled images held in memory: (n, 1, 28, 28) normalized pixels.
#[derive(Debug, Clone)]
pub struct Dataset {
    images: Array4<f32>,
    labels: Vec<u8>,
}

impl Dataset {
    pub fn new(images: Array4<f32>, labels: Vec<u8>) -> Result<Dataset> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(Error::InvalidData(format!(
                "{} images but {} labels",
                images.len_of(Axis(0)),
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l as usize >= Net::NUM_CLASSES) {
            return Err(Error::InvalidData(format!("label {} is not a digit", bad)));
        }
        Ok(Dataset { images, labels })
    }

    /// Builds a dataset from raw 0-255 pixels laid out image after image,
    /// applying `(x / 255 - MNIST_MEAN) / MNIST_STD`.
    pub fn from_raw(pixels: &[u8], labels: Vec<u8>, height: usize, width: usize) -> Result<Dataset> {
        let n = labels.len();
        if pixels.len() != n * height * width {
            return Err(Error::InvalidData(format!(
                "{} pixels for {} images of {}x{}",
                pixels.len(),
                n,
                height,
                width
            )));
        }
        let normalized: Vec<f32> = pixels
            .iter()
            .map(|&p| (p as f32 / 255.0 - MNIST_MEAN) / MNIST_STD)
            .collect();
        let images = Array4::from_shape_vec((n, 1, height, width), normalized)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        Dataset::new(images, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Keeps the first `limit` examples.
    pub fn truncate(&mut self, limit: usize) {
        if limit < self.len() {
            self.images = self.images.slice(s![..limit, .., .., ..]).to_owned();
            self.labels.truncate(limit);
        }
    }

    fn gather(&self, indices: &[usize]) -> Batch {
        Batch {
            images: self.images.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>, // (batch_size, 1, 28, 28)
    pub labels: Vec<u8>,
}

/// A finite, re-iterable sequence of mini-batches.
pub trait BatchSource {
    /// Number of examples across all batches.
    fn len(&self) -> usize;
    fn num_batches(&self) -> usize;
    /// One full pass over the examples.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batches a `Dataset`, optionally reshuffling before every pass.
/// The last batch is kept even when smaller than `batch_size`.
pub struct BatchLoader {
    dataset: Dataset,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl BatchLoader {
    pub fn new(dataset: Dataset, batch_size: usize, shuffle: bool, seed: u64) -> BatchLoader {
        assert!(batch_size > 0, "batch size must be positive");
        BatchLoader {
            dataset,
            batch_size,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl BatchSource for BatchLoader {
    fn len(&self) -> usize {
        self.dataset.len()
    }

    fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }
        let dataset = &self.dataset;
        let batch_size = self.batch_size;
        Box::new((0..self.num_batches()).map(move |batch_idx| {
            let start = batch_idx * batch_size;
            let end = (start + batch_size).min(indices.len());
            dataset.gather(&indices[start..end])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_dataset(n: usize) -> Dataset {
        let pixels: Vec<u8> = (0..n * 4).map(|i| (i % 256) as u8).collect();
        let labels: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
        Dataset::from_raw(&pixels, labels, 2, 2).unwrap()
    }

    #[test]
    fn keeps_partial_last_batch() {
        let mut loader = BatchLoader::new(toy_dataset(10), 4, false, 0);
        assert_eq!(loader.num_batches(), 3);
        let sizes: Vec<usize> = loader.batches().map(|b| b.labels.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn shuffled_pass_covers_every_example_once() {
        let mut loader = BatchLoader::new(toy_dataset(23), 5, true, 42);
        let mut seen: Vec<u8> = loader.batches().flat_map(|b| b.labels).collect();
        assert_eq!(seen.len(), 23);
        seen.sort();
        let mut expected: Vec<u8> = (0..23).map(|i| (i % 10) as u8).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn same_seed_same_order() {
        let order = |seed| {
            let mut loader = BatchLoader::new(toy_dataset(30), 7, true, seed);
            loader
                .batches()
                .flat_map(|b| b.images.iter().copied().collect::<Vec<f32>>())
                .collect::<Vec<f32>>()
        };
        assert_eq!(order(3), order(3));
    }

    #[test]
    fn normalizes_pixels() {
        let ds = Dataset::from_raw(&[0, 255, 0, 255], vec![1], 2, 2).unwrap();
        let v = ds.images[[0, 0, 0, 1]];
        assert!((v - (1.0 - MNIST_MEAN) / MNIST_STD).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_digit_labels() {
        assert!(matches!(
            Dataset::from_raw(&[0; 4], vec![10], 2, 2),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn truncate_keeps_prefix() {
        let mut ds = toy_dataset(10);
        ds.truncate(3);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.images.len_of(Axis(0)), 3);
        ds.truncate(100);
        assert_eq!(ds.len(), 3);
    }
}
