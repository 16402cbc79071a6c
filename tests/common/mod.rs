use cnn_batchnorm::data::{BatchLoader, Dataset};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random 28x28 greyscale images with random digit labels.
pub fn gen_dataset(len: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let pixels_distrib = Uniform::new_inclusive(0u8, 255);
    let labels_distrib = Uniform::new(0u8, 10);
    let pixels: Vec<u8> = (0..len * 28 * 28).map(|_| rng.sample(pixels_distrib)).collect();
    let labels: Vec<u8> = (0..len).map(|_| rng.sample(labels_distrib)).collect();
    Dataset::from_raw(&pixels, labels, 28, 28).expect("synthetic dataset is well formed")
}

pub fn loader(len: usize, batch_size: usize, shuffle: bool, seed: u64) -> BatchLoader {
    BatchLoader::new(gen_dataset(len, seed), batch_size, shuffle, seed)
}
