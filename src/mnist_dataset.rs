use crate::data::{Dataset, Split};
use crate::error::{Error, Result};
use mnist::MnistBuilder;
use std::path::Path;
use tracing::{debug, info};

const ROWS: usize = 28;
const COLS: usize = 28;

/// idx file name and its exact size in bytes (header plus payload).
const FILES: [(&str, u64); 4] = [
    ("train-images-idx3-ubyte", 16 + 60_000 * 784),
    ("train-labels-idx1-ubyte", 8 + 60_000),
    ("t10k-images-idx3-ubyte", 16 + 10_000 * 784),
    ("t10k-labels-idx1-ubyte", 8 + 10_000),
];

/// Loads the MNIST train and test splits from the idx files in `data_dir`,
/// normalized and optionally truncated to the first `train_limit` /
/// `test_limit` examples.
///
/// Missing files and files of the wrong size are reported as `Error::Io`.
/// A file of the right size with a corrupt idx header still makes the
/// `mnist` crate panic.
pub fn load_mnist(
    data_dir: &Path,
    train_limit: Option<usize>,
    test_limit: Option<usize>,
) -> Result<(Dataset, Dataset)> {
    for (file, expected_len) in FILES {
        let path = data_dir.join(file);
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("missing MNIST file {}", path.display()),
            )));
        }
        let len = std::fs::metadata(&path)?.len();
        if len != expected_len {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "MNIST file {} has {len} bytes, expected {expected_len}",
                    path.display()
                ),
            )));
        }
    }

    // The builder concatenates base path and file name.
    let mut base_path = data_dir.to_string_lossy().into_owned();
    if !base_path.ends_with('/') {
        base_path.push('/');
    }
    debug!(base_path = %base_path, "reading MNIST idx files");

    let mnist = MnistBuilder::new()
        .base_path(&base_path)
        .training_set_length(60_000)
        .validation_set_length(0)
        .test_set_length(10_000)
        .finalize();

    let mut train = Dataset::from_raw(&mnist.trn_img, mnist.trn_lbl, ROWS, COLS)?;
    let mut test = Dataset::from_raw(&mnist.tst_img, mnist.tst_lbl, ROWS, COLS)?;

    if let Some(limit) = train_limit {
        train.truncate(limit);
    }
    if let Some(limit) = test_limit {
        test.truncate(limit);
    }
    info!(
        train = train.len(),
        test = test.len(),
        "loaded MNIST from {}",
        data_dir.display()
    );

    if train.is_empty() {
        return Err(Error::EmptyDataset(Split::Training));
    }
    if test.is_empty() {
        return Err(Error::EmptyDataset(Split::Test));
    }
    Ok((train, test))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_reported() {
        let err = load_mnist(Path::new("/nonexistent/mnist"), None, None).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("train-images-idx3-ubyte"));
    }

    #[test]
    fn truncated_files_are_reported() {
        let dir = std::env::temp_dir().join(format!("mnist-truncated-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for (file, _) in FILES {
            std::fs::write(dir.join(file), [0u8; 16]).unwrap();
        }

        let err = load_mnist(&dir, None, None).unwrap_err();
        std::fs::remove_dir_all(&dir).unwrap();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
            other => panic!("expected an io error, got {other:?}"),
        }
    }
}
