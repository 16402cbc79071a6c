use ndarray::prelude::*;

/// Negative log-likelihood of the true classes.
///
/// `log_probs`: (batch_size, num_classes), `labels`: class index per row.
/// Returns the per-example losses and the gradient of their *mean* with
/// respect to `log_probs`, ready to be fed to the network backward pass.
pub fn nll_loss(log_probs: &Array2<f32>, labels: &[u8]) -> (Array1<f32>, Array2<f32>) {
    let batch_size = labels.len();
    assert_eq!(log_probs.nrows(), batch_size, "one label per example");

    let loss = Array1::from_iter(
        labels
            .iter()
            .enumerate()
            .map(|(i, &label)| -log_probs[(i, label as usize)]),
    );

    let mut grad = Array2::zeros(log_probs.raw_dim());
    for (i, &label) in labels.iter().enumerate() {
        grad[(i, label as usize)] = -1.0 / batch_size as f32;
    }

    (loss, grad)
}

/// Index of the highest log-probability of each row (first one on ties).
pub fn argmax_rows(log_probs: &Array2<f32>) -> Vec<usize> {
    log_probs
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best_idx, best), (idx, &v)| {
                    if v > best {
                        (idx, v)
                    } else {
                        (best_idx, best)
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_true_class_log_probability() {
        let log_probs = array![[-0.1f32, -2.0, -3.0], [-1.5, -0.5, -2.5]];
        let (loss, grad) = nll_loss(&log_probs, &[0, 2]);
        assert_eq!(loss, array![0.1f32, 2.5]);
        assert_eq!(grad, array![[-0.5f32, 0.0, 0.0], [0.0, 0.0, -0.5]]);
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        let log_probs = array![[-1.0f32, -0.2, -0.2], [-0.1, -3.0, -4.0]];
        assert_eq!(argmax_rows(&log_probs), vec![1, 0]);
    }
}
