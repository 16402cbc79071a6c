use crate::config::TrainConfig;
use crate::data::{BatchSource, Split};
use crate::error::{Error, Result};
use crate::loss::{argmax_rows, nll_loss};
use crate::model::{Mode, Net};
use crate::optim::Optimizer;
use crate::report::{EpochReport, EvalReport, Observer, TrainProgress};
use tracing::debug;

/// One pass over the training batches: zero grads, forward, mean NLL,
/// backward, optimizer step.
///
/// Progress is reported every `log_interval` batches, starting with the first.
pub fn train_epoch(
    nn: &mut Net,
    train_loader: &mut dyn BatchSource,
    optimizer: &mut dyn Optimizer,
    epoch: usize,
    log_interval: usize,
    observer: &mut dyn Observer,
) -> Result<()> {
    let dataset_len = train_loader.len();
    let num_batches = train_loader.num_batches();

    for (batch_idx, batch) in train_loader.batches().enumerate() {
        // ----------
        nn.zero_grad();
        let output = nn.forward(batch.images, Mode::Train)?;
        let (loss, init_grad) = nll_loss(&output, &batch.labels);
        nn.backward(init_grad);
        optimizer.step(nn);
        // ----------

        if batch_idx % log_interval == 0 {
            observer.on_train_progress(&TrainProgress {
                epoch,
                processed: batch_idx * batch.labels.len(),
                dataset_len,
                percent: 100.0 * batch_idx as f64 / num_batches as f64,
                loss: loss.mean().unwrap_or(0.0),
            });
        }
        observer.on_batch_end(epoch, batch_idx);
    }
    Ok(())
}

/// Inference-mode pass over a whole split: summed NLL and argmax accuracy.
///
/// Neither parameters nor batch-norm running statistics are modified.
pub fn evaluate(
    nn: &mut Net,
    loader: &mut dyn BatchSource,
    split: Split,
    observer: &mut dyn Observer,
) -> Result<EvalReport> {
    let total = loader.len();
    if total == 0 {
        return Err(Error::EmptyDataset(split));
    }

    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;
    for batch in loader.batches() {
        let output = nn.forward(batch.images, Mode::Eval)?;
        let (loss, _) = nll_loss(&output, &batch.labels);
        loss_sum += loss.iter().map(|&l| l as f64).sum::<f64>();
        correct += argmax_rows(&output)
            .into_iter()
            .zip(&batch.labels)
            .filter(|&(pred, &label)| pred == label as usize)
            .count();
    }

    let report = EvalReport {
        split,
        average_loss: loss_sum / total as f64,
        correct,
        total,
        accuracy: 100.0 * correct as f64 / total as f64,
    };
    observer.on_evaluation(&report);
    Ok(report)
}

/// For every epoch: train, then evaluate on the training split and on the
/// test split.
pub fn run(
    nn: &mut Net,
    train_loader: &mut dyn BatchSource,
    test_loader: &mut dyn BatchSource,
    optimizer: &mut dyn Optimizer,
    config: &TrainConfig,
    observer: &mut dyn Observer,
) -> Result<Vec<EpochReport>> {
    config.validate()?;
    if train_loader.is_empty() {
        return Err(Error::EmptyDataset(Split::Training));
    }
    if test_loader.is_empty() {
        return Err(Error::EmptyDataset(Split::Test));
    }

    let mut reports = Vec::with_capacity(config.epochs);
    for epoch in 1..=config.epochs {
        debug!(epoch, "starting epoch");
        train_epoch(
            nn,
            train_loader,
            optimizer,
            epoch,
            config.log_interval,
            observer,
        )?;
        let train = evaluate(nn, train_loader, Split::Training, observer)?;
        let test = evaluate(nn, test_loader, Split::Test, observer)?;

        let report = EpochReport { epoch, train, test };
        observer.on_epoch_end(&report);
        reports.push(report);
    }
    Ok(reports)
}
