use cnn_batchnorm::layers::Conv2Dlayer;
use cnn_batchnorm::loss::nll_loss;
use cnn_batchnorm::model::{Mode, Module};
use cnn_batchnorm::{DropoutConfig, Net, NetConfig};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use ndarray::{Array4, ArrayD};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

fn gen_input(b: usize, c: usize, h: usize, w: usize, rng: &mut StdRng) -> Array4<f32> {
    Array4::<f32>::random_using((b, c, h, w), Uniform::new(-1.0, 1.0), rng)
}

fn gen_labels(n: usize, rng: &mut StdRng) -> Vec<u8> {
    (0..n).map(|_| rng.gen_range(0..10)).collect()
}

fn conv_forward_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Convolution_Forward");
    let mut rng = StdRng::seed_from_u64(0);

    // (batch_size, in_channels, out_channels, height, width): the two convolutions of the net
    let params = vec![(64, 1, 10, 28, 28), (64, 10, 20, 12, 12)];
    let k = 5;

    for (batch_size, in_c, out_c, h, w) in params {
        let mut conv_layer = Conv2Dlayer::new(in_c, out_c, (k, k), &mut rng);
        let input: ArrayD<f32> = gen_input(batch_size, in_c, h, w, &mut rng).into_dyn();

        let flops = batch_size * in_c * out_c * k * k * (h - k + 1) * (w - k + 1);
        group.throughput(Throughput::Elements(flops as u64));

        group.bench_with_input(
            BenchmarkId::new("forward_pass", format!("{batch_size}x{in_c}x{h}x{w}")),
            &input,
            |b, input| {
                b.iter_batched(
                    || input.clone(),
                    |data| conv_layer.forward(black_box(data), Mode::Eval),
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

fn net_inference_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Net_Inference");
    let mut rng = StdRng::seed_from_u64(1);
    let mut nn = Net::new(&NetConfig::default()).unwrap();

    for batch_size in [64, 1000] {
        let input = gen_input(batch_size, 1, 28, 28, &mut rng);
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("forward_eval", batch_size),
            &input,
            |b, input| {
                b.iter_batched(
                    || input.clone(),
                    |data| nn.forward(black_box(data), Mode::Eval),
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

fn train_step_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Net_Train_Step");
    let mut rng = StdRng::seed_from_u64(2);
    let input = gen_input(64, 1, 28, 28, &mut rng);
    let labels = gen_labels(64, &mut rng);

    for (name, dropout) in [
        ("with_dropout", DropoutConfig::WithDropout(0.5)),
        ("no_dropout", DropoutConfig::NoDropout),
    ] {
        let mut nn = Net::new(&NetConfig { dropout, seed: 1 }).unwrap();
        group.bench_function(name, |bench| {
            bench.iter_batched(
                || input.clone(),
                |data| {
                    nn.zero_grad();
                    if let Ok(output) = nn.forward(black_box(data), Mode::Train) {
                        let (_, grad) = nll_loss(&output, &labels);
                        nn.backward(grad);
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    conv_forward_benchmark,
    net_inference_benchmark,
    train_step_benchmark
);
criterion_main!(benches);
