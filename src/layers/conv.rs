use crate::model::{Mode, Module, Param};
use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use rayon::prelude::*;
use std::f32;

/// 2D convolution layer (without padding and with stride=1).
#[derive(Debug, Clone)]
pub struct Conv2Dlayer {
    in_channels: usize,          // Number of channels in the input image
    out_channels: usize,         // Number of channels produced by the convolution
    kernel_size: (usize, usize), // Square kernels only
    // weights
    pub kernels_mat: Array2<f32>, // Layout for img2col: (out_channels, in_channels*k^2)
    pub b: Array1<f32>,           // One bias per output channel: (output_channels)
    // for backprop
    last_input: Option<Array3<f32>>, // The 'patches' matrix in img2col: (batch_size, locations, in_channels * k^2)
    last_input_hw: (usize, usize),
    //
    pub k_grad: Option<Array2<f32>>, // (out_channels, in_channels * k^2)
    pub b_grad: Option<Array1<f32>>, // (out_channels)
}

impl Conv2Dlayer {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        rng: &mut R,
    ) -> Conv2Dlayer {
        assert!(kernel_size.0 == kernel_size.1);
        Conv2Dlayer {
            in_channels,
            out_channels,
            kernel_size,
            //
            kernels_mat: Conv2Dlayer::init_kernel(in_channels, out_channels, kernel_size, rng),
            b: Array1::zeros(out_channels),
            //
            last_input: None,
            last_input_hw: (0, 0),
            //
            k_grad: None,
            b_grad: None,
        }
    }

    fn get_scale(in_channels: usize, kernel_size: (usize, usize)) -> f32 {
        (6.0 / (in_channels * kernel_size.0 * kernel_size.1) as f32).sqrt() // uniform, not normal
    }

    fn init_kernel<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        rng: &mut R,
    ) -> Array2<f32> {
        let k = kernel_size.0;
        // Kernel weights layed-out for the 'img2col' method to compute the convolution.
        // Dimensions: (out_channels, in_channels*k^2)
        Array2::<f32>::random_using(
            (out_channels, in_channels * k * k),
            Uniform::new(-1.0, 1.0),
            rng,
        ) * Conv2Dlayer::get_scale(in_channels, kernel_size)
    }
}

impl Module for Conv2Dlayer {
    /// Forward for the convolution layer using the 'img2col' method.
    ///
    /// The convolution is mapped to a single matmul per batch item:
    /// OUT = kernels_mat x patches_mat^T, with
    /// - kernels_mat: (out_channels, in_channels * k^2)
    /// - patches_mat: (locations, in_channels * k^2)
    /// yielding (out_channels, locations), reshaped to (out_channels, out_h, out_w).
    ///
    /// Batch items are independent so they are processed in parallel.
    ///
    /// Input: (batch_size, in_channels, height, width)
    /// Output: (batch_size, out_channels, height-k+1, width-k+1), where kernel_size=(k,k)
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        let input = input
            .into_dimensionality::<Ix4>()
            .expect("Conv layer input should be 4D");

        let (batch_size, in_channels, in_height, in_width) = input.dim();
        assert!(in_channels == self.in_channels);
        let k = self.kernel_size.0;
        let out_height = in_height - k + 1;
        let out_width = in_width - k + 1;
        let nb_locations = out_height * out_width;
        let patch_len = in_channels * k * k;

        let mut patches = Array3::<f32>::zeros((batch_size, nb_locations, patch_len));
        let mut out = Array4::<f32>::zeros((batch_size, self.out_channels, out_height, out_width));

        let kernels_mat = &self.kernels_mat;
        let bias = self.b.view().insert_axis(Axis(1));
        let out_channels = self.out_channels;

        Zip::from(patches.outer_iter_mut())
            .and(out.outer_iter_mut())
            .and(input.outer_iter())
            .par_for_each(|mut patches_mat, mut out_maps, feature_maps| {
                // There are L patches of size (in_channels, k, k), one per row
                let windows = feature_maps.windows((in_channels, k, k));
                for (mut row, patch) in patches_mat.rows_mut().into_iter().zip(windows) {
                    row.assign(&patch.flatten());
                }

                // (out_channels, L) = (out_channels, in_channels*k^2) dot (L, in_channels*k^2)^T
                let mut flat = kernels_mat.dot(&patches_mat.t());
                flat += &bias;

                let maps = flat
                    .into_shape_with_order((out_channels, out_height, out_width))
                    .expect("img2col output is compatible with (out_channels, out_h, out_w)");
                out_maps.assign(&maps);
            });

        if mode == Mode::Train {
            self.last_input = Some(patches);
            self.last_input_hw = (in_height, in_width);
        }

        out.into_dyn()
    }

    /// Backward for the convolution layer using the 'img2col' method.
    ///
    /// With dz reshaped to (out_channels, locations) per batch item:
    /// - dL/dkernels_mat = sum over batch of dz dot patches_mat
    /// - dL/dbias = dz summed over locations and batch
    /// - dL/dpatches = kernels_mat^T dot dz, folded back onto the input
    ///   volume by accumulating every patch gradient at its window position.
    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let dz = dz
            .into_dimensionality::<Ix4>()
            .expect("[backward] [conv] incoming dz is 4D");
        let (batch_size, out_channels, out_height, out_width) = dz.dim();

        let nb_locations = out_height * out_width;
        let dz = dz
            .to_shape((batch_size, out_channels, nb_locations))
            .expect("[backward] [conv] incoming dz is compatible with img2col shape");

        let patches = self
            .last_input
            .as_ref()
            .expect("Run a training forward before the backward");

        let k = self.kernel_size.0;
        let patch_len = self.in_channels * k * k;

        // Per-item kernel gradients computed in parallel, summed in batch order
        // so the result does not depend on thread scheduling.
        let per_item: Vec<Array2<f32>> = (0..batch_size)
            .into_par_iter()
            .map(|batch_idx| {
                dz.slice(s![batch_idx, .., ..])
                    .dot(&patches.slice(s![batch_idx, .., ..]))
            })
            .collect();
        let mut dkernels_mat = Array2::<f32>::zeros((out_channels, patch_len));
        for g in &per_item {
            dkernels_mat += g;
        }
        self.k_grad = Some(dkernels_mat);

        self.b_grad = Some(dz.sum_axis(Axis(2)).sum_axis(Axis(0)));

        let (height, width) = self.last_input_hw;
        let mut dinput = Array4::<f32>::zeros((batch_size, self.in_channels, height, width));
        for batch_idx in 0..batch_size {
            // (in_channels*k^2, locations) = (out_channels, in_channels*k^2)^T dot (out_channels, locations)
            let dpatches = self.kernels_mat.t().dot(&dz.slice(s![batch_idx, .., ..]));
            let dpatches = dpatches.t();
            let grad_patches = dpatches
                .to_shape((nb_locations, self.in_channels, k, k))
                .expect("[backward] [conv] patches gradient is compatible with (locations, in_channels, k, k)");
            for (patch_idx, patch_grad) in grad_patches.outer_iter().enumerate() {
                let top_y = patch_idx / out_width;
                let top_x = patch_idx % out_width;
                let mut dinput_slice =
                    dinput.slice_mut(s![batch_idx, .., top_y..top_y + k, top_x..top_x + k]);
                dinput_slice += &patch_grad;
            }
        }

        dinput.into_dyn()
    }

    fn zero_grad(&mut self) {
        self.k_grad = None;
        self.b_grad = None;
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                value: self.kernels_mat.view_mut().into_dyn(),
                grad: self.k_grad.as_ref().map(|g| g.view().into_dyn()),
            },
            Param {
                value: self.b.view_mut().into_dyn(),
                grad: self.b_grad.as_ref().map(|g| g.view().into_dyn()),
            },
        ]
    }

    fn state_tensors(&self) -> Vec<(&'static str, ArrayD<f32>)> {
        vec![
            ("weight", self.kernels_mat.clone().into_dyn()),
            ("bias", self.b.clone().into_dyn()),
        ]
    }
}

/// Non-overlapping max pooling (stride = pool size, trailing rows/cols dropped).
#[derive(Debug, Clone)]
pub struct MaxPoolLayer {
    pool_size: (usize, usize),
    // for backprop
    last_argmax: Option<Array4<usize>>, // offset of the max within each (k, k) window
    last_input_hw: (usize, usize),
}

impl MaxPoolLayer {
    pub fn new(pool_size: (usize, usize)) -> MaxPoolLayer {
        assert!(pool_size.0 == pool_size.1);
        MaxPoolLayer {
            pool_size,
            last_argmax: None,
            last_input_hw: (0, 0),
        }
    }
}

impl Module for MaxPoolLayer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        let input = input
            .into_dimensionality::<Ix4>()
            .expect("[forward] [maxPool] input is a 4D tensor");

        let (batch_size, channels, height, width) = input.dim();
        let k = self.pool_size.0;
        let (out_height, out_width) = (height / k, width / k);

        let mut pooled = Array4::<f32>::zeros((batch_size, channels, out_height, out_width));
        let mut argmax = Array4::<usize>::zeros((batch_size, channels, out_height, out_width));

        // Only the first max of a window is recorded, so ties (flat background
        // regions) route the gradient to a single input.
        Zip::indexed(&mut pooled)
            .and(&mut argmax)
            .for_each(|(n, c, i, j), p, am| {
                let window = input.slice(s![n, c, i * k..(i + 1) * k, j * k..(j + 1) * k]);
                let mut best = f32::NEG_INFINITY;
                let mut best_idx = 0;
                for (idx, &v) in window.iter().enumerate() {
                    if v > best {
                        best = v;
                        best_idx = idx;
                    }
                }
                *p = best;
                *am = best_idx;
            });

        if mode == Mode::Train {
            self.last_argmax = Some(argmax);
            self.last_input_hw = (height, width);
        }

        pooled.into_dyn()
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        // dz: (batch_size, channels, height/k, width/k)
        let dz = dz
            .into_dimensionality::<Ix4>()
            .expect("[backward] [maxPool] dz is 4D");
        let (batch_size, channels, _, _) = dz.dim();
        let k = self.pool_size.0;
        let (height, width) = self.last_input_hw;

        let argmax = self
            .last_argmax
            .as_ref()
            .expect("[backward] [maxPool] Run a training forward before backward");

        let mut dinput = Array4::<f32>::zeros((batch_size, channels, height, width));
        Zip::indexed(&dz)
            .and(argmax)
            .for_each(|(n, c, i, j), &dz_val, &am| {
                dinput[[n, c, i * k + am / k, j * k + am % k]] += dz_val;
            });

        dinput.into_dyn()
    }

    fn zero_grad(&mut self) {
        self.last_argmax = None;
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlattenLayer {
    last_input_shape: Option<Vec<usize>>,
}

impl FlattenLayer {
    pub fn new() -> FlattenLayer {
        FlattenLayer {
            last_input_shape: None,
        }
    }
}

impl Module for FlattenLayer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        if mode == Mode::Train {
            self.last_input_shape = Some(input.shape().to_vec());
        }
        // Assuming the input is a batch of feature maps
        let input = input
            .into_dimensionality::<Ix4>()
            .expect("Flatten layer input should be 4D");
        let (batch_size, in_channels, height, width) = input.dim();
        input
            .to_shape((batch_size, in_channels * height * width))
            .expect("flatten input to 2D array should not fail")
            .to_owned()
            .into_dyn()
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let shape = self
            .last_input_shape
            .as_ref()
            .expect("Need to do a training forward pass before the backward");
        dz.to_shape(shape.as_slice())
            .expect("should be able to reshape the incoming gradient")
            .to_owned()
    }

    fn zero_grad(&mut self) {
        self.last_input_shape = None;
    }
}
