use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut1, ArrayViewMut3, Axis};

use crate::error::LaneResult;

/// Single-channel 2-D convolution with `filters` output channels, stride 1,
/// zero "same" padding and a tanh activation.
///
/// The layer owns no parameters: it views its share of the network's flat
/// parameter slice as `[kernels (filters, k, k) | biases (filters)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2d {
    filters: usize,
    kernel: usize,
}

impl Conv2d {
    pub fn new(filters: usize, kernel: usize) -> Self {
        Self { filters, kernel }
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.kernel_len() + self.filters
    }

    pub fn kernel_len(&self) -> usize {
        self.filters * self.kernel * self.kernel
    }

    /// Zero-pads `x` so the output keeps its height and width.
    pub fn pad(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let p = self.kernel / 2;
        let (h, w) = x.dim();
        let mut padded = Array2::zeros((h + 2 * p, w + 2 * p));
        padded.slice_mut(s![p..p + h, p..p + w]).assign(&x);
        padded
    }

    /// Computes the activations `(h, w, filters)` of a padded image.
    pub fn forward(&self, params: &[f32], padded: ArrayView2<f32>) -> LaneResult<Array3<f32>> {
        let (kernels, biases) = self.view_params(params)?;
        let k = self.kernel;
        let (h, w) = (padded.nrows() + 1 - k, padded.ncols() + 1 - k);

        let mut activations = Array3::zeros((h, w, self.filters));
        for ((r, c, f), a) in activations.indexed_iter_mut() {
            let window = padded.slice(s![r..r + k, c..c + k]);
            let z = window
                .iter()
                .zip(kernels.index_axis(Axis(0), f))
                .map(|(x, w)| x * w)
                .sum::<f32>();
            *a = (z + biases[f]).tanh();
        }

        Ok(activations)
    }

    /// Accumulates kernel and bias gradients for one sample.
    ///
    /// `d_act` is the loss derivative with respect to this layer's
    /// activations. The input gradient is not needed since this is the
    /// first layer.
    pub fn backward(
        &self,
        grad: &mut [f32],
        padded: ArrayView2<f32>,
        activations: ArrayView3<f32>,
        d_act: ArrayView3<f32>,
    ) -> LaneResult<()> {
        let (mut d_kernels, mut d_biases) = self.view_grad(grad)?;
        let k = self.kernel;

        for ((r, c, f), &a) in activations.indexed_iter() {
            let dz = d_act[[r, c, f]] * (1.0 - a * a);
            if dz == 0.0 {
                continue;
            }
            d_biases[f] += dz;
            let window = padded.slice(s![r..r + k, c..c + k]);
            d_kernels.index_axis_mut(Axis(0), f).scaled_add(dz, &window);
        }

        Ok(())
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> LaneResult<(ArrayView3<'a, f32>, ArrayView1<'a, f32>)> {
        let (kernels, biases) = params.split_at(self.kernel_len());
        let kernels = ArrayView3::from_shape((self.filters, self.kernel, self.kernel), kernels)?;
        let biases = ArrayView1::from_shape(self.filters, biases)?;
        Ok((kernels, biases))
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> LaneResult<(ArrayViewMut3<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let (d_kernels, d_biases) = grad.split_at_mut(self.kernel_len());
        let d_kernels = ArrayViewMut3::from_shape((self.filters, self.kernel, self.kernel), d_kernels)?;
        let d_biases = ArrayViewMut1::from_shape(self.filters, d_biases)?;
        Ok((d_kernels, d_biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pad_keeps_image_centred() {
        let conv = Conv2d::new(1, 3);
        let padded = conv.pad(array![[1.0, 2.0], [3.0, 4.0]].view());
        assert_eq!(padded.dim(), (4, 4));
        assert_eq!(padded[[1, 1]], 1.0);
        assert_eq!(padded[[2, 2]], 4.0);
        assert_eq!(padded[[0, 0]], 0.0);
    }

    #[test]
    fn test_identity_kernel() {
        let conv = Conv2d::new(1, 3);
        // Centre tap of 1, zero bias: output is tanh of the input.
        let mut params = vec![0.0; conv.size()];
        params[4] = 1.0;

        let x = array![[0.5, -1.0], [0.0, 2.0]];
        let out = conv.forward(&params, conv.pad(x.view()).view()).unwrap();
        assert_eq!(out.dim(), (2, 2, 1));
        assert!((out[[0, 0, 0]] - 0.5f32.tanh()).abs() < 1e-6);
        assert!((out[[1, 1, 0]] - 2.0f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_bias_per_filter() {
        let conv = Conv2d::new(2, 1);
        let params = vec![0.0, 0.0, 0.25, -0.5];
        let out = conv.forward(&params, conv.pad(Array2::zeros((3, 3)).view()).view()).unwrap();
        assert!(out.index_axis(Axis(2), 0).iter().all(|&a| (a - 0.25f32.tanh()).abs() < 1e-6));
        assert!(out.index_axis(Axis(2), 1).iter().all(|&a| (a + 0.5f32.tanh()).abs() < 1e-6));
    }

    #[test]
    fn test_backward_bias_gradient() {
        let conv = Conv2d::new(1, 1);
        let params = vec![0.0, 0.0];
        let padded = conv.pad(Array2::ones((2, 2)).view());
        let activations = conv.forward(&params, padded.view()).unwrap();
        let d_act = Array3::ones((2, 2, 1));

        let mut grad = vec![0.0; conv.size()];
        conv.backward(&mut grad, padded.view(), activations.view(), d_act.view()).unwrap();
        // tanh'(0) = 1, four pixels of ones.
        assert_eq!(grad, vec![4.0, 4.0]);
    }
}
