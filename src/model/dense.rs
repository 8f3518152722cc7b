use ndarray::{linalg, Array1, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

use crate::error::LaneResult;

/// Fully connected layer with a linear output, viewing its parameters as
/// `[weights (inputs, outputs) | biases (outputs)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dense {
    dim: (usize, usize),
}

impl Dense {
    pub fn new(dim: (usize, usize)) -> Self {
        Self { dim }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        (self.dim.0 + 1) * self.dim.1
    }

    pub fn weight_len(&self) -> usize {
        self.dim.0 * self.dim.1
    }

    pub fn forward(&self, params: &[f32], x: ArrayView1<f32>) -> LaneResult<Array1<f32>> {
        let (w, b) = self.view_params(params)?;
        Ok(x.dot(&w) + b)
    }

    /// Accumulates `dw` and `db` for one sample and returns the input delta.
    ///
    /// # Arguments
    /// * `params` - This layer's parameter slice.
    /// * `grad` - This layer's gradient slice, added to in place.
    /// * `x` - The input seen during the forward pass.
    /// * `d` - The loss derivative with respect to the outputs.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        x: ArrayView1<f32>,
        d: ArrayView1<f32>,
    ) -> LaneResult<Array1<f32>> {
        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(
            1.0,
            &x.insert_axis(Axis(1)),
            &d.insert_axis(Axis(0)),
            1.0,
            &mut dw,
        );
        db += &d;

        let (w, _) = self.view_params(params)?;
        Ok(w.dot(&d))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> LaneResult<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let (weights, biases) = params.split_at(self.weight_len());
        let weights = ArrayView2::from_shape(self.dim, weights)?;
        let biases = ArrayView1::from_shape(self.dim.1, biases)?;
        Ok((weights, biases))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> LaneResult<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let (dw, db) = grad.split_at_mut(self.weight_len());
        let dw = ArrayViewMut2::from_shape(self.dim, dw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db)?;
        Ok((dw, db))
    }
}
