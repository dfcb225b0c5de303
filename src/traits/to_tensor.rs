use burn::{
    prelude::*,
    tensor::{backend::Backend, BasicOps, Element, TensorData},
};

/// A trait for converting host-side items to tensors.
///
/// Observations arrive from environments as plain `Vec<f32>` rows of runtime
/// length; these impls batch them onto a device with a single flattening pass.
pub trait ToTensor<B: Backend, const D: usize, K: BasicOps<B>> {
    fn to_tensor(self, device: &B::Device) -> Tensor<B, D, K>;
}

impl<B, E, K> ToTensor<B, 1, K> for Vec<E>
where
    B: Backend,
    E: Element,
    K: BasicOps<B>,
{
    #[inline]
    fn to_tensor(self, device: &<B as Backend>::Device) -> Tensor<B, 1, K> {
        let len = self.len();
        Tensor::from_data(TensorData::new(self, [len]), device)
    }
}

impl<B, E, K> ToTensor<B, 2, K> for Vec<Vec<E>>
where
    B: Backend,
    E: Element,
    K: BasicOps<B>,
{
    /// Rows must all have the same length; the first row fixes the width.
    #[inline]
    fn to_tensor(self, device: &B::Device) -> Tensor<B, 2, K> {
        let batch_size = self.len();
        let width = self.first().map(Vec::len).unwrap_or(0);

        let mut flat = Vec::with_capacity(batch_size * width);
        for row in &self {
            flat.extend_from_slice(row);
        }

        Tensor::from_data(TensorData::new(flat, [batch_size, width]), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn vec_f32_to_tensor_1d() {
        let device = NdArrayDevice::default();
        let data = vec![1.0_f32, 2.0, 3.0, 4.0];
        let tensor: Tensor<NdArray, 1> = data.to_tensor(&device);

        assert_eq!(tensor.shape().dims, [4]);
        assert_eq!(tensor.to_data().as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn vec_rows_to_tensor_2d() {
        let device = NdArrayDevice::default();
        let rows = vec![vec![1.0_f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let tensor: Tensor<NdArray, 2> = rows.to_tensor(&device);

        assert_eq!(tensor.shape().dims, [2, 3]);
        assert_eq!(
            tensor.to_data().as_slice::<f32>().unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn single_row_to_tensor_2d() {
        let device = NdArrayDevice::default();
        let rows = vec![vec![0.5_f32, -0.5]];
        let tensor: Tensor<NdArray, 2> = rows.to_tensor(&device);

        assert_eq!(tensor.shape().dims, [1, 2]);
    }
}
