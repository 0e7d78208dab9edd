//! Reference burn-backed model implementing [`SoupModel`].
//!
//! A single dense layer producing per-class scores, generic over the burn
//! backend. This is the boundary between the rank-erased `TensorData`
//! world the soup routines live in and typed burn tensors: states cross it
//! as `TensorData`, compute happens as `Tensor<B, 2>` on the model's
//! device.

use burn::prelude::*;

use crate::checkpoint::ParamMap;
use crate::model::SoupModel;

/// `y = x @ weight + bias`, input `[batch, d_in]`, output `[batch, d_out]`.
pub struct DenseModel<B: Backend> {
    weight: Tensor<B, 2>,
    bias: Tensor<B, 1>,
    device: B::Device,
}

impl<B: Backend> DenseModel<B> {
    /// Zero-initialized model; weights come from checkpoints.
    pub fn new(d_in: usize, d_out: usize, device: &B::Device) -> Self {
        Self {
            weight: Tensor::zeros([d_in, d_out], device),
            bias: Tensor::zeros([d_out], device),
            device: device.clone(),
        }
    }

    /// Move the model's parameters to another device.
    pub fn to_device(&mut self, device: &B::Device) {
        self.weight = self.weight.clone().to_device(device);
        self.bias = self.bias.clone().to_device(device);
        self.device = device.clone();
    }

    pub fn weight(&self) -> Tensor<B, 2> {
        self.weight.clone()
    }
}

impl<B: Backend> SoupModel for DenseModel<B> {
    fn state_dict(&self) -> ParamMap {
        let mut state = ParamMap::new();
        state.insert("weight".to_string(), self.weight.clone().into_data());
        state.insert("bias".to_string(), self.bias.clone().into_data());
        state
    }

    fn load_state_dict(&mut self, mut state: ParamMap) -> anyhow::Result<()> {
        if let Some(weight) = state.remove("weight") {
            anyhow::ensure!(
                weight.shape.len() == 2,
                "weight must be rank 2, got shape {:?}",
                weight.shape
            );
            self.weight = Tensor::from_data(weight, &self.device);
        }
        if let Some(bias) = state.remove("bias") {
            anyhow::ensure!(
                bias.shape.len() == 1,
                "bias must be rank 1, got shape {:?}",
                bias.shape
            );
            self.bias = Tensor::from_data(bias, &self.device);
        }
        // Remaining keys are foreign to this model and ignored.
        Ok(())
    }

    fn forward(&self, inputs: &[TensorData]) -> anyhow::Result<Vec<TensorData>> {
        anyhow::ensure!(inputs.len() == 1, "DenseModel takes exactly one input");
        anyhow::ensure!(
            inputs[0].shape.len() == 2,
            "input must be rank 2 [batch, d_in], got shape {:?}",
            inputs[0].shape
        );
        let x = Tensor::<B, 2>::from_data(inputs[0].clone(), &self.device);
        let y = x.matmul(self.weight.clone()) + self.bias.clone().unsqueeze::<2>();
        Ok(vec![y.into_data()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    use crate::average::uniform_soup;
    use crate::checkpoint::CheckpointSource;

    type TestBackend = NdArray<f32>;

    fn checkpoint(weight: [[f32; 2]; 2], bias: [f32; 2]) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert(
            "weight".to_string(),
            TensorData::new(weight.into_iter().flatten().collect::<Vec<_>>(), vec![2, 2]),
        );
        params.insert("bias".to_string(), TensorData::new(bias.to_vec(), vec![2]));
        params
    }

    #[test]
    fn test_state_round_trip() {
        let device = Default::default();
        let mut model = DenseModel::<TestBackend>::new(2, 2, &device);

        let ckpt = checkpoint([[1.0, 2.0], [3.0, 4.0]], [0.5, -0.5]);
        model.load_state_dict(ckpt).unwrap();

        let state = model.state_dict();
        assert_eq!(
            state["weight"].to_vec::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(state["bias"].to_vec::<f32>().unwrap(), vec![0.5, -0.5]);
    }

    #[test]
    fn test_forward_matches_hand_computation() {
        let device = Default::default();
        let mut model = DenseModel::<TestBackend>::new(2, 2, &device);
        model
            .load_state_dict(checkpoint([[1.0, 0.0], [0.0, 1.0]], [1.0, 2.0]))
            .unwrap();

        // Identity weight + bias: y = x + [1, 2] per row.
        let x = TensorData::new(vec![3.0_f32, 4.0, 5.0, 6.0], vec![2, 2]);
        let outputs = model.forward(&[x]).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs[0].to_vec::<f32>().unwrap(),
            vec![4.0, 6.0, 6.0, 8.0]
        );
    }

    #[test]
    fn test_uniform_soup_over_dense_checkpoints() {
        let device = Default::default();
        let mut model = DenseModel::<TestBackend>::new(2, 2, &device);

        let sources = vec![
            CheckpointSource::Params(checkpoint([[0.0, 0.0], [0.0, 0.0]], [0.0, 0.0])),
            CheckpointSource::Params(checkpoint([[2.0, 4.0], [6.0, 8.0]], [1.0, 1.0])),
        ];
        uniform_soup(&mut model, &sources, true).unwrap();

        let state = model.state_dict();
        assert_eq!(
            state["weight"].to_vec::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(state["bias"].to_vec::<f32>().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_foreign_keys_ignored_on_load() {
        let device = Default::default();
        let mut model = DenseModel::<TestBackend>::new(2, 2, &device);

        let mut state = checkpoint([[1.0, 1.0], [1.0, 1.0]], [0.0, 0.0]);
        state.insert(
            "scheduler.last_lr".to_string(),
            TensorData::new(vec![0.01_f32], vec![1]),
        );
        model.load_state_dict(state).unwrap();
        assert_eq!(model.state_dict().len(), 2);
    }
}
