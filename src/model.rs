use burn::{
    nn::{
        loss::{CrossEntropyLossConfig, MseLoss, Reduction},
        Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, RegressionOutput, TrainOutput, TrainStep, ValidStep},
};

use crate::data::{MnistBatch, IMAGE_SIZE, NUM_CLASSES};

/// Size of the latent code produced by the encoder.
pub const LATENT_SIZE: usize = 100;

/// Two layer perceptron: `input -> relu -> output`.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    input: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    #[config(default = "IMAGE_SIZE")]
    pub d_input: usize,
    #[config(default = 64)]
    pub d_hidden: usize,
    #[config(default = "LATENT_SIZE")]
    pub d_latent: usize,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        Encoder {
            input: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            output: LinearConfig::new(self.d_hidden, self.d_latent).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Encoder<B> {
    /// # Shapes
    ///   - Images [batch_size, d_input]
    ///   - Output [batch_size, d_latent]
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.input.forward(images);
        let x = self.activation.forward(x);
        self.output.forward(x)
    }
}

/// Mirror of the [encoder](Encoder), mapping a latent code back to pixels.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    input: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct DecoderConfig {
    #[config(default = "LATENT_SIZE")]
    pub d_latent: usize,
    #[config(default = 64)]
    pub d_hidden: usize,
    #[config(default = "IMAGE_SIZE")]
    pub d_output: usize,
}

impl DecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        Decoder {
            input: LinearConfig::new(self.d_latent, self.d_hidden).init(device),
            output: LinearConfig::new(self.d_hidden, self.d_output).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Decoder<B> {
    /// # Shapes
    ///   - Latent [batch_size, d_latent]
    ///   - Output [batch_size, d_output]
    pub fn forward(&self, latent: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.input.forward(latent);
        let x = self.activation.forward(x);
        self.output.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct AutoEncoder<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Decoder<B>,
}

#[derive(Config, Debug)]
pub struct AutoEncoderConfig {
    #[config(default = "EncoderConfig::new()")]
    pub encoder: EncoderConfig,
    #[config(default = "DecoderConfig::new()")]
    pub decoder: DecoderConfig,
}

impl AutoEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AutoEncoder<B> {
        let model = AutoEncoder {
            encoder: self.encoder.init(device),
            decoder: self.decoder.init(device),
        };
        log::info!("Autoencoder with {} parameters\n{}", model.num_params(), model);

        model
    }
}

impl<B: Backend> AutoEncoder<B> {
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let latent = self.encoder.forward(images);
        self.decoder.forward(latent)
    }

    /// Reconstructs the images and scores the reconstruction against the input itself.
    pub fn forward_reconstruction(&self, images: Tensor<B, 2>) -> RegressionOutput<B> {
        let output = self.forward(images.clone());
        let loss = MseLoss::new().forward(output.clone(), images.clone(), Reduction::Mean);

        RegressionOutput {
            loss,
            output,
            targets: images,
        }
    }

    /// Marks every parameter as constant, so later training leaves them untouched.
    pub fn freeze(self) -> Self {
        self.no_grad()
    }
}

impl<B: AutodiffBackend> TrainStep<MnistBatch<B>, RegressionOutput<B>> for AutoEncoder<B> {
    fn step(&self, batch: MnistBatch<B>) -> TrainOutput<RegressionOutput<B>> {
        let item = self.forward_reconstruction(batch.images);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MnistBatch<B>, RegressionOutput<B>> for AutoEncoder<B> {
    fn step(&self, batch: MnistBatch<B>) -> RegressionOutput<B> {
        self.forward_reconstruction(batch.images)
    }
}

/// Digit classifier stacking a linear head on top of an existing encoder.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    pub encoder: Encoder<B>,
    pub head: Linear<B>,
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    #[config(default = "LATENT_SIZE")]
    pub d_latent: usize,
    #[config(default = "NUM_CLASSES")]
    pub num_classes: usize,
}

impl ClassifierConfig {
    /// Wraps `encoder` as is; freeze it beforehand to train the head alone.
    pub fn init<B: Backend>(&self, encoder: Encoder<B>, device: &B::Device) -> Classifier<B> {
        let model = Classifier {
            encoder,
            head: LinearConfig::new(self.d_latent, self.num_classes).init(device),
        };
        log::info!("Classifier with {} parameters\n{}", model.num_params(), model);

        model
    }
}

impl<B: Backend> Classifier<B> {
    /// # Shapes
    ///   - Images [batch_size, d_input]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let latent = self.encoder.forward(images);
        self.head.forward(latent)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<MnistBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: MnistBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MnistBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: MnistBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        optim::{AdamConfig, GradientsParams, Optimizer},
    };

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn images<B: Backend>(batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::random(
            [batch_size, IMAGE_SIZE],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            device,
        )
    }

    #[test]
    fn encoder_and_decoder_are_mirrored() {
        let device = Default::default();
        let encoder = EncoderConfig::new().init::<TestBackend>(&device);
        let decoder = DecoderConfig::new().init::<TestBackend>(&device);

        let latent = encoder.forward(images(4, &device));
        assert_eq!(latent.dims(), [4, LATENT_SIZE]);

        let output = decoder.forward(latent);
        assert_eq!(output.dims(), [4, IMAGE_SIZE]);
    }

    #[test]
    fn reconstruction_targets_are_the_inputs() {
        let device = Default::default();
        let model = AutoEncoderConfig::new().init::<TestBackend>(&device);
        let input = images::<TestBackend>(3, &device);

        let item = model.forward_reconstruction(input.clone());

        item.targets
            .clone()
            .into_data()
            .assert_eq(&input.into_data(), true);
        assert_eq!(item.output.dims(), [3, IMAGE_SIZE]);

        let expected = (item.output - item.targets)
            .powf_scalar(2.0)
            .mean()
            .into_scalar();
        let loss = item.loss.into_scalar();
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn classifier_outputs_logits_per_class() {
        let device = Default::default();
        let encoder = EncoderConfig::new().init::<TestBackend>(&device);
        let model = ClassifierConfig::new().init(encoder, &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_data([0, 3, 9], &device);

        let item = model.forward_classification(images(3, &device), targets);

        assert_eq!(item.output.dims(), [3, NUM_CLASSES]);
        assert!(item.loss.into_scalar() > 0.0);
    }

    #[test]
    fn unfrozen_encoder_receives_gradients() {
        let device = Default::default();
        let model = AutoEncoderConfig::new().init::<TestAutodiffBackend>(&device);

        let item = model.forward_reconstruction(images(2, &device));
        let grads = item.loss.backward();

        assert!(model.encoder.input.weight.val().grad(&grads).is_some());
        assert!(model.decoder.output.weight.val().grad(&grads).is_some());
    }

    #[test]
    fn frozen_encoder_receives_no_gradients() {
        let device = Default::default();
        let autoencoder = AutoEncoderConfig::new()
            .init::<TestAutodiffBackend>(&device)
            .freeze();
        let model = ClassifierConfig::new().init(autoencoder.encoder, &device);
        let targets = Tensor::<TestAutodiffBackend, 1, Int>::from_data([1, 2], &device);

        let item = model.forward_classification(images(2, &device), targets);
        let grads = item.loss.backward();

        assert!(model.encoder.input.weight.val().grad(&grads).is_none());
        assert!(model.encoder.output.weight.val().grad(&grads).is_none());
        assert!(model.head.weight.val().grad(&grads).is_some());
    }

    #[test]
    fn optimizer_step_only_updates_the_head() {
        let device = Default::default();
        let autoencoder = AutoEncoderConfig::new()
            .init::<TestAutodiffBackend>(&device)
            .freeze();
        let model = ClassifierConfig::new().init(autoencoder.encoder, &device);
        let encoder_before = model.encoder.input.weight.val().into_data();
        let head_before = model.head.weight.val().into_data();

        let targets = Tensor::<TestAutodiffBackend, 1, Int>::from_data([4, 5], &device);
        let item = model.forward_classification(images(2, &device), targets);
        let grads = GradientsParams::from_grads(item.loss.backward(), &model);
        let mut optim = AdamConfig::new().init();
        let model = optim.step(1e-3, model, grads);

        let encoder_after = model.encoder.input.weight.val().into_data();
        let head_after = model.head.weight.val().into_data();

        encoder_before.assert_eq(&encoder_after, true);
        assert_ne!(
            head_before.to_vec::<f32>().unwrap(),
            head_after.to_vec::<f32>().unwrap()
        );
    }
}
