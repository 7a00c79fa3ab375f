use std::sync::Arc;

use burn::{
    data::dataloader::DataLoader,
    prelude::*,
    train::{ClassificationOutput, RegressionOutput, ValidStep},
};
use serde::{Deserialize, Serialize};

use crate::{
    data::MnistBatch,
    error::{Error, Result},
    model::{AutoEncoder, Classifier},
};

/// Metrics aggregated over a whole test set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub num_items: usize,
    /// Mean loss per item, batch losses weighted by their size.
    pub loss: f64,
    pub accuracy: Option<f64>,
}

/// Output of a validation step that can be folded into a [TestReport].
pub trait TestItem {
    fn batch_size(&self) -> usize;

    fn loss(&self) -> f64;

    /// Number of correct predictions, when the task has a notion of correctness.
    fn num_correct(&self) -> Option<usize> {
        None
    }
}

impl<B: Backend> TestItem for RegressionOutput<B> {
    fn batch_size(&self) -> usize {
        self.output.dims()[0]
    }

    fn loss(&self) -> f64 {
        self.loss.clone().into_scalar().elem::<f64>()
    }
}

impl<B: Backend> TestItem for ClassificationOutput<B> {
    fn batch_size(&self) -> usize {
        self.targets.dims()[0]
    }

    fn loss(&self) -> f64 {
        self.loss.clone().into_scalar().elem::<f64>()
    }

    fn num_correct(&self) -> Option<usize> {
        let predictions = self.output.clone().argmax(1).flatten::<1>(0, 1);
        let correct = predictions
            .equal(self.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        Some(correct as usize)
    }
}

#[derive(Default)]
struct Accumulator {
    num_items: usize,
    loss_sum: f64,
    num_correct: Option<usize>,
}

impl Accumulator {
    fn update<T: TestItem>(&mut self, item: &T) {
        let batch_size = item.batch_size();

        self.num_items += batch_size;
        self.loss_sum += item.loss() * batch_size as f64;

        if let Some(correct) = item.num_correct() {
            self.num_correct = Some(self.num_correct.unwrap_or(0) + correct);
        }
    }

    fn report(self) -> Result<TestReport> {
        if self.num_items == 0 {
            return Err(Error::EmptyDataset("test"));
        }

        let num_items = self.num_items as f64;

        Ok(TestReport {
            num_items: self.num_items,
            loss: self.loss_sum / num_items,
            accuracy: self.num_correct.map(|correct| correct as f64 / num_items),
        })
    }
}

/// Runs the validation step of `model` over every batch of `loader`.
pub fn evaluate<B, M, O>(
    model: &M,
    loader: Arc<dyn DataLoader<B, MnistBatch<B>>>,
) -> Result<TestReport>
where
    B: Backend,
    M: ValidStep<MnistBatch<B>, O>,
    O: TestItem,
{
    let mut accumulator = Accumulator::default();

    for (iteration, batch) in loader.iter().enumerate() {
        let item = model.step(batch);
        log::debug!("Test iteration {iteration}: loss {:.5}", item.loss());
        accumulator.update(&item);
    }

    accumulator.report()
}

/// Reconstruction loss of the autoencoder on a test set.
pub fn evaluate_autoencoder<B: Backend>(
    model: &AutoEncoder<B>,
    loader: Arc<dyn DataLoader<B, MnistBatch<B>>>,
) -> Result<TestReport> {
    let report = evaluate::<B, _, RegressionOutput<B>>(model, loader)?;
    log::info!(
        "Autoencoder test loss {:.5} over {} items",
        report.loss,
        report.num_items
    );

    Ok(report)
}

/// Cross-entropy loss and accuracy of the classifier on a test set.
pub fn evaluate_classifier<B: Backend>(
    model: &Classifier<B>,
    loader: Arc<dyn DataLoader<B, MnistBatch<B>>>,
) -> Result<TestReport> {
    let report = evaluate::<B, _, ClassificationOutput<B>>(model, loader)?;
    log::info!(
        "Classifier test loss {:.5}, accuracy {:.2}% over {} items",
        report.loss,
        report.accuracy.unwrap_or_default() * 100.0,
        report.num_items
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{tests::item, MnistBatcher},
        model::{AutoEncoderConfig, ClassifierConfig, EncoderConfig},
    };
    use burn::{
        backend::NdArray,
        data::{
            dataloader::{batcher::Batcher, DataLoaderBuilder},
            dataset::InMemDataset,
        },
    };

    type TestBackend = NdArray;

    fn loader(
        num_items: usize,
        batch_size: usize,
    ) -> Arc<dyn DataLoader<TestBackend, MnistBatch<TestBackend>>> {
        let items = (0..num_items)
            .map(|i| item((i * 20) as f32, (i % 10) as u8))
            .collect();

        DataLoaderBuilder::<TestBackend, _, _>::new(MnistBatcher::default())
            .batch_size(batch_size)
            .build(InMemDataset::new(items))
    }

    #[test]
    fn autoencoder_loss_is_weighted_by_batch_size() {
        let device = Default::default();
        let model = AutoEncoderConfig::new().init::<TestBackend>(&device);

        let report = evaluate_autoencoder(&model, loader(3, 2)).unwrap();

        let items = (0..3).map(|i| item((i * 20) as f32, i as u8)).collect();
        let batch: MnistBatch<TestBackend> = MnistBatcher::default().batch(items, &device);
        let expected = model
            .forward_reconstruction(batch.images)
            .loss
            .into_scalar()
            .elem::<f64>();

        assert_eq!(report.num_items, 3);
        assert_eq!(report.accuracy, None);
        assert!((report.loss - expected).abs() < 1e-5);
    }

    #[test]
    fn classifier_report_has_accuracy() {
        let device = Default::default();
        let encoder = EncoderConfig::new().init::<TestBackend>(&device);
        let model = ClassifierConfig::new().init(encoder, &device);

        let report = evaluate_classifier(&model, loader(5, 2)).unwrap();

        assert_eq!(report.num_items, 5);
        assert!(report.loss > 0.0);
        let accuracy = report.accuracy.unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn counts_correct_predictions() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::from_data(
            [[0.1, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_data([1, 2, 2], &device);
        let loss = Tensor::<TestBackend, 1>::from_data([0.5], &device);

        let item = ClassificationOutput::new(loss, output, targets);

        assert_eq!(item.batch_size(), 3);
        assert_eq!(item.num_correct(), Some(2));
        assert!((item.loss() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_test_set_is_an_error() {
        let device = Default::default();
        let model = AutoEncoderConfig::new().init::<TestBackend>(&device);

        let result = evaluate_autoencoder(&model, loader(0, 2));

        assert!(matches!(result, Err(Error::EmptyDataset(_))));
    }
}
