use std::sync::Arc;

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{
            transform::{PartialDataset, ShuffledDataset},
            vision::{MnistDataset, MnistItem},
            Dataset,
        },
    },
    prelude::*,
};

use crate::error::{Error, Result};

/// Number of pixels in a flattened MNIST image.
pub const IMAGE_SIZE: usize = 28 * 28;

/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Flattened images with pixels in `[0, 1]`, shape `[batch_size, 784]`.
    pub images: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 2>::from_data(data, device))
            .map(|tensor| tensor.reshape([1, IMAGE_SIZE]))
            // Same scaling as a plain "to tensor" transform, no mean/std normalization.
            .map(|tensor| tensor / 255)
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    [(item.label as i64).elem::<B::IntElem>()],
                    device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        MnistBatch { images, targets }
    }
}

/// Shuffles `dataset` with a fixed seed and cuts it in two.
///
/// The first part holds `floor(len * train_ratio)` items, the second part holds the rest.
/// The same seed always produces the same partition.
pub fn split_train_valid<D, I>(
    dataset: D,
    train_ratio: f64,
    seed: u64,
) -> Result<(Arc<dyn Dataset<I>>, Arc<dyn Dataset<I>>)>
where
    D: Dataset<I> + 'static,
    I: Clone + Send + Sync + 'static,
{
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        return Err(Error::InvalidSplit(train_ratio));
    }

    let shuffled = Arc::new(ShuffledDataset::with_seed(dataset, seed));
    let len = shuffled.len();
    let train_len = (len as f64 * train_ratio) as usize;

    let train: Arc<dyn Dataset<I>> = Arc::new(PartialDataset::new(shuffled.clone(), 0, train_len));
    let valid: Arc<dyn Dataset<I>> = Arc::new(PartialDataset::new(shuffled, train_len, len));

    Ok((train, valid))
}

/// The three MNIST subsets used by the experiment.
#[derive(Clone)]
pub struct MnistSplits {
    pub train: Arc<dyn Dataset<MnistItem>>,
    pub valid: Arc<dyn Dataset<MnistItem>>,
    pub test: Arc<dyn Dataset<MnistItem>>,
}

impl MnistSplits {
    /// Loads MNIST, downloading it on first use, and carves a validation set out of the
    /// training images.
    pub fn load(train_ratio: f64, seed: u64) -> Result<Self> {
        let (train, valid) = split_train_valid(MnistDataset::train(), train_ratio, seed)?;
        let test: Arc<dyn Dataset<MnistItem>> = Arc::new(MnistDataset::test());

        Ok(Self::new(train, valid, test))
    }

    pub fn new(
        train: Arc<dyn Dataset<MnistItem>>,
        valid: Arc<dyn Dataset<MnistItem>>,
        test: Arc<dyn Dataset<MnistItem>>,
    ) -> Self {
        log::info!(
            "Train size {}, validation size {}, test size {}",
            train.len(),
            valid.len(),
            test.len()
        );

        Self { train, valid, test }
    }
}
