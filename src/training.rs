use std::{fs, sync::Arc, time::Instant};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::{vision::MnistItem, Dataset},
    },
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, LossMetric},
        LearnerBuilder,
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    data::{MnistBatch, MnistBatcher, MnistSplits},
    evaluation::{evaluate_autoencoder, evaluate_classifier, TestReport},
    model::{AutoEncoder, AutoEncoderConfig, Classifier, ClassifierConfig, Encoder},
    renderer::LogRenderer,
    show::save_reconstructions,
};

#[derive(Config)]
pub struct PretrainingConfig {
    #[config(default = 2)]
    pub num_epochs: usize,
    #[config(default = 1024)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = "AutoEncoderConfig::new()")]
    pub model: AutoEncoderConfig,
    #[config(default = "AdamConfig::new()")]
    pub optimizer: AdamConfig,
}

#[derive(Config)]
pub struct FinetuningConfig {
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 1024)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = "ClassifierConfig::new()")]
    pub model: ClassifierConfig,
    #[config(default = "AdamConfig::new()")]
    pub optimizer: AdamConfig,
}

#[derive(Config)]
pub struct ExperimentConfig {
    #[config(default = "String::from(\"/tmp/mnist-pretraining\")")]
    pub artifact_dir: String,
    #[config(default = 69)]
    pub seed: u64,
    /// Fraction of the MNIST training images kept for training, the rest is validation.
    #[config(default = 0.8)]
    pub train_ratio: f64,
    /// Number of test digits written to the reconstruction preview, zero disables it.
    #[config(default = 8)]
    pub num_reconstructions: usize,
    #[config(default = "PretrainingConfig::new()")]
    pub pretraining: PretrainingConfig,
    #[config(default = "FinetuningConfig::new()")]
    pub finetuning: FinetuningConfig,
}

/// Test metrics of both stages of the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub autoencoder: TestReport,
    pub classifier: TestReport,
}

fn create_artifact_dir(artifact_dir: &str) -> crate::Result<()> {
    // Remove existing artifacts before to get an accurate learner summary
    fs::remove_dir_all(artifact_dir).ok();
    fs::create_dir_all(artifact_dir)?;

    Ok(())
}

fn dataloader<B: Backend>(
    dataset: Arc<dyn Dataset<MnistItem>>,
    batch_size: usize,
    num_workers: usize,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, MnistBatch<B>>> {
    DataLoaderBuilder::<B, _, _>::new(MnistBatcher::default())
        .batch_size(batch_size)
        .num_workers(num_workers)
        .set_device(device.clone())
        .build(dataset)
}

/// Fits the autoencoder on the reconstruction task and saves it under
/// `<artifact_dir>/autoencoder`.
pub fn pretrain<B: AutodiffBackend>(
    config: &PretrainingConfig,
    splits: &MnistSplits,
    artifact_dir: &str,
    device: &B::Device,
) -> crate::Result<AutoEncoder<B>> {
    let directory = format!("{artifact_dir}/autoencoder");
    fs::create_dir_all(&directory)?;

    let dataloader_train = dataloader::<B>(
        splits.train.clone(),
        config.batch_size,
        config.num_workers,
        device,
    );
    let dataloader_valid = dataloader::<B::InnerBackend>(
        splits.valid.clone(),
        config.batch_size,
        config.num_workers,
        device,
    );

    let learner = LearnerBuilder::new(&directory)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .with_application_logger(None)
        .renderer(LogRenderer::new("pretraining"))
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init::<B>(device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let now = Instant::now();
    let model = learner.fit(dataloader_train, dataloader_valid);
    log::info!("Pretraining completed in {}s", now.elapsed().as_secs());

    model
        .clone()
        .save_file(format!("{directory}/model"), &CompactRecorder::new())?;

    Ok(model)
}

/// Fits a classifier head on top of `encoder` and saves the result under
/// `<artifact_dir>/classifier`.
///
/// The encoder is used as given: freeze it first to keep its weights fixed.
pub fn finetune<B: AutodiffBackend>(
    config: &FinetuningConfig,
    encoder: Encoder<B>,
    splits: &MnistSplits,
    artifact_dir: &str,
    device: &B::Device,
) -> crate::Result<Classifier<B>> {
    let directory = format!("{artifact_dir}/classifier");
    fs::create_dir_all(&directory)?;

    let dataloader_train = dataloader::<B>(
        splits.train.clone(),
        config.batch_size,
        config.num_workers,
        device,
    );
    let dataloader_valid = dataloader::<B::InnerBackend>(
        splits.valid.clone(),
        config.batch_size,
        config.num_workers,
        device,
    );

    let learner = LearnerBuilder::new(&directory)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .with_application_logger(None)
        .renderer(LogRenderer::new("finetuning"))
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init(encoder, device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let now = Instant::now();
    let model = learner.fit(dataloader_train, dataloader_valid);
    log::info!("Finetuning completed in {}s", now.elapsed().as_secs());

    model
        .clone()
        .save_file(format!("{directory}/model"), &CompactRecorder::new())?;

    Ok(model)
}

/// Pretrains, freezes, finetunes and tests on the full MNIST dataset.
pub fn run<B: AutodiffBackend>(
    config: ExperimentConfig,
    device: B::Device,
) -> crate::Result<ExperimentReport> {
    let splits = MnistSplits::load(config.train_ratio, config.seed)?;

    run_with_splits::<B>(config, splits, device)
}

/// Same as [run] on already prepared datasets.
pub fn run_with_splits<B: AutodiffBackend>(
    config: ExperimentConfig,
    splits: MnistSplits,
    device: B::Device,
) -> crate::Result<ExperimentReport> {
    let artifact_dir = config.artifact_dir.as_str();
    create_artifact_dir(artifact_dir)?;
    config.save(format!("{artifact_dir}/config.json"))?;

    B::seed(config.seed);

    let autoencoder = pretrain::<B>(&config.pretraining, &splits, artifact_dir, &device)?;

    let dataloader_test = dataloader::<B::InnerBackend>(
        splits.test.clone(),
        config.finetuning.batch_size,
        config.finetuning.num_workers,
        &device,
    );
    let autoencoder_valid = autoencoder.valid();
    let autoencoder_report = evaluate_autoencoder(&autoencoder_valid, dataloader_test.clone())?;

    if config.num_reconstructions > 0 {
        if let Some(batch) = dataloader_test.iter().next() {
            save_reconstructions(
                &autoencoder_valid,
                batch.images,
                config.num_reconstructions,
                format!("{artifact_dir}/reconstructions.png"),
            )?;
        }
    }

    let autoencoder = autoencoder.freeze();
    let classifier = finetune::<B>(
        &config.finetuning,
        autoencoder.encoder,
        &splits,
        artifact_dir,
        &device,
    )?;
    let classifier_report = evaluate_classifier(&classifier.valid(), dataloader_test)?;

    let report = ExperimentReport {
        autoencoder: autoencoder_report,
        classifier: classifier_report,
    };
    fs::write(
        format!("{artifact_dir}/report.json"),
        serde_json::to_string_pretty(&report)?,
    )?;

    Ok(report)
}
