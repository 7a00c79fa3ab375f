use std::path::PathBuf;

use burn::config::Config;
use clap::Parser;
use mnist_pretraining::training::ExperimentConfig;

#[derive(Parser, Debug)]
#[command(about = "Pretrain an MNIST autoencoder and reuse its encoder for classification")]
struct Args {
    /// JSON experiment config, defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory receiving checkpoints, metrics, models and the test report.
    #[arg(long)]
    artifact_dir: Option<String>,
}

#[cfg(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
    feature = "ndarray-blas-accelerate",
))]
mod ndarray {
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };
    use mnist_pretraining::training::{self, ExperimentConfig, ExperimentReport};

    pub fn run(config: ExperimentConfig) -> mnist_pretraining::Result<ExperimentReport> {
        let device = NdArrayDevice::Cpu;
        training::run::<Autodiff<NdArray>>(config, device)
    }
}

#[cfg(any(feature = "tch-gpu", feature = "tch-cpu"))]
mod tch {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use mnist_pretraining::training::{self, ExperimentConfig, ExperimentReport};

    pub fn run(config: ExperimentConfig) -> mnist_pretraining::Result<ExperimentReport> {
        #[cfg(all(feature = "tch-gpu", not(target_os = "macos")))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(all(feature = "tch-gpu", target_os = "macos"))]
        let device = LibTorchDevice::Mps;
        #[cfg(not(feature = "tch-gpu"))]
        let device = LibTorchDevice::Cpu;

        training::run::<Autodiff<LibTorch>>(config, device)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };
    use mnist_pretraining::training::{self, ExperimentConfig, ExperimentReport};

    pub fn run(config: ExperimentConfig) -> mnist_pretraining::Result<ExperimentReport> {
        let device = WgpuDevice::default();
        training::run::<Autodiff<Wgpu>>(config, device)
    }
}

#[cfg(not(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
    feature = "ndarray-blas-accelerate",
    feature = "wgpu",
    feature = "tch-gpu",
    feature = "tch-cpu",
)))]
compile_error!("At least one backend feature must be enabled: ndarray, wgpu, tch-cpu or tch-gpu.");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::new(),
    };
    if let Some(artifact_dir) = args.artifact_dir {
        config = config.with_artifact_dir(artifact_dir);
    }
    log::info!("Artifacts are written to {}", config.artifact_dir);

    #[cfg(feature = "wgpu")]
    let report = wgpu::run(config)?;
    #[cfg(all(
        any(feature = "tch-gpu", feature = "tch-cpu"),
        not(feature = "wgpu")
    ))]
    let report = tch::run(config)?;
    #[cfg(all(
        any(
            feature = "ndarray",
            feature = "ndarray-blas-netlib",
            feature = "ndarray-blas-openblas",
            feature = "ndarray-blas-accelerate",
        ),
        not(any(feature = "wgpu", feature = "tch-gpu", feature = "tch-cpu"))
    ))]
    let report = ndarray::run(config)?;

    log::info!(
        "Test loss: autoencoder {:.5}, classifier {:.5} (accuracy {:.2}%)",
        report.autoencoder.loss,
        report.classifier.loss,
        report.classifier.accuracy.unwrap_or_default() * 100.0
    );

    Ok(())
}
