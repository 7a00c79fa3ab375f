use std::{fs, path::Path};

use burn::prelude::*;
use image::{GrayImage, Luma};

use crate::{
    data::IMAGE_SIZE,
    error::{Error, Result},
    model::AutoEncoder,
};

const SIDE: u32 = 28;

/// Saves the first `num_images` inputs on the top row and their reconstructions below.
pub fn save_reconstructions<B: Backend>(
    model: &AutoEncoder<B>,
    images: Tensor<B, 2>,
    num_images: usize,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    let [batch_size, _] = images.dims();
    let num_images = num_images.min(batch_size);

    if num_images == 0 {
        return Err(Error::EmptyDataset("reconstruction"));
    }

    // Ensure the output directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let images = images.slice([0..num_images, 0..IMAGE_SIZE]);
    let reconstructions = model.forward(images.clone());

    let mut canvas = GrayImage::new(SIDE * num_images as u32, SIDE * 2);

    for (row, tensor) in [images, reconstructions].into_iter().enumerate() {
        for index in 0..num_images {
            let digit = tensor.clone().slice([index..index + 1, 0..IMAGE_SIZE]);
            let pixels = to_pixels(digit)?;

            for (position, pixel) in pixels.into_iter().enumerate() {
                let x = index as u32 * SIDE + position as u32 % SIDE;
                let y = row as u32 * SIDE + position as u32 / SIDE;
                canvas.put_pixel(x, y, Luma([pixel]));
            }
        }
    }

    canvas.save(path)?;
    log::info!("Saved {num_images} reconstructions to {}", path.display());

    Ok(())
}

/// Normalize values of a single digit from 0 to 255
fn to_pixels<B: Backend>(digit: Tensor<B, 2>) -> Result<Vec<u8>> {
    let values = digit
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| Error::Data(format!("{err:?}")))?;

    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = if max - min == 0.0 { 1.0 } else { max - min };

    Ok(values
        .into_iter()
        .map(|value| ((value - min) / range * 255.0).round() as u8)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AutoEncoderConfig;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray;

    #[test]
    fn writes_two_rows_of_digits() {
        let device = Default::default();
        let model = AutoEncoderConfig::new().init::<TestBackend>(&device);
        let images =
            Tensor::<TestBackend, 2>::random([5, IMAGE_SIZE], Distribution::Default, &device);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reconstructions.png");

        save_reconstructions(&model, images, 3, &path).unwrap();

        let saved = image::open(&path).unwrap();
        assert_eq!(saved.width(), 3 * SIDE);
        assert_eq!(saved.height(), 2 * SIDE);
    }

    #[test]
    fn constant_digit_maps_to_black() {
        let device = Default::default();
        let digit = Tensor::<TestBackend, 2>::full([1, IMAGE_SIZE], 0.7, &device);

        let pixels = to_pixels(digit).unwrap();

        assert_eq!(pixels.len(), IMAGE_SIZE);
        assert!(pixels.iter().all(|pixel| *pixel == 0));
    }
}
