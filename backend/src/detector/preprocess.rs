use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::io::Cursor;
use tch::{Device, Kind, Tensor};

use super::catch_torch_panic;
use crate::error::DetectorError;

/// Side length the network was trained on.
pub const IMG_SIZE: i64 = 224;
pub const NUM_CHANNELS: i64 = 3;

/// ImageNet statistics used at training time.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

fn decode_error(e: impl std::fmt::Display) -> DetectorError {
    DetectorError::Decode(format!("Could not decode image: {e}"))
}

/// Decodes an encoded image into 8-bit RGB, upright according to its EXIF
/// orientation. Grayscale, alpha and high bit depth inputs are converted;
/// alpha is dropped.
pub fn decode_rgb(image_bytes: &[u8]) -> Result<RgbImage, DetectorError> {
    if image_bytes.is_empty() {
        return Err(DetectorError::EmptyInput);
    }

    let mut decoder = ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(decode_error)?
        .into_decoder()
        .map_err(decode_error)?;
    let orientation = decoder.orientation().map_err(decode_error)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
    image.apply_orientation(orientation);

    if image.width() == 0 || image.height() == 0 {
        return Err(DetectorError::Decode("Decoded image has no pixel data".to_string()));
    }
    Ok(image.to_rgb8())
}

/// Direct resize to `IMG_SIZE` x `IMG_SIZE`, scaling to `[0, 1]` and
/// per-channel normalization. Returns a `[1, 3, 224, 224]` float tensor.
pub fn to_input_tensor(image: &RgbImage, device: Device) -> Tensor {
    let size = IMG_SIZE as u32;
    let resized = imageops::resize(image, size, size, FilterType::Triangle);

    let mean = Tensor::from_slice(&IMAGENET_MEAN[..]).view([NUM_CHANNELS, 1, 1]);
    let std = Tensor::from_slice(&IMAGENET_STD[..]).view([NUM_CHANNELS, 1, 1]);

    let chw = Tensor::from_slice(resized.as_raw().as_slice())
        .view([IMG_SIZE, IMG_SIZE, NUM_CHANNELS])
        .permute([2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0;

    ((chw - mean) / std).unsqueeze(0).to_device(device)
}

pub fn preprocess(image_bytes: &[u8], device: Device) -> Result<Tensor, DetectorError> {
    let image = decode_rgb(image_bytes)?;
    catch_torch_panic(|| to_input_tensor(&image, device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, LumaA, Rgb, Rgba, RgbaImage};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn channel_value(tensor: &Tensor, channel: i64) -> f64 {
        tensor.double_value(&[0, channel, IMG_SIZE / 2, IMG_SIZE / 2])
    }

    #[test]
    fn solid_red_is_normalized_per_channel() {
        let red = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let bytes = encode(DynamicImage::ImageRgb8(red), ImageFormat::Png);
        let tensor = preprocess(&bytes, Device::Cpu).unwrap();

        assert_eq!(tensor.size(), vec![1, 3, 224, 224]);
        assert_eq!(tensor.kind(), Kind::Float);
        let expected = [
            (1.0 - 0.485) / 0.229,
            (0.0 - 0.456) / 0.224,
            (0.0 - 0.406) / 0.225,
        ];
        for (channel, value) in expected.iter().enumerate() {
            let plane = tensor.select(1, channel as i64);
            assert!((plane.max().double_value(&[]) - value).abs() < 1e-5);
            assert!((plane.min().double_value(&[]) - value).abs() < 1e-5);
        }
    }

    #[test]
    fn values_stay_in_normalized_range() {
        let gradient = RgbImage::from_fn(37, 91, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x + y) % 256) as u8])
        });
        let bytes = encode(DynamicImage::ImageRgb8(gradient), ImageFormat::Png);
        let tensor = preprocess(&bytes, Device::Cpu).unwrap();

        assert_eq!(tensor.size(), vec![1, 3, 224, 224]);
        let finite = tensor.isfinite().all().to_kind(Kind::Int64).int64_value(&[]);
        assert_eq!(finite, 1);
        let lower = (0.0 - 0.485) / 0.229 - 1e-5;
        let upper = (1.0 - 0.406) / 0.225 + 1e-5;
        assert!(tensor.min().double_value(&[]) >= lower);
        assert!(tensor.max().double_value(&[]) <= upper);
    }

    #[test]
    fn channel_order_is_rgb() {
        let blue = RgbImage::from_pixel(5, 3, Rgb([0, 0, 255]));
        let bytes = encode(DynamicImage::ImageRgb8(blue), ImageFormat::Png);
        let tensor = preprocess(&bytes, Device::Cpu).unwrap();

        assert!(channel_value(&tensor, 0) < 0.0);
        assert!(channel_value(&tensor, 2) > 2.0);
    }

    #[test]
    fn grayscale_with_alpha_becomes_three_channels() {
        let gray = image::ImageBuffer::from_pixel(4, 4, LumaA([128u8, 10]));
        let bytes = encode(DynamicImage::ImageLumaA8(gray), ImageFormat::Png);
        let tensor = preprocess(&bytes, Device::Cpu).unwrap();

        assert_eq!(tensor.size(), vec![1, 3, 224, 224]);
        for channel in 0..3 {
            let mean = IMAGENET_MEAN[channel as usize] as f64;
            let std = IMAGENET_STD[channel as usize] as f64;
            let expected = (128.0 / 255.0 - mean) / std;
            assert!((channel_value(&tensor, channel) - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn alpha_is_dropped_not_composited() {
        let transparent_green = RgbaImage::from_pixel(3, 3, Rgba([0, 255, 0, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(transparent_green), ImageFormat::Png);
        let tensor = preprocess(&bytes, Device::Cpu).unwrap();

        let expected = (1.0 - 0.456) / 0.224;
        assert!((channel_value(&tensor, 1) - expected).abs() < 1e-5);
    }

    #[test]
    fn jpeg_input_is_accepted() {
        let image = RgbImage::from_pixel(300, 120, Rgb([90, 160, 30]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg);
        let tensor = preprocess(&bytes, Device::Cpu).unwrap();
        assert_eq!(tensor.size(), vec![1, 3, 224, 224]);
    }

    /// APP1 segment carrying a little-endian TIFF header and a single IFD
    /// entry: Orientation (0x0112), SHORT, count 1.
    fn exif_orientation_segment(orientation: u16) -> Vec<u8> {
        let mut payload = b"Exif\0\0II*\0".to_vec();
        payload.extend_from_slice(&8u32.to_le_bytes());
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&0x0112u16.to_le_bytes());
        payload.extend_from_slice(&3u16.to_le_bytes());
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&orientation.to_le_bytes());
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&0u32.to_le_bytes());

        let mut segment = vec![0xFF, 0xE1];
        segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        segment.extend_from_slice(&payload);
        segment
    }

    /// Inserts the EXIF segment after SOI and the JFIF header, if any.
    fn with_exif(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let mut split = 2;
        if jpeg[2..4] == [0xFF, 0xE0] {
            split += 2 + u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        }
        let mut bytes = jpeg[..split].to_vec();
        bytes.extend_from_slice(&exif_orientation_segment(orientation));
        bytes.extend_from_slice(&jpeg[split..]);
        bytes
    }

    /// Left half red, right half blue.
    fn split_jpeg() -> Vec<u8> {
        let image = RgbImage::from_fn(32, 16, |x, _| {
            if x < 16 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        });
        encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
    }

    #[test]
    fn exif_rotation_is_applied_before_resizing() {
        let upright = decode_rgb(&split_jpeg()).unwrap();
        assert_eq!(upright.dimensions(), (32, 16));

        // Orientation 6: stored image must be turned 90 degrees clockwise,
        // so the left (red) half ends up on top.
        let rotated = decode_rgb(&with_exif(&split_jpeg(), 6)).unwrap();
        assert_eq!(rotated.dimensions(), (16, 32));
        let top = rotated.get_pixel(8, 4);
        let bottom = rotated.get_pixel(8, 28);
        assert!(top[0] > 200 && top[2] < 60, "top pixel {top:?}");
        assert!(bottom[2] > 200 && bottom[0] < 60, "bottom pixel {bottom:?}");
    }

    #[test]
    fn exif_orientation_one_leaves_image_untouched() {
        let image = decode_rgb(&with_exif(&split_jpeg(), 1)).unwrap();
        assert_eq!(image.dimensions(), (32, 16));
        assert!(image.get_pixel(4, 8)[0] > 200);
    }

    #[test]
    fn empty_input_fails_before_decoding() {
        assert!(matches!(decode_rgb(&[]), Err(DetectorError::EmptyInput)));
        assert!(matches!(preprocess(&[], Device::Cpu), Err(DetectorError::EmptyInput)));
    }

    #[test]
    fn non_image_bytes_fail_to_decode() {
        let err = preprocess(b"definitely not an image", Device::Cpu).unwrap_err();
        assert!(matches!(err, DetectorError::Decode(_)));

        let png = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))),
            ImageFormat::Png,
        );
        assert!(matches!(
            preprocess(&png[..20], Device::Cpu),
            Err(DetectorError::Decode(_))
        ));
    }
}
