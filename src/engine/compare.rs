// Per-pixel comparison of two RGBA8 images.

use super::error::ImageError;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImageDiff {
    pub width:  u32,
    pub height: u32,
    /// Mean squared error per channel, values normalised to [0, 1].
    pub mse: [f64; 4],
    /// Largest absolute channel difference, 0..=255.
    pub max_deviation: u8,
    /// Pixels where any channel differs.
    pub differing_pixels: usize,
}

impl ImageDiff {
    pub fn identical(&self) -> bool {
        self.differing_pixels == 0
    }

    /// Mean squared error over the colour channels.
    pub fn rgb_mse(&self) -> f64 {
        (self.mse[0] + self.mse[1] + self.mse[2]) / 3.0
    }

    /// Peak signal-to-noise ratio over RGB in dB; infinite when identical.
    pub fn psnr(&self) -> f64 {
        let mse = self.rgb_mse();
        if mse == 0.0 { f64::INFINITY } else { -10.0 * mse.log10() }
    }

    pub fn differing_fraction(&self) -> f64 {
        let pixels = self.width as f64 * self.height as f64;
        if pixels == 0.0 { 0.0 } else { self.differing_pixels as f64 / pixels }
    }
}

pub fn compare_rgba8(reference: &[u8], test: &[u8], width: u32, height: u32) -> Result<ImageDiff, ImageError> {
    let expected = width as usize * height as usize * 4;
    for image in [reference, test] {
        if image.len() != expected {
            return Err(ImageError::SizeMismatch {
                a: (width, height),
                b: (width, (image.len() / 4 / (width.max(1) as usize)) as u32),
            });
        }
    }

    let mut sum_sq = [0u64; 4];
    let mut max_deviation = 0u8;
    let mut differing_pixels = 0;

    for (r, t) in reference.chunks_exact(4).zip(test.chunks_exact(4)) {
        let mut differs = false;
        for c in 0..4 {
            let d = r[c].abs_diff(t[c]);
            if d > 0 {
                differs = true;
                max_deviation = max_deviation.max(d);
                sum_sq[c] += d as u64 * d as u64;
            }
        }
        if differs {
            differing_pixels += 1;
        }
    }

    let pixels = (width as f64 * height as f64).max(1.0);
    let diff = ImageDiff {
        width,
        height,
        mse: sum_sq.map(|s| s as f64 / (255.0 * 255.0) / pixels),
        max_deviation,
        differing_pixels,
    };

    log::info!(
        "Image diff {}x{}: mse rgba = [{:.3e}, {:.3e}, {:.3e}, {:.3e}], max deviation {}, {} pixels differ ({:.2}%)",
        width,
        height,
        diff.mse[0],
        diff.mse[1],
        diff.mse[2],
        diff.mse[3],
        diff.max_deviation,
        diff.differing_pixels,
        diff.differing_fraction() * 100.0,
    );
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn identical_images_have_no_error() {
        let img = [10u8, 20, 30, 255].repeat(6);
        let diff = compare_rgba8(&img, &img, 3, 2).unwrap();
        assert!(diff.identical());
        assert_eq!(diff.mse, [0.0; 4]);
        assert_eq!(diff.max_deviation, 0);
        assert!(diff.psnr().is_infinite());
    }

    #[test_log::test]
    fn counts_and_measures_differences() {
        let reference = [0u8, 0, 0, 255].repeat(4);
        let mut test = reference.clone();
        test[0] = 255; // pixel 0, red channel
        test[4 + 1] = 1; // pixel 1, green channel

        let diff = compare_rgba8(&reference, &test, 2, 2).unwrap();
        assert_eq!(diff.differing_pixels, 2);
        assert_eq!(diff.max_deviation, 255);
        assert!((diff.mse[0] - 0.25).abs() < 1e-12);
        assert!(diff.mse[1] > 0.0 && diff.mse[1] < 1e-5);
        assert_eq!(diff.mse[2], 0.0);
        assert!((diff.differing_fraction() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let a = vec![0u8; 16];
        let b = vec![0u8; 12];
        assert!(matches!(compare_rgba8(&a, &b, 2, 2), Err(ImageError::SizeMismatch { .. })));
    }
}
