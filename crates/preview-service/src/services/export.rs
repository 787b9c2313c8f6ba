//! Writing conversion results to disk.

use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use image::{DynamicImage, ImageFormat};
use image_processor::{ConversionOutput, PrinterImage};

/// Where to write each artefact; `None` skips it.
#[derive(Debug, Default, Clone)]
pub struct ExportTargets<'a> {
    /// Bitmap preview as PNG (black dots on white).
    pub png: Option<&'a Path>,
    /// Raw packed bits, row-major, MSB first.
    pub bits: Option<&'a Path>,
    /// Binary PBM (P4).
    pub pbm: Option<&'a Path>,
    /// The raster handed to the half-toner, as PNG.
    pub preview: Option<&'a Path>,
}

/// Encode the bitmap as a grayscale PNG.
pub fn bitmap_to_png_bytes(image: &PrinterImage) -> anyhow::Result<Vec<u8>> {
    encode_png(&DynamicImage::ImageLuma8(image.to_luma()))
}

fn encode_png(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(cursor.into_inner())
}

fn write(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = data.len(), "Wrote output");
    Ok(())
}

/// Write every requested artefact of `output`.
pub fn export(output: &ConversionOutput, targets: &ExportTargets<'_>) -> anyhow::Result<()> {
    if let Some(path) = targets.png {
        write(path, &bitmap_to_png_bytes(&output.image)?)?;
    }
    if let Some(path) = targets.bits {
        write(path, output.image.bits())?;
    }
    if let Some(path) = targets.pbm {
        write(path, &output.image.to_pbm())?;
    }
    if let Some(path) = targets.preview {
        let preview = DynamicImage::ImageRgba8(output.adjusted_preview.clone());
        write(path, &encode_png(&preview)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn output() -> ConversionOutput {
        ConversionOutput {
            image: PrinterImage::from_bits(16, 2, vec![0xFF, 0x00, 0x0F, 0xF0]).unwrap(),
            adjusted_preview: RgbaImage::new(16, 2),
            filtered_preview: None,
        }
    }

    #[test]
    fn test_png_decodes_to_bitmap() {
        let png = bitmap_to_png_bytes(&output().image).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (16, 2));
        assert_eq!(decoded.get_pixel(0, 0).0[0], 0);
        assert_eq!(decoded.get_pixel(8, 0).0[0], 255);
        assert_eq!(decoded.get_pixel(4, 1).0[0], 0);
    }

    #[test]
    fn test_export_writes_requested_files() {
        let dir = std::env::temp_dir().join(format!("thermal-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bits = dir.join("out.bin");
        let pbm = dir.join("out.pbm");

        export(
            &output(),
            &ExportTargets {
                bits: Some(&bits),
                pbm: Some(&pbm),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(std::fs::read(&bits).unwrap(), vec![0xFF, 0x00, 0x0F, 0xF0]);
        let pbm_data = std::fs::read(&pbm).unwrap();
        assert!(pbm_data.starts_with(b"P4\n16 2\n"));
        assert!(!dir.join("out.png").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
