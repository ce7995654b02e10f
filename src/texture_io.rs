use std::path::Path;

use crate::color::Color;
use crate::pdata::PData;

#[derive(Debug, thiserror::Error)]
pub enum TextureIoError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
    #[error("attribute store has no colour channel {0:?}")]
    MissingChannel(String),
    #[error("colour channel holds {found} entries, expected {expected}")]
    ChannelSize { expected: usize, found: usize },
}

/// Texture load/save collaborator.
///
/// The render-target primitive drives this through its colour channel; the
/// file formats themselves are this collaborator's business. Implementations
/// are injected explicitly; there is no ambient global painter.
pub trait TexturePainter {
    /// Loads an image into the `"c"` channel of `pdata`, resizing the
    /// channel to fit, and returns the image dimensions.
    fn load_into(&self, path: &Path, pdata: &mut PData) -> Result<(u32, u32), TextureIoError>;

    /// Saves the `"c"` channel of `pdata`, interpreted as `width` × `height`
    /// pixels, to a file.
    fn save_from(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        pdata: &PData,
    ) -> Result<(), TextureIoError>;
}

/// [`TexturePainter`] backed by the `image` crate (format chosen from the
/// file extension, RGBA8 throughout).
#[derive(Debug, Default, Clone, Copy)]
pub struct ImagePainter;

impl TexturePainter for ImagePainter {
    fn load_into(&self, path: &Path, pdata: &mut PData) -> Result<(u32, u32), TextureIoError> {
        let loaded = image::open(path)?.to_rgba8();
        let (width, height) = loaded.dimensions();

        let colours = pdata
            .colours_mut("c")
            .ok_or_else(|| TextureIoError::MissingChannel("c".into()))?;
        colours.clear();
        colours.reserve((width * height) as usize);
        for pixel in loaded.pixels() {
            colours.push(Color::from_rgba8(pixel.0));
        }
        Ok((width, height))
    }

    fn save_from(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        pdata: &PData,
    ) -> Result<(), TextureIoError> {
        let colours = pdata
            .colours("c")
            .ok_or_else(|| TextureIoError::MissingChannel("c".into()))?;
        let expected = (width * height) as usize;
        if colours.len() < expected {
            return Err(TextureIoError::ChannelSize {
                expected,
                found: colours.len(),
            });
        }

        let mut out = image::RgbaImage::new(width, height);
        for (colour, pixel) in colours.iter().zip(out.pixels_mut()) {
            pixel.0 = colour.to_rgba8();
        }
        out.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdata::Channel;

    #[test]
    fn save_reports_missing_colour_channel() {
        let pdata = PData::new();
        let err = ImagePainter
            .save_from(Path::new("/tmp/nope.png"), 2, 2, &pdata)
            .unwrap_err();
        assert!(matches!(err, TextureIoError::MissingChannel(_)));
    }

    #[test]
    fn save_reports_undersized_channel() {
        let mut pdata = PData::new();
        pdata.add("c", Channel::Colour(vec![Color::WHITE; 2]));
        let err = ImagePainter
            .save_from(Path::new("/tmp/nope.png"), 2, 2, &pdata)
            .unwrap_err();
        assert!(matches!(
            err,
            TextureIoError::ChannelSize {
                expected: 4,
                found: 2
            }
        ));
    }

    #[test]
    fn save_then_load_round_trips_pixels() {
        let dir = std::env::temp_dir().join("scena_texture_io_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.png");

        let mut pdata = PData::new();
        let pixels = vec![
            Color::rgb(1.0, 0.0, 0.0),
            Color::rgb(0.0, 1.0, 0.0),
            Color::rgb(0.0, 0.0, 1.0),
            Color::WHITE,
        ];
        pdata.add("c", Channel::Colour(pixels.clone()));

        ImagePainter.save_from(&path, 2, 2, &pdata).unwrap();

        let mut loaded = PData::new();
        loaded.add("c", Channel::Colour(Vec::new()));
        let (width, height) = ImagePainter.load_into(&path, &mut loaded).unwrap();

        assert_eq!((width, height), (2, 2));
        assert_eq!(loaded.colours("c").unwrap(), pixels.as_slice());
        std::fs::remove_file(&path).ok();
    }
}
