use serde::Serialize;

use super::{MediaError, MediaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const VERTICAL: AspectRatio = AspectRatio {
        width: 9,
        height: 16,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Region of the source frame kept in the output, in ffmpeg `crop` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropWindow {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl CropWindow {
    /// Largest centered window with the target aspect ratio.
    ///
    /// A source wider than the target keeps its full height and loses the
    /// sides; anything else keeps its full width and loses top and bottom.
    /// Width and height are rounded down to even numbers because yuv420p
    /// encoders reject odd dimensions.
    pub fn centered(width: u32, height: u32, aspect: AspectRatio) -> MediaResult<Self> {
        if width == 0 || height == 0 || aspect.width == 0 || aspect.height == 0 {
            return Err(MediaError::InvalidDimensions { width, height });
        }
        let (w, h) = (u64::from(width), u64::from(height));
        let (aw, ah) = (u64::from(aspect.width), u64::from(aspect.height));

        let (crop_w, crop_h) = if w * ah > h * aw {
            (even_floor(h * aw / ah), even_floor(h))
        } else {
            (even_floor(w), even_floor(w * ah / aw))
        };
        if crop_w < 2 || crop_h < 2 {
            return Err(MediaError::InvalidDimensions { width, height });
        }
        let crop_w = crop_w.min(w);
        let crop_h = crop_h.min(h);
        Ok(Self {
            width: crop_w as u32,
            height: crop_h as u32,
            x: ((w - crop_w) / 2) as u32,
            y: ((h - crop_h) / 2) as u32,
        })
    }

    pub fn filter(&self) -> String {
        format!("crop={}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

fn even_floor(value: u64) -> u64 {
    value & !1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_source_keeps_full_height() {
        let crop = CropWindow::centered(1920, 1080, AspectRatio::VERTICAL).unwrap();
        assert_eq!(
            crop,
            CropWindow {
                width: 606,
                height: 1080,
                x: 657,
                y: 0
            }
        );
        assert_eq!(crop.filter(), "crop=606:1080:657:0");
    }

    #[test]
    fn tall_source_keeps_full_width() {
        let crop = CropWindow::centered(720, 1600, AspectRatio::VERTICAL).unwrap();
        assert_eq!(crop.width, 720);
        assert_eq!(crop.height, 1280);
        assert_eq!(crop.x, 0);
        assert_eq!(crop.y, 160);
    }

    #[test]
    fn already_vertical_source_is_untouched() {
        let crop = CropWindow::centered(1080, 1920, AspectRatio::VERTICAL).unwrap();
        assert_eq!(
            crop,
            CropWindow {
                width: 1080,
                height: 1920,
                x: 0,
                y: 0
            }
        );
    }

    #[test]
    fn odd_dimensions_round_down_to_even() {
        let crop = CropWindow::centered(853, 480, AspectRatio::VERTICAL).unwrap();
        assert_eq!(crop.width % 2, 0);
        assert_eq!(crop.height % 2, 0);
        assert!(crop.x + crop.width <= 853);
        assert_eq!(crop.width, 270);
    }

    #[test]
    fn square_target_on_landscape() {
        let crop = CropWindow::centered(1280, 720, AspectRatio::new(1, 1)).unwrap();
        assert_eq!((crop.width, crop.height, crop.x, crop.y), (720, 720, 280, 0));
    }

    #[test]
    fn degenerate_frames_are_rejected() {
        assert!(CropWindow::centered(0, 1080, AspectRatio::VERTICAL).is_err());
        assert!(CropWindow::centered(1920, 1, AspectRatio::VERTICAL).is_err());
        assert!(CropWindow::centered(1920, 1080, AspectRatio::new(0, 16)).is_err());
    }
}
