use crate::{ScreenRegistry, screen_info::ScreenRect};
use image::{Rgba, RgbaImage, imageops};

/// Assembles per-output images into one canvas the size of the virtual
/// desktop.
///
/// Sub-images are buffered until every output currently known to the
/// [`ScreenRegistry`] has delivered one, then a single composed frame is
/// emitted with each sub-image drawn at its rectangle's top-left corner over a
/// black background. With a single output the composition step is skipped and
/// the raw image is passed through unchanged.
///
/// A batch is reset on every emission; frames arriving after an output was
/// unplugged are dropped, so the composer recovers within one composition
/// cycle after a hot-plug event.
#[derive(Default)]
pub struct ScreenComposer {
    pending: Vec<(String, ScreenRect, RgbaImage)>,
}

impl ScreenComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one per-output image; returns the composed canvas once the batch
    /// is complete.
    pub fn push(
        &mut self,
        registry: &ScreenRegistry,
        uuid: &str,
        image: RgbaImage,
    ) -> Option<RgbaImage> {
        let Some(rect) = registry.rect_of(uuid) else {
            log::warn!("dropping frame from unknown output `{uuid}`");
            return None;
        };

        if registry.len() == 1 {
            self.pending.clear();
            return Some(image);
        }

        // A newer frame for the same output replaces the buffered one.
        self.pending.retain(|(id, _, _)| id != uuid);
        self.pending.push((uuid.to_owned(), rect, image));

        // Entries from unplugged outputs would stall the batch forever.
        self.pending.retain(|(id, _, _)| registry.contains(id));

        if self.pending.len() < registry.len() {
            return None;
        }

        let size = registry.virtual_desktop_size();
        let mut canvas = RgbaImage::from_pixel(
            size.width.max(1) as u32,
            size.height.max(1) as u32,
            Rgba([0, 0, 0, 255]),
        );

        for (_, rect, sub) in self.pending.drain(..) {
            imageops::replace(
                &mut canvas,
                &sub,
                i64::from(rect.position.x),
                i64::from(rect.position.y),
            );
        }

        Some(canvas)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_single_screen_fast_path() {
        let mut registry = ScreenRegistry::new();
        registry.insert("eDP-1", ScreenRect::new(0, 0, 4, 4));

        let mut composer = ScreenComposer::new();
        let out = composer.push(&registry, "eDP-1", solid(4, 4, 7));

        let out = out.expect("single screen emits immediately");
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0), &Rgba([7, 7, 7, 255]));
        assert_eq!(composer.pending_count(), 0);
    }

    #[test]
    fn test_waits_for_all_screens() {
        let mut registry = ScreenRegistry::new();
        registry.insert("eDP-1", ScreenRect::new(0, 0, 2, 2));
        registry.insert("HDMI-A-1", ScreenRect::new(2, 0, 2, 2));

        let mut composer = ScreenComposer::new();
        assert!(composer.push(&registry, "eDP-1", solid(2, 2, 10)).is_none());

        let canvas = composer
            .push(&registry, "HDMI-A-1", solid(2, 2, 20))
            .expect("second screen completes the batch");

        assert_eq!(canvas.dimensions(), (4, 2));
        assert_eq!(canvas.get_pixel(0, 0), &Rgba([10, 10, 10, 255]));
        assert_eq!(canvas.get_pixel(2, 0), &Rgba([20, 20, 20, 255]));
    }

    #[test]
    fn test_offset_screen_leaves_black_background() {
        let mut registry = ScreenRegistry::new();
        registry.insert("a", ScreenRect::new(0, 0, 2, 2));
        registry.insert("b", ScreenRect::new(2, 2, 2, 2));

        let mut composer = ScreenComposer::new();
        composer.push(&registry, "a", solid(2, 2, 10));
        let canvas = composer.push(&registry, "b", solid(2, 2, 20)).unwrap();

        assert_eq!(canvas.dimensions(), (4, 4));
        // The corner covered by neither screen stays black.
        assert_eq!(canvas.get_pixel(3, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(3, 3), &Rgba([20, 20, 20, 255]));
    }

    #[test]
    fn test_duplicate_output_replaces_buffered_frame() {
        let mut registry = ScreenRegistry::new();
        registry.insert("a", ScreenRect::new(0, 0, 2, 2));
        registry.insert("b", ScreenRect::new(2, 0, 2, 2));

        let mut composer = ScreenComposer::new();
        assert!(composer.push(&registry, "a", solid(2, 2, 1)).is_none());
        assert!(composer.push(&registry, "a", solid(2, 2, 9)).is_none());
        assert_eq!(composer.pending_count(), 1);

        let canvas = composer.push(&registry, "b", solid(2, 2, 2)).unwrap();
        assert_eq!(canvas.get_pixel(0, 0), &Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn test_recovers_after_hot_unplug() {
        let mut registry = ScreenRegistry::new();
        registry.insert("a", ScreenRect::new(0, 0, 2, 2));
        registry.insert("b", ScreenRect::new(2, 0, 2, 2));

        let mut composer = ScreenComposer::new();
        assert!(composer.push(&registry, "b", solid(2, 2, 5)).is_none());

        // Output `b` goes away mid-batch; the next frame from `a` completes a
        // single-screen batch on the shrunken desktop.
        registry.remove("b");
        let canvas = composer.push(&registry, "a", solid(2, 2, 6)).unwrap();
        assert_eq!(canvas.dimensions(), (2, 2));
    }

    #[test]
    fn test_unknown_output_is_dropped() {
        let mut registry = ScreenRegistry::new();
        registry.insert("a", ScreenRect::new(0, 0, 2, 2));

        let mut composer = ScreenComposer::new();
        assert!(composer.push(&registry, "ghost", solid(2, 2, 1)).is_none());
        assert_eq!(composer.pending_count(), 0);
    }
}
