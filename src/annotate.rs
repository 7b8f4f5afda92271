// src/annotate.rs
//! Detection overlay rendering.
//!
//! Rendering is split in two: [`plan`] turns an [`OverlayState`] into an
//! ordered list of [`DrawCommand`]s, and [`Surface`] rasterizes that list on
//! top of the base image. Every render starts from the base image again, so
//! toggling annotations never leaves stale boxes behind.

use crate::errors::HailError;
use crate::models::ImageDetectionSet;
use crate::sizing::PixelHailSize;
use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{Blend, draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::debug;
use serde::Serialize;

pub const EXPORT_FILENAME: &str = "annotated-inspection.png";

pub const ACCENT: Rgba<u8> = Rgba([168, 85, 247, 255]);
pub const BOX_FILL: Rgba<u8> = Rgba([168, 85, 247, 38]);
pub const LABEL_BACKGROUND: Rgba<u8> = Rgba([168, 85, 247, 242]);
pub const LABEL_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const STROKE_WIDTH: f64 = 4.0;
pub const LABEL_HEIGHT: f64 = 26.0;
pub const LABEL_PADDING: f64 = 12.0;
pub const LABEL_FONT_PX: f32 = 16.0;
/// Text baseline sits this far above the box's top edge.
const LABEL_BASELINE_OFFSET: f64 = 6.0;
/// Advance per character, in em, when no font is loaded.
const MONOSPACE_ADVANCE_EM: f64 = 0.6;

static BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono.ttf");

/// Font used for label glyphs. Without one, labels keep their background
/// and the glyphs are skipped.
#[derive(Clone)]
pub struct LabelFont {
    font: Option<FontArc>,
}

impl LabelFont {
    #[cfg(test)]
    pub fn none() -> Self {
        Self { font: None }
    }

    /// DejaVu Sans Mono, compiled into the binary.
    pub fn bundled() -> Result<Self, HailError> {
        let font = FontArc::try_from_slice(BUNDLED_FONT)
            .map_err(|e| HailError::Config(format!("Invalid bundled label font: {}", e)))?;
        Ok(Self { font: Some(font) })
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, HailError> {
        let font = FontArc::try_from_vec(data)
            .map_err(|e| HailError::Config(format!("Invalid label font: {}", e)))?;
        Ok(Self { font: Some(font) })
    }

    pub fn is_loaded(&self) -> bool {
        self.font.is_some()
    }

    pub fn text_width(&self, text: &str, px: f32) -> f64 {
        match &self.font {
            Some(font) => text_size(PxScale::from(px), font, text).0 as f64,
            None => text.chars().count() as f64 * px as f64 * MONOSPACE_ADVANCE_EM,
        }
    }

    fn ascent(&self, px: f32) -> f64 {
        match &self.font {
            Some(font) => font.as_scaled(PxScale::from(px)).ascent() as f64,
            None => px as f64,
        }
    }
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelFont")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// Resets the surface to a transparent `width` x `height` raster.
    Resize { width: u32, height: u32 },
    DrawBase,
    StrokeRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        line_width: f64,
        color: Rgba<u8>,
    },
    FillRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        color: Rgba<u8>,
    },
    /// `y` is the text baseline.
    Text {
        x: f64,
        y: f64,
        text: String,
        px: f32,
        color: Rgba<u8>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayState<'a> {
    pub image_width: u32,
    pub image_height: u32,
    pub detections: &'a ImageDetectionSet,
    pub show_annotations: bool,
}

pub fn label_text(size: PixelHailSize, confidence: f64) -> String {
    format!("{} ({}%)", size.label(), (confidence * 100.0).round() as i64)
}

/// Draw commands for one frame of the overlay, in paint order.
pub fn plan(state: &OverlayState<'_>, font: &LabelFont) -> Vec<DrawCommand> {
    let mut commands = vec![
        DrawCommand::Resize {
            width: state.image_width,
            height: state.image_height,
        },
        DrawCommand::DrawBase,
    ];

    if !state.show_annotations {
        return commands;
    }

    for detection in &state.detections.predictions {
        let [x1, y1, _, _] = detection.bbox;
        let (width, height) = (detection.width(), detection.height());
        let size = PixelHailSize::classify(width, height);
        let text = label_text(size, detection.confidence);
        let text_width = font.text_width(&text, LABEL_FONT_PX);

        commands.push(DrawCommand::StrokeRect {
            x: x1,
            y: y1,
            width,
            height,
            line_width: STROKE_WIDTH,
            color: ACCENT,
        });
        commands.push(DrawCommand::FillRect {
            x: x1,
            y: y1,
            width,
            height,
            color: BOX_FILL,
        });
        // may land above the top edge; the surface clips
        commands.push(DrawCommand::FillRect {
            x: x1,
            y: y1 - LABEL_HEIGHT,
            width: text_width + LABEL_PADDING,
            height: LABEL_HEIGHT,
            color: LABEL_BACKGROUND,
        });
        commands.push(DrawCommand::Text {
            x: x1 + LABEL_PADDING / 2.0,
            y: y1 - LABEL_BASELINE_OFFSET,
            text,
            px: LABEL_FONT_PX,
            color: LABEL_TEXT,
        });
    }

    commands
}

/// Raster target for draw commands.
#[derive(Debug, Default)]
pub struct Surface {
    pixels: Option<RgbaImage>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn pixels(&self) -> Option<&RgbaImage> {
        self.pixels.as_ref()
    }

    pub fn render(
        &mut self,
        base: &RgbaImage,
        commands: &[DrawCommand],
        font: &LabelFont,
    ) -> Result<(), HailError> {
        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(HailError::ImageNotLoaded(
                "base image has no pixels".to_string(),
            ));
        }

        let mut canvas = Blend(RgbaImage::new(width, height));
        for command in commands {
            match command {
                DrawCommand::Resize { width, height } => {
                    canvas = Blend(RgbaImage::new(*width, *height));
                }
                DrawCommand::DrawBase => {
                    image::imageops::replace(&mut canvas.0, base, 0, 0);
                }
                DrawCommand::StrokeRect {
                    x,
                    y,
                    width,
                    height,
                    line_width,
                    color,
                } => stroke_rect(&mut canvas, *x, *y, *width, *height, *line_width, *color),
                DrawCommand::FillRect {
                    x,
                    y,
                    width,
                    height,
                    color,
                } => fill_span(&mut canvas, *x, *y, x + width, y + height, *color),
                DrawCommand::Text {
                    x,
                    y,
                    text,
                    px,
                    color,
                } => match &font.font {
                    Some(face) => {
                        let (canvas_width, canvas_height) = canvas.0.dimensions();
                        let reach = font.text_width(text, *px) + *px as f64;
                        let left = clamp_origin(*x, reach, canvas_width);
                        let top = clamp_origin(y - font.ascent(*px), reach, canvas_height);
                        draw_text_mut(
                            &mut canvas,
                            *color,
                            left,
                            top,
                            PxScale::from(*px),
                            face,
                            text,
                        );
                    }
                    None => debug!("No label font loaded, skipping glyphs for {:?}", text),
                },
            }
        }

        self.pixels = Some(canvas.0);
        Ok(())
    }

    pub fn export_png(&self) -> Result<Vec<u8>, HailError> {
        let pixels = self.pixels.as_ref().ok_or(HailError::NotRendered)?;

        let mut output = Vec::new();
        pixels
            .write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
            .map_err(|e| HailError::ImageProcessing(format!("Failed to encode PNG: {}", e)))?;

        Ok(output)
    }

    pub fn export_data_url(&self) -> Result<String, HailError> {
        let png = self.export_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(png)
        ))
    }
}

/// Rounds a text origin to the grid, pinned to a range where glyphs extending
/// `reach` pixels past it are either fully visible or fully off the canvas.
fn clamp_origin(v: f64, reach: f64, limit: u32) -> i32 {
    v.round().clamp(-reach.ceil() - 1.0, limit as f64) as i32
}

/// Fills the pixel span covering `[x0, x1) x [y0, y1)`, rounded to the grid
/// and clipped to the canvas.
fn fill_span(canvas: &mut Blend<RgbaImage>, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgba<u8>) {
    if [x0, y0, x1, y1].iter().any(|v| v.is_nan()) {
        return;
    }
    let (width, height) = canvas.0.dimensions();
    let (left, top) = (x0.round().max(0.0), y0.round().max(0.0));
    let (right, bottom) = (
        x1.round().min(width as f64),
        y1.round().min(height as f64),
    );
    if right <= left || bottom <= top {
        return;
    }
    let rect = Rect::at(left as i32, top as i32)
        .of_size((right - left) as u32, (bottom - top) as u32);
    if color.0[3] == u8::MAX {
        // opaque paint replaces pixels exactly
        draw_filled_rect_mut(&mut canvas.0, rect, color);
    } else {
        draw_filled_rect_mut(canvas, rect, color);
    }
}

/// Outline centered on the rectangle edge, `line_width` thick.
fn stroke_rect(
    canvas: &mut Blend<RgbaImage>,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    line_width: f64,
    color: Rgba<u8>,
) {
    let half = line_width / 2.0;
    let (ox0, oy0, ox1, oy1) = (x - half, y - half, x + width + half, y + height + half);
    if width <= line_width || height <= line_width {
        fill_span(canvas, ox0, oy0, ox1, oy1, color);
        return;
    }
    let (ix0, iy0, ix1, iy1) = (x + half, y + half, x + width - half, y + height - half);
    fill_span(canvas, ox0, oy0, ox1, iy0, color);
    fill_span(canvas, ox0, iy1, ox1, oy1, color);
    fill_span(canvas, ox0, iy0, ix0, iy1, color);
    fill_span(canvas, ix1, iy0, ox1, iy1, color);
}

/// Renders detections over a decoded image and exports the result.
#[derive(Debug)]
pub struct CanvasAnnotator {
    font: LabelFont,
    surface: Surface,
}

impl CanvasAnnotator {
    pub fn new(font: LabelFont) -> Self {
        Self {
            font,
            surface: Surface::new(),
        }
    }

    pub fn render(
        &mut self,
        image: &DynamicImage,
        detections: &ImageDetectionSet,
        show_annotations: bool,
    ) -> Result<(), HailError> {
        let (image_width, image_height) = image.dimensions();
        let state = OverlayState {
            image_width,
            image_height,
            detections,
            show_annotations,
        };
        let commands = plan(&state, &self.font);
        debug!(
            "Rendering {}x{} overlay with {} commands",
            image_width,
            image_height,
            commands.len()
        );
        self.surface.render(&image.to_rgba8(), &commands, &self.font)
    }

    #[cfg(test)]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn export_png(&self) -> Result<Vec<u8>, HailError> {
        self.surface.export_png()
    }

    pub fn export_data_url(&self) -> Result<String, HailError> {
        self.surface.export_data_url()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionRow {
    /// 1-based position in the response.
    pub index: usize,
    pub size: &'static str,
    pub severity: u8,
    pub color: &'static str,
    pub confidence_percent: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    /// Count reported by the backend, shown as-is.
    pub reported_count: i64,
    /// Number of boxes actually drawn.
    pub rendered_count: usize,
    pub detections: Vec<DetectionRow>,
}

impl ImageSummary {
    pub fn from_set(set: &ImageDetectionSet) -> Self {
        let detections = set
            .predictions
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let size = PixelHailSize::classify(d.width(), d.height());
                DetectionRow {
                    index: i + 1,
                    size: size.label(),
                    severity: size.severity(),
                    color: size.color(),
                    confidence_percent: d.confidence_percent(),
                    width: d.width().round() as i64,
                    height: d.height().round() as i64,
                }
            })
            .collect();

        Self {
            reported_count: set.num_detections,
            rendered_count: set.predictions.len(),
            detections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Detection;

    const BASE: Rgba<u8> = Rgba([100, 110, 120, 255]);

    fn base_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, BASE))
    }

    fn detection(bbox: [f64; 4], confidence: f64) -> Detection {
        Detection {
            bbox,
            class_index: 0,
            confidence,
        }
    }

    fn set(predictions: Vec<Detection>) -> ImageDetectionSet {
        ImageDetectionSet {
            num_detections: predictions.len() as i64,
            predictions,
        }
    }

    #[test]
    fn label_matches_measured_box() {
        let d = detection([473.6, 604.1, 569.4, 694.7], 0.93);
        let size = PixelHailSize::classify(d.width(), d.height());
        assert_eq!(label_text(size, d.confidence), "Tennis ball sized (93%)");
    }

    #[test]
    fn hidden_annotations_plan_only_the_base() {
        let detections = set(vec![detection([1.0, 1.0, 5.0, 5.0], 0.5)]);
        let state = OverlayState {
            image_width: 32,
            image_height: 16,
            detections: &detections,
            show_annotations: false,
        };
        assert_eq!(
            plan(&state, &LabelFont::none()),
            vec![
                DrawCommand::Resize {
                    width: 32,
                    height: 16
                },
                DrawCommand::DrawBase
            ]
        );
    }

    #[test]
    fn plan_emits_box_fill_label_text_per_detection() {
        let detections = set(vec![detection([40.0, 50.0, 90.0, 80.0], 0.456)]);
        let state = OverlayState {
            image_width: 200,
            image_height: 200,
            detections: &detections,
            show_annotations: true,
        };
        let font = LabelFont::none();
        let commands = plan(&state, &font);
        assert_eq!(commands.len(), 6);

        assert_eq!(
            commands[2],
            DrawCommand::StrokeRect {
                x: 40.0,
                y: 50.0,
                width: 50.0,
                height: 30.0,
                line_width: STROKE_WIDTH,
                color: ACCENT,
            }
        );
        assert!(matches!(commands[3], DrawCommand::FillRect { color, .. } if color == BOX_FILL));

        let expected_text = "Marble sized (46%)";
        let text_width = font.text_width(expected_text, LABEL_FONT_PX);
        assert_eq!(
            commands[4],
            DrawCommand::FillRect {
                x: 40.0,
                y: 24.0,
                width: text_width + LABEL_PADDING,
                height: LABEL_HEIGHT,
                color: LABEL_BACKGROUND,
            }
        );
        match &commands[5] {
            DrawCommand::Text { x, y, text, .. } => {
                assert_eq!((*x, *y), (46.0, 44.0));
                assert_eq!(text, expected_text);
            }
            other => panic!("expected text command, got {:?}", other),
        }
    }

    #[test]
    fn label_above_top_edge_is_kept() {
        let detections = set(vec![detection([5.0, 3.0, 20.0, 20.0], 0.9)]);
        let state = OverlayState {
            image_width: 64,
            image_height: 64,
            detections: &detections,
            show_annotations: true,
        };
        let commands = plan(&state, &LabelFont::none());
        assert!(matches!(commands[4], DrawCommand::FillRect { y, .. } if y == -23.0));

        let mut surface = Surface::new();
        let base = RgbaImage::from_pixel(64, 64, BASE);
        surface.render(&base, &commands, &LabelFont::none()).unwrap();
        assert_eq!(surface.pixels().unwrap().dimensions(), (64, 64));
    }

    #[test]
    fn overlay_count_follows_sequence_not_reported_total() {
        let detections = ImageDetectionSet {
            num_detections: 14,
            predictions: (0..5)
                .map(|i| detection([i as f64 * 10.0, 30.0, i as f64 * 10.0 + 8.0, 38.0], 0.8))
                .collect(),
        };
        let state = OverlayState {
            image_width: 100,
            image_height: 100,
            detections: &detections,
            show_annotations: true,
        };
        let strokes = plan(&state, &LabelFont::none())
            .into_iter()
            .filter(|c| matches!(c, DrawCommand::StrokeRect { .. }))
            .count();
        assert_eq!(strokes, 5);

        let summary = ImageSummary::from_set(&detections);
        assert_eq!(summary.reported_count, 14);
        assert_eq!(summary.rendered_count, 5);
        assert_eq!(summary.detections[4].index, 5);
    }

    #[test]
    fn surface_matches_natural_image_size() {
        let mut annotator = CanvasAnnotator::new(LabelFont::none());
        annotator
            .render(&base_image(37, 21), &set(vec![]), true)
            .unwrap();
        let pixels = annotator.surface().pixels().unwrap();
        assert_eq!(pixels.dimensions(), (37, 21));
        assert!(pixels.pixels().all(|p| *p == BASE));
    }

    #[test]
    fn boxes_are_stroked_and_tinted() {
        let mut annotator = CanvasAnnotator::new(LabelFont::none());
        let detections = set(vec![detection([10.0, 40.0, 50.0, 80.0], 0.7)]);
        annotator
            .render(&base_image(100, 100), &detections, true)
            .unwrap();
        let pixels = annotator.surface().pixels().unwrap();

        // left edge of the outline
        assert_eq!(*pixels.get_pixel(9, 60), ACCENT);
        // interior is blended, neither base nor accent
        let inside = *pixels.get_pixel(30, 60);
        assert_ne!(inside, BASE);
        assert_ne!(inside, ACCENT);
        // far corner untouched
        assert_eq!(*pixels.get_pixel(95, 5), BASE);
    }

    #[test]
    fn render_is_idempotent_and_toggle_leaves_no_residue() {
        let image = base_image(120, 90);
        let detections = set(vec![
            detection([10.0, 30.0, 40.0, 60.0], 0.81),
            detection([60.0, 5.0, 110.0, 70.0], 0.33),
        ]);
        let mut annotator = CanvasAnnotator::new(LabelFont::none());

        annotator.render(&image, &detections, true).unwrap();
        let first = annotator.export_png().unwrap();
        annotator.render(&image, &detections, true).unwrap();
        assert_eq!(annotator.export_png().unwrap(), first);

        annotator.render(&image, &detections, false).unwrap();
        let plain = annotator.surface().pixels().unwrap().clone();
        assert!(plain.pixels().all(|p| *p == BASE));

        annotator.render(&image, &detections, true).unwrap();
        assert_eq!(annotator.export_png().unwrap(), first);
    }

    #[test]
    fn export_before_render_is_an_error() {
        let annotator = CanvasAnnotator::new(LabelFont::none());
        assert!(matches!(annotator.export_png(), Err(HailError::NotRendered)));
        assert!(matches!(
            annotator.export_data_url(),
            Err(HailError::NotRendered)
        ));
    }

    #[test]
    fn empty_base_image_is_reported() {
        let mut annotator = CanvasAnnotator::new(LabelFont::none());
        let err = annotator
            .render(&DynamicImage::new_rgba8(0, 0), &set(vec![]), true)
            .unwrap_err();
        assert!(matches!(err, HailError::ImageNotLoaded(_)));
    }

    #[test]
    fn exported_png_decodes_to_surface() {
        let mut annotator = CanvasAnnotator::new(LabelFont::none());
        let detections = set(vec![detection([2.0, 30.0, 20.0, 45.0], 0.5)]);
        annotator
            .render(&base_image(48, 48), &detections, true)
            .unwrap();

        let png = annotator.export_png().unwrap();
        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .unwrap()
            .to_rgba8();
        assert_eq!(&decoded, annotator.surface().pixels().unwrap());

        let url = annotator.export_data_url().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn zero_sized_box_still_gets_outline_and_label() {
        let mut annotator = CanvasAnnotator::new(LabelFont::none());
        let detections = set(vec![detection([30.0, 40.0, 30.0, 40.0], 0.2)]);
        annotator
            .render(&base_image(64, 64), &detections, true)
            .unwrap();
        let pixels = annotator.surface().pixels().unwrap();
        assert_eq!(*pixels.get_pixel(30, 40), ACCENT);
    }

    #[test]
    fn far_off_surface_box_is_clipped() {
        let body = br#"{ "num_detections": 1,
            "predictions": [ { "bbox": [-3e9, 10.0, 3e9, 20.0], "class": 0, "confidence": 0.5 } ] }"#;
        let detections = crate::models::parse_image_response(body).unwrap();
        for font in [LabelFont::none(), LabelFont::bundled().unwrap()] {
            let mut annotator = CanvasAnnotator::new(font);
            annotator
                .render(&base_image(64, 64), &detections, true)
                .unwrap();
            let pixels = annotator.surface().pixels().unwrap();
            assert_eq!(pixels.dimensions(), (64, 64));
            // top outline band runs across the whole canvas
            assert_eq!(*pixels.get_pixel(0, 10), ACCENT);
            assert_eq!(*pixels.get_pixel(63, 10), ACCENT);
            assert_eq!(*pixels.get_pixel(30, 40), BASE);
        }
    }

    #[test]
    fn box_entirely_outside_leaves_base_untouched() {
        let detections = set(vec![detection([500.0, 500.0, 900.0, 800.0], 0.9)]);
        let mut annotator = CanvasAnnotator::new(LabelFont::bundled().unwrap());
        annotator
            .render(&base_image(32, 32), &detections, true)
            .unwrap();
        let pixels = annotator.surface().pixels().unwrap();
        assert!(pixels.pixels().all(|p| *p == BASE));
    }

    #[test]
    fn bundled_font_measures_labels() {
        let font = LabelFont::bundled().unwrap();
        assert!(font.is_loaded());
        let short = font.text_width("Pea sized (5%)", LABEL_FONT_PX);
        let long = font.text_width("Tennis ball sized (93%)", LABEL_FONT_PX);
        assert!(short > 0.0);
        assert!(long > short);
    }

    #[test]
    fn bundled_font_draws_label_glyphs() {
        let font = LabelFont::bundled().unwrap();
        let detections = set(vec![detection([20.0, 60.0, 60.0, 100.0], 0.93)]);
        let text_width = font.text_width("Marble sized (93%)", LABEL_FONT_PX);
        let mut annotator = CanvasAnnotator::new(font);
        annotator
            .render(&base_image(300, 120), &detections, true)
            .unwrap();
        let pixels = annotator.surface().pixels().unwrap();

        let label_right = (20.0 + text_width + LABEL_PADDING).round() as u32;
        let label_top = (60.0 - LABEL_HEIGHT) as u32;
        let mut glyph_pixels = 0;
        for y in label_top..60 {
            for x in 20..label_right {
                let p = pixels.get_pixel(x, y);
                if p.0[0] > 230 && p.0[1] > 230 {
                    glyph_pixels += 1;
                }
            }
        }
        assert!(glyph_pixels > 50, "only {} glyph pixels", glyph_pixels);

        // glyphs stay inside the label background
        for y in 0..label_top {
            for x in 0..300 {
                assert_eq!(*pixels.get_pixel(x, y), BASE);
            }
        }
        for x in label_right + 1..300 {
            assert_eq!(*pixels.get_pixel(x, 45), BASE);
        }
    }
}
