//! HUD overlay renderer.
//!
//! Turns (frame, detections, stats) into the annotated frame the feed
//! serves. Two layers:
//!
//! - Deterministic: background grid, scanning line, clock, threat
//!   counter, and per-detection targeting graphics (box, corner
//!   brackets, label, confidence readout).
//! - Stylistic: neon palette cycling, glitch rectangles and the flashing
//!   threat banner. Cosmetic only; the randomness source is injectable
//!   (`with_seed`) and the whole layer can be switched off
//!   (`with_effects(false)`) so tests get identical output for identical
//!   input. Effects never feed back into detections or stats.
//!
//! The renderer also owns the idle placeholder and error frames served
//! while no session is active.

mod glyphs;

use std::time::Duration;

use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::DetectionResult;
use crate::frame::Frame;

pub use glyphs::{draw_text, text_width, GLYPH_HEIGHT, GLYPH_WIDTH};

/// Background grid pitch in pixels.
const GRID_SPACING: u32 = 50;
/// Scan line advance per rendered frame.
const SCAN_STEP: u32 = 5;
/// Corner bracket arm length.
const BRACKET_LEN: f32 = 20.0;
/// How long after a detection the warning banner keeps flashing.
const WARNING_WINDOW: Duration = Duration::from_secs(3);
/// Chance of a glitch rectangle per box.
const GLITCH_ODDS: f64 = 0.2;

/// Neon palette: cyan, magenta, green, yellow, orange.
const NEON_PALETTE: [Rgb<u8>; 5] = [
    Rgb([0, 255, 255]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 0]),
    Rgb([255, 255, 0]),
    Rgb([255, 140, 0]),
];

const GRID_COLOR: Rgb<u8> = Rgb([20, 20, 20]);
const HUD_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const WARNING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const READY_BACKGROUND: Rgb<u8> = Rgb([20, 20, 20]);
const READY_GRID_COLOR: Rgb<u8> = Rgb([40, 40, 40]);

pub struct OverlayRenderer {
    scan_line_pos: u32,
    rng: StdRng,
    effects: bool,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self {
            scan_line_pos: 0,
            rng: StdRng::from_entropy(),
            effects: true,
        }
    }

    /// Deterministic randomness for tests and reproducible captures.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            scan_line_pos: 0,
            rng: StdRng::seed_from_u64(seed),
            effects: true,
        }
    }

    /// Switch the stylistic layer off entirely. Box colors then cycle the
    /// palette by detection index instead of rolling dice.
    pub fn with_effects(mut self, effects: bool) -> Self {
        self.effects = effects;
        self
    }

    /// Current scan line row (advances once per `render` call).
    pub fn scan_line_position(&self) -> u32 {
        self.scan_line_pos
    }

    /// Annotate one frame. Consumes the input frame and returns it with
    /// the overlay applied; the only renderer state touched is the scan
    /// line position.
    pub fn render(
        &mut self,
        mut frame: Frame,
        result: &DetectionResult,
        threat_count: u64,
        last_detection_age: Option<Duration>,
        now: DateTime<Local>,
    ) -> Frame {
        let image = frame.image_mut();
        let (width, height) = (image.width(), image.height());

        draw_grid(image, GRID_COLOR);

        self.scan_line_pos = (self.scan_line_pos + SCAN_STEP) % height;
        let scan_y = self.scan_line_pos as f32;
        draw_line_segment_mut(image, (0.0, scan_y), (width as f32 - 1.0, scan_y), HUD_COLOR);

        let clock = now.format("TIME: %H:%M:%S").to_string();
        draw_text(image, &clock, 10, 12, HUD_COLOR);

        let counter = format!("THREATS IDENTIFIED: {}", threat_count);
        let counter_x = width as i32 - text_width(&counter) as i32 - 10;
        draw_text(image, &counter, counter_x, 12, HUD_COLOR);

        for (index, detection) in result.iter().enumerate() {
            let color = if self.effects {
                NEON_PALETTE[self.rng.gen_range(0..NEON_PALETTE.len())]
            } else {
                NEON_PALETTE[index % NEON_PALETTE.len()]
            };
            self.draw_target(image, detection, color);
        }

        if let Some(age) = last_detection_age {
            if age < WARNING_WINDOW && self.effects && self.rng.gen_bool(0.5) {
                draw_warning(image);
            }
        }

        frame
    }

    fn draw_target(
        &mut self,
        image: &mut RgbImage,
        detection: &crate::detect::Detection,
        color: Rgb<u8>,
    ) {
        let (x, y) = (detection.x, detection.y);
        let (xmax, ymax) = (detection.xmax(), detection.ymax());

        if detection.w >= 1.0 && detection.h >= 1.0 {
            let rect =
                Rect::at(x as i32, y as i32).of_size(detection.w as u32, detection.h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        // Corner brackets, clockwise from top-left.
        let arm = BRACKET_LEN.min(detection.w / 2.0).min(detection.h / 2.0);
        for (cx, cy, dx, dy) in [
            (x, y, 1.0, 1.0),
            (xmax, y, -1.0, 1.0),
            (x, ymax, 1.0, -1.0),
            (xmax, ymax, -1.0, -1.0),
        ] {
            draw_line_segment_mut(image, (cx, cy), (cx + dx * arm, cy), color);
            draw_line_segment_mut(image, (cx, cy), (cx, cy + dy * arm), color);
        }

        let label_y = (y as i32 - GLYPH_HEIGHT as i32 - 4).max(0);
        draw_text(image, "THREAT", x as i32, label_y, color);

        let confidence = format!("CFD: {:.2}", detection.confidence);
        let confidence_y = (ymax as i32 + 4).min(image.height() as i32 - GLYPH_HEIGHT as i32);
        draw_text(image, &confidence, x as i32, confidence_y, color);

        if self.effects && self.rng.gen_bool(GLITCH_ODDS) {
            let gx = x as i32 + self.rng.gen_range(-20..=20);
            let gy = y as i32 + self.rng.gen_range(-20..=20);
            let gw = self.rng.gen_range(5..=20);
            let gh = self.rng.gen_range(5..=10);
            let gx = gx.clamp(0, image.width() as i32 - gw);
            let gy = gy.clamp(0, image.height() as i32 - gh);
            draw_filled_rect_mut(
                image,
                Rect::at(gx, gy).of_size(gw as u32, gh as u32),
                color,
            );
        }
    }

    /// Static "system ready" frame served while no session is active.
    pub fn ready_frame(&self) -> Frame {
        let mut frame = Frame::filled(READY_BACKGROUND);
        let image = frame.image_mut();
        draw_grid(image, READY_GRID_COLOR);

        let text = "NEXUS-77 READY";
        let x = (image.width() as i32 - text_width(text) as i32) / 2;
        let y = image.height() as i32 / 2 - GLYPH_HEIGHT as i32 / 2;
        draw_text(image, text, x, y, HUD_COLOR);
        frame
    }

    /// Explicit error frame for unreadable inputs. Served instead of
    /// propagating a decode failure to the transport.
    pub fn error_frame(&self, message: &str) -> Frame {
        let mut frame = Frame::filled(Rgb([0, 0, 0]));
        let image = frame.image_mut();

        let text = format!("ERROR: {}", message);
        let x = ((image.width() as i32 - text_width(&text) as i32) / 2).max(0);
        let y = image.height() as i32 / 2 - GLYPH_HEIGHT as i32 / 2;
        draw_text(image, &text, x, y, WARNING_COLOR);
        frame
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn draw_grid(image: &mut RgbImage, color: Rgb<u8>) {
    let (width, height) = (image.width(), image.height());
    for x in (0..width).step_by(GRID_SPACING as usize) {
        draw_line_segment_mut(
            image,
            (x as f32, 0.0),
            (x as f32, height as f32 - 1.0),
            color,
        );
    }
    for y in (0..height).step_by(GRID_SPACING as usize) {
        draw_line_segment_mut(
            image,
            (0.0, y as f32),
            (width as f32 - 1.0, y as f32),
            color,
        );
    }
}

fn draw_warning(image: &mut RgbImage) {
    let text = "! THREAT DETECTED !";
    let x = (image.width() as i32 - text_width(text) as i32) / 2;
    let y = image.height() as i32 - 50;
    draw_text(image, text, x, y, WARNING_COLOR);

    // Translucent red wash over the whole frame.
    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0;
        pixel.0 = [
            (r as f32 * 0.8 + 40.0 * 0.2) as u8,
            (g as f32 * 0.8) as u8,
            (b as f32 * 0.8) as u8,
        ];
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
