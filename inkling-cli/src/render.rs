//! Raster composition of layout elements onto an e-paper pixel buffer.
//!
//! Drawing happens in RGB through embedded-graphics primitives; every
//! plotted pixel is quantized on the fly to the nearest ink the target
//! panel's color scheme can actually show. Packing produces the 1-bit
//! plane layout the uploaders transfer: a black plane, followed by a
//! color plane on three-color panels.

use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10, FONT_9X15};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
use image::RgbImage;
use inkling_ble::ColorScheme;

use crate::config::{Color, DisplaySection, Element};

/// One of the inks an e-paper panel can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ink {
    White,
    Black,
    Red,
    Yellow,
}

impl Ink {
    fn rgb(self) -> (u8, u8, u8) {
        match self {
            Ink::White => (255, 255, 255),
            Ink::Black => (0, 0, 0),
            Ink::Red => (255, 0, 0),
            Ink::Yellow => (255, 255, 0),
        }
    }
}

/// Inks available on a panel, white first.
fn palette(scheme: ColorScheme) -> &'static [Ink] {
    match scheme {
        ColorScheme::BlackWhite => &[Ink::White, Ink::Black],
        ColorScheme::BlackWhiteRed => &[Ink::White, Ink::Black, Ink::Red],
        ColorScheme::BlackWhiteYellow => &[Ink::White, Ink::Black, Ink::Yellow],
    }
}

fn to_rgb(color: Color) -> Rgb888 {
    match color {
        Color::White => Rgb888::new(255, 255, 255),
        Color::Black => Rgb888::new(0, 0, 0),
        Color::Red => Rgb888::new(255, 0, 0),
        Color::Yellow => Rgb888::new(255, 255, 0),
    }
}

/// Pixel buffer sized for one panel.
pub struct Canvas {
    width: u32,
    height: u32,
    scheme: ColorScheme,
    pixels: Vec<Ink>,
}

impl Canvas {
    pub fn new(width: u32, height: u32, scheme: ColorScheme, background: Color) -> Self {
        let mut canvas = Self {
            width,
            height,
            scheme,
            pixels: vec![Ink::White; (width * height) as usize],
        };
        let ink = canvas.quantize(to_rgb(background));
        canvas.pixels.fill(ink);
        canvas
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn ink_at(&self, x: u32, y: u32) -> Ink {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Nearest available ink by squared RGB distance.
    fn quantize(&self, color: Rgb888) -> Ink {
        let (r, g, b) = (color.r() as i32, color.g() as i32, color.b() as i32);
        let mut best = Ink::White;
        let mut best_distance = i32::MAX;
        for &ink in palette(self.scheme) {
            let (ir, ig, ib) = ink.rgb();
            let distance = (r - ir as i32).pow(2)
                + (g - ig as i32).pow(2)
                + (b - ib as i32).pow(2);
            if distance < best_distance {
                best_distance = distance;
                best = ink;
            }
        }
        best
    }

    /// Rotate the whole buffer clockwise by 0, 90, 180 or 270 degrees.
    pub fn rotated(self, degrees: u16) -> Self {
        if degrees == 0 {
            return self;
        }
        let (width, height) = match degrees {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        };
        let mut pixels = vec![Ink::White; self.pixels.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let (dx, dy) = match degrees {
                    90 => (self.height - 1 - y, x),
                    180 => (self.width - 1 - x, self.height - 1 - y),
                    _ => (y, self.width - 1 - x),
                };
                pixels[(dy * width + dx) as usize] = self.ink_at(x, y);
            }
        }
        Self {
            width,
            height,
            scheme: self.scheme,
            pixels,
        }
    }

    /// Pack into the 1-bit plane payload: black plane, then a color plane
    /// for three-color schemes. Rows are MSB-first and byte-padded.
    pub fn to_payload(&self) -> Vec<u8> {
        let bytes_per_row = (self.width as usize + 7) / 8;
        let plane_len = bytes_per_row * self.height as usize;
        let two_planes = self.scheme != ColorScheme::BlackWhite;

        let mut payload = vec![0u8; if two_planes { plane_len * 2 } else { plane_len }];
        for y in 0..self.height {
            for x in 0..self.width {
                let byte = y as usize * bytes_per_row + x as usize / 8;
                let bit = 0x80 >> (x % 8);
                match self.ink_at(x, y) {
                    Ink::Black => payload[byte] |= bit,
                    Ink::Red | Ink::Yellow if two_planes => {
                        payload[plane_len + byte] |= bit;
                    }
                    _ => {}
                }
            }
        }
        payload
    }

    /// RGB export for the offline `generate` command.
    pub fn to_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let (r, g, b) = self.ink_at(x, y).rgb();
            image::Rgb([r, g, b])
        })
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Rgb888>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && point.y >= 0
                && (point.x as u32) < self.width
                && (point.y as u32) < self.height
            {
                let ink = self.quantize(color);
                self.pixels[point.y as usize * self.width as usize + point.x as usize] = ink;
            }
        }
        Ok(())
    }
}

fn font_for_size(font_size: u32) -> &'static MonoFont<'static> {
    match font_size {
        0..=12 => &FONT_6X10,
        13..=18 => &FONT_9X15,
        _ => &FONT_10X20,
    }
}

/// Compose the configured content onto a canvas of the given panel size.
pub fn render(
    display: &DisplaySection,
    content: &[Element],
    width: u32,
    height: u32,
    scheme: ColorScheme,
) -> Canvas {
    let mut canvas = Canvas::new(width, height, scheme, display.background);

    for element in content {
        // Canvas drawing is infallible; clipping happens in draw_iter.
        match element {
            Element::Text {
                text,
                x,
                y,
                font_size,
                color,
            } => {
                let style = MonoTextStyle::new(font_for_size(*font_size), to_rgb(*color));
                Text::with_baseline(text, Point::new(*x, *y), style, Baseline::Top)
                    .draw(&mut canvas)
                    .unwrap();
            }
            Element::Rectangle {
                x,
                y,
                width,
                height,
                color,
                filled,
            } => {
                let style = if *filled {
                    PrimitiveStyle::with_fill(to_rgb(*color))
                } else {
                    PrimitiveStyle::with_stroke(to_rgb(*color), 1)
                };
                Rectangle::new(Point::new(*x, *y), Size::new(*width, *height))
                    .into_styled(style)
                    .draw(&mut canvas)
                    .unwrap();
            }
            Element::Line {
                x1,
                y1,
                x2,
                y2,
                color,
                width,
            } => {
                Line::new(Point::new(*x1, *y1), Point::new(*x2, *y2))
                    .into_styled(PrimitiveStyle::with_stroke(to_rgb(*color), *width))
                    .draw(&mut canvas)
                    .unwrap();
            }
        }
    }

    canvas.rotated(display.rotate)
}
