use super::{font, Canvas, Color};

/// Border around the color bars
pub const PAD: u32 = 10;

const BARS: [(&str, [u16; 3]); 6] = [
    ("red", [1, 0, 0]),
    ("yellow", [1, 1, 0]),
    ("green", [0, 1, 0]),
    ("cyan", [0, 1, 1]),
    ("blue", [0, 0, 1]),
    ("magenta", [1, 0, 1]),
];

/// Height of a single color bar for a screen `height` pixels high.
///
/// Starts at 100 and shrinks in steps of 10 until all six bars fit, but not below `4 * PAD`.
pub fn bar_height(height: u32) -> u32 {
    let mut bar = 100;
    while 6 * bar + 2 * PAD > height && bar > 4 * PAD {
        bar -= 10;
    }
    bar
}

fn color_bar(canvas: &mut Canvas, y: u32, width: u32, bar: u32, rgb: [u16; 3], name: &str) {
    for dx in 0..width {
        let level = if width > 1 { dx * 1023 / (width - 1) } else { 1023 } as u16;
        let color = Color {
            r: rgb[0] * level,
            g: rgb[1] * level,
            b: rgb[2] * level,
        };
        canvas.fill_rect(PAD + dx, y, 1, bar, color);
    }

    let scale = (bar.saturating_sub(2 * PAD) / font::GLYPH_HEIGHT).max(1);
    let label = Color {
        r: rgb[0] * 1023,
        g: rgb[1] * 1023,
        b: rgb[2] * 1023,
    };
    canvas.draw_text(2 * PAD, y + PAD, name, scale, label);
}

/// Draws the test image: six gradient bars inside a white frame, labelled with their
/// color, and up to three lines of text below.
pub fn test_pattern(canvas: &mut Canvas, info: &[&str]) {
    let (width, height) = (canvas.width(), canvas.height());
    let bar = bar_height(height);
    let inner = width.saturating_sub(2 * PAD);

    canvas.fill_rect(0, 0, width, height, Color::BLACK);

    // one pixel outside of the bars
    let (left, top) = (PAD - 1, PAD - 1);
    let bottom = PAD + 6 * bar;
    canvas.fill_rect(left, top, inner + 2, 1, Color::WHITE);
    canvas.fill_rect(left, bottom, inner + 2, 1, Color::WHITE);
    canvas.fill_rect(left, top, 1, 6 * bar + 2, Color::WHITE);
    canvas.fill_rect(PAD + inner, top, 1, 6 * bar + 2, Color::WHITE);

    for (i, (name, rgb)) in BARS.iter().enumerate() {
        color_bar(canvas, PAD + i as u32 * bar, inner, bar, *rgb, name);
    }

    let scale = (bar.saturating_sub(2 * PAD) / font::GLYPH_HEIGHT / 2).max(1);
    let step = (font::GLYPH_HEIGHT + 3) * scale;
    let mut y = bottom + 2 * PAD;
    for line in info.iter().take(3) {
        if y + font::GLYPH_HEIGHT * scale > height {
            break;
        }
        canvas.draw_text(PAD, y, line, scale, Color::WHITE);
        y += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_sizes() {
        assert_eq!(bar_height(1080), 100);
        assert_eq!(bar_height(768), 100);
        assert_eq!(bar_height(620), 100);
        assert_eq!(bar_height(600), 90);
        assert_eq!(bar_height(480), 70);
        assert_eq!(bar_height(200), 40);
        assert_eq!(bar_height(10), 40);
    }

    #[test]
    fn frame_and_bars() {
        let mut canvas = Canvas::new(1024, 768);
        test_pattern(&mut canvas, &["mode: 1024x768"]);

        assert_eq!(canvas.pixel(0, 0), Color::BLACK);
        assert_eq!(canvas.pixel(9, 9), Color::WHITE);
        assert_eq!(canvas.pixel(1014, 610), Color::WHITE);
        assert_eq!(canvas.pixel(500, 9), Color::WHITE);

        // gradients run from black to the full color
        assert_eq!(canvas.pixel(10, 50), Color::BLACK);
        assert_eq!(canvas.pixel(1013, 99), Color { r: 1023, g: 0, b: 0 });
        assert_eq!(canvas.pixel(1013, 150), Color { r: 1023, g: 1023, b: 0 });
        assert_eq!(canvas.pixel(1013, 550), Color { r: 1023, g: 0, b: 1023 });
        let mid = canvas.pixel(511, 450);
        assert_eq!((mid.r, mid.g), (0, 0));
        assert!(mid.b > 400 && mid.b < 600);
    }

    #[test]
    fn info_lines_below_bars() {
        let mut plain = Canvas::new(800, 700);
        test_pattern(&mut plain, &[]);
        let mut with_info = Canvas::new(800, 700);
        test_pattern(&mut with_info, &["line one", "line two", "line three", "ignored"]);

        let differs = |y0: u32, y1: u32| {
            (y0..y1).any(|y| (0..800).any(|x| plain.pixel(x, y) != with_info.pixel(x, y)))
        };
        assert!(!differs(0, 611));
        assert!(differs(630, 700));
    }
}
