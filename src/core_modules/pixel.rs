// THEORY:
// The `pixel` module is the color primitive of the engine. Everything above it
// (sampling, clustering, contrast scoring, finding messages) speaks in `Rgb`.
// It is a "dumb" data container for a single opaque color plus the handful of
// single-color heuristics the rest of the system needs:
//
// 1.  **Quantization**: channels are bucketed to a coarse step so that near-identical
//     shades collapse into one sample before clustering.
// 2.  **Encoding**: a 24-bit packed form for comparisons and an uppercase `#RRGGBB`
//     hex form for display and for the remote contrast service.
// 3.  **Parsing**: hosts report background colors as CSS strings (`#fff`,
//     `#ffffff`, `rgb(255, 255, 255)`, `rgba(...)`). Parsing never panics; an
//     unreadable color is `None`.
// 4.  **Relative luminance**: the WCAG definition, computed from linearized sRGB.
//     The sRGB -> linear transfer uses a 256-entry `OnceLock` LUT so the hot path
//     is a table lookup rather than a `powf` per channel.

pub mod pixel {
    use std::fmt;
    use std::sync::OnceLock;

    pub type Channel = u8;
    pub type Luminance = f64;
    pub type Packed = u32;

    static SRGB_TO_LINEAR_LUT: OnceLock<[Luminance; 256]> = OnceLock::new();

    /// An opaque sRGB color.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct Rgb {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
    }

    impl Rgb {
        pub const BLACK: Rgb = Rgb::new(0, 0, 0);
        pub const WHITE: Rgb = Rgb::new(255, 255, 255);

        pub const fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Self { red, green, blue }
        }

        /// Builds a color from the low 24 bits of `packed` (`0xRRGGBB`).
        pub const fn from_packed(packed: Packed) -> Self {
            Self {
                red: ((packed >> 16) & 0xFF) as Channel,
                green: ((packed >> 8) & 0xFF) as Channel,
                blue: (packed & 0xFF) as Channel,
            }
        }

        pub const fn to_packed(self) -> Packed {
            ((self.red as Packed) << 16) | ((self.green as Packed) << 8) | self.blue as Packed
        }

        /// Uppercase `#RRGGBB`.
        pub fn hex(&self) -> String {
            format!("#{:06X}", self.to_packed())
        }

        /// Buckets every channel down to a multiple of `step`.
        /// A step of 0 or 1 leaves the color untouched.
        pub fn quantized(self, step: Channel) -> Self {
            if step <= 1 {
                return self;
            }
            let bucket = |channel: Channel| (channel / step) * step;
            Self::new(bucket(self.red), bucket(self.green), bucket(self.blue))
        }

        /// WCAG 2.x relative luminance in `0.0..=1.0`.
        pub fn relative_luminance(&self) -> Luminance {
            0.2126 * srgb_to_linear(self.red)
                + 0.7152 * srgb_to_linear(self.green)
                + 0.0722 * srgb_to_linear(self.blue)
        }

        /// Parses the color notations a browser reports for computed styles.
        ///
        /// Accepts `#rgb`, `#rrggbb`, `#rrggbbaa` (alpha dropped),
        /// `rgb(r, g, b)` and `rgba(r, g, b, a)`, with either comma or space
        /// separators. Surrounding whitespace and case are ignored.
        pub fn parse_css(input: &str) -> Option<Self> {
            let value = input.trim();
            if let Some(hex) = value.strip_prefix('#') {
                return Self::parse_hex_digits(hex);
            }

            let lower = value.to_ascii_lowercase();
            let body = lower
                .strip_prefix("rgba(")
                .or_else(|| lower.strip_prefix("rgb("))?
                .strip_suffix(')')?;

            let mut channels = body
                .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
                .filter(|part| !part.is_empty())
                .take(3)
                .map(parse_css_channel);

            let red = channels.next()??;
            let green = channels.next()??;
            let blue = channels.next()??;
            Some(Self::new(red, green, blue))
        }

        fn parse_hex_digits(hex: &str) -> Option<Self> {
            if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            match hex.len() {
                3 => {
                    let packed = Packed::from_str_radix(hex, 16).ok()?;
                    let expand = |nibble: Packed| (nibble * 0x11) as Channel;
                    Some(Self::new(
                        expand((packed >> 8) & 0xF),
                        expand((packed >> 4) & 0xF),
                        expand(packed & 0xF),
                    ))
                }
                6 => Some(Self::from_packed(Packed::from_str_radix(hex, 16).ok()?)),
                8 => Some(Self::from_packed(Packed::from_str_radix(&hex[..6], 16).ok()?)),
                _ => None,
            }
        }
    }

    impl fmt::Display for Rgb {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.hex())
        }
    }

    impl From<[Channel; 3]> for Rgb {
        fn from(channels: [Channel; 3]) -> Self {
            Self::new(channels[0], channels[1], channels[2])
        }
    }

    impl From<Rgb> for [f64; 3] {
        fn from(color: Rgb) -> Self {
            [color.red as f64, color.green as f64, color.blue as f64]
        }
    }

    fn parse_css_channel(part: &str) -> Option<Channel> {
        if let Some(percent) = part.strip_suffix('%') {
            let value: f64 = percent.parse().ok()?;
            return Some((value.clamp(0.0, 100.0) * 2.55).round() as Channel);
        }
        let value: f64 = part.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(value.round().clamp(0.0, 255.0) as Channel)
    }

    #[inline]
    fn srgb_to_linear(channel: Channel) -> Luminance {
        let table = SRGB_TO_LINEAR_LUT.get_or_init(|| {
            let mut table = [0.0; 256];
            for (i, slot) in table.iter_mut().enumerate() {
                let normalized = i as Luminance / 255.0;
                *slot = if normalized <= 0.04045 {
                    normalized / 12.92
                } else {
                    ((normalized + 0.055) / 1.055).powf(2.4)
                };
            }
            table
        });
        table[channel as usize]
    }
}
