//! Paint rules for the two globe layers.
//!
//! The marker layer maps the `threat` attribute to radius and colour through
//! piecewise-linear interpolation over the breakpoints 0.0, 0.5 and 1.0.
//! Both outputs are monotonic in threat: a higher value never draws smaller
//! or cooler than a lower one.

use image::Rgba;
use serde_json::{json, Value as JsonValue};

pub const BORDER_SOURCE: &str = "countries";
pub const MARKER_SOURCE: &str = "country-centers";
pub const BORDER_LAYER: &str = "countries-borders";
pub const MARKER_LAYER: &str = "countries-dots";

/// Feature attribute every data-driven rule reads.
pub const THREAT_PROPERTY: &str = "threat";

pub const BREAKPOINTS: [f64; 3] = [0.0, 0.5, 1.0];
const MARKER_RADII: [f64; 3] = [2.0, 5.0, 9.0];
const MARKER_COLORS: [&str; 3] = ["#888888", "#ff9933", "#ff3333"];
const MARKER_OPACITY: f64 = 0.9;
const BORDER_COLOR: &str = "#222222";
const BORDER_WIDTH: f64 = 0.5;

pub fn hex_to_rgba(hex: &str) -> Option<Rgba<u8>> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgba([r, g, b, 255]))
}

pub fn rgba_to_hex(color: Rgba<u8>) -> String {
    let [r, g, b, _] = color.0;
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Warmth of a colour, used to order marker colours by severity.
pub fn severity(color: Rgba<u8>) -> i16 {
    color.0[0] as i16 - color.0[2] as i16
}

pub trait Lerp: Sized {
    fn lerp(&self, other: &Self, t: f64) -> Self;
}

impl Lerp for f64 {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        self + (other - self) * t
    }
}

impl Lerp for Rgba<u8> {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        let mut out = [0u8; 4];
        for (channel, (a, b)) in out.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            let value = *a as f64 + (*b as f64 - *a as f64) * t;
            *channel = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgba(out)
    }
}

/// Linear interpolation of a feature attribute over ascending stops.
/// Inputs outside the stop range take the nearest end value.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolate<T> {
    pub property: String,
    pub stops: Vec<(f64, T)>,
}

impl<T: Lerp + Clone> Interpolate<T> {
    pub fn eval(&self, input: f64) -> Option<T> {
        let (first, last) = (self.stops.first()?, self.stops.last()?);
        if input.is_nan() || input <= first.0 {
            return Some(first.1.clone());
        }
        if input >= last.0 {
            return Some(last.1.clone());
        }

        self.stops.windows(2).find_map(|pair| {
            let (lo, hi) = (&pair[0], &pair[1]);
            (input >= lo.0 && input <= hi.0).then(|| {
                let span = hi.0 - lo.0;
                let t = if span > 0.0 { (input - lo.0) / span } else { 0.0 };
                lo.1.lerp(&hi.1, t)
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinePaint {
    pub color: Rgba<u8>,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CirclePaint {
    pub radius: Interpolate<f64>,
    pub color: Interpolate<Rgba<u8>>,
    pub opacity: f64,
}

impl CirclePaint {
    /// Radius and colour for a marker with the given threat value.
    pub fn resolve(&self, threat: f64) -> (f64, Rgba<u8>) {
        let radius = self.radius.eval(threat).unwrap_or(0.0);
        let color = self.color.eval(threat).unwrap_or(Rgba([0, 0, 0, 0]));
        (radius, color)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    Line(LinePaint),
    Circle(CirclePaint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub paint: Paint,
}

impl LayerSpec {
    /// Engine-neutral JSON form, using the `["interpolate", ["linear"], ...]`
    /// expression syntax for data-driven values.
    pub fn to_json(&self) -> JsonValue {
        let (kind, paint) = match &self.paint {
            Paint::Line(line) => (
                "line",
                json!({
                    "line-color": rgba_to_hex(line.color),
                    "line-width": line.width,
                }),
            ),
            Paint::Circle(circle) => (
                "circle",
                json!({
                    "circle-radius": interpolate_json(&circle.radius, |r| json!(r)),
                    "circle-color": interpolate_json(&circle.color, |c| json!(rgba_to_hex(*c))),
                    "circle-opacity": circle.opacity,
                }),
            ),
        };

        json!({
            "id": self.id,
            "type": kind,
            "source": self.source,
            "paint": paint,
        })
    }
}

fn interpolate_json<T>(rule: &Interpolate<T>, value: impl Fn(&T) -> JsonValue) -> JsonValue {
    let mut expression = vec![
        json!("interpolate"),
        json!(["linear"]),
        json!(["get", rule.property]),
    ];
    for (input, output) in &rule.stops {
        expression.push(json!(input));
        expression.push(value(output));
    }
    JsonValue::Array(expression)
}

/// Thin constant outline over the polygon source.
pub fn border_layer() -> LayerSpec {
    LayerSpec {
        id: BORDER_LAYER.to_string(),
        source: BORDER_SOURCE.to_string(),
        paint: Paint::Line(LinePaint {
            color: hex_to_rgba(BORDER_COLOR).unwrap_or(Rgba([34, 34, 34, 255])),
            width: BORDER_WIDTH,
        }),
    }
}

/// Threat-driven circles over the point source.
pub fn marker_layer() -> LayerSpec {
    let colors = MARKER_COLORS
        .iter()
        .map(|hex| hex_to_rgba(hex).unwrap_or(Rgba([255, 255, 255, 255])));

    LayerSpec {
        id: MARKER_LAYER.to_string(),
        source: MARKER_SOURCE.to_string(),
        paint: Paint::Circle(CirclePaint {
            radius: Interpolate {
                property: THREAT_PROPERTY.to_string(),
                stops: BREAKPOINTS.into_iter().zip(MARKER_RADII).collect(),
            },
            color: Interpolate {
                property: THREAT_PROPERTY.to_string(),
                stops: BREAKPOINTS.into_iter().zip(colors).collect(),
            },
            opacity: MARKER_OPACITY,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_paint() -> CirclePaint {
        match marker_layer().paint {
            Paint::Circle(circle) => circle,
            Paint::Line(_) => panic!("marker layer must draw circles"),
        }
    }

    #[test]
    fn parses_hex_colours() {
        assert_eq!(hex_to_rgba("#ff9933"), Some(Rgba([255, 153, 51, 255])));
        assert_eq!(hex_to_rgba("888888"), Some(Rgba([136, 136, 136, 255])));
        assert_eq!(hex_to_rgba("#fff"), None);
        assert_eq!(hex_to_rgba("#zz0000"), None);
        assert_eq!(rgba_to_hex(Rgba([255, 51, 51, 255])), "#ff3333");
    }

    #[test]
    fn breakpoints_hit_exact_values() {
        let paint = marker_paint();
        assert_eq!(paint.resolve(0.0), (2.0, Rgba([136, 136, 136, 255])));
        assert_eq!(paint.resolve(0.5), (5.0, Rgba([255, 153, 51, 255])));
        assert_eq!(paint.resolve(1.0), (9.0, Rgba([255, 51, 51, 255])));
    }

    #[test]
    fn interpolates_between_breakpoints() {
        let paint = marker_paint();
        let (radius, _) = paint.resolve(0.25);
        assert!((radius - 3.5).abs() < 1e-9);
        let (radius, _) = paint.resolve(0.75);
        assert!((radius - 7.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_inputs_clamp_to_end_stops() {
        let paint = marker_paint();
        assert_eq!(paint.resolve(-1.0), paint.resolve(0.0));
        assert_eq!(paint.resolve(4.0), paint.resolve(1.0));
        assert_eq!(paint.resolve(f64::NAN), paint.resolve(0.0));
    }

    #[test]
    fn higher_threat_never_renders_smaller_or_cooler() {
        let paint = marker_paint();
        let samples: Vec<(f64, Rgba<u8>)> = (0..=1000).map(|i| paint.resolve(i as f64 / 1000.0)).collect();

        for pair in samples.windows(2) {
            let ((r1, c1), (r2, c2)) = (pair[0], pair[1]);
            assert!(r1 <= r2, "radius decreased: {r1} > {r2}");
            assert!(severity(c1) <= severity(c2), "colour cooled: {c1:?} -> {c2:?}");
        }
    }

    #[test]
    fn border_layer_ignores_threat() {
        let layer = border_layer();
        assert_eq!(layer.source, BORDER_SOURCE);
        assert_eq!(
            layer.paint,
            Paint::Line(LinePaint { color: Rgba([34, 34, 34, 255]), width: 0.5 })
        );
    }

    #[test]
    fn marker_layer_serialises_to_interpolate_expression() {
        let json = marker_layer().to_json();
        assert_eq!(json["type"], "circle");
        assert_eq!(json["source"], MARKER_SOURCE);
        assert_eq!(
            json["paint"]["circle-radius"],
            json!(["interpolate", ["linear"], ["get", "threat"], 0.0, 2.0, 0.5, 5.0, 1.0, 9.0])
        );
        assert_eq!(json["paint"]["circle-color"][4], "#888888");
        assert_eq!(json["paint"]["circle-opacity"], 0.9);
    }
}
