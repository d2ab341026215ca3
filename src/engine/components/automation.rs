use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use super::track::ParameterId;
use crate::engine::persist::{self, LineReader};

/// Tension is limited to this magnitude when evaluating.
pub const TENSION_LIMIT: f32 = 0.99;
/// Points closer together than this (in beats) are considered the same point.
pub const POINT_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    pub beat: f64,
    pub value: f32,
    /// Shape of the segment starting at this point.
    /// Positive values ease out, negative values ease in, 0 is linear.
    pub tension: f32,
}

/// Breakpoint envelope driving one parameter of a track.
///
/// The parameter is referred to by name, and resolved to a [`ParameterId`]
/// whenever the owning track's parameter layout changes.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationCurve {
    param_name: String,
    target: Option<ParameterId>,
    points: Vec<AutomationPoint>,
}
impl AutomationCurve {
    pub fn new(param_name: &str) -> Self {
        Self {
            param_name: param_name.to_owned(),
            target: None,
            points: Vec::new(),
        }
    }

    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    /// The parameter currently driven by this curve, if it could be resolved.
    pub fn target(&self) -> Option<ParameterId> {
        self.target
    }
    pub(crate) fn set_target(&mut self, target: Option<ParameterId>) {
        self.target = target;
    }

    /// Points, ordered by beat.
    pub fn points(&self) -> &[AutomationPoint] {
        &self.points
    }

    /// Add a point, or overwrite the value of an existing point at the same beat.
    pub fn add_point(&mut self, beat: f64, value: f32) {
        match self
            .points
            .iter_mut()
            .find(|p| (p.beat - beat).abs() < POINT_TOLERANCE)
        {
            Some(point) => point.value = value,
            None => self.points.push(AutomationPoint {
                beat,
                value,
                tension: 0.0,
            }),
        }
        self.sort_points();
    }

    pub fn remove_point(&mut self, index: usize) -> Option<AutomationPoint> {
        if index < self.points.len() {
            Some(self.points.remove(index))
        } else {
            None
        }
    }

    pub fn set_tension(&mut self, index: usize, tension: f32) {
        if let Some(point) = self.points.get_mut(index) {
            point.tension = tension.clamp(-TENSION_LIMIT, TENSION_LIMIT);
        }
    }

    pub fn sort_points(&mut self) {
        self.points.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    }

    /// Value of the curve at the given beat.
    ///
    /// Flat before the first and after the last point. `None` if the curve has no points.
    pub fn evaluate(&self, beat: f64) -> Option<f32> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if beat <= first.beat {
            return Some(first.value);
        }
        if beat >= last.beat {
            return Some(last.value);
        }

        for segment in self.points.windows(2) {
            let (a, b) = (segment[0], segment[1]);
            if beat >= a.beat && beat < b.beat {
                let t = (beat - a.beat) / (b.beat - a.beat);
                let curved = curve(t, a.tension);
                return Some(a.value + curved as f32 * (b.value - a.value));
            }
        }
        Some(last.value)
    }

    pub(crate) fn save(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "AUTO_BEGIN \"{}\"", self.param_name)?;
        for p in &self.points {
            writeln!(out, "PT {} {} {}", p.beat, p.value, p.tension)?;
        }
        writeln!(out, "AUTO_END")
    }

    /// Read the points of an `AUTO_BEGIN` block, up to and including `AUTO_END`.
    ///
    /// Points are sorted by beat, whatever order the file lists them in.
    pub(crate) fn load(param_name: &str, reader: &mut LineReader<'_>) -> Self {
        let mut curve = Self::new(param_name);
        while let Some(line) = reader.next_line() {
            if line == "AUTO_END" {
                break;
            }
            let (tag, rest) = persist::split_tag(line);
            if tag != "PT" {
                continue;
            }
            let mut values = rest.split_whitespace();
            let beat = values.next().and_then(|v| v.parse().ok());
            let value = values.next().and_then(|v| v.parse().ok());
            let tension = values.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
            if let (Some(beat), Some(value)) = (beat, value) {
                curve.points.push(AutomationPoint {
                    beat,
                    value,
                    tension: f32::clamp(tension, -TENSION_LIMIT, TENSION_LIMIT),
                });
            }
        }
        curve.sort_points();
        curve
    }
}

/// Shape the normalized position `t` within a segment.
fn curve(t: f64, tension: f32) -> f64 {
    let tension = tension.clamp(-TENSION_LIMIT, TENSION_LIMIT);
    if tension.abs() <= 0.001 {
        return t;
    }

    let exponent = 10.0_f64.powf(f64::from(tension.abs()));
    if tension > 0.0 {
        1.0 - (1.0 - t).powf(exponent)
    } else {
        t.powf(exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> AutomationCurve {
        let mut curve = AutomationCurve::new("Volume");
        curve.add_point(0.0, 0.0);
        curve.add_point(4.0, 1.0);
        curve
    }

    #[test]
    fn empty_curve_has_no_value() {
        assert_eq!(AutomationCurve::new("Pan").evaluate(1.0), None);
    }

    #[test]
    fn flat_outside_points() {
        let mut curve = AutomationCurve::new("Pan");
        curve.add_point(2.0, 0.25);
        curve.add_point(3.0, 0.75);
        assert_eq!(curve.evaluate(0.0), Some(0.25));
        assert_eq!(curve.evaluate(10.0), Some(0.75));
    }

    #[test]
    fn linear_between_points() {
        assert_relative_eq!(ramp().evaluate(1.0).unwrap(), 0.25);
        assert_relative_eq!(ramp().evaluate(2.0).unwrap(), 0.5);
    }

    #[test]
    fn positive_tension_eases_out() {
        let mut curve = ramp();
        curve.set_tension(0, 0.5);
        let exponent = 10.0_f64.powf(0.5);
        let expected = 1.0 - (1.0 - 0.5_f64).powf(exponent);
        assert_relative_eq!(curve.evaluate(2.0).unwrap(), expected as f32, epsilon = 1e-6);
        assert!(curve.evaluate(2.0).unwrap() > 0.5);
    }

    #[test]
    fn negative_tension_eases_in() {
        let mut curve = ramp();
        curve.set_tension(0, -0.5);
        assert!(curve.evaluate(2.0).unwrap() < 0.5);
    }

    #[test]
    fn tension_is_clamped() {
        let mut curve = ramp();
        curve.set_tension(0, 5.0);
        assert_eq!(curve.points()[0].tension, TENSION_LIMIT);
    }

    #[test]
    fn add_point_replaces_nearby_point() {
        let mut curve = ramp();
        curve.add_point(4.0005, 0.5);
        assert_eq!(curve.points().len(), 2);
        assert_eq!(curve.points()[1].value, 0.5);
    }

    #[test]
    fn points_stay_sorted() {
        let mut curve = AutomationCurve::new("Volume");
        curve.add_point(3.0, 1.0);
        curve.add_point(1.0, 2.0);
        curve.add_point(2.0, 3.0);
        let beats: Vec<f64> = curve.points().iter().map(|p| p.beat).collect();
        assert_eq!(beats, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn save_then_load() {
        let mut curve = ramp();
        curve.set_tension(0, -0.25);
        let mut out = Vec::new();
        curve.save(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut reader = LineReader::new(&text);
        let header = reader.next_line().unwrap();
        assert_eq!(persist::quoted(header), Some("Volume"));
        let loaded = AutomationCurve::load("Volume", &mut reader);
        assert_eq!(loaded.points(), curve.points());
    }

    #[test]
    fn loaded_points_are_sorted_and_clamped() {
        let text = "PT 4 1 -3\nPT 0 0 0\nPT 2 0.5 5\nAUTO_END\n";
        let curve = AutomationCurve::load("Pan", &mut LineReader::new(text));
        let beats: Vec<f64> = curve.points().iter().map(|p| p.beat).collect();
        assert_eq!(beats, vec![0.0, 2.0, 4.0]);
        assert_eq!(curve.points()[1].tension, TENSION_LIMIT);
        assert_eq!(curve.points()[2].tension, -TENSION_LIMIT);
        assert_relative_eq!(curve.evaluate(1.0).unwrap(), 0.25);
    }
}
