use std::collections::VecDeque;

use opencv::core::Point;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// A user drawn reference line in frame coordinates.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Line {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Line {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// A line spanning the frame at `y`.
    pub fn horizontal(y: f32, width: f32) -> Self {
        Self::new(0.0, y, width, y)
    }

    /// Midpoint of the two endpoints along `axis`.
    fn position(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Vertical => (self.y1 + self.y2) / 2.0,
            Axis::Horizontal => (self.x1 + self.x2) / 2.0,
        }
    }
}

/// The travel direction of a crossing.
///
/// [`Direction::B`] is travel from the first line towards the second, [`Direction::A`] the
/// reverse.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Direction {
    #[serde(rename = "DirectionA")]
    #[strum(serialize = "DirectionA")]
    A,
    #[serde(rename = "DirectionB")]
    #[strum(serialize = "DirectionB")]
    B,
}

/// The image axis vehicles predominantly move along.
#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize, Display, EnumString,
)]
pub enum Axis {
    #[default]
    Vertical,
    Horizontal,
}

/// Decides crossing direction from a trajectory and two reference lines.
///
/// This is a two line heuristic and not path topology: it only compares the oldest and newest
/// sample of the recent window against the midpoints of `line1` and `line2`.
#[derive(Clone, Copy, Debug)]
pub struct DirectionClassifier {
    samples: usize,
    axis: Axis,
}

impl DirectionClassifier {
    pub fn new(samples: usize, axis: Axis) -> Self {
        Self {
            samples: samples.max(2),
            axis,
        }
    }

    /// Number of trajectory samples needed before a decision is attempted.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Classifies `trajectory`, oldest sample first.
    ///
    /// Returns `None` unless exactly two lines are configured and the trajectory holds at least
    /// [`Self::samples`] points.
    pub fn classify(&self, lines: &[Line], trajectory: &VecDeque<Point>) -> Option<Direction> {
        let [line1, line2] = lines else {
            return None;
        };
        if trajectory.len() < self.samples {
            return None;
        }

        let first = self.coordinate(trajectory[trajectory.len() - self.samples]);
        let last = self.coordinate(*trajectory.back()?);
        let l1 = line1.position(self.axis);
        let l2 = line2.position(self.axis);

        if first < l1 && last > l2 {
            Some(Direction::B)
        } else if first > l2 && last < l1 {
            Some(Direction::A)
        } else {
            None
        }
    }

    fn coordinate(&self, point: Point) -> f32 {
        match self.axis {
            Axis::Vertical => point.y as f32,
            Axis::Horizontal => point.x as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<Line> {
        vec![Line::horizontal(100.0, 640.0), Line::horizontal(300.0, 640.0)]
    }

    fn trajectory(ys: impl IntoIterator<Item = i32>) -> VecDeque<Point> {
        ys.into_iter().map(|y| Point::new(320, y)).collect()
    }

    #[test]
    fn classify_downward_is_direction_b() {
        let classifier = DirectionClassifier::new(10, Axis::Vertical);
        let points = trajectory((0..10).map(|i| 50 + i * 300 / 9));

        assert_eq!(classifier.classify(&lines(), &points), Some(Direction::B));
    }

    #[test]
    fn classify_upward_is_direction_a() {
        let classifier = DirectionClassifier::new(10, Axis::Vertical);
        let points = trajectory((0..10).map(|i| 350 - i * 300 / 9));

        assert_eq!(classifier.classify(&lines(), &points), Some(Direction::A));
    }

    #[test]
    fn classify_between_lines_is_none() {
        let classifier = DirectionClassifier::new(10, Axis::Vertical);
        let points = trajectory((0..10).map(|i| 110 + i * 20));

        assert_eq!(classifier.classify(&lines(), &points), None);
    }

    #[test]
    fn classify_needs_enough_samples() {
        let classifier = DirectionClassifier::new(10, Axis::Vertical);
        let points = trajectory([50, 150, 250, 350]);

        assert_eq!(classifier.classify(&lines(), &points), None);
    }

    #[test]
    fn classify_uses_only_recent_window() {
        let classifier = DirectionClassifier::new(3, Axis::Vertical);
        // The oldest sample is above line1 but falls outside the window
        let points = trajectory([50, 200, 250, 350]);

        assert_eq!(classifier.classify(&lines(), &points), None);
    }

    #[test]
    fn classify_inactive_without_two_lines() {
        let classifier = DirectionClassifier::new(2, Axis::Vertical);
        let points = trajectory([50, 350]);

        assert_eq!(classifier.classify(&lines()[..1], &points), None);
        assert_eq!(classifier.classify(&[], &points), None);
        let three = [lines(), lines()].concat();
        assert_eq!(classifier.classify(&three[..3], &points), None);
    }

    #[test]
    fn classify_uses_line_midpoints() {
        let classifier = DirectionClassifier::new(2, Axis::Vertical);
        let slanted = vec![
            Line::new(0.0, 80.0, 640.0, 120.0),
            Line::new(0.0, 280.0, 640.0, 320.0),
        ];

        assert_eq!(
            classifier.classify(&slanted, &trajectory([99, 301])),
            Some(Direction::B)
        );
        assert_eq!(classifier.classify(&slanted, &trajectory([101, 301])), None);
    }

    #[test]
    fn classify_horizontal_axis() {
        let classifier = DirectionClassifier::new(2, Axis::Horizontal);
        let vertical_lines = vec![
            Line::new(100.0, 0.0, 100.0, 480.0),
            Line::new(300.0, 0.0, 300.0, 480.0),
        ];
        let points = [Point::new(50, 10), Point::new(350, 400)]
            .into_iter()
            .collect::<VecDeque<_>>();

        assert_eq!(
            classifier.classify(&vertical_lines, &points),
            Some(Direction::B)
        );
    }

    #[test]
    fn direction_display_tags() {
        assert_eq!(Direction::A.to_string(), "DirectionA");
        assert_eq!(Direction::B.to_string(), "DirectionB");
        assert_eq!("DirectionB".parse::<Direction>().unwrap(), Direction::B);
    }
}
