//! Sweep ingestion: driver-order point clouds to azimuth-sorted scan lines.

use std::cmp::Ordering;
use std::f64::consts::PI;
use tracing::{debug, warn};
use types::{Label, Point, PointCloud};

/// Points of one laser beam within a sweep, ordered by azimuth.
#[derive(Debug, Clone, Default)]
pub struct ScanLine {
    /// Points in azimuth order
    pub points: Vec<Point>,
    /// For each point, its index in the ingested input cloud
    pub source_indices: Vec<usize>,
}

impl ScanLine {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A sweep reordered into scan lines.
#[derive(Debug, Clone, Default)]
pub struct Sweep {
    pub lines: Vec<ScanLine>,
    /// Points dropped for NaN coordinates or range below the sensor minimum
    pub dropped: usize,
    /// Points dropped because their laser id was not seen on the first sweep
    pub unknown_laser: usize,
}

impl Sweep {
    /// Total number of retained points.
    pub fn num_points(&self) -> usize {
        self.lines.iter().map(ScanLine::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_points() == 0
    }

    /// Iterate over all retained points, line by line.
    pub fn iter_points(&self) -> impl Iterator<Item = &Point> {
        self.lines.iter().flat_map(|l| l.points.iter())
    }

    /// All points not labeled invalid, flattened across lines.
    pub fn valid_points(&self) -> PointCloud {
        self.iter_points()
            .filter(|p| p.label.selectable())
            .copied()
            .collect()
    }

    /// Derive the input-order -> (line, position) map. The sweep stores only
    /// the sorted -> input direction; this is the reverse, built on demand.
    pub fn source_map(&self, input_len: usize) -> Vec<Option<(usize, usize)>> {
        let mut map = vec![None; input_len];
        for (li, line) in self.lines.iter().enumerate() {
            for (pi, &src) in line.source_indices.iter().enumerate() {
                if src < input_len {
                    map[src] = Some((li, pi));
                }
            }
        }
        map
    }
}

/// Re-orders incoming sweeps by scan line and azimuth.
///
/// The set of laser ids is discovered from the first sweep and frozen;
/// later sweeps carrying unknown ids have those points dropped.
#[derive(Debug)]
pub struct SweepIngestor {
    min_distance_to_sensor: f64,
    /// Sorted laser ids, frozen after the first sweep
    laser_ids: Option<Vec<usize>>,
}

impl SweepIngestor {
    pub fn new(min_distance_to_sensor: f64) -> Self {
        Self {
            min_distance_to_sensor,
            laser_ids: None,
        }
    }

    /// Number of scan lines, once discovered.
    pub fn num_lines(&self) -> Option<usize> {
        self.laser_ids.as_ref().map(Vec::len)
    }

    pub fn min_distance_to_sensor(&self) -> f64 {
        self.min_distance_to_sensor
    }

    pub fn set_min_distance_to_sensor(&mut self, d: f64) {
        self.min_distance_to_sensor = d;
    }

    /// Reorder one sweep into scan lines.
    ///
    /// Each retained point gets a sweep-relative time in [0, 1) derived from
    /// its azimuth, and its label reset to `Unlabeled`.
    pub fn ingest(&mut self, cloud: &PointCloud) -> Sweep {
        let mut dropped = 0usize;
        let mut kept: Vec<(Point, usize)> = Vec::with_capacity(cloud.len());

        for (idx, p) in cloud.iter().enumerate() {
            let range = p.range();
            if p.is_degenerate() || !range.is_finite() || range < self.min_distance_to_sensor {
                dropped += 1;
                continue;
            }
            kept.push((*p, idx));
        }

        // Discover the laser set from the first sweep that carries points;
        // it is frozen from then on.
        if self.laser_ids.is_none() {
            if kept.is_empty() {
                return Sweep {
                    lines: Vec::new(),
                    dropped,
                    unknown_laser: 0,
                };
            }
            let mut ids: Vec<usize> = kept.iter().map(|(p, _)| p.laser_id).collect();
            ids.sort_unstable();
            ids.dedup();
            debug!(lines = ids.len(), "discovered laser mapping");
            self.laser_ids = Some(ids);
        }
        let ids = self.laser_ids.as_ref().expect("laser mapping set above");

        let mut lines = vec![ScanLine::default(); ids.len()];
        let mut unknown_laser = 0usize;

        for (mut p, idx) in kept {
            match ids.binary_search(&p.laser_id) {
                Ok(li) => {
                    p.time = p.azimuth() / (2.0 * PI);
                    p.label = Label::Unlabeled;
                    lines[li].points.push(p);
                    lines[li].source_indices.push(idx);
                }
                Err(_) => unknown_laser += 1,
            }
        }

        if unknown_laser > 0 {
            warn!(unknown_laser, "dropping points with unknown laser id");
        }

        for line in &mut lines {
            let mut zipped: Vec<(Point, usize)> = line
                .points
                .drain(..)
                .zip(line.source_indices.drain(..))
                .collect();
            zipped.sort_by(|a, b| a.0.time.partial_cmp(&b.0.time).unwrap_or(Ordering::Equal));
            for (p, src) in zipped {
                line.points.push(p);
                line.source_indices.push(src);
            }
        }

        Sweep {
            lines,
            dropped,
            unknown_laser,
        }
    }
}
