//! EPSG:4326 bounding-box utilities (spec Module B).
//!
//! Ported from the normalisation and containment semantics of
//! `original_source/twms/bbox.py`, which handle antimeridian wraparound and
//! vertically-flipped requests.

/// An EPSG:4326 rectangle as `(lon_min, lat_min, lon_max, lat_max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl Bbox {
    #[must_use]
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    #[must_use]
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.lon_min, self.lat_min, self.lon_max, self.lat_max)
    }

    /// Normalise so that `lon_min <= lon_max` after a single +360 wrap, and
    /// report whether the rectangle had to be vertically flipped because
    /// `lat_min > lat_max` (the caller mirrors the rendered output at the
    /// end to compensate).
    #[must_use]
    pub fn normalize(&self) -> (Bbox, bool) {
        let mut b = *self;
        while b.lon_min < -180.0 {
            b.lon_min += 360.0;
            b.lon_max += 360.0;
        }
        if b.lon_min > b.lon_max {
            b.lon_max += 360.0;
        }
        let mut flip_h = false;
        if b.lat_min > b.lat_max {
            flip_h = true;
            std::mem::swap(&mut b.lat_min, &mut b.lat_max);
        }
        (b, flip_h)
    }

    /// Smallest rectangle containing both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox::new(
            self.lon_min.min(other.lon_min),
            self.lat_min.min(other.lat_min),
            self.lon_max.max(other.lon_max),
            self.lat_max.max(other.lat_max),
        )
    }

    /// Expand `self` to contain every point in `points`.
    #[must_use]
    pub fn expand_to_points(&self, points: &[(f64, f64)]) -> Bbox {
        let mut b = *self;
        for &(lon, lat) in points {
            b = b.union(&Bbox::new(lon, lat, lon, lat));
        }
        b
    }

    /// Whether `self` fully contains `other` (both normalised first).
    #[must_use]
    pub fn contains(&self, other: &Bbox) -> bool {
        let (a, _) = self.normalize();
        let (b, _) = other.normalize();
        a.lon_min <= b.lon_min && a.lon_max >= b.lon_max && a.lat_min <= b.lat_min && a.lat_max >= b.lat_max
    }

    /// Whether `self` and `other` intersect (both normalised first).
    ///
    /// Models the intended semantics of the source's
    /// `bbox_is_in(..., fully=false)`: "do these rectangles overlap", per
    /// spec §9's resolution of that Open Question (the source's own
    /// second early-return branch there is unreachable dead code).
    #[must_use]
    pub fn intersects(&self, other: &Bbox) -> bool {
        let (mut a, _) = self.normalize();
        let (mut b, _) = other.normalize();
        if a.lon_min > b.lon_min {
            std::mem::swap(&mut a, &mut b);
        }
        if b.lon_min > a.lon_max {
            return false;
        }
        if a.lat_min > b.lat_min {
            std::mem::swap(&mut a, &mut b);
        }
        b.lat_min <= a.lat_max
    }
}

#[cfg(test)]
mod tests {
    use super::Bbox;

    #[test]
    fn normalize_wraps_and_flips() {
        let (b, flip_h) = Bbox::new(10.0, 60.0, -10.0, 50.0).normalize();
        assert_eq!(b.as_tuple(), (10.0, 50.0, 350.0, 60.0));
        assert!(flip_h);
    }

    #[test]
    fn normalize_identity_for_sane_bbox() {
        let (b, flip_h) = Bbox::new(-10.0, 40.0, 10.0, 50.0).normalize();
        assert_eq!(b.as_tuple(), (-10.0, 40.0, 10.0, 50.0));
        assert!(!flip_h);
    }

    #[test]
    fn intersects_detects_overlap_and_disjoint() {
        let a = Bbox::new(0.0, 0.0, 10.0, 10.0);
        let b = Bbox::new(5.0, 5.0, 15.0, 15.0);
        let c = Bbox::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn contains_is_strict_containment() {
        let outer = Bbox::new(-10.0, -10.0, 10.0, 10.0);
        let inner = Bbox::new(-5.0, -5.0, 5.0, 5.0);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn expand_to_points_grows_rectangle() {
        let b = Bbox::new(0.0, 0.0, 1.0, 1.0).expand_to_points(&[(-5.0, 2.0), (5.0, -2.0)]);
        assert_eq!(b.as_tuple(), (-5.0, -2.0, 5.0, 2.0));
    }
}
