use crate::domain::{Coordinate, PhotoRecord};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Slack added to every threshold so coincident points merge despite centroid rounding.
const TOLERANCE_M: f64 = 1e-6;

/// Great-circle distance in meters.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// A map marker: nearby photos and their mean position.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: usize,
    pub center: Coordinate,
    pub members: Vec<PhotoRecord>,
}

impl Cluster {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Distinct resolved place names of the members, in member order.
    pub fn place_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.members.iter().filter_map(PhotoRecord::place_name) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Clustering {
    pub clusters: Vec<Cluster>,
    /// Records without coordinates ("no location data").
    pub unlocated: Vec<PhotoRecord>,
}

/// Southwest and northeast corners of a set of clusters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Coordinate,
    pub max: Coordinate,
}

impl Clustering {
    pub fn cluster_by_id(&self, id: usize) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    /// Where a map view should center: the first cluster.
    pub fn initial_center(&self) -> Option<Coordinate> {
        self.clusters.first().map(|c| c.center)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let mut points = self.clusters.iter().map(|c| c.center);
        let first = points.next()?;
        let (mut min, mut max) = (first, first);
        for p in points {
            min.latitude = min.latitude.min(p.latitude);
            min.longitude = min.longitude.min(p.longitude);
            max.latitude = max.latitude.max(p.latitude);
            max.longitude = max.longitude.max(p.longitude);
        }
        Some(Bounds { min, max })
    }

    pub fn located_count(&self) -> usize {
        self.clusters.iter().map(Cluster::count).sum()
    }
}

/// `longitude` shifted by whole turns to lie within 180° of `reference`.
fn unwrap_longitude(longitude: f64, reference: f64) -> f64 {
    let mut lon = longitude;
    while lon - reference > 180.0 {
        lon -= 360.0;
    }
    while lon - reference < -180.0 {
        lon += 360.0;
    }
    lon
}

/// Wrap a longitude back into [-180, 180].
fn normalize_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        longitude
    } else {
        (longitude + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Greedy centroid clustering.
///
/// Located records are sorted by path. Each unclustered point seeds a cluster,
/// then one pass over the remaining points absorbs every point within
/// `threshold_m` of the running centroid. Negative or non-finite thresholds
/// behave like 0.
pub fn cluster(records: &[PhotoRecord], threshold_m: f64) -> Clustering {
    let threshold = if threshold_m.is_finite() && threshold_m > 0.0 {
        threshold_m
    } else {
        0.0
    } + TOLERANCE_M;

    let mut located: Vec<(&PhotoRecord, Coordinate)> = Vec::new();
    let mut unlocated = Vec::new();
    for record in records {
        match record.coordinate {
            Some(c) => located.push((record, c)),
            None => unlocated.push(record.clone()),
        }
    }
    located.sort_by(|a, b| a.0.path.cmp(&b.0.path));

    let mut taken = vec![false; located.len()];
    let mut clusters = Vec::new();

    for seed in 0..located.len() {
        if taken[seed] {
            continue;
        }
        taken[seed] = true;

        let (record, coordinate) = located[seed];
        let mut members = vec![record.clone()];
        // Longitudes are summed unwrapped around the seed so a cluster straddling
        // the antimeridian averages to a point beside its members.
        let (mut sum_lat, mut sum_lon) = (coordinate.latitude, coordinate.longitude);
        let mut center = coordinate;

        for other in seed + 1..located.len() {
            if taken[other] {
                continue;
            }
            let (candidate, point) = located[other];
            if haversine_m(center, point) <= threshold {
                taken[other] = true;
                members.push(candidate.clone());
                sum_lat += point.latitude;
                sum_lon += unwrap_longitude(point.longitude, coordinate.longitude);
                let n = members.len() as f64;
                center = Coordinate::new(sum_lat / n, normalize_longitude(sum_lon / n));
            }
        }

        clusters.push(Cluster {
            id: clusters.len(),
            center,
            members,
        });
    }

    tracing::debug!(
        located = located.len(),
        unlocated = unlocated.len(),
        clusters = clusters.len(),
        threshold_m,
        "clustered"
    );
    Clustering {
        clusters,
        unlocated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Fingerprint;
    use std::path::Path;

    fn at(name: &str, lat: f64, lon: f64) -> PhotoRecord {
        let mut r = PhotoRecord::empty(&Path::new("/photos").join(name), Fingerprint::default());
        r.coordinate = Some(Coordinate::new(lat, lon));
        r
    }

    fn unlocated(name: &str) -> PhotoRecord {
        PhotoRecord::empty(&Path::new("/photos").join(name), Fingerprint::default())
    }

    /// Point `meters` north of (lat, lon).
    fn north_of(lat: f64, lon: f64, meters: f64) -> (f64, f64) {
        (lat + (meters / EARTH_RADIUS_M).to_degrees(), lon)
    }

    // ── haversine ───────────────────────────────────────────────

    #[test]
    fn test_haversine_known_distance() {
        let paris = Coordinate::new(48.8566, 2.3522);
        let london = Coordinate::new(51.5074, -0.1278);
        let d = haversine_m(paris, london);
        assert!((d - 343_500.0).abs() < 1_500.0, "got {d}");
    }

    #[test]
    fn test_haversine_zero_and_symmetric() {
        let a = Coordinate::new(10.0, 20.0);
        let b = Coordinate::new(-5.0, 170.0);
        assert_eq!(haversine_m(a, a), 0.0);
        assert!((haversine_m(a, b) - haversine_m(b, a)).abs() < 1e-6);
    }

    // ── cluster ─────────────────────────────────────────────────

    #[test]
    fn test_two_near_one_far() {
        let (lat2, lon2) = north_of(45.0, 6.0, 40.0);
        let (lat3, lon3) = north_of(45.0, 6.0, 5_000.0);
        let records = vec![at("a.jpg", 45.0, 6.0), at("b.jpg", lat2, lon2), at("c.jpg", lat3, lon3)];

        let result = cluster(&records, 100.0);
        let mut sizes: Vec<usize> = result.clusters.iter().map(Cluster::count).collect();
        sizes.sort();
        assert_eq!(sizes, vec![1, 2]);
        assert!(result.unlocated.is_empty());
    }

    #[test]
    fn test_every_located_record_once() {
        let mut records = Vec::new();
        for i in 0..30 {
            let (lat, lon) = north_of(40.0, -3.0, i as f64 * 137.0);
            records.push(at(&format!("{i:02}.jpg"), lat, lon));
        }
        records.push(unlocated("nogps.jpg"));

        let result = cluster(&records, 400.0);
        assert_eq!(result.located_count(), 30);
        assert_eq!(result.unlocated.len(), 1);

        let mut paths: Vec<_> = result
            .clusters
            .iter()
            .flat_map(|c| c.members.iter().map(|m| m.path.clone()))
            .collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 30);
    }

    #[test]
    fn test_absorption_measured_from_running_centroid() {
        // c is ~111 m from the seed but ~83 m from the centroid after b joins.
        let records = vec![at("a.jpg", 0.0, 0.0), at("b.jpg", 0.0, 0.0005), at("c.jpg", 0.0, 0.001)];
        let result = cluster(&records, 90.0);
        assert_eq!(result.clusters.len(), 1);
        let c = &result.clusters[0];
        assert!((c.center.longitude - 0.0005).abs() < 1e-9);
    }

    #[test]
    fn test_cluster_across_antimeridian() {
        let records = vec![
            at("a.jpg", 0.0, 179.9999),
            at("b.jpg", 0.0, -179.9999),
            at("c.jpg", 0.0, 179.9998),
        ];
        let result = cluster(&records, 100.0);
        assert_eq!(result.clusters.len(), 1);

        let c = &result.clusters[0];
        assert_eq!(c.count(), 3);
        assert!(c.center.is_valid());
        assert!(c.center.longitude.abs() > 179.99, "center {}", c.center);
        for member in &c.members {
            let d = haversine_m(c.center, member.coordinate.unwrap());
            assert!(d <= 100.0, "{} is {d} m from the center", member.file_name());
        }
    }

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(179.5), 179.5);
        assert!((normalize_longitude(180.5) - (-179.5)).abs() < 1e-9);
        assert!((normalize_longitude(-180.5) - 179.5).abs() < 1e-9);
        assert!((unwrap_longitude(-179.9, 179.9) - 180.1).abs() < 1e-9);
    }

    #[test]
    fn test_zero_threshold_merges_coincident_points() {
        let records = vec![at("a.jpg", 1.0, 1.0), at("b.jpg", 1.0, 1.0), at("c.jpg", 1.0, 1.00001)];
        let result = cluster(&records, 0.0);
        let sizes: Vec<usize> = result.clusters.iter().map(Cluster::count).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn test_negative_and_nan_threshold_act_as_zero() {
        let records = vec![at("a.jpg", 1.0, 1.0), at("b.jpg", 1.0, 1.001)];
        assert_eq!(cluster(&records, -50.0).clusters.len(), 2);
        assert_eq!(cluster(&records, f64::NAN).clusters.len(), 2);
    }

    #[test]
    fn test_order_is_by_path_and_ids_sequential() {
        let records = vec![at("z.jpg", 10.0, 10.0), at("a.jpg", -10.0, -10.0)];
        let result = cluster(&records, 10.0);
        assert_eq!(result.clusters[0].members[0].file_name(), "a.jpg");
        assert_eq!(result.clusters[0].id, 0);
        assert_eq!(result.clusters[1].id, 1);
        assert_eq!(result.initial_center(), Some(Coordinate::new(-10.0, -10.0)));
    }

    #[test]
    fn test_empty_input() {
        let result = cluster(&[], 100.0);
        assert!(result.clusters.is_empty());
        assert!(result.bounds().is_none());
    }

    // ── Clustering helpers ──────────────────────────────────────

    #[test]
    fn test_bounds_and_lookup() {
        let records = vec![at("a.jpg", 10.0, -5.0), at("b.jpg", -20.0, 30.0)];
        let result = cluster(&records, 1.0);

        let bounds = result.bounds().unwrap();
        assert_eq!(bounds.min, Coordinate::new(-20.0, -5.0));
        assert_eq!(bounds.max, Coordinate::new(10.0, 30.0));
        assert_eq!(result.cluster_by_id(1).unwrap().members[0].file_name(), "b.jpg");
        assert!(result.cluster_by_id(2).is_none());
    }

    #[test]
    fn test_place_names_are_distinct() {
        let mut a = at("a.jpg", 1.0, 1.0);
        a.geocode = crate::domain::Geocode::Resolved("Nice, France".into());
        let mut b = at("b.jpg", 1.0, 1.0);
        b.geocode = crate::domain::Geocode::Resolved("Nice, France".into());
        let c = at("c.jpg", 1.0, 1.0);

        let result = cluster(&[a, b, c], 10.0);
        assert_eq!(result.clusters[0].place_names(), vec!["Nice, France"]);
    }
}
