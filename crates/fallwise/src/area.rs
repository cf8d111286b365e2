//! Service area and random placement for demo runs.
//!
//! `--random-location` drops the fall and every caregiver at uniformly
//! random points inside the area. The scattered positions only live for
//! the run; the roster file keeps its stored locations.

use fallwise_coordination::{Caregiver, GeoPoint};
use rand::Rng;

/// Axis-aligned lat/lng box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceArea {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

/// Kundrathur to Sriperumbudur, Tamil Nadu
pub const KUNDRATHUR_SRIPERUMBUDUR: ServiceArea = ServiceArea {
    min_lat: 12.96,
    max_lat: 13.00,
    min_lng: 79.95,
    max_lng: 80.11,
};

impl Default for ServiceArea {
    fn default() -> Self {
        KUNDRATHUR_SRIPERUMBUDUR
    }
}

impl ServiceArea {
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }

    /// Uniform point inside the box.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> GeoPoint {
        GeoPoint::new(
            rng.random_range(self.min_lat..=self.max_lat),
            rng.random_range(self.min_lng..=self.max_lng),
        )
    }

    /// Give every caregiver a fresh random location.
    pub fn scatter<R: Rng + ?Sized>(
        &self,
        caregivers: Vec<Caregiver>,
        rng: &mut R,
    ) -> Vec<Caregiver> {
        caregivers
            .into_iter()
            .map(|c| {
                let location = self.random_point(rng);
                c.with_location(location)
            })
            .collect()
    }
}
