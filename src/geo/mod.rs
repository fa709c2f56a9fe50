//! Great-circle distances between rider and customer positions.

use crate::models::rider::Coordinates;

/// Mean Earth radius.
const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Haversine distance in kilometres. Symmetric, and 0 for identical points.
pub fn haversine_km(from: &Coordinates, to: &Coordinates) -> f64 {
    let (phi_from, phi_to) = (from.latitude.to_radians(), to.latitude.to_radians());
    let half_dphi = (phi_to - phi_from) / 2.0;
    let half_dlambda = (to.longitude - from.longitude).to_radians() / 2.0;

    let h = half_dphi.sin().powi(2) + phi_from.cos() * phi_to.cos() * half_dlambda.sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::haversine_km;
    use crate::models::rider::Coordinates;

    fn at(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates {
            latitude,
            longitude,
        }
    }

    #[test]
    fn same_point_is_zero() {
        let nairobi = at(-1.2921, 36.8219);
        assert!(haversine_km(&nairobi, &nairobi) < 1e-9);
    }

    #[test]
    fn lagos_to_accra() {
        let lagos = at(6.5244, 3.3792);
        let accra = at(5.6037, -0.1870);

        let there = haversine_km(&lagos, &accra);
        let back = haversine_km(&accra, &lagos);

        assert!((there - 408.0).abs() < 15.0);
        assert!((there - back).abs() < 1e-9);
    }

    #[test]
    fn antipodes_are_half_the_circumference() {
        let distance = haversine_km(&at(0.0, 0.0), &at(0.0, 180.0));
        assert!((distance - std::f64::consts::PI * 6_371.0).abs() < 1e-6);
    }
}
