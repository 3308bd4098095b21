use gcs_proto::Location;

/// Mean Earth radius used for the spherical formulas.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Great-circle distance in meters (haversine, spherical Earth).
pub fn distance_m(p1: &Location, p2: &Location) -> f64 {
    let (lat1, lat2) = (p1.lat.to_radians(), p2.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (p2.lng - p1.lng).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().min(1.0).asin() * EARTH_RADIUS_M
}

/// Initial azimuth from `p1` to `p2` in degrees, (-180, 180], on the WGS84
/// ellipsoid (Vincenty inverse). Near-antipodal pairs where the iteration
/// does not converge fall back to the spherical bearing.
pub fn bearing_deg(p1: &Location, p2: &Location) -> f64 {
    vincenty_azimuth(p1, p2).unwrap_or_else(|| spherical_bearing(p1, p2))
}

fn spherical_bearing(p1: &Location, p2: &Location) -> f64 {
    let (lat1, lat2) = (p1.lat.to_radians(), p2.lat.to_radians());
    let dlon = (p2.lng - p1.lng).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).to_degrees()
}

fn vincenty_azimuth(p1: &Location, p2: &Location) -> Option<f64> {
    let l = (p2.lng - p1.lng).to_radians();
    let u1 = ((1.0 - WGS84_F) * p1.lat.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * p2.lat.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..200 {
        let (sin_l, cos_l) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_l).powi(2) + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_l).powi(2)).sqrt();
        if sin_sigma == 0.0 {
            // coincident points
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_l;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_l / sin_sigma;
        let cos2_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos2_alpha != 0.0 { cos_sigma - 2.0 * sin_u1 * sin_u2 / cos2_alpha } else { 0.0 };
        let c = WGS84_F / 16.0 * cos2_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos2_alpha));
        let prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma + c * sin_sigma * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - prev).abs() < 1e-12 {
            let (sin_l, cos_l) = lambda.sin_cos();
            let az = (cos_u2 * sin_l).atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_l);
            return Some(az.to_degrees());
        }
    }
    None
}

/// Signed turn from `heading` (degrees) onto the course to `target`,
/// reflected into [-180, 180].
pub fn turn_angle_deg(heading: f64, current: &Location, target: &Location) -> f64 {
    let course = bearing_deg(current, target).rem_euclid(360.0);
    let turn = heading - course;
    if turn > 180.0 {
        360.0 - turn
    } else if turn < -180.0 {
        -360.0 - turn
    } else {
        turn
    }
}

/// The point `d` meters past `p2` on the `p1 -> p2` course. Altitude scales
/// `p2.alt` by how much further from `p1` the new point lies.
pub fn point_further_away(p1: &Location, p2: &Location, d: f64) -> Location {
    let brng = bearing_deg(p1, p2).to_radians();
    let (lat2, lng2) = (p2.lat.to_radians(), p2.lng.to_radians());
    let delta = d / EARTH_RADIUS_M;

    let lat = (lat2.sin() * delta.cos() + lat2.cos() * delta.sin() * brng.cos()).asin();
    let lng = lng2 + (brng.sin() * delta.sin() * lat2.cos()).atan2(delta.cos() - lat2.sin() * lat.sin());
    let mut out = Location::new(lat.to_degrees(), lng.to_degrees(), p2.alt);

    let leg = distance_m(p1, p2);
    if leg > 0.0 {
        out.alt = p2.alt * distance_m(&out, p1) / leg;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Location> {
        vec![
            Location::new(49.2572585, -123.2423108, 70.0),
            Location::new(49.2611, -123.2500, 90.0),
            Location::new(-33.8688, 151.2093, 10.0),
            Location::new(0.0, 0.0, 0.0),
            Location::new(64.1466, -21.9426, 30.0),
        ]
    }

    #[test]
    fn distance_to_self_is_zero() {
        for p in samples() {
            assert_eq!(distance_m(&p, &p), 0.0);
        }
    }

    #[test]
    fn distance_is_symmetric() {
        let s = samples();
        for a in &s {
            for b in &s {
                assert!((distance_m(a, b) - distance_m(b, a)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn one_degree_of_latitude() {
        let a = Location::new(0.0, 0.0, 0.0);
        let b = Location::new(1.0, 0.0, 0.0);
        assert!((distance_m(&a, &b) - 111_194.93).abs() < 0.1);
    }

    #[test]
    fn bearing_cardinal_directions() {
        let o = Location::new(10.0, 10.0, 0.0);
        assert!(bearing_deg(&o, &Location::new(10.1, 10.0, 0.0)).abs() < 1e-6);
        assert!((bearing_deg(&o, &Location::new(10.0, 10.1, 0.0)) - 90.0).abs() < 0.1);
        assert!((bearing_deg(&o, &Location::new(9.9, 10.0, 0.0)).abs() - 180.0).abs() < 1e-6);
        assert!((bearing_deg(&o, &Location::new(10.0, 9.9, 0.0)) + 90.0).abs() < 0.1);
    }

    #[test]
    fn bearing_close_to_spherical_for_short_legs() {
        let a = Location::new(49.2572585, -123.2423108, 0.0);
        let b = Location::new(49.2611, -123.2500, 0.0);
        assert!((bearing_deg(&a, &b) - spherical_bearing(&a, &b)).abs() < 0.5);
    }

    #[test]
    fn turn_angle_reflects_over_half_turn() {
        let here = Location::new(0.0, 0.0, 0.0);
        let north = Location::new(0.01, 0.0, 0.0);
        let east = Location::new(0.0, 0.01, 0.0);

        assert!(turn_angle_deg(0.0, &here, &north).abs() < 1e-6);
        assert!((turn_angle_deg(90.0, &here, &north) - 90.0).abs() < 1e-6);
        // 350 - 0 = 350 -> 10
        assert!((turn_angle_deg(350.0, &here, &north) - 10.0).abs() < 1e-6);
        // 0 - 90 = -90
        assert!((turn_angle_deg(0.0, &here, &east) + 90.0).abs() < 0.1);
        for h in [0.0, 45.0, 179.0, 181.0, 270.0, 359.9] {
            let t = turn_angle_deg(h, &here, &east);
            assert!((-180.0..=180.0).contains(&t), "{} -> {}", h, t);
        }
    }

    #[test]
    fn projected_point_lies_d_beyond_target() {
        let s = samples();
        for d in [0.0, 1.0, 40.0, 250.0] {
            for pair in s.windows(2) {
                let p = point_further_away(&pair[0], &pair[1], d);
                assert!((distance_m(&pair[1], &p) - d).abs() < 1e-3, "d={} got {}", d, distance_m(&pair[1], &p));
            }
        }
    }

    #[test]
    fn projected_point_continues_the_course() {
        let a = Location::new(49.0, -123.0, 0.0);
        let b = Location::new(49.001, -123.0, 100.0);
        let p = point_further_away(&a, &b, 40.0);
        assert!(p.lat > b.lat);
        assert!((p.lng - b.lng).abs() < 1e-9);
        let expected_alt = 100.0 * distance_m(&p, &a) / distance_m(&a, &b);
        assert!((p.alt - expected_alt).abs() < 1e-9);
        assert!(p.alt > 100.0);
    }

    #[test]
    fn projection_from_coincident_points_keeps_target_altitude() {
        let a = Location::new(49.0, -123.0, 55.0);
        let p = point_further_away(&a, &a, 40.0);
        assert_eq!(p.alt, 55.0);
        assert!((distance_m(&a, &p) - 40.0).abs() < 1e-3);
    }
}
