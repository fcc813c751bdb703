//! 角度辅助函数

use std::f64::consts::PI;

/// 将角度归一化到 (-π, π]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// 从 `from` 到 `to` 的最短角度差，结果在 (-π, π]
pub fn shortest_angular_distance(from: f64, to: f64) -> f64 {
    normalize_angle(to - from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_normalize_angle_range() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < EPS);
        assert!((normalize_angle(-3.0 * PI) - PI).abs() < EPS);
        assert!((normalize_angle(0.5) - 0.5).abs() < EPS);
        assert!((normalize_angle(-PI) - PI).abs() < EPS);
    }

    #[test]
    fn test_shortest_angular_distance_wraps() {
        let d = shortest_angular_distance(3.0, -3.0);
        assert!((d - (2.0 * PI - 6.0)).abs() < EPS);
        assert!((shortest_angular_distance(0.1, -0.1) + 0.2).abs() < EPS);
    }
}
