#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ease {
    Linear,
    InQuad,
    OutQuad,
    InOutQuad,
    InCubic,
    OutCubic,
    InOutCubic,
}

impl Ease {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::InQuad => t * t,
            Self::OutQuad => 1.0 - (1.0 - t) * (1.0 - t),
            Self::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(2) / 2.0)
                }
            }
            Self::InCubic => t * t * t,
            Self::OutCubic => 1.0 - (1.0 - t).powi(3),
            Self::InOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(3) / 2.0)
                }
            }
        }
    }
}

/// Cubic bezier through (0,0), (x1,y1), (x2,y2), (1,1), evaluated as an
/// easing curve: the input is an x coordinate, the output the curve's y.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct CubicBezier {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

const NEWTON_ITERATIONS: usize = 8;
const NEWTON_MIN_SLOPE: f64 = 1e-6;
const BISECT_ITERATIONS: usize = 32;

impl CubicBezier {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn apply(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        if x == 0.0 || x == 1.0 {
            return x;
        }
        sample(self.y1, self.y2, self.solve_t(x))
    }

    fn solve_t(&self, x: f64) -> f64 {
        let mut t = x;
        for _ in 0..NEWTON_ITERATIONS {
            let slope = sample_derivative(self.x1, self.x2, t);
            if slope.abs() < NEWTON_MIN_SLOPE {
                break;
            }
            let err = sample(self.x1, self.x2, t) - x;
            if err.abs() < 1e-9 {
                return t;
            }
            t -= err / slope;
            t = t.clamp(0.0, 1.0);
        }

        // Newton stalled on a flat segment; fall back to bisection.
        let (mut lo, mut hi) = (0.0, 1.0);
        let mut t = x;
        for _ in 0..BISECT_ITERATIONS {
            t = (lo + hi) / 2.0;
            if sample(self.x1, self.x2, t) < x {
                lo = t;
            } else {
                hi = t;
            }
        }
        t
    }
}

fn sample(a1: f64, a2: f64, t: f64) -> f64 {
    let c = 3.0 * a1;
    let b = 3.0 * (a2 - a1) - c;
    let a = 1.0 - c - b;
    ((a * t + b) * t + c) * t
}

fn sample_derivative(a1: f64, a2: f64, t: f64) -> f64 {
    let c = 3.0 * a1;
    let b = 3.0 * (a2 - a1) - c;
    let a = 1.0 - c - b;
    3.0 * a * t * t + 2.0 * b * t + c
}

/// Easing as it appears in driver configurations: either a named curve or
/// explicit bezier control points.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Easing {
    Named(Ease),
    Bezier(CubicBezier),
}

impl Default for Easing {
    fn default() -> Self {
        Self::Named(Ease::Linear)
    }
}

impl Easing {
    pub fn apply(&self, t: f64) -> f64 {
        match self {
            Self::Named(ease) => ease.apply(t),
            Self::Bezier(curve) => curve.apply(t),
        }
    }
}
