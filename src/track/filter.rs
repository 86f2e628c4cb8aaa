use crate::detect::BoundingBox;

const VELOCITY_DECAY: f32 = 0.95;
const INITIAL_VARIANCE: f32 = 10.0;
/// Velocity components see a noisier observation than position.
const VELOCITY_NOISE_SCALE: f32 = 10.0;

/// Constant-velocity box filter with a diagonal covariance.
///
/// State is `[cx, cy, w, h, vx, vy, vw, vh]`. Velocities decay a little each
/// prediction so a coasting track slows down instead of drifting away.
#[derive(Clone, Debug)]
pub struct BoxFilter {
    state: [f32; 8],
    p: [f32; 8],
    q: f32,
    r: f32,
}

impl BoxFilter {
    pub fn new(bbox: &BoundingBox, q: f32, r: f32) -> Self {
        let [cx, cy, w, h] = measure(bbox);
        Self {
            state: [cx, cy, w, h, 0.0, 0.0, 0.0, 0.0],
            p: [INITIAL_VARIANCE; 8],
            q,
            r,
        }
    }

    /// Advance one frame and return the predicted box.
    pub fn predict(&mut self) -> BoundingBox {
        for v in &mut self.state[4..] {
            *v *= VELOCITY_DECAY;
        }
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }
        // Keep the extent positive so the prediction stays a usable box.
        self.state[2] = self.state[2].max(1.0);
        self.state[3] = self.state[3].max(1.0);

        for p in &mut self.p {
            *p += self.q;
        }
        self.current()
    }

    /// Fuse an observed box into the state.
    pub fn update(&mut self, bbox: &BoundingBox) {
        let z = measure(bbox);
        for i in 0..4 {
            let residual = z[i] - self.state[i];

            let k = self.p[i] / (self.p[i] + self.r);
            self.state[i] += k * residual;
            self.p[i] *= 1.0 - k;

            let kv = self.p[i + 4] / (self.p[i + 4] + self.r * VELOCITY_NOISE_SCALE);
            self.state[i + 4] += kv * residual;
            self.p[i + 4] *= 1.0 - kv;
        }
    }

    pub fn current(&self) -> BoundingBox {
        let [cx, cy, w, h, ..] = self.state;
        BoundingBox::from_center(cx, cy, w, h)
    }
}

fn measure(bbox: &BoundingBox) -> [f32; 4] {
    [
        (bbox.x1 + bbox.x2) / 2.0,
        (bbox.y1 + bbox.y2) / 2.0,
        bbox.width(),
        bbox.height(),
    ]
}
