use crate::{
    ease::Easing,
    model::{AnimationId, FrameTime, NodeTag},
};

/// Fully resolved motion-law configuration, as handed to the driver
/// registry. Dynamic descriptor fields (`velocity`, `initialVelocity`) have
/// already been evaluated by the time this exists.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DriverConfig {
    #[serde(rename_all = "camelCase")]
    Timing {
        to_value: f64,
        duration: f64,
        #[serde(default)]
        easing: Easing,
    },
    #[serde(rename_all = "camelCase")]
    Spring {
        to_value: f64,
        stiffness: f64,
        damping: f64,
        mass: f64,
        initial_velocity: f64,
        overshoot_clamping: bool,
        rest_speed_threshold: f64,
        rest_displacement_threshold: f64,
    },
    Decay {
        velocity: f64,
        deceleration: f64,
    },
    Clock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Pending,
    Running,
    Finished,
    Cancelled,
}

/// One in-flight animation: advances its target value node once per frame
/// until the motion law reports completion or the driver is cancelled.
#[derive(Clone, Debug)]
pub struct AnimationDriver {
    id: AnimationId,
    target: NodeTag,
    config: DriverConfig,
    state: DriverState,
    start_time: FrameTime,
    from_value: f64,
    last_value: f64,
}

impl AnimationDriver {
    pub fn new(id: AnimationId, target: NodeTag, config: DriverConfig) -> Self {
        Self {
            id,
            target,
            config,
            state: DriverState::Pending,
            start_time: FrameTime(0.0),
            from_value: 0.0,
            last_value: 0.0,
        }
    }

    pub fn id(&self) -> AnimationId {
        self.id
    }

    pub fn target(&self) -> NodeTag {
        self.target
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, DriverState::Finished | DriverState::Cancelled)
    }

    /// Synchronous cancellation: the driver is removed from the active set by
    /// the registry within the same call, so no further ticks arrive.
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.state = DriverState::Cancelled;
        }
    }

    /// Advances the motion law to `now` and returns the target's new value.
    /// The first tick establishes the baseline (start time and from-value).
    pub fn tick(&mut self, now: FrameTime, current: f64) -> f64 {
        match self.state {
            DriverState::Pending => {
                self.start_time = now;
                self.from_value = current;
                self.last_value = current;
                self.state = DriverState::Running;
            }
            DriverState::Running => {}
            DriverState::Finished | DriverState::Cancelled => return current,
        }

        let elapsed_ms = now.0 - self.start_time.0;
        let value = match self.config {
            DriverConfig::Timing {
                to_value,
                duration,
                easing,
            } => {
                if duration <= 0.0 || elapsed_ms >= duration {
                    self.state = DriverState::Finished;
                    to_value
                } else {
                    let progress = easing.apply(elapsed_ms / duration);
                    self.from_value + (to_value - self.from_value) * progress
                }
            }
            DriverConfig::Spring {
                to_value,
                stiffness,
                damping,
                mass,
                initial_velocity,
                overshoot_clamping,
                rest_speed_threshold,
                rest_displacement_threshold,
            } => {
                let t = elapsed_ms / 1000.0;
                let (mut position, velocity) = spring_at(
                    t,
                    self.from_value,
                    to_value,
                    stiffness,
                    damping,
                    mass,
                    initial_velocity,
                );

                let overshooting = overshoot_clamping
                    && stiffness != 0.0
                    && if self.from_value < to_value {
                        position > to_value
                    } else {
                        position < to_value
                    };
                let at_rest = velocity.abs() <= rest_speed_threshold
                    && ((to_value - position).abs() <= rest_displacement_threshold
                        || stiffness == 0.0);

                if overshooting || at_rest {
                    self.state = DriverState::Finished;
                    if stiffness != 0.0 {
                        position = to_value;
                    }
                }
                position
            }
            DriverConfig::Decay {
                velocity,
                deceleration,
            } => {
                let kd = 1.0 - deceleration;
                let value = self.from_value + (velocity / kd) * (1.0 - (-kd * elapsed_ms).exp());
                if (value - self.last_value).abs() < 0.1 {
                    self.state = DriverState::Finished;
                }
                self.last_value = value;
                value
            }
            DriverConfig::Clock => elapsed_ms,
        };

        value
    }
}

/// Closed-form damped harmonic oscillator, sampled at `t` seconds. Returns
/// (position, velocity).
fn spring_at(
    t: f64,
    from_value: f64,
    to_value: f64,
    stiffness: f64,
    damping: f64,
    mass: f64,
    initial_velocity: f64,
) -> (f64, f64) {
    let c = damping;
    let m = mass;
    let k = stiffness;
    let v0 = -initial_velocity;
    let x0 = to_value - from_value;

    let zeta = c / (2.0 * (k * m).sqrt());
    let omega0 = (k / m).sqrt();
    let omega1 = omega0 * (1.0 - zeta * zeta).abs().sqrt();

    if zeta < 1.0 {
        // Underdamped.
        let envelope = (-zeta * omega0 * t).exp();
        let sin = (omega1 * t).sin();
        let cos = (omega1 * t).cos();
        let position =
            to_value - envelope * (((v0 + zeta * omega0 * x0) / omega1) * sin + x0 * cos);
        let velocity = zeta * omega0 * envelope * ((sin * (v0 + zeta * omega0 * x0)) / omega1
            + x0 * cos)
            - envelope * (cos * (v0 + zeta * omega0 * x0) - omega1 * x0 * sin);
        (position, velocity)
    } else {
        // Critically damped.
        let envelope = (-omega0 * t).exp();
        let position = to_value - envelope * (x0 + (v0 + omega0 * x0) * t);
        let velocity = envelope * (v0 * (t * omega0 - 1.0) + t * x0 * omega0 * omega0);
        (position, velocity)
    }
}
