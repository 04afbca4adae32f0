//! Independent source waveforms.

use std::f64::consts::PI;

/// Time dependence of an independent source.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    Dc(f64),
    /// `PULSE(v1 v2 td tr tf pw per)`; `per = 0` means a single pulse.
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },
    /// `SIN(vo va freq td theta)`.
    Sin {
        vo: f64,
        va: f64,
        freq: f64,
        td: f64,
        theta: f64,
    },
}

/// Pulse periods scanned per breakpoint query.
const MAX_PERIODS: usize = 100_000;

impl Waveform {
    pub fn dc(value: f64) -> Self {
        Waveform::Dc(value)
    }

    pub fn pulse(v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64) -> Self {
        Waveform::Pulse {
            v1,
            v2,
            td,
            tr,
            tf,
            pw,
            per,
        }
    }

    pub fn sin(vo: f64, va: f64, freq: f64, td: f64, theta: f64) -> Self {
        Waveform::Sin {
            vo,
            va,
            freq,
            td,
            theta,
        }
    }

    /// Value at time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            Waveform::Dc(v) => v,
            Waveform::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => {
                if t < td {
                    return v1;
                }
                let mut local = t - td;
                if per > 0.0 {
                    local %= per;
                }
                if local < tr {
                    v1 + (v2 - v1) * local / tr
                } else if local < tr + pw {
                    v2
                } else if local < tr + pw + tf {
                    v2 + (v1 - v2) * (local - tr - pw) / tf
                } else {
                    v1
                }
            }
            Waveform::Sin {
                vo,
                va,
                freq,
                td,
                theta,
            } => {
                if t <= td {
                    return vo;
                }
                let dt = t - td;
                vo + va * (-dt * theta).exp() * (2.0 * PI * freq * dt).sin()
            }
        }
    }

    /// The level a `.STEP` over the source name changes: the DC value, the
    /// pulse's second level or the sine amplitude.
    pub fn level(&self) -> f64 {
        match *self {
            Waveform::Dc(v) => v,
            Waveform::Pulse { v2, .. } => v2,
            Waveform::Sin { va, .. } => va,
        }
    }

    pub fn set_level(&mut self, value: f64) {
        match self {
            Waveform::Dc(v) => *v = value,
            Waveform::Pulse { v2, .. } => *v2 = value,
            Waveform::Sin { va, .. } => *va = value,
        }
    }

    /// Corners of the waveform in `(start, end]`.
    pub fn breakpoints(&self, start: f64, end: f64, out: &mut Vec<f64>) {
        let mut push = |t: f64| {
            if t > start && t <= end {
                out.push(t);
            }
        };
        match *self {
            Waveform::Dc(_) => {}
            Waveform::Sin { td, .. } => push(td),
            Waveform::Pulse {
                td,
                tr,
                tf,
                pw,
                per,
                ..
            } => {
                let corners = [0.0, tr, tr + pw, tr + pw + tf];
                if per <= 0.0 {
                    for c in corners {
                        push(td + c);
                    }
                    return;
                }
                let first = ((start - td) / per).floor().max(0.0) as usize;
                for k in first..first.saturating_add(MAX_PERIODS) {
                    let base = td + k as f64 * per;
                    if base > end {
                        break;
                    }
                    for c in corners {
                        push(base + c);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_shape() {
        let w = Waveform::pulse(0.0, 1.0, 1.0, 0.5, 0.5, 2.0, 0.0);
        assert_eq!(w.value_at(0.5), 0.0);
        assert!((w.value_at(1.25) - 0.5).abs() < 1e-12);
        assert_eq!(w.value_at(2.0), 1.0);
        assert!((w.value_at(3.75) - 0.5).abs() < 1e-12);
        assert_eq!(w.value_at(10.0), 0.0);
    }

    #[test]
    fn periodic_pulse_repeats() {
        let w = Waveform::pulse(0.0, 1.0, 0.0, 0.1, 0.1, 0.3, 1.0);
        assert_eq!(w.value_at(0.2), w.value_at(1.2));
        assert_eq!(w.value_at(0.9), 0.0);
    }

    #[test]
    fn pulse_corners() {
        let w = Waveform::pulse(0.0, 1.0, 1.0, 0.5, 0.5, 2.0, 0.0);
        let mut bps = Vec::new();
        w.breakpoints(0.0, 10.0, &mut bps);
        assert_eq!(bps, vec![1.0, 1.5, 3.5, 4.0]);

        bps.clear();
        w.breakpoints(1.5, 3.6, &mut bps);
        assert_eq!(bps, vec![3.5]);
    }

    #[test]
    fn periodic_corners_inside_window() {
        let w = Waveform::pulse(0.0, 1.0, 0.0, 0.25, 0.25, 0.25, 1.0);
        let mut bps = Vec::new();
        w.breakpoints(1.0, 2.0, &mut bps);
        assert_eq!(bps, vec![1.25, 1.5, 1.75, 2.0]);
    }

    #[test]
    fn sine_waits_for_delay() {
        let w = Waveform::sin(1.0, 2.0, 1.0, 0.5, 0.0);
        assert_eq!(w.value_at(0.25), 1.0);
        assert!((w.value_at(0.75) - 3.0).abs() < 1e-12);
        let mut bps = Vec::new();
        w.breakpoints(0.0, 1.0, &mut bps);
        assert_eq!(bps, vec![0.5]);
    }

    #[test]
    fn level_tracks_kind() {
        let mut w = Waveform::pulse(0.0, 1.0, 0.0, 0.1, 0.1, 0.3, 1.0);
        w.set_level(5.0);
        assert_eq!(w.level(), 5.0);
        let mut dc = Waveform::dc(1.0);
        dc.set_level(2.0);
        assert_eq!(dc.value_at(3.0), 2.0);
    }
}
