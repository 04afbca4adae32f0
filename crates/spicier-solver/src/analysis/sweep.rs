//! `.STEP` sweep records and the parametric loop arithmetic.
//!
//! A sweep over several parameters is the cross product of their value
//! sets. The first parameter varies fastest: parameter `k` advances once
//! every `interval_k` iterations, where `interval_k` is the product of the
//! counts of the parameters before it.

use serde::{Deserialize, Serialize};
use spicier_core::Loader;

use crate::error::{Error, Result};

/// How a parameter's values are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepKind {
    /// `start + i·step`.
    #[default]
    Lin,
    /// `num_steps` points per decade.
    Dec,
    /// `num_steps` points per octave.
    Oct,
    /// Literal values in the given order.
    List,
}

impl SweepKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "lin" => Some(Self::Lin),
            "dec" => Some(Self::Dec),
            "oct" => Some(Self::Oct),
            "list" => Some(Self::List),
            _ => None,
        }
    }
}

/// One swept parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepParam {
    pub name: String,
    pub kind: SweepKind,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub num_steps: usize,
    pub values: Vec<f64>,
    /// Number of values, set by [`setup_sweep_loop`].
    pub count: usize,
    /// Iterations between changes of this parameter.
    pub interval: usize,
    pub current_value: f64,
}

impl SweepParam {
    fn new(name: impl Into<String>, kind: SweepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            start: 0.0,
            stop: 0.0,
            step: 0.0,
            num_steps: 0,
            values: Vec::new(),
            count: 0,
            interval: 1,
            current_value: 0.0,
        }
    }

    pub fn lin(name: impl Into<String>, start: f64, stop: f64, step: f64) -> Self {
        Self {
            start,
            stop,
            step,
            ..Self::new(name, SweepKind::Lin)
        }
    }

    pub fn dec(name: impl Into<String>, start: f64, stop: f64, points_per_decade: usize) -> Self {
        Self {
            start,
            stop,
            num_steps: points_per_decade,
            ..Self::new(name, SweepKind::Dec)
        }
    }

    pub fn oct(name: impl Into<String>, start: f64, stop: f64, points_per_octave: usize) -> Self {
        Self {
            start,
            stop,
            num_steps: points_per_octave,
            ..Self::new(name, SweepKind::Oct)
        }
    }

    pub fn list(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            values,
            ..Self::new(name, SweepKind::List)
        }
    }

    /// Parse one `.STEP` line.
    ///
    /// Accepted forms:
    ///
    /// ```text
    /// .STEP PARAM=R1 LIN 100 200 50
    /// .STEP R1 100 200 50
    /// .STEP DEC PARAM=R1 1 100 2
    /// .STEP PARAM=R1 LIST 1,5,9
    /// ```
    pub fn parse(line: &str) -> Result<Self> {
        let cleaned = line.replace([',', '='], " ");
        let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
        if tokens
            .first()
            .is_some_and(|t| t.eq_ignore_ascii_case(".step"))
        {
            tokens.remove(0);
        }

        let param_keywords = tokens
            .iter()
            .filter(|t| t.eq_ignore_ascii_case("param"))
            .count();
        if param_keywords > 1 {
            log::error!("more than one PARAM in '{}'", line.trim());
            return Err(Error::MultipleSweepParams(line.trim().to_string()));
        }

        let mut rest = tokens.as_slice();
        let mut kind = None;
        if let Some((first, tail)) = rest.split_first()
            && let Some(k) = SweepKind::from_name(first)
        {
            kind = Some(k);
            rest = tail;
        }
        if let Some((first, tail)) = rest.split_first()
            && first.eq_ignore_ascii_case("param")
        {
            rest = tail;
        }
        let (name, tail) = rest
            .split_first()
            .ok_or_else(|| invalid(line, "missing parameter name"))?;
        rest = tail;
        if kind.is_none()
            && let Some((first, tail)) = rest.split_first()
            && let Some(k) = SweepKind::from_name(first)
        {
            kind = Some(k);
            rest = tail;
        }
        let kind = kind.unwrap_or_default();

        let numbers = rest
            .iter()
            .map(|t| parse_value(t).ok_or_else(|| invalid(line, &format!("bad number '{}'", t))))
            .collect::<Result<Vec<f64>>>()?;

        let param = match kind {
            SweepKind::Lin => match numbers.as_slice() {
                &[start, stop, step] => Self::lin(*name, start, stop, step),
                _ => return Err(invalid(line, "LIN needs start, stop and step")),
            },
            SweepKind::Dec | SweepKind::Oct => match numbers.as_slice() {
                &[start, stop, n] => {
                    if n < 1.0 || n.fract() != 0.0 {
                        return Err(invalid(line, "points per interval must be a positive integer"));
                    }
                    let mut p = Self::new(*name, kind);
                    p.start = start;
                    p.stop = stop;
                    p.num_steps = n as usize;
                    p
                }
                _ => return Err(invalid(line, "DEC/OCT need start, stop and points")),
            },
            SweepKind::List => {
                if numbers.is_empty() {
                    return Err(invalid(line, "LIST needs at least one value"));
                }
                Self::list(*name, numbers)
            }
        };
        Ok(param)
    }

    /// Number of values this parameter takes.
    pub fn point_count(&self) -> Result<usize> {
        let bad = |why: &str| {
            Err(Error::InvalidSweep(format!("{}: {}", self.name, why)))
        };
        match self.kind {
            SweepKind::Lin => {
                if self.step == 0.0 || !self.step.is_finite() {
                    return bad("step must be non-zero");
                }
                let span = (self.stop - self.start) / self.step;
                if span < 0.0 {
                    return bad("step points away from stop");
                }
                let mut count = span.floor() as usize;
                let next = self.start + (count as f64 + 1.0) * self.step;
                if (self.stop - next).abs() < 2.0 * f64::EPSILON * self.stop.abs().max(1.0) {
                    count += 1;
                }
                Ok(count + 1)
            }
            SweepKind::Dec | SweepKind::Oct => {
                if self.start <= 0.0 || self.stop <= 0.0 {
                    return bad("logarithmic sweeps need positive bounds");
                }
                if self.num_steps == 0 {
                    return bad("points per interval must be positive");
                }
                let span = if self.kind == SweepKind::Dec {
                    (self.start.log10() - self.stop.log10()).abs()
                } else {
                    (self.start.ln() - self.stop.ln()).abs() / std::f64::consts::LN_2
                };
                // tolerate rounding in the logarithms
                Ok((span * self.num_steps as f64 + 1.0 + 1.0e-9).floor() as usize)
            }
            SweepKind::List => {
                if self.values.is_empty() {
                    return bad("empty value list");
                }
                Ok(self.values.len())
            }
        }
    }

    /// The `i`-th value.
    pub fn value_at(&self, i: usize) -> f64 {
        let n = self.num_steps.max(1) as f64;
        let sign = if self.stop >= self.start { 1.0 } else { -1.0 };
        match self.kind {
            SweepKind::Lin => self.start + i as f64 * self.step,
            SweepKind::Dec => self.start * 10f64.powf(sign * i as f64 / n),
            SweepKind::Oct => self.start * 2f64.powf(sign * i as f64 / n),
            SweepKind::List => self.values[i % self.values.len()],
        }
    }

    /// Every value in sweep order.
    pub fn sweep_values(&self) -> Result<Vec<f64>> {
        Ok((0..self.point_count()?).map(|i| self.value_at(i)).collect())
    }
}

fn invalid(line: &str, why: &str) -> Error {
    log::error!("invalid .STEP line '{}': {}", line.trim(), why);
    Error::InvalidSweep(format!("'{}': {}", line.trim(), why))
}

/// Parse a number with an optional SPICE scale suffix (`1k`, `2.2u`,
/// `1meg`). Trailing unit letters after the suffix are ignored.
pub fn parse_value(token: &str) -> Option<f64> {
    if let Ok(v) = token.parse::<f64>() {
        return Some(v);
    }
    let split = (1..=token.len())
        .rev()
        .filter(|&i| token.is_char_boundary(i))
        .find(|&i| token[..i].parse::<f64>().is_ok())?;
    let value: f64 = token[..split].parse().ok()?;
    let suffix = token[split..].to_uppercase();
    let scale = if suffix.starts_with("MEG") {
        1e6
    } else {
        match suffix.chars().next() {
            Some('T') => 1e12,
            Some('G') => 1e9,
            Some('K') => 1e3,
            Some('M') => 1e-3,
            Some('U') => 1e-6,
            Some('N') => 1e-9,
            Some('P') => 1e-12,
            Some('F') => 1e-15,
            Some(c) if c.is_ascii_alphabetic() => 1.0,
            _ => return None,
        }
    };
    Some(value * scale)
}

/// Compute every parameter's count and interval; returns the total number
/// of sweep points.
pub fn setup_sweep_loop(params: &mut [SweepParam]) -> Result<usize> {
    let mut total = 1usize;
    for param in params.iter_mut() {
        param.count = param.point_count()?;
        param.interval = total;
        total = total
            .checked_mul(param.count)
            .ok_or_else(|| Error::InvalidSweep("sweep has too many points".to_string()))?;
        log::debug!(
            "sweep {} {:?}: {} points, interval {}",
            param.name,
            param.kind,
            param.count,
            param.interval
        );
    }
    Ok(total)
}

/// Set every parameter to its value for `iteration` and push the values
/// into the loader.
pub fn update_sweep_params(
    params: &mut [SweepParam],
    iteration: usize,
    loader: &mut dyn Loader,
) -> Result<()> {
    for param in params.iter_mut() {
        let index = (iteration / param.interval.max(1)) % param.count.max(1);
        param.current_value = param.value_at(index);
        loader.set_param(&param.name, param.current_value)?;
        log::debug!("{} = {}", param.name, param.current_value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tol * y.abs().max(1.0))
    }

    #[test]
    fn lin_enumeration() {
        let p = SweepParam::parse(".STEP PARAM=R1 LIN 100 200 50").unwrap();
        assert_eq!(p.kind, SweepKind::Lin);
        assert_eq!(p.name, "R1");
        assert_eq!(p.sweep_values().unwrap(), vec![100.0, 150.0, 200.0]);

        let mut params = vec![p];
        assert_eq!(setup_sweep_loop(&mut params).unwrap(), 3);
    }

    #[test]
    fn lin_includes_stop_despite_rounding() {
        let p = SweepParam::lin("x", 0.0, 0.3, 0.1);
        assert_eq!(p.point_count().unwrap(), 4);
    }

    #[test]
    fn dec_enumeration() {
        let p = SweepParam::parse(".STEP PARAM=R1 DEC 1 100 2").unwrap();
        let values = p.sweep_values().unwrap();
        let expected = [1.0, 10f64.sqrt(), 10.0, 1000f64.sqrt(), 100.0];
        assert!(close(&values, &expected, 1e-12), "{:?}", values);
    }

    #[test]
    fn oct_enumeration() {
        let p = SweepParam::parse("PARAM=C1 OCT 1 8 1").unwrap();
        assert!(close(&p.sweep_values().unwrap(), &[1.0, 2.0, 4.0, 8.0], 1e-12));
    }

    #[test]
    fn list_keeps_literal_order() {
        let p = SweepParam::parse(".STEP PARAM=R1 LIST 1,5,9").unwrap();
        assert_eq!(p.sweep_values().unwrap(), vec![1.0, 5.0, 9.0]);
        let q = SweepParam::parse(".step param r2 list 9 1 5").unwrap();
        assert_eq!(q.sweep_values().unwrap(), vec![9.0, 1.0, 5.0]);
    }

    #[test]
    fn two_params_on_one_line_is_fatal() {
        let err = SweepParam::parse(".STEP PARAM=R1 LIN 1 2 1 PARAM=R2 LIN 1 2 1").unwrap_err();
        assert!(matches!(err, Error::MultipleSweepParams(_)));
    }

    #[test]
    fn bare_name_and_leading_kind() {
        let p = SweepParam::parse(".STEP R1 1k 3k 1k").unwrap();
        assert_eq!(p.kind, SweepKind::Lin);
        assert_eq!(p.sweep_values().unwrap(), vec![1e3, 2e3, 3e3]);

        let q = SweepParam::parse(".STEP DEC PARAM=Vin 1 10 1").unwrap();
        assert_eq!(q.kind, SweepKind::Dec);
        assert_eq!(q.name, "Vin");
    }

    #[test]
    fn malformed_lines() {
        assert!(SweepParam::parse(".STEP PARAM=R1 LIN 1 2").is_err());
        assert!(SweepParam::parse(".STEP PARAM=R1 DEC 1 10 0.5").is_err());
        assert!(SweepParam::parse(".STEP PARAM=R1 LIST").is_err());
        assert!(SweepParam::parse(".STEP").is_err());
        assert!(SweepParam::parse(".STEP R1 1 2 abc").is_err());
        assert!(SweepParam::lin("x", 1.0, 2.0, -1.0).point_count().is_err());
        assert!(SweepParam::dec("x", 0.0, 2.0, 1).point_count().is_err());
    }

    #[test]
    fn suffixes() {
        assert_eq!(parse_value("2.5"), Some(2.5));
        assert_eq!(parse_value("1e3"), Some(1e3));
        assert_eq!(parse_value("1k"), Some(1e3));
        assert_eq!(parse_value("1MEG"), Some(1e6));
        assert!((parse_value("10u").unwrap() - 1e-5).abs() < 1e-20);
        assert_eq!(parse_value("5V"), Some(5.0));
        assert_eq!(parse_value("abc"), None);
    }

    #[test]
    fn cross_product_intervals() {
        let mut params = vec![
            SweepParam::list("a", vec![1.0, 2.0]),
            SweepParam::list("b", vec![10.0, 20.0, 30.0]),
        ];
        assert_eq!(setup_sweep_loop(&mut params).unwrap(), 6);
        assert_eq!(params[0].interval, 1);
        assert_eq!(params[1].interval, 2);

        let combos: Vec<(f64, f64)> = (0..6)
            .map(|i| {
                let a = &params[0];
                let b = &params[1];
                (
                    a.value_at((i / a.interval) % a.count),
                    b.value_at((i / b.interval) % b.count),
                )
            })
            .collect();
        assert_eq!(
            combos,
            vec![(1.0, 10.0), (2.0, 10.0), (1.0, 20.0), (2.0, 20.0), (1.0, 30.0), (2.0, 30.0)]
        );
    }
}
