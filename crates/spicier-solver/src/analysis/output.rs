//! Result sinks.

use indexmap::IndexMap;
use nalgebra::DVector;

/// Receives results as analyses produce them.
pub trait OutputSink {
    /// An accepted (or interpolated) transient point.
    fn output_tran(
        &mut self,
        time: f64,
        solution: &DVector<f64>,
        state: &DVector<f64>,
        store: &DVector<f64>,
    );

    /// A converged operating point.
    fn output_dcop(&mut self, solution: &DVector<f64>);

    /// The final solution of one `.STEP` point.
    fn output_step_result(
        &mut self,
        solution: &DVector<f64>,
        state: &DVector<f64>,
        store: &DVector<f64>,
    );

    /// A new `.STEP` point is about to run with these parameter values.
    fn begin_sweep_point(&mut self, _index: usize, _params: &IndexMap<String, f64>) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

impl OutputSink for NullOutput {
    fn output_tran(&mut self, _: f64, _: &DVector<f64>, _: &DVector<f64>, _: &DVector<f64>) {}

    fn output_dcop(&mut self, _: &DVector<f64>) {}

    fn output_step_result(&mut self, _: &DVector<f64>, _: &DVector<f64>, _: &DVector<f64>) {}
}

/// A single timepoint.
#[derive(Debug, Clone)]
pub struct TimePoint {
    pub time: f64,
    pub solution: DVector<f64>,
}

/// One finished `.STEP` point.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub index: usize,
    pub params: IndexMap<String, f64>,
    pub solution: DVector<f64>,
    pub state: DVector<f64>,
    pub store: DVector<f64>,
    /// Transient points produced for this sweep point.
    pub points: Vec<TimePoint>,
}

/// Keeps every result in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    /// Last operating point.
    pub dcop: Option<DVector<f64>>,
    /// Transient points of the current run (or sweep point).
    pub points: Vec<TimePoint>,
    pub step_results: Vec<StepResult>,
    current_index: usize,
    current_params: IndexMap<String, f64>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all time values.
    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|tp| tp.time).collect()
    }

    /// One variable across all timepoints.
    pub fn waveform(&self, index: usize) -> Vec<(f64, f64)> {
        waveform(&self.points, index)
    }

    /// Interpolate the solution at a specific time.
    ///
    /// Linear between the two nearest points; clamps to the end points.
    pub fn interpolate_at(&self, time: f64) -> Option<DVector<f64>> {
        interpolate_at(&self.points, time)
    }

    /// Get one variable at a specific time (interpolated).
    pub fn value_at(&self, index: usize, time: f64) -> Option<f64> {
        self.interpolate_at(time).map(|sol| sol[index])
    }
}

impl OutputSink for RecordingOutput {
    fn output_tran(
        &mut self,
        time: f64,
        solution: &DVector<f64>,
        _state: &DVector<f64>,
        _store: &DVector<f64>,
    ) {
        // a breakpoint restart can report the same time twice
        if let Some(last) = self.points.last_mut()
            && last.time == time
        {
            last.solution.copy_from(solution);
            return;
        }
        self.points.push(TimePoint {
            time,
            solution: solution.clone(),
        });
    }

    fn output_dcop(&mut self, solution: &DVector<f64>) {
        self.dcop = Some(solution.clone());
    }

    fn output_step_result(
        &mut self,
        solution: &DVector<f64>,
        state: &DVector<f64>,
        store: &DVector<f64>,
    ) {
        self.step_results.push(StepResult {
            index: self.current_index,
            params: self.current_params.clone(),
            solution: solution.clone(),
            state: state.clone(),
            store: store.clone(),
            points: std::mem::take(&mut self.points),
        });
    }

    fn begin_sweep_point(&mut self, index: usize, params: &IndexMap<String, f64>) {
        self.current_index = index;
        self.current_params = params.clone();
        self.points.clear();
    }
}

impl StepResult {
    pub fn waveform(&self, index: usize) -> Vec<(f64, f64)> {
        waveform(&self.points, index)
    }

    pub fn interpolate_at(&self, time: f64) -> Option<DVector<f64>> {
        interpolate_at(&self.points, time)
    }
}

fn waveform(points: &[TimePoint], index: usize) -> Vec<(f64, f64)> {
    points
        .iter()
        .map(|tp| (tp.time, tp.solution[index]))
        .collect()
}

fn interpolate_at(points: &[TimePoint], time: f64) -> Option<DVector<f64>> {
    let first = points.first()?;
    let last = points.last()?;
    if time <= first.time {
        return Some(first.solution.clone());
    }
    if time >= last.time {
        return Some(last.solution.clone());
    }

    let i = points.partition_point(|p| p.time < time);
    let (p0, p1) = (&points[i - 1], &points[i]);
    let alpha = (time - p0.time) / (p1.time - p0.time);
    Some(&p0.solution * (1.0 - alpha) + &p1.solution * alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn ramp() -> RecordingOutput {
        let mut out = RecordingOutput::new();
        let empty = DVector::zeros(0);
        for (t, v) in [(0.0, 0.0), (1.0, 2.0), (3.0, 6.0)] {
            out.output_tran(t, &dvector![v], &empty, &empty);
        }
        out
    }

    #[test]
    fn interpolation_is_linear_and_clamped() {
        let out = ramp();
        assert!((out.value_at(0, 2.0).unwrap() - 4.0).abs() < 1e-12);
        assert_eq!(out.value_at(0, -1.0), Some(0.0));
        assert_eq!(out.value_at(0, 10.0), Some(6.0));
        assert_eq!(out.times(), vec![0.0, 1.0, 3.0]);
        assert_eq!(RecordingOutput::new().interpolate_at(1.0), None);
    }

    #[test]
    fn repeated_time_overwrites() {
        let mut out = ramp();
        let empty = DVector::zeros(0);
        out.output_tran(3.0, &dvector![7.0], &empty, &empty);
        assert_eq!(out.points.len(), 3);
        assert_eq!(out.waveform(0).last(), Some(&(3.0, 7.0)));
    }

    #[test]
    fn step_results_take_the_waveform() {
        let mut out = RecordingOutput::new();
        let mut params = IndexMap::new();
        params.insert("R1".to_string(), 150.0);
        out.begin_sweep_point(1, &params);
        let empty = DVector::zeros(0);
        out.output_tran(0.0, &dvector![1.0], &empty, &empty);
        out.output_step_result(&dvector![1.0], &empty, &empty);

        assert!(out.points.is_empty());
        let result = &out.step_results[0];
        assert_eq!(result.index, 1);
        assert_eq!(result.params["R1"], 150.0);
        assert_eq!(result.points.len(), 1);
    }
}
