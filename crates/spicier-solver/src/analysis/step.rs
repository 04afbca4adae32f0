//! `.STEP` parameter sweeps around a main analysis.

use indexmap::IndexMap;

use super::base::{AnalysisBase, AnalysisCore};
use super::dcop::Dcop;
use super::sweep::{SweepParam, setup_sweep_loop, update_sweep_params};
use super::transient::Transient;
use super::{AnalysisHooks, AnalysisKind, RunContext};
use crate::error::{Error, Result};

/// The analysis repeated at every sweep point.
pub enum MainAnalysis {
    Dcop(Dcop),
    Transient(Box<Transient>),
}

impl MainAnalysis {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            MainAnalysis::Dcop(_) => AnalysisKind::Dcop,
            MainAnalysis::Transient(_) => AnalysisKind::Transient,
        }
    }

    pub fn core(&self) -> &AnalysisCore {
        match self {
            MainAnalysis::Dcop(a) => a.core(),
            MainAnalysis::Transient(a) => a.core(),
        }
    }

    pub fn core_mut(&mut self) -> &mut AnalysisCore {
        match self {
            MainAnalysis::Dcop(a) => a.core_mut(),
            MainAnalysis::Transient(a) => a.core_mut(),
        }
    }

    pub fn hooks_mut(&mut self) -> &mut dyn AnalysisHooks {
        match self {
            MainAnalysis::Dcop(a) => a as &mut dyn AnalysisHooks,
            MainAnalysis::Transient(a) => a.as_mut() as &mut dyn AnalysisHooks,
        }
    }

    pub fn hooks(&self) -> &dyn AnalysisHooks {
        match self {
            MainAnalysis::Dcop(a) => a as &dyn AnalysisHooks,
            MainAnalysis::Transient(a) => a.as_ref() as &dyn AnalysisHooks,
        }
    }
}

/// Runs the main analysis once per point of the parameter cross product.
pub struct Step {
    main: MainAnalysis,
    params: Vec<SweepParam>,
    step_loop_size: usize,
    step_loop_iter: usize,
    current: IndexMap<String, f64>,
    stats: AnalysisBase,
    points_failed: usize,
    first_error: Option<Error>,
}

impl Step {
    /// Validates the sweep before anything runs.
    pub fn new(main: MainAnalysis, mut params: Vec<SweepParam>) -> Result<Self> {
        if params.is_empty() {
            return Err(Error::InvalidSweep("no sweep parameters".to_string()));
        }
        let step_loop_size = setup_sweep_loop(&mut params)?;
        Ok(Self {
            main,
            params,
            step_loop_size,
            step_loop_iter: 0,
            current: IndexMap::new(),
            stats: AnalysisBase::new(),
            points_failed: 0,
            first_error: None,
        })
    }

    /// Parse `.STEP` lines, one parameter each.
    pub fn from_lines<S: AsRef<str>>(main: MainAnalysis, lines: &[S]) -> Result<Self> {
        let params = lines
            .iter()
            .map(|line| SweepParam::parse(line.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(main, params)
    }

    /// Total number of sweep points.
    pub fn step_loop_size(&self) -> usize {
        self.step_loop_size
    }

    pub fn params(&self) -> &[SweepParam] {
        &self.params
    }

    /// Parameter values of the current (or last) point, in declaration
    /// order.
    pub fn current_values(&self) -> &IndexMap<String, f64> {
        &self.current
    }

    pub fn main(&self) -> &MainAnalysis {
        &self.main
    }

    /// Points whose main analysis failed.
    pub fn points_failed(&self) -> usize {
        self.points_failed
    }
}

impl AnalysisHooks for Step {
    fn base(&self) -> &AnalysisBase {
        &self.stats
    }

    fn init(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        self.step_loop_size = setup_sweep_loop(&mut self.params)?;
        self.stats.reset();
        self.points_failed = 0;
        self.first_error = None;
        log::info!(
            "step sweep: {} points over {} parameters, main analysis {:?}",
            self.step_loop_size,
            self.params.len(),
            self.main.kind()
        );
        Ok(())
    }

    fn loop_process(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        for iter in 0..self.step_loop_size {
            self.step_loop_iter = iter;
            update_sweep_params(&mut self.params, iter, &mut *ctx.loader)?;
            self.current = self
                .params
                .iter()
                .map(|p| (p.name.clone(), p.current_value))
                .collect();

            let core = self.main.core_mut();
            core.sec.reset_all(&core.tia);
            core.ds.set_zero_history();
            core.state.step_loop_iter = iter;
            self.main.hooks_mut().reset_for_step_analysis();

            ctx.output.begin_sweep_point(iter, &self.current);
            match self.main.hooks_mut().run(ctx) {
                Ok(()) => self.process_successful_step(ctx)?,
                Err(err @ Error::Load(_)) => return Err(err),
                Err(err) => {
                    log::warn!("step point {} ({:?}) failed: {}", iter, self.current, err);
                    self.first_error.get_or_insert(err);
                    self.process_failed_step(ctx)?;
                }
            }
        }
        match self.first_error.take() {
            Some(err) => {
                log::error!(
                    "{} of {} step points failed",
                    self.points_failed,
                    self.step_loop_size
                );
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn process_successful_step(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        let ds = &self.main.core().ds;
        ctx.output
            .output_step_result(&ds.curr_solution, &ds.curr_state, &ds.curr_store);
        self.stats.accumulate(self.main.hooks().base());
        Ok(())
    }

    fn process_failed_step(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        self.points_failed += 1;
        self.stats.accumulate(self.main.hooks().base());
        Ok(())
    }

    fn finish(&mut self, _ctx: &mut RunContext<'_>) -> Result<()> {
        log::info!(
            "step sweep done: {} points, {} Newton iterations",
            self.step_loop_size,
            self.stats.newton_iterations
        );
        Ok(())
    }

    fn reset_for_step_analysis(&mut self) {
        self.step_loop_iter = 0;
        self.points_failed = 0;
        self.first_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::base::AnalysisConfig;
    use crate::analysis::output::RecordingOutput;
    use crate::analysis::testing::RcLoader;
    use crate::tia::TiaParams;

    #[test]
    fn dcop_follows_swept_source() {
        let mut loader = RcLoader::new(1.0, 1.0, 0.0);
        let dcop = Dcop::new(&loader, AnalysisConfig::default()).unwrap();
        let mut step = Step::from_lines(
            MainAnalysis::Dcop(dcop),
            &[".STEP PARAM=VS LIST 1,5,9"],
        )
        .unwrap();
        assert_eq!(step.step_loop_size(), 3);

        let mut out = RecordingOutput::new();
        {
            let mut ctx = RunContext::new(&mut loader, &mut out);
            step.run(&mut ctx).unwrap();
        }
        let finals: Vec<f64> = out.step_results.iter().map(|r| r.solution[0]).collect();
        assert_eq!(finals.len(), 3);
        for (v, expected) in finals.iter().zip([1.0, 5.0, 9.0]) {
            assert!((v - expected).abs() < 1e-9, "{} vs {}", v, expected);
        }
        assert_eq!(out.step_results[2].params["VS"], 9.0);
        assert_eq!(step.current_values()["VS"], 9.0);
    }

    #[test]
    fn transient_rerun_per_point() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0);
        let mut tia = TiaParams::transient(1.0);
        tia.no_dcop = true;
        let tran = Transient::new(&loader, AnalysisConfig::new(tia)).unwrap();
        let mut step = Step::from_lines(
            MainAnalysis::Transient(Box::new(tran)),
            &[".STEP PARAM=R LIN 1 2 1"],
        )
        .unwrap();

        let mut out = RecordingOutput::new();
        {
            let mut ctx = RunContext::new(&mut loader, &mut out);
            step.run(&mut ctx).unwrap();
        }
        assert_eq!(out.step_results.len(), 2);
        for (result, r) in out.step_results.iter().zip([1.0, 2.0]) {
            let expected = 1.0 - (-1.0f64 / r).exp();
            assert!(
                (result.solution[0] - expected).abs() < 5e-3,
                "R = {}: {} vs {}",
                r,
                result.solution[0],
                expected
            );
            // every point restarts from zero
            assert_eq!(result.points[0].solution[0], 0.0);
        }
        assert!(step.base().successful_steps > 0);
    }

    #[test]
    fn two_params_abort_before_running() {
        let loader = RcLoader::new(1.0, 1.0, 1.0);
        let dcop = Dcop::new(&loader, AnalysisConfig::default()).unwrap();
        let err = Step::from_lines(
            MainAnalysis::Dcop(dcop),
            &[".STEP PARAM=R LIN 1 2 1 PARAM=VS LIN 1 2 1"],
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::MultipleSweepParams(_)));
    }

    #[test]
    fn unknown_parameter_aborts() {
        let mut loader = RcLoader::new(1.0, 1.0, 1.0);
        let dcop = Dcop::new(&loader, AnalysisConfig::default()).unwrap();
        let mut step = Step::from_lines(MainAnalysis::Dcop(dcop), &[".STEP PARAM=X LIST 1"]).unwrap();
        let mut out = RecordingOutput::new();
        let mut ctx = RunContext::new(&mut loader, &mut out);
        assert!(matches!(step.run(&mut ctx), Err(Error::Load(_))));
    }
}
