//! Analysis drivers.
//!
//! Every analysis runs through the same skeleton ([`AnalysisHooks::run`]):
//! `init`, then `loop_process` (which calls the success or failure hook
//! per attempt), then `finish`. A `.STEP` sweep wraps a DC operating point
//! or a transient and re-runs it once per parameter point.

pub mod base;
pub mod dcop;
pub mod output;
pub mod step;
pub mod sweep;
pub mod transient;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use spicier_core::Loader;

pub use base::{AnalysisBase, AnalysisConfig, AnalysisCore};
pub use dcop::{Dcop, GminStepping, run_operating_point};
pub use output::{NullOutput, OutputSink, RecordingOutput, StepResult, TimePoint};
pub use step::{MainAnalysis, Step};
pub use sweep::{SweepKind, SweepParam, parse_value};
pub use transient::{FailedStep, Transient};

use crate::error::{Error, Result};
use crate::options::SimulationOptions;

/// What an analysis run talks to: the circuit and the result sink.
pub struct RunContext<'a> {
    pub loader: &'a mut dyn Loader,
    pub output: &'a mut dyn OutputSink,
}

impl<'a> RunContext<'a> {
    pub fn new(loader: &'a mut dyn Loader, output: &'a mut dyn OutputSink) -> Self {
        Self { loader, output }
    }
}

/// Life cycle shared by all analyses.
pub trait AnalysisHooks {
    /// Counters for the run so far.
    fn base(&self) -> &AnalysisBase;

    fn init(&mut self, ctx: &mut RunContext<'_>) -> Result<()>;

    fn loop_process(&mut self, ctx: &mut RunContext<'_>) -> Result<()>;

    fn process_successful_step(&mut self, ctx: &mut RunContext<'_>) -> Result<()>;

    fn process_failed_step(&mut self, ctx: &mut RunContext<'_>) -> Result<()>;

    fn finish(&mut self, ctx: &mut RunContext<'_>) -> Result<()>;

    /// Adjust the predicted solution before Newton starts.
    fn handle_predictor(&mut self) -> Result<()> {
        Ok(())
    }

    /// Clear per-run bookkeeping before a sweep re-runs this analysis.
    fn reset_for_step_analysis(&mut self);

    fn run(&mut self, ctx: &mut RunContext<'_>) -> Result<()> {
        self.init(ctx)?;
        self.loop_process(ctx)?;
        self.finish(ctx)
    }
}

/// Analysis type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    #[default]
    Dcop,
    Transient,
    Step,
}

impl AnalysisKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "dcop" | "op" | "dc" => Some(Self::Dcop),
            "transient" | "tran" => Some(Self::Transient),
            "step" => Some(Self::Step),
            _ => None,
        }
    }
}

/// A runnable analysis.
pub enum Analysis {
    Dcop(Dcop),
    Transient(Box<Transient>),
    Step(Box<Step>),
}

impl Analysis {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            Analysis::Dcop(_) => AnalysisKind::Dcop,
            Analysis::Transient(_) => AnalysisKind::Transient,
            Analysis::Step(_) => AnalysisKind::Step,
        }
    }

    pub fn hooks_mut(&mut self) -> &mut dyn AnalysisHooks {
        match self {
            Analysis::Dcop(a) => a as &mut dyn AnalysisHooks,
            Analysis::Transient(a) => a.as_mut() as &mut dyn AnalysisHooks,
            Analysis::Step(a) => a.as_mut() as &mut dyn AnalysisHooks,
        }
    }

    pub fn hooks(&self) -> &dyn AnalysisHooks {
        match self {
            Analysis::Dcop(a) => a as &dyn AnalysisHooks,
            Analysis::Transient(a) => a.as_ref() as &dyn AnalysisHooks,
            Analysis::Step(a) => a.as_ref() as &dyn AnalysisHooks,
        }
    }
}

impl From<MainAnalysis> for Analysis {
    fn from(main: MainAnalysis) -> Self {
        match main {
            MainAnalysis::Dcop(a) => Analysis::Dcop(a),
            MainAnalysis::Transient(a) => Analysis::Transient(a),
        }
    }
}

/// Top-level driver: builds the analysis named by the options and runs it.
pub struct Simulation {
    analysis: Analysis,
}

impl Simulation {
    pub fn new(loader: &dyn Loader, options: &SimulationOptions) -> Result<Self> {
        options.validate()?;
        let config = options.analysis_config();
        let gmin = options.gmin_stepping();

        let main = match options.analysis {
            AnalysisKind::Dcop => MainAnalysis::Dcop(Dcop::new(loader, config)?.with_gmin_stepping(gmin)),
            AnalysisKind::Transient => MainAnalysis::Transient(Box::new(
                Transient::new(loader, config)?.with_gmin_stepping(gmin),
            )),
            AnalysisKind::Step => {
                return Err(Error::InvalidOption(
                    "a step sweep needs a dcop or transient main analysis".to_string(),
                ));
            }
        };

        let analysis = if options.step.is_empty() {
            main.into()
        } else {
            Analysis::Step(Box::new(Step::from_lines(main, &options.step)?))
        };
        log::debug!("built {:?} analysis", analysis.kind());
        Ok(Self { analysis })
    }

    pub fn from_analysis(analysis: Analysis) -> Self {
        Self { analysis }
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    pub fn statistics(&self) -> &AnalysisBase {
        self.analysis.hooks().base()
    }

    pub fn run(&mut self, loader: &mut dyn Loader, output: &mut dyn OutputSink) -> Result<()> {
        let mut ctx = RunContext::new(loader, output);
        let result = self.analysis.hooks_mut().run(&mut ctx);
        let stats = self.statistics();
        log::info!(
            "{:?}: {} steps accepted, {} rejected, {} Newton iterations",
            self.analysis.kind(),
            stats.successful_steps,
            stats.failed_steps,
            stats.newton_iterations
        );
        result
    }
}
