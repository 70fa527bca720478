//! The pipeline orchestrator.
//!
//! Steps run strictly in order: resolve, fetch, derive, stage, load. Each step
//! is callable on its own against a [`RunContext`] (so an external scheduler
//! can drive them one at a time) and [`Pipeline::run`] chains all five.
//!
//! Failure policy:
//! - resolve, stage and load failures end the run in `Failed`
//! - per-symbol fetch failures only shrink the batch
//! - a load failure leaves the staged artifact in place for manual replay
//! - cancellation is honored at every step boundary; once loading starts it
//!   runs to commit or rollback

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use indexflow_core::data::{fetch_all, DataProvider, FetchOptions, FetchProgress, FetchSummary, LogProgress};
use indexflow_core::derive::derive_batch;
use indexflow_core::domain::Batch;
use indexflow_core::resolver::{EntityResolver, ResolutionError};
use indexflow_core::staging::{StagedArtifact, StagingError, StagingStore};
use indexflow_core::warehouse::{DuckWarehouse, LoadError, LoadReport, Warehouse, WarehouseLoader};

use crate::config::{ConfigError, PipelineConfig};
use crate::context::{RunContext, RunState, Step};
use crate::report::{FailedEntity, RunReport};

/// Why a single step did not complete.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("run cancelled before {step}")]
    Cancelled { step: Step },

    #[error("{step} requested while run is {state}")]
    OutOfOrder { step: Step, state: RunState },

    #[error("no staged artifact in run context")]
    MissingArtifact,
}

/// A failed run: the failing step, the cause and any artifact already staged.
#[derive(Debug, Error)]
#[error("{step} step failed: {source}")]
pub struct RunError {
    pub step: Step,
    #[source]
    pub source: StepError,
    pub artifact: Option<PathBuf>,
    pub report: Box<RunReport>,
}

pub struct Pipeline {
    resolver: EntityResolver,
    provider: Arc<dyn DataProvider>,
    store: StagingStore,
    warehouse: Box<dyn Warehouse>,
    fetch_options: FetchOptions,
    progress: Box<dyn FetchProgress>,
}

impl Pipeline {
    pub fn new(
        resolver: EntityResolver,
        provider: Arc<dyn DataProvider>,
        store: StagingStore,
        warehouse: Box<dyn Warehouse>,
    ) -> Self {
        Self {
            resolver,
            provider,
            store,
            warehouse,
            fetch_options: FetchOptions::default(),
            progress: Box::new(LogProgress),
        }
    }

    /// Wire the production stack: configured membership source, Yahoo
    /// provider, Parquet staging and the DuckDB warehouse.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let warehouse = DuckWarehouse::open(&config.warehouse.path, &config.warehouse.table)
            .map_err(|e| ConfigError::Build {
                component: "warehouse",
                reason: e.to_string(),
            })?;
        Ok(Self::new(
            config.resolver()?,
            config.provider()?,
            StagingStore::new(&config.staging.root),
            Box::new(warehouse),
        )
        .with_fetch_options(config.fetch_options()))
    }

    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn FetchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &StagingStore {
        &self.store
    }

    pub fn warehouse(&self) -> &dyn Warehouse {
        &*self.warehouse
    }

    fn enter(ctx: &mut RunContext, step: Step) -> Result<(), StepError> {
        let state = ctx.state();
        if state.step() != Some(step) {
            return Err(StepError::OutOfOrder { step, state });
        }
        if ctx.cancel_token().is_cancelled() {
            tracing::warn!(run = %ctx.stamp(), step = %step, "run cancelled");
            ctx.fail(step);
            return Err(StepError::Cancelled { step });
        }
        tracing::info!(run = %ctx.stamp(), step = %step, "step started");
        Ok(())
    }

    fn finish<T>(ctx: &mut RunContext, step: Step, result: Result<T, StepError>) -> Result<T, StepError> {
        match result {
            Ok(value) => {
                ctx.advance();
                Ok(value)
            }
            Err(e) => {
                tracing::error!(run = %ctx.stamp(), step = %step, error = %e, "step failed");
                ctx.fail(step);
                Err(e)
            }
        }
    }

    /// Resolve the run's entity list.
    pub fn resolve(&self, ctx: &mut RunContext) -> Result<Vec<String>, StepError> {
        Self::enter(ctx, Step::Resolve)?;
        let result = self.resolver.resolve().map_err(StepError::from);
        Self::finish(ctx, Step::Resolve, result)
    }

    /// Fetch every symbol. Never fails the run: failed symbols are recorded in
    /// the summary and left out of the batch.
    pub fn fetch(&self, ctx: &mut RunContext, symbols: &[String]) -> Result<FetchSummary, StepError> {
        Self::enter(ctx, Step::Fetch)?;
        let summary = fetch_all(
            &self.provider,
            symbols,
            ctx.window(),
            &self.fetch_options,
            &*self.progress,
            ctx.cancel_token(),
        );
        for failure in &summary.failures {
            tracing::warn!(symbol = %failure.symbol, error = %failure.error, "entity excluded from batch");
        }
        tracing::info!(
            provider = self.provider.name(),
            fetched = summary.series.len(),
            empty = summary.empty.len(),
            failed = summary.failures.len(),
            window = %ctx.window(),
            "fetch complete"
        );
        Self::finish(ctx, Step::Fetch, Ok(summary))
    }

    pub fn derive(&self, ctx: &mut RunContext, summary: &FetchSummary) -> Result<Batch, StepError> {
        Self::enter(ctx, Step::Derive)?;
        let batch = derive_batch(&summary.series);
        tracing::info!(rows = batch.len(), symbols = batch.symbols().len(), "batch derived");
        Self::finish(ctx, Step::Derive, Ok(batch))
    }

    /// Write the batch to staging and record its location in the context.
    pub fn stage(&self, ctx: &mut RunContext, batch: &Batch) -> Result<StagedArtifact, StepError> {
        Self::enter(ctx, Step::Stage)?;
        let result = self.store.write(ctx.stamp(), batch).map_err(StepError::from);
        if let Ok(artifact) = &result {
            ctx.set_artifact(artifact.path.clone());
        }
        Self::finish(ctx, Step::Stage, result)
    }

    /// Merge the artifact recorded by [`Pipeline::stage`].
    pub fn load(&self, ctx: &mut RunContext) -> Result<LoadReport, StepError> {
        Self::enter(ctx, Step::Load)?;
        let result = match ctx.artifact().map(Path::to_path_buf) {
            Some(path) => WarehouseLoader::new(&self.store, &*self.warehouse)
                .load(&path)
                .map_err(StepError::from),
            None => Err(StepError::MissingArtifact),
        };
        Self::finish(ctx, Step::Load, result)
    }

    /// Run all five steps.
    pub fn run(&self, ctx: &mut RunContext) -> Result<RunReport, RunError> {
        let mut report = RunReport::new(ctx);
        let outcome = self.drive(ctx, &mut report);

        report.state = ctx.state();
        report.artifact = ctx.artifact().map(Path::to_path_buf);
        report.finished_at = Some(Utc::now());

        match outcome {
            Ok(()) => {
                tracing::info!(
                    run = %ctx.stamp(),
                    rows = report.batch_rows,
                    failed = report.failed.len(),
                    "run complete"
                );
                Ok(report)
            }
            Err((step, source)) => {
                report.failed_step = Some(step);
                report.error = Some(source.to_string());
                if let Some(path) = &report.artifact {
                    tracing::error!(run = %ctx.stamp(), artifact = %path.display(), "staged artifact kept for replay");
                }
                Err(RunError {
                    step,
                    source,
                    artifact: report.artifact.clone(),
                    report: Box::new(report),
                })
            }
        }
    }

    fn drive(&self, ctx: &mut RunContext, report: &mut RunReport) -> Result<(), (Step, StepError)> {
        let at = |step: Step| move |e: StepError| (step, e);

        let symbols = self.resolve(ctx).map_err(at(Step::Resolve))?;
        report.entities = symbols.len();

        let summary = self.fetch(ctx, &symbols).map_err(at(Step::Fetch))?;
        report.fetched = summary.series.keys().cloned().collect();
        report.empty = summary.empty.clone();
        report.failed = summary
            .failures
            .iter()
            .map(|f| FailedEntity {
                symbol: f.symbol.clone(),
                error: f.error.to_string(),
            })
            .collect();

        let batch = self.derive(ctx, &summary).map_err(at(Step::Derive))?;
        report.batch_rows = batch.len();

        self.stage(ctx, &batch).map_err(at(Step::Stage))?;

        let loaded = self.load(ctx).map_err(at(Step::Load))?;
        report.merge = Some(loaded.merge);
        Ok(())
    }
}
