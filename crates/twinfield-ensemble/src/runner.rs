//! Lock-step ensemble execution.
//!
//! The runner owns N fully independent clones of a prepared template
//! and advances them together: every lifecycle call fans the same
//! operation out to all replicas on a bounded worker pool and joins
//! before returning. Replicas share nothing after construction except
//! the pool and one cancellation token, so a step is an embarrassingly
//! parallel fan-out -- no cross-replica synchronization happens inside
//! the call, only the join at the end.
//!
//! Failures never mask each other: a fan-out call lets every replica
//! run to completion of that call and reports all failures together in
//! one [`AggregateError`].

use chrono::NaiveDate;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};
use twinfield_core::cancel::CancelToken;
use twinfield_core::clock::{Clock as _, ClockError, SimulationClock};
use twinfield_model::simulation::{Simulation, SimulationError};
use twinfield_model::tree::{ComponentHandle, GraphError, ModelNode};

use crate::prepare::{EnsemblePreparer, PrepareError};

/// Errors raised by ensemble construction or by one replica during a
/// fan-out call.
#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    /// An ensemble must contain at least one replica.
    #[error("ensemble requires at least one replica")]
    ZeroReplicates,

    /// The worker pool could not be built.
    #[error("failed to build worker pool: {source}")]
    Pool {
        /// The underlying pool build error.
        #[from]
        source: rayon::ThreadPoolBuildError,
    },

    /// A replica could not be cloned from the template.
    #[error("replica {replica} could not be cloned: {source}")]
    CloneFailed {
        /// The replica index.
        replica: usize,
        /// The underlying clone error.
        #[source]
        source: GraphError,
    },

    /// A clone has no discoverable simulation root.
    #[error("replica {replica} has no simulation root")]
    MissingSimulation {
        /// The replica index.
        replica: usize,
    },

    /// A clone has no discoverable steppable clock.
    #[error("replica {replica} has no steppable clock")]
    MissingClock {
        /// The replica index.
        replica: usize,
    },

    /// Template preparation failed.
    #[error(transparent)]
    Prepare(#[from] PrepareError),

    /// A tree or component access failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A replica's clock failed.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// A replica's simulation wiring or lifecycle failed.
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// One replica's failure within a fan-out call.
#[derive(Debug, thiserror::Error)]
#[error("replica {replica}: {source}")]
pub struct ReplicaFailure {
    /// The failing replica's index.
    pub replica: usize,
    /// What went wrong on that replica.
    #[source]
    pub source: EnsembleError,
}

/// One or more replicas failed during a fan-out call. Every failure is
/// collected; the siblings that succeeded have still completed the
/// call.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed on {} of {total} replica(s)", .failures.len())]
pub struct AggregateError {
    /// The fan-out operation that failed.
    pub operation: &'static str,
    /// Total replicas the operation was fanned out to.
    pub total: usize,
    /// Per-replica failures, in replica order.
    pub failures: Vec<ReplicaFailure>,
}

/// One independent clone of the template, with its clock indexed for
/// fan-out.
#[derive(Debug)]
pub struct Replica {
    index: usize,
    root: ModelNode,
    clock: ComponentHandle<SimulationClock>,
}

impl Replica {
    /// The replica's position in the ensemble.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The replica's model graph.
    pub const fn root(&self) -> &ModelNode {
        &self.root
    }

    /// Mutable access to the replica's model graph, for reading or
    /// adjusting per-replica state between steps.
    pub const fn root_mut(&mut self) -> &mut ModelNode {
        &mut self.root
    }

    /// The replica's clock handle.
    pub const fn clock(&self) -> &ComponentHandle<SimulationClock> {
        &self.clock
    }
}

/// Owns N replicas and drives them in lock-step.
pub struct EnsembleRunner {
    replicas: Vec<Replica>,
    pool: ThreadPool,
    num_workers: usize,
    cancel: Option<CancelToken>,
}

impl EnsembleRunner {
    /// Prepare `template` for ensemble use, then clone it `replicates`
    /// times on a bounded worker pool and index each clone's simulation
    /// and clock.
    ///
    /// `max_parallelism` bounds the worker pool; `None` uses available
    /// hardware parallelism.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError::ZeroReplicates`] for an empty ensemble,
    /// [`EnsembleError::CloneFailed`] if a clone refuses, or
    /// [`EnsembleError::MissingSimulation`] /
    /// [`EnsembleError::MissingClock`] if a clone lacks the expected
    /// roots.
    pub fn new(
        mut template: ModelNode,
        replicates: usize,
        max_parallelism: Option<usize>,
    ) -> Result<Self, EnsembleError> {
        if replicates == 0 {
            return Err(EnsembleError::ZeroReplicates);
        }

        let num_workers = max_parallelism.unwrap_or_else(available_workers).max(1);
        let pool = ThreadPoolBuilder::new().num_threads(num_workers).build()?;

        EnsemblePreparer::prepare(&mut template)?;

        // Clone production order across workers is irrelevant: every
        // clone is identical at construction. Indexing is positional.
        let clones: Vec<Result<ModelNode, GraphError>> = pool.install(|| {
            (0..replicates)
                .into_par_iter()
                .map(|_index| template.clone_tree())
                .collect()
        });

        let mut replicas = Vec::with_capacity(replicates);
        for (index, cloned) in clones.into_iter().enumerate() {
            let root = cloned.map_err(|source| EnsembleError::CloneFailed {
                replica: index,
                source,
            })?;
            if root.find_component::<Simulation>().is_none() {
                return Err(EnsembleError::MissingSimulation { replica: index });
            }
            let clock = root
                .find_component::<SimulationClock>()
                .ok_or(EnsembleError::MissingClock { replica: index })?;
            replicas.push(Replica { index, root, clock });
        }

        info!(replicates, num_workers, "ensemble constructed");
        Ok(Self {
            replicas,
            pool,
            num_workers,
            cancel: None,
        })
    }

    /// Number of replicas.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// All replicas, in positional order.
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// One replica, for reading or adjusting its state between steps.
    pub fn replica_mut(&mut self, index: usize) -> Option<&mut Replica> {
        self.replicas.get_mut(index)
    }

    /// The worker pool bound.
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Rebuild the worker pool with a new bound (minimum 1).
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError::Pool`] if the pool cannot be rebuilt.
    pub fn set_num_workers(&mut self, workers: usize) -> Result<(), EnsembleError> {
        let bounded = workers.max(1);
        self.pool = ThreadPoolBuilder::new().num_threads(bounded).build()?;
        self.num_workers = bounded;
        Ok(())
    }

    /// The shared cancellation token, once the ensemble has commenced.
    pub const fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    /// Fan out simulation preparation (link wiring and one-time setup)
    /// to every replica.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] collecting every failing replica.
    pub fn prepare(&mut self) -> Result<(), AggregateError> {
        self.fan_out("prepare", |replica| {
            replica
                .root
                .prepare_simulation()
                .map_err(EnsembleError::from)
        })
    }

    /// Create the run's shared cancellation token and fan out
    /// `commence` to every replica's clock.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] collecting every failing replica.
    pub fn commence(&mut self) -> Result<(), AggregateError> {
        let token = CancelToken::new();
        self.cancel = Some(token.clone());
        self.fan_out("commence", move |replica| {
            replica.clock.with_mut(|clock| clock.commence(token.clone()))??;
            Ok(())
        })
    }

    /// Advance every replica by one simulated day and join.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] collecting every failing replica; the
    /// siblings have still completed their day.
    pub fn step(&mut self) -> Result<(), AggregateError> {
        self.fan_out("step", |replica| {
            replica.clock.with_mut(SimulationClock::step)??;
            Ok(())
        })
    }

    /// Finish the run: fan out clock `done` to every replica, then --
    /// only after every replica has finished -- fan out simulation
    /// cleanup, then cancel the shared token.
    ///
    /// # Errors
    ///
    /// Returns the `done` barrier's [`AggregateError`] if any replica
    /// failed there, otherwise the cleanup barrier's.
    pub fn done(&mut self) -> Result<(), AggregateError> {
        let done_result = self.fan_out("done", |replica| {
            replica.clock.with_mut(SimulationClock::done)??;
            Ok(())
        });
        let cleanup_result = self.fan_out("cleanup", |replica| {
            replica
                .root
                .cleanup_simulation()
                .map_err(EnsembleError::from)
        });

        if let Some(token) = &self.cancel {
            token.cancel();
        }

        done_result?;
        cleanup_result
    }

    /// The ensemble's current day, read from replica 0 (representative:
    /// all replicas share identical date ranges by construction).
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError`] if replica 0's clock is unreachable.
    pub fn today(&self) -> Result<Option<NaiveDate>, EnsembleError> {
        let first = self.replicas.first().ok_or(EnsembleError::ZeroReplicates)?;
        Ok(first.clock.with(|clock| clock.today())?)
    }

    /// The ensemble's end date, read from replica 0.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError`] if the date cannot be resolved.
    pub fn end_date(&self) -> Result<NaiveDate, EnsembleError> {
        let first = self.replicas.first().ok_or(EnsembleError::ZeroReplicates)?;
        Ok(first.clock.with(|clock| clock.end_date())??)
    }

    /// Fraction of the run completed, read from replica 0.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError`] if the dates cannot be resolved.
    pub fn fraction_complete(&self) -> Result<f64, EnsembleError> {
        let first = self.replicas.first().ok_or(EnsembleError::ZeroReplicates)?;
        Ok(first.clock.with(|clock| clock.fraction_complete())??)
    }

    /// Run `operation` on every replica concurrently (bounded by the
    /// worker pool), join, and collect every failure.
    fn fan_out<F>(&mut self, operation: &'static str, op: F) -> Result<(), AggregateError>
    where
        F: Fn(&mut Replica) -> Result<(), EnsembleError> + Send + Sync,
    {
        let replicas = &mut self.replicas;
        let failures: Vec<ReplicaFailure> = self.pool.install(|| {
            replicas
                .par_iter_mut()
                .filter_map(|replica| {
                    op(replica).err().map(|source| ReplicaFailure {
                        replica: replica.index,
                        source,
                    })
                })
                .collect()
        });

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(
                operation,
                failed = failures.len(),
                total = replicas.len(),
                "fan-out completed with failures"
            );
            Err(AggregateError {
                operation,
                total: replicas.len(),
                failures,
            })
        }
    }
}

impl std::fmt::Debug for EnsembleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsembleRunner")
            .field("replicas", &self.replicas.len())
            .field("num_workers", &self.num_workers)
            .field("commenced", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

fn available_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}
