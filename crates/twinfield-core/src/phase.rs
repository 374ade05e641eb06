//! Named broadcast phases and the fixed daily pipeline table.
//!
//! Each simulated day runs through the same ordered sequence of phases.
//! Downstream subsystems (weather, soil, phenology, partitioning, stock)
//! subscribe to individual phases and rely on the ordering: partitioning
//! reads values produced during arbitration, growth reads values produced
//! during partitioning, and so on.
//!
//! # Design Principles
//!
//! - The order lives in one const table, [`DAILY_PIPELINE`] -- never
//!   derived from subscriber registration order, never reordered at
//!   runtime.
//! - Calendar-gated phases ([`Gate`]) are evaluated against the day that
//!   is about to run, before the clock advances.
//! - One-time phases (commencement and termination signals) are not part
//!   of the daily table; the clock fires them from its lifecycle
//!   operations.

use chrono::{Datelike, NaiveDate, Weekday};

/// A named broadcast point in the simulation.
///
/// Daily phases fire once per simulated day in [`DAILY_PIPELINE`] order.
/// The remaining variants are one-time lifecycle signals fired by the
/// clock's `commence` and `done` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// One-time: the simulation is about to commence.
    Commencing,
    /// One-time: commencement proper; carries the cancellation token.
    DoCommence,
    /// One-time: first setup signal after commencement.
    StartOfSimulation,
    /// One-time: last initialisation signal before the first day.
    FinalInitialise,
    /// One-time: the simulation has reached its end date.
    EndOfSimulation,

    /// Read today's met data.
    DoWeather,
    /// Per-day state reset for all subscribers.
    DoDailyInit,
    /// The day has started.
    StartOfDay,
    /// Fires only on the first day of a month.
    StartOfMonth,
    /// Fires only on the first day of a year.
    StartOfYear,
    /// Fires only on the configured week-start day.
    StartOfWeek,
    /// Management rules run their daily logic.
    DoManagement,
    /// Pest and disease damage is applied.
    DoPestDiseaseDamage,
    /// Canopy energy balance arbitration.
    DoEnergyArbitration,
    /// Soil erosion calculations.
    DoSoilErosion,
    /// Soil water movement.
    DoSoilWaterMovement,
    /// Soil temperature update.
    DoSoilTemperature,
    /// Soil organic matter turnover.
    DoSoilOrganicMatter,
    /// Surface residue decomposition.
    DoSurfaceOrganicMatterDecomposition,
    /// Transpiration demand update.
    DoUpdateWaterDemand,
    /// Water supply/demand arbitration.
    DoWaterArbitration,
    /// Pre-phenology adjustments.
    PrePhenology,
    /// Phenological development.
    DoPhenology,
    /// Water-limited growth.
    DoPotentialGrowth,
    /// Alternative photosynthesis calculations, between potential growth
    /// and potential partitioning.
    DoDcapst,
    /// Potential biomass partitioning.
    DoPotentialPartitioning,
    /// Nutrient supply/demand arbitration.
    DoNutrientArbitration,
    /// Nutrient-limited biomass partitioning.
    DoActualPartitioning,
    /// Nutrient-limited growth.
    DoActualGrowth,
    /// Partitioning for the day is complete.
    PartitioningComplete,
    /// Stock (grazing animal) processes.
    DoStock,
    /// Pest and disease lifecycle processes.
    DoLifecycle,
    /// End-of-day state update.
    DoUpdate,
    /// Post-update management calculations.
    DoManagementCalculations,
    /// The day is over.
    EndOfDay,
}

impl Phase {
    /// The phase name as subscribers know it.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Commencing => "Commencing",
            Self::DoCommence => "DoCommence",
            Self::StartOfSimulation => "StartOfSimulation",
            Self::FinalInitialise => "FinalInitialise",
            Self::EndOfSimulation => "EndOfSimulation",
            Self::DoWeather => "DoWeather",
            Self::DoDailyInit => "DoDailyInit",
            Self::StartOfDay => "StartOfDay",
            Self::StartOfMonth => "StartOfMonth",
            Self::StartOfYear => "StartOfYear",
            Self::StartOfWeek => "StartOfWeek",
            Self::DoManagement => "DoManagement",
            Self::DoPestDiseaseDamage => "DoPestDiseaseDamage",
            Self::DoEnergyArbitration => "DoEnergyArbitration",
            Self::DoSoilErosion => "DoSoilErosion",
            Self::DoSoilWaterMovement => "DoSoilWaterMovement",
            Self::DoSoilTemperature => "DoSoilTemperature",
            Self::DoSoilOrganicMatter => "DoSoilOrganicMatter",
            Self::DoSurfaceOrganicMatterDecomposition => "DoSurfaceOrganicMatterDecomposition",
            Self::DoUpdateWaterDemand => "DoUpdateWaterDemand",
            Self::DoWaterArbitration => "DoWaterArbitration",
            Self::PrePhenology => "PrePhenology",
            Self::DoPhenology => "DoPhenology",
            Self::DoPotentialGrowth => "DoPotentialGrowth",
            Self::DoDcapst => "DoDcapst",
            Self::DoPotentialPartitioning => "DoPotentialPartitioning",
            Self::DoNutrientArbitration => "DoNutrientArbitration",
            Self::DoActualPartitioning => "DoActualPartitioning",
            Self::DoActualGrowth => "DoActualGrowth",
            Self::PartitioningComplete => "PartitioningComplete",
            Self::DoStock => "DoStock",
            Self::DoLifecycle => "DoLifecycle",
            Self::DoUpdate => "DoUpdate",
            Self::DoManagementCalculations => "DoManagementCalculations",
            Self::EndOfDay => "EndOfDay",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Calendar predicate gating a pipeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Fires every day.
    Always,
    /// Fires when the day-of-month is 1.
    FirstOfMonth,
    /// Fires when the day-of-year is 1.
    FirstOfYear,
    /// Fires when the weekday equals the configured week start.
    WeekStart,
}

impl Gate {
    /// Evaluate the gate for the given day.
    pub fn holds(self, today: NaiveDate, week_start: Weekday) -> bool {
        match self {
            Self::Always => true,
            Self::FirstOfMonth => today.day() == 1,
            Self::FirstOfYear => today.ordinal() == 1,
            Self::WeekStart => today.weekday() == week_start,
        }
    }
}

/// One entry of the daily pipeline: a phase and its calendar gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStep {
    /// The phase to fire.
    pub phase: Phase,
    /// The calendar predicate controlling whether it fires today.
    pub gate: Gate,
}

const fn every_day(phase: Phase) -> PipelineStep {
    PipelineStep {
        phase,
        gate: Gate::Always,
    }
}

/// The complete daily pipeline, in firing order.
///
/// Later phases may depend on values computed by earlier ones; the table
/// is the single authority on that ordering.
pub const DAILY_PIPELINE: [PipelineStep; 30] = [
    every_day(Phase::DoWeather),
    every_day(Phase::DoDailyInit),
    every_day(Phase::StartOfDay),
    PipelineStep {
        phase: Phase::StartOfMonth,
        gate: Gate::FirstOfMonth,
    },
    PipelineStep {
        phase: Phase::StartOfYear,
        gate: Gate::FirstOfYear,
    },
    PipelineStep {
        phase: Phase::StartOfWeek,
        gate: Gate::WeekStart,
    },
    every_day(Phase::DoManagement),
    every_day(Phase::DoPestDiseaseDamage),
    every_day(Phase::DoEnergyArbitration),
    every_day(Phase::DoSoilErosion),
    every_day(Phase::DoSoilWaterMovement),
    every_day(Phase::DoSoilTemperature),
    every_day(Phase::DoSoilOrganicMatter),
    every_day(Phase::DoSurfaceOrganicMatterDecomposition),
    every_day(Phase::DoUpdateWaterDemand),
    every_day(Phase::DoWaterArbitration),
    every_day(Phase::PrePhenology),
    every_day(Phase::DoPhenology),
    every_day(Phase::DoPotentialGrowth),
    every_day(Phase::DoDcapst),
    every_day(Phase::DoPotentialPartitioning),
    every_day(Phase::DoNutrientArbitration),
    every_day(Phase::DoActualPartitioning),
    every_day(Phase::DoActualGrowth),
    every_day(Phase::PartitioningComplete),
    every_day(Phase::DoStock),
    every_day(Phase::DoLifecycle),
    every_day(Phase::DoUpdate),
    every_day(Phase::DoManagementCalculations),
    every_day(Phase::EndOfDay),
];
