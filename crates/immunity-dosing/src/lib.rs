#![deny(warnings)]

//! Dose bookkeeping: the second-dose backlog, allocation of a dose stream
//! across age groups, and priority-driven redistribution of a stratified
//! dose table.
//!
//! Every operation here preserves the number of doses given on each day;
//! violations surface as [`SimError::ConservationViolation`].

mod allocator;
mod backlog;
mod priority;
mod redistribute;

pub use allocator::{AgeStratifiedAllocator, Allocation, AllocationSeries, SubGroup};
pub use backlog::{check_conservation, split_doses, DaySplit, DoseBacklog, SplitSeries};
pub use priority::PriorityQueue;
pub use redistribute::{redistribute, Redistribution, RedistributionPolicy};

pub use immunity_core::SimError;
