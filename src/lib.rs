//! gridsum — Hierarchical sum-allreduce over a logical process grid.
//!
//! Sums a vector of doubles across P processes by arranging them on a
//! rows × columns grid and reducing in two phases: once within each row,
//! then once within each column. A calibrated cost model picks the
//! (row algorithm, column algorithm, column count) triple with the lowest
//! predicted completion time before any data moves.
//!
//! # Architecture
//!
//! ```text
//! calibration CSV          selection                 execution
//! ┌─────────────┐   ┌─────────────────────┐   ┌────────────────────┐
//! │ alpha,beta, │ → │ 25 algorithm pairs   │ → │ split rows, reduce │
//! │ gamma per   │   │ × grid shapes,       │   │ barrier            │
//! │ algorithm   │   │ argmin predicted T   │   │ split cols, reduce │
//! └─────────────┘   └─────────────────────┘   └────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```ignore
//! use gridsum::{hierarchical_allreduce, select_strategy, LocalCluster};
//!
//! let table = gridsum::load_calibration(path)?;
//! let strategy = select_strategy(8, 4096, &table)?;
//!
//! let cluster = LocalCluster::new(8)?;
//! let results = cluster.run(move |comm| {
//!     let input = vec![1.0; 4096];
//!     hierarchical_allreduce(comm, &input, &strategy)
//! })?;
//! ```

pub mod algorithm;
pub mod calibration;
pub mod cost;
pub mod doubling;
pub mod error;
pub mod factors;
pub mod hierarchy;
pub mod linear;
pub mod local;
pub mod rabenseifner;
pub mod ring;
pub mod select;
pub mod transport;

// Re-exports
pub use algorithm::{Algorithm, ALGORITHMS, NUM_ALGORITHMS};
pub use calibration::{load_calibration, parse_calibration};
pub use cost::{predicted_time, CostCoefficients, CostTable};
pub use doubling::recursive_doubling_allreduce;
pub use error::GridError;
pub use factors::factors_of;
pub use hierarchy::hierarchical_allreduce;
pub use linear::linear_allreduce;
pub use local::{LocalCluster, LocalComm};
pub use rabenseifner::rabenseifner_allreduce;
pub use ring::{ring_allreduce, ring_segmented_allreduce, SEGMENT_DOUBLES};
pub use select::{select_strategy, Strategy};
pub use transport::{Communicator, Tag};
