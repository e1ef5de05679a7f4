//! Built-in backend passes, in pipeline order.
//!
//! - [`Allocation`]: lay out the grid (optionally hill-climbing over plans)
//! - [`Mapping`]: bind register and I/O symbols to cells
//! - [`Scheduling`]: abstract schedule under the layout's channel budget
//! - [`Routing`]: concrete paths and lock intervals on the cell grid

mod allocation;
mod mapping;
mod routing;
mod scheduling;

pub use allocation::Allocation;
pub use mapping::Mapping;
pub use routing::Routing;
pub use scheduling::Scheduling;
