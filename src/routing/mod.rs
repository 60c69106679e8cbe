//! Routing state
//!
//! The two peer tables a node maintains: the [`RoutingTable`] of overlay
//! peers (with its group-matrix view) and the [`ClientRoutingTable`] of
//! directly-attached leaf peers.

mod client_table;
mod table;

pub use client_table::ClientRoutingTable;
pub use table::RoutingTable;
