//! Partition rebalancing: move protocol, merge protocol, and the
//! rebalancer passes.
//!
//! The flow on a routing change: the membership layer publishes a new
//! table, the routing epoch is bumped, and the rebalancer wakes. For every
//! partition whose table entry names another node, the local maps are
//! exported, shipped with [`FragmentPackage`] inside a
//! [`Message::MoveFragment`](crate::network::Message) request, and deleted
//! locally once the peer acknowledges. The receiving side validates
//! ownership and merges entry by entry, settling conflicts with
//! [`version::resolve`](crate::storage::version::resolve).

mod merger;
mod package;
mod rebalancer;

pub use package::FragmentPackage;
