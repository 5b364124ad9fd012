//! Cluster Module
//!
//! Everything that knows about index nodes:
//! - `registry`: live node catalog shared by the whole process
//! - `rendezvous`: highest-random-weight node selection
//! - `placement`: replica selection for reads/writes and candidate ordering
//! - `node`: the client interface to an index node and its variants
//! - `discovery`: reconciliation of membership reports into the registry

pub mod discovery;
pub mod node;
pub mod placement;
pub mod registry;
pub mod rendezvous;

pub use node::{NodeClient, NodeConnector};
pub use registry::{NodeRegistry, RegisteredNode};
pub use rendezvous::RendezvousHash;
