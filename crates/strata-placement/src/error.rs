//! Error types for the placement crate.

use strata_types::NodeId;

/// Errors produced while building or combining consistent hashes.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// The member list is empty.
    #[error("cannot place segments without members")]
    NoMembers,

    /// `num_owners` or `num_segments` is out of range.
    #[error("invalid placement parameters: {0}")]
    InvalidParameters(String),

    /// A member has no capacity factor, or a negative / non-finite one.
    #[error("invalid capacity factor for node {node}: {value:?}")]
    InvalidCapacity {
        /// The offending member.
        node: NodeId,
        /// The value supplied, if any.
        value: Option<f32>,
    },

    /// Capacity factors were supplied but every one of them is zero.
    #[error("there must be at least one node with a non-zero capacity factor")]
    AllZeroCapacity,

    /// Two consistent hashes cannot be combined or compared.
    #[error("incompatible consistent hashes: {0}")]
    IncompatibleHash(String),

    /// Ownership statistics were updated for a member they do not track.
    ///
    /// Always an engine defect, never bad input.
    #[error("ownership statistics do not track node {0}")]
    UnknownMember(NodeId),

    /// The finished assignment does not hold the expected number of copies.
    #[error("assignment holds {actual} segment copies, expected {expected}")]
    OwnershipMismatch {
        /// `num_segments * actual_num_owners`.
        expected: usize,
        /// Sum of owned counts over all members.
        actual: usize,
    },
}
